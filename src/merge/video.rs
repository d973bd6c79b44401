//! Video frame sources for the merge pipeline.
//!
//! DESIGN
//! ======
//! The engine speaks `VideoSource` (fps, frame count, seek-and-decode one
//! frame as RGB); the ffmpeg implementation lives behind `FfmpegOpener`.
//! Decode is synchronous by nature, so the engine runs the whole
//! align/fuse stage on the blocking thread pool.

use std::path::Path;
use std::sync::Once;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("no video stream in {0}")]
    NoVideoStream(String),
    #[error("decode error: {0}")]
    Decode(#[from] ffmpeg::Error),
}

/// One decoded frame, tightly packed RGB24 (`len == width * height * 3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Seekable decoded-frame access for one video file.
pub trait VideoSource: Send {
    fn fps(&self) -> f64;

    fn frame_count(&self) -> i64;

    fn duration_secs(&self) -> f64 {
        if self.fps() > 0.0 {
            self.frame_count() as f64 / self.fps()
        } else {
            0.0
        }
    }

    /// Decode the frame at `frame_idx`, or `None` when it is out of range
    /// or the decoder hits EOF first.
    fn frame_at(&mut self, frame_idx: i64) -> Result<Option<RgbImage>, VideoError>;
}

/// Opens a `VideoSource` from a local file path.
pub trait VideoOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the container cannot be opened or holds no
    /// video stream.
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, VideoError>;
}

// =============================================================================
// FFMPEG BACKEND
// =============================================================================

static FFMPEG_INIT: Once = Once::new();

pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, VideoError> {
        FFMPEG_INIT.call_once(|| {
            let _ = ffmpeg::init();
        });
        Ok(Box::new(FfmpegSource::open(path)?))
    }
}

pub struct FfmpegSource {
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::video::Video,
    scaler: SwsContext,
    stream_idx: usize,
    tb_num: i32,
    tb_den: i32,
    fps: f64,
    total_frames: i64,
    width: u32,
    height: u32,
    last_pts: i64,
}

// Safety: `FfmpegSource` is only ever moved to another thread (e.g. via
// `spawn_blocking`), never shared concurrently; all ffmpeg handles are
// exclusively owned by this struct.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    fn open(path: &Path) -> Result<Self, VideoError> {
        let path = path.to_path_buf();
        let ictx = input(&path)?;
        let stream_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| VideoError::NoVideoStream(path.display().to_string()))?
            .index();

        let (tb_num, tb_den, fps, total_frames) = {
            let stream = ictx.stream(stream_idx).ok_or(ffmpeg::Error::StreamNotFound)?;
            let tb = stream.time_base();
            let rate = stream.avg_frame_rate();
            let fps = if rate.denominator() > 0 {
                f64::from(rate.numerator()) / f64::from(rate.denominator())
            } else {
                0.0
            };
            let mut frames = stream.frames();
            if frames <= 0 && fps > 0.0 {
                // Container without a frame count: estimate from duration.
                let duration_secs =
                    stream.duration() as f64 * f64::from(tb.numerator()) / f64::from(tb.denominator().max(1));
                #[allow(clippy::cast_possible_truncation)]
                {
                    frames = (duration_secs * fps).round() as i64;
                }
            }
            (tb.numerator(), tb.denominator(), fps, frames)
        };

        // Second context for decoder parameters; `Parameters` borrows from
        // the stream, which borrows the input we keep.
        let ictx2 = input(&path)?;
        let stream2 = ictx2.stream(stream_idx).ok_or(ffmpeg::Error::StreamNotFound)?;
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?;
        let decoder = dec_ctx.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = SwsContext::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            stream_idx,
            tb_num,
            tb_den,
            fps,
            total_frames,
            width,
            height,
            last_pts: -1,
        })
    }

    fn secs_to_pts(&self, secs: f64) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (secs * f64::from(self.tb_den) / f64::from(self.tb_num.max(1))) as i64
        }
    }

    /// Decode forward until `target_pts`, returning the first frame at or
    /// past it.
    fn advance_to(&mut self, target_pts: i64) -> Result<Option<RgbImage>, VideoError> {
        for result in self.ictx.packets() {
            let (stream, packet) = result?;
            if stream.index() != self.stream_idx {
                continue;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::util::frame::video::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts = decoded.pts().unwrap_or(self.last_pts + 1);
                self.last_pts = pts;
                if pts < target_pts {
                    continue;
                }
                let mut out = ffmpeg::util::frame::video::Video::empty();
                self.scaler.run(&decoded, &mut out)?;
                return Ok(Some(copy_rgb24(&out, self.width, self.height)));
            }
        }
        Ok(None)
    }
}

/// Copy scaler output into a tightly packed buffer, dropping row padding.
fn copy_rgb24(frame: &ffmpeg::util::frame::video::Video, width: u32, height: u32) -> RgbImage {
    let stride = frame.stride(0);
    let raw = frame.data(0);
    let row_bytes = width as usize * 3;
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        data.extend_from_slice(&raw[start..start + row_bytes]);
    }
    RgbImage { width, height, data }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> i64 {
        self.total_frames
    }

    fn frame_at(&mut self, frame_idx: i64) -> Result<Option<RgbImage>, VideoError> {
        if frame_idx < 0 || (self.total_frames > 0 && frame_idx >= self.total_frames) || self.fps <= 0.0 {
            return Ok(None);
        }

        let target_pts = self.secs_to_pts(frame_idx as f64 / self.fps);
        if target_pts <= self.last_pts {
            // Backward request: keyframe-aligned re-seek, then decode forward.
            self.ictx.seek(target_pts, ..target_pts)?;
            self.decoder.flush();
            self.last_pts = target_pts.saturating_sub(1);
        }
        self.advance_to(target_pts)
    }
}

#[cfg(test)]
#[path = "video_test.rs"]
mod tests;
