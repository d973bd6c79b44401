//! Teleoperation telemetry backend.
//!
//! Ingests robot teleoperation frames over long-lived WebSocket streams,
//! persists them in batches, stores recorded video chunks, and offline
//! fuses frames with video into replay-ready episode datasets.

pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
