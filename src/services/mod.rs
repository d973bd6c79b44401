pub mod cache;
pub mod connection;
pub mod storage;
pub mod telemetry;
pub mod video;
