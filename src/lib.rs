//! A minimal RTSP/RTP server that streams a stored H.264 elementary stream
//! to one connected client per TCP control connection.

pub mod config;
pub mod error;
pub mod h264;
pub mod pool;
pub mod rtp;
pub mod rtsp;
pub mod transport;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
