pub mod bluesky;
pub mod sweep;
pub mod storage;
pub mod config;
pub mod error;
pub mod utils;

pub use error::{Result, SweepError};
pub use config::Config;
