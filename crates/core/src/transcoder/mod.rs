//! Transcode driver: ffmpeg invocation, capability narrowing and
//! attempt orchestration.

mod args;
mod config;
mod driver;
mod error;
mod ffmpeg;

pub use args::{parse_unrecognized_option, FlagGroup, TranscodeArgs};
pub use config::TranscoderConfig;
pub use driver::{
    is_hls_source, DownloadDriver, DriveRequest, DriverOutcome, DriverProgress, DriverProgressFn,
};
pub use error::TranscoderError;
pub use ffmpeg::{FfmpegRunner, TranscodeOutcome, TranscodeProgress, TranscodeProgressFn};
