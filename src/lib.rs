pub mod composition;
pub mod config;
pub mod error;
pub mod export;
pub mod filler;
pub mod media;
pub mod merge;
pub mod sink;
pub mod transcode;
pub mod transform;

#[cfg(test)]
mod testing;

pub use composition::{CompositionBuilder, CompositionPlan};
pub use config::{config, MergeConfig, MergeProfile};
pub use error::MergeError;
pub use merge::{parse_media_uri, MergeVideo};
pub use sink::ResultSink;
