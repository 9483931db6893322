pub mod artifact;
pub mod audio;
pub mod classify;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod store;
pub mod transcribe;
pub mod video;
pub mod vision;

pub use config::Config;
pub use error::{IngestError, Result};
pub use pipeline::{print_summary, IngestReport, Pipeline, PipelineConfig, VisionStage};
