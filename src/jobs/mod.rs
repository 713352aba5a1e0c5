//! Image job queue: persisted store, transform pipeline, and the bounded
//! concurrency processor.

mod models;
mod processor;
mod schema;
mod store;
mod transform;

pub use models::{FitMode, ImageJob, JobKind, JobStatus, ResizeConfig, TransformConfig};
pub use processor::{ImageJobProcessor, JobProcessorSettings, ProcessorStatus};
pub use store::{ImageJobStore, SqliteImageJobStore};
pub use transform::{confine, run_transform, JobPaths};
