pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod progress;
pub mod sandbox;
pub mod validation;

pub use config::EngineConfig;
pub use context::{JobContext, JobState};
pub use engine::JobEngine;
pub use error::{ErrorPayload, ErrorType, JobError};
pub use progress::JobReporter;
pub use sandbox::Sandbox;
