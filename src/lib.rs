// src/lib.rs
pub mod config;
pub mod utils;
pub mod pipelines;
pub mod cli;
pub use cli::{Arguments, HistogramInput, OptionalFailurePolicy};
pub use config::defs::{PipelineError, Stage};
