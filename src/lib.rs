// Verbatim: multilingual analysis of training-evaluation comments.
//
// This is the library root. Each module corresponds to a stage of the
// analysis pipeline or to the plumbing around it.

pub mod cache;
pub mod clustering;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod insights;
pub mod language;
pub mod output;
pub mod pipeline;
pub mod sentiment;
pub mod status;
pub mod themes;

pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineParts, PipelineSettings};
