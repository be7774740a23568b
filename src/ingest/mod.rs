// src/ingest/mod.rs

pub mod classify;
pub mod comments;
pub mod dump;
pub mod linker;
pub mod report;

pub use dump::Dataset;
pub use linker::{DatasetLinker, IngestOptions};
pub use report::{IngestReport, Stage};
