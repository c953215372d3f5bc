//! External model catalog client and the bulk download jobs built on it.

pub mod client;
pub mod jobs;

pub use client::{CatalogError, CivitaiClient, ModelCatalog, DEFAULT_BASE_URL};
pub use jobs::{BatchSummary, DownloadJobs, JobError, JobKind, JobSettings, JobStatus};
