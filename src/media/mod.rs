//! Media workflow helpers that run on already-scoped result sets.

pub mod matching;

pub use matching::{match_jobs_to_uploads, JobMatch, MATCH_WINDOW_SECS};
