//! MEP-Processing: epoch extraction and evoked-response measurement
//!
//! Turns the acquired sample stream and triggers into epochs, then measures
//! them: baseline correction, peak-to-peak amplitude and averaging.

pub mod analysis;
pub mod baseline;
pub mod config;
pub mod dedup;
pub mod extractor;
pub mod peak;

pub use analysis::{mean_trace, summarize, MepSummary};
pub use baseline::{apply_baseline, apply_baseline_all};
pub use config::{AnalysisConfig, BaselineWindow, EpochConfig};
pub use dedup::{new_indices, EpochDeduplicator};
pub use extractor::{EpochExtractor, ExtractorStats};
pub use peak::peak_to_peak;
