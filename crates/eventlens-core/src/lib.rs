pub mod analytics;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod outputs;
pub mod pipeline;

pub use analytics::{compute_analytics, Analytics};
pub use config::PipelineConfig;
pub use diagnostics::{DiagnosticsMode, Rejection, RejectionLog, RejectionReason, RejectionSink};
pub use error::{PipelineError, Result};
pub use extract::{extract_events, validate_events, ExtractError, ValidEvent};
pub use normalize::{normalize_events, EventTable, FieldValue, NormalizedRow};
pub use pipeline::{run_pipeline, run_pipeline_with_sink, PipelineSummary};
