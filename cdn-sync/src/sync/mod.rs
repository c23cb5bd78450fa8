//! Reconciliation logic: deciding what to upload and detecting drift.

pub mod diff;
pub mod drift;

pub use diff::{
    Classified, ComparisonStrategy, DiffEngine, DiffPlan, DigestCompare, MtimeHint, SizeOnly,
    Strategy, UploadDecision, Verdict,
};
pub use drift::{compare, DriftReport};
