//! clockface-engine: async front end for enrollment and verification.
//!
//! Wraps the synchronous matching pipeline from `clockface-core` in
//! per-call blocking workers with hard deadlines, and keeps every
//! employee's gallery in memory for the host to persist.

pub mod config;
pub mod engine;
pub mod store;

pub use config::{ConfigError, EngineConfig, ProfileSetting};
pub use engine::{
    AttendanceEngine, AttendanceKind, AttendanceMethod, AttendanceRecord, EnrollFailure,
    EnrollmentSummary, Identification, VerifyFailure,
};
pub use store::GalleryStore;
