//! Astra Common - Shared types and traits
//!
//! Core data model, error taxonomy and collaborator traits used across the
//! astra assessment pipeline.

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{AstraError, AstraResult};
pub use traits::{
    Fingerprinter, GeoLocation, GeoLocator, LivenessProber, OsDetector, PocScanner, Scanner,
    WebScanner,
};
pub use types::{
    CrackError, CrackErrorKind, CrackErrorRecord, CrackJob, CrackOutcome, CrackResult, Credential,
    Finger, IpResult, PortFinding, PortState, ProbeResult, Report, ServiceMatch, ServiceRecord,
    Target, WebResult, WebTarget,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
