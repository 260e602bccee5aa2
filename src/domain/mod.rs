pub mod baseline;
pub mod delta;
pub mod fingerprint;
pub mod hotspot;
pub mod regression;
pub mod remediation;

pub use baseline::{Baseline, BaselineEngine};
pub use delta::{CumulativeCounters, DeltaComputer, MetricSample};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use hotspot::{Hotspot, HotspotDetector, HotspotRules};
pub use regression::{RegressionDetector, RegressionEvent, RegressionRules, Severity};
pub use remediation::{
    RemediationAdvisor, RemediationAudit, RemediationGuard, RemediationSuggestion,
};
