pub mod detector;

pub use detector::{
    detect_drift_for_user, detect_opportunities_for_user, AlertDetectionOutcome, DetectionCounts,
};
