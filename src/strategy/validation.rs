use serde::{Deserialize, Serialize};

use crate::api::Validation;
use crate::models::Signal;
use crate::Result;

/// How an AI review outcome moves signal confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Share of the reviewer's confidence removed on a rejection
    pub rejection_weight: f64,
    /// Multiplier applied when the review call itself fails
    pub failure_factor: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            rejection_weight: 0.5,
            failure_factor: 0.9,
        }
    }
}

/// Fold an advisory review into the signal's confidence
///
/// Direction and strength are never touched; `None` (no reviewer
/// configured) leaves the signal as it is.
pub fn apply_validation(signal: &mut Signal, outcome: Option<&Result<Validation>>, policy: &ValidationPolicy) {
    let factor = match outcome {
        None => return,
        Some(Ok(review)) if review.validated => 1.0,
        Some(Ok(review)) => 1.0 - policy.rejection_weight * (review.confidence / 100.0).clamp(0.0, 1.0),
        Some(Err(_)) => policy.failure_factor,
    };

    signal.confidence = (signal.confidence * factor).clamp(0.0, 100.0);
}
