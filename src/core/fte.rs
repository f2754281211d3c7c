// src/core/fte.rs

//! Hand-off point to the downstream fault trajectory extractor.
//!
//! Extraction itself lives outside this crate; this stub fixes the
//! interface and logs what would be handed over.

use crate::core::detection::Alert;
use crate::core::sag::SuspiciousActivityGraph;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct FaultTrajectoryExtraction;

impl FaultTrajectoryExtraction {
    pub fn new() -> Self {
        Self
    }

    /// Receives the finished suspicious activity graph and the alerts of the
    /// closing cycle.
    pub fn extract(&self, sag: &SuspiciousActivityGraph, alerts: &[Alert]) {
        info!(
            "handing off a suspicious activity graph of {} member(s) and {} alert(s) for trajectory extraction",
            sag.len(),
            alerts.len()
        );
        for member in sag.members() {
            debug!(%member, "implicated");
        }
    }
}
