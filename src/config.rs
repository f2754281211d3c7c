// src/config.rs

//! Loading and validation of the JSON run configuration.
//!
//! Every key of the documented schema is mandatory except `ignored-topics`;
//! a missing or wrongly typed key aborts startup with a message naming it.
//! Trailing commas are tolerated: the raw document is cleaned before it is
//! handed to the parser.

use crate::core::errors::FaultlineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IpcConfig {
    pub project_id: u32,
    pub retry_connection: bool,
    pub retry_attempts: u32,
    pub retry_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlertRateConfig {
    /// Width of the window of per-cycle new-alert counts.
    pub nr_normalisation_values: usize,
    /// Mean new-alert rate separating idle from active tracking.
    pub abortion_criteria_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FaultDetectionConfig {
    pub moving_window_size: usize,
    /// Loop frequency in Hz; the cycle interval is `1s / target-frequency`.
    pub target_frequency: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub ipc: IpcConfig,
    pub alert_rate: AlertRateConfig,
    /// Cycles between blindspot scans.
    pub blindspot_interval: u64,
    /// A scan is skipped while the host CPU utilisation is at or above this.
    pub blindspot_cpu_threshold: f64,
    pub initial_watchlist_members: Vec<String>,
    /// Topics never taken onto the watchlist, by name or primary key.
    #[serde(default)]
    pub ignored_topics: Vec<String>,
    pub fault_detection: FaultDetectionConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, FaultlineError> {
        let contents = fs::read_to_string(path)?;
        let cleaned = strip_trailing_commas(&contents);
        let config: Config = serde_json::from_str(&cleaned)
            .map_err(|e| FaultlineError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FaultlineError> {
        if self.fault_detection.moving_window_size < 2 {
            return Err(FaultlineError::Configuration(format!(
                "'fault-detection.moving-window-size' must be at least 2, got {}",
                self.fault_detection.moving_window_size
            )));
        }
        if self.fault_detection.target_frequency <= 0.0 {
            return Err(FaultlineError::Configuration(format!(
                "'fault-detection.target-frequency' must be positive, got {}",
                self.fault_detection.target_frequency
            )));
        }
        if self.blindspot_interval == 0 {
            return Err(FaultlineError::Configuration(
                "'blindspot-interval' must be at least 1".to_string(),
            ));
        }
        if self.alert_rate.nr_normalisation_values == 0 {
            return Err(FaultlineError::Configuration(
                "'alert-rate.nr-normalisation-values' must be at least 1".to_string(),
            ));
        }
        if self.ipc.retry_attempts == 0 {
            return Err(FaultlineError::Configuration(
                "'ipc.retry-attempts' must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Removes commas that directly precede a closing brace or bracket, outside
/// of string literals.
pub fn strip_trailing_commas(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if in_string {
            output.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                output.push(c);
            }
            ',' => {
                let next = bytes[i + 1..]
                    .iter()
                    .find(|b| !b.is_ascii_whitespace())
                    .copied();
                if !matches!(next, Some(b'}') | Some(b']')) {
                    output.push(c);
                }
            }
            _ => output.push(c),
        }
    }
    output
}
