// src/core/detection.rs

//! Sliding-window statistical fault detection.
//!
//! Each watchlisted member gets one ring buffer per attribute. Once a
//! member's window is full its current value is judged against the window's
//! population statistics; excursions beyond three standard deviations, and
//! nodes reported dead, raise alerts. Blindspot members are retired after
//! their first full inspection.

use crate::core::handle::MemberPtr;
use crate::core::member::{AttributeDescriptor, PrimaryKey, Timestamp};
use crate::core::ring::CircularBuffer;
use crate::core::watchlist::{EntryKind, Watchlist};
use crate::config::Config;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Excursion threshold in standard deviations.
const SIGMA_FACTOR: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
}

#[derive(Debug)]
pub struct Alert {
    pub member: MemberPtr,
    /// Descriptors of the attributes that tripped the excursion check.
    /// Empty for an alert raised because a node is dead.
    pub affected_attributes: Vec<AttributeDescriptor>,
    pub timestamp: Timestamp,
    pub severity: Severity,
}

#[derive(Debug)]
struct MemberWindow {
    member: MemberPtr,
    /// Watchlist entry kind as of the latest snapshot.
    kind: EntryKind,
    buffers: BTreeMap<AttributeDescriptor, CircularBuffer>,
}

pub struct FaultDetection {
    watchlist: Arc<Watchlist>,
    windows: Mutex<HashMap<PrimaryKey, MemberWindow>>,
    alerts: Mutex<Vec<Alert>>,
    window_size: usize,
    cycle_interval: Duration,
}

impl FaultDetection {
    pub fn new(config: &Config, watchlist: Arc<Watchlist>) -> Self {
        Self {
            watchlist,
            windows: Mutex::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
            window_size: config.fault_detection.moving_window_size,
            cycle_interval: Duration::from_secs_f64(
                1.0 / config.fault_detection.target_frequency,
            ),
        }
    }

    /// Loop interval derived from the configured target frequency.
    pub fn cycle_interval(&self) -> Duration {
        self.cycle_interval
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("fault detection loop started");
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("fault detection loop shutting down");
                    return;
                }
                _ = interval.tick() => self.run_inspection_cycle(),
            }
        }
    }

    /// One inspection over a point-in-time watchlist snapshot: sample every
    /// member's attributes into its window, then judge the members whose
    /// windows are full.
    pub fn run_inspection_cycle(&self) {
        let snapshot = self.watchlist.get_members();
        let mut windows = self.windows.lock();

        // Windows of members that left the watchlist are dropped with it.
        let watched: HashSet<&PrimaryKey> =
            snapshot.iter().map(|(member, _)| member.primary_key()).collect();
        windows.retain(|primary, _| watched.contains(primary));

        for (member, kind) in &snapshot {
            let attributes = member.lock().get_attributes();
            match windows.entry(member.primary_key().clone()) {
                Entry::Vacant(entry) => {
                    let buffers = attributes
                        .into_iter()
                        .map(|(descriptor, value)| {
                            let mut buffer = CircularBuffer::new(self.window_size);
                            buffer.push(value);
                            (descriptor, buffer)
                        })
                        .collect();
                    entry.insert(MemberWindow {
                        member: member.clone(),
                        kind: *kind,
                        buffers,
                    });
                }
                Entry::Occupied(mut entry) => {
                    let window = entry.get_mut();
                    window.kind = *kind;
                    for (descriptor, value) in attributes {
                        window
                            .buffers
                            .entry(descriptor)
                            .or_insert_with(|| CircularBuffer::new(self.window_size))
                            .push(value);
                    }
                }
            }
        }

        let mut retired = Vec::new();
        for (primary, window) in windows.iter() {
            // The first buffer stands in for all of them; the buffers of one
            // member grow in lockstep.
            let Some(first) = window.buffers.values().next() else {
                continue;
            };
            if !first.is_full() {
                continue;
            }

            let mut alert = Alert {
                member: window.member.clone(),
                affected_attributes: Vec::new(),
                timestamp: Utc::now(),
                severity: Severity::Normal,
            };
            let dead = {
                let member = window.member.lock();
                member.as_node().is_some_and(|node| !node.alive)
            };
            if !dead {
                for (descriptor, buffer) in &window.buffers {
                    if buffer.is_empty() {
                        continue;
                    }
                    let mean = buffer.mean();
                    let deviation = SIGMA_FACTOR * buffer.std_dev(mean);
                    let current = buffer.current();
                    if current < mean - deviation || current > mean + deviation {
                        alert.affected_attributes.push(descriptor.clone());
                    }
                }
            }
            if dead || !alert.affected_attributes.is_empty() {
                debug!(
                    member = %alert.member,
                    affected = ?alert.affected_attributes,
                    "anomaly detected"
                );
                self.alerts.lock().push(alert);
            }

            if window.kind == EntryKind::Blindspot {
                retired.push(primary.clone());
            }
        }

        for primary in retired {
            debug!("blindspot '{primary}' inspected once, retiring");
            windows.remove(&primary);
            self.watchlist.remove_member(&primary);
        }
    }

    /// Returns and clears the pending alerts atomically.
    pub fn get_emitted_alerts(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }

    /// Drops all window state. Pending alerts stay until collected.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }
}
