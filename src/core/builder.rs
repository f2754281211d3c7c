// src/core/builder.rs

//! The dynamic subgraph builder: the outer control loop owning all four
//! subsystems. It spawns the background loops, pre-seeds the watchlist with
//! blindspots when the host is idle enough, grows the suspicious activity
//! graph along incoming edges as alerts arrive, and hands the graph off for
//! trajectory extraction once the alert rate subsides.

use crate::config::Config;
use crate::core::detection::{Alert, FaultDetection};
use crate::core::errors::FaultlineError;
use crate::core::fte::FaultTrajectoryExtraction;
use crate::core::sag::SuspiciousActivityGraph;
use crate::core::store::DataStore;
use crate::core::watchlist::{EntryKind, Watchlist};
use crate::ipc::proto::ShmFrame;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often the watchlist probes for unresolved initial member names.
const WATCHLIST_RESOLVE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Blindspot scanning plus alert-driven growth.
    Normal,
    /// Watch every known member from the start; no blindspot scans.
    Holistic,
}

/// The alert-rate abortion criterion: a bounded window of new-alert counts
/// whose mean drives an idle/active state machine. Crossing the threshold
/// activates tracking and restarts the window; dropping back to or below it
/// while active emits the abort.
#[derive(Debug)]
pub struct AbortCriterion {
    history: VecDeque<f64>,
    capacity: usize,
    threshold: f64,
    active: bool,
}

impl AbortCriterion {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        assert!(capacity >= 1, "normalisation window must hold a value");
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds one cycle's count of not-yet-implicated alerts. Returns true
    /// exactly when the abort fires.
    pub fn observe(&mut self, new_alerts: usize) -> bool {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(new_alerts as f64);
        let mean = self.history.iter().sum::<f64>() / self.history.len() as f64;

        if !self.active {
            if mean > self.threshold {
                info!(mean, "alert rate above threshold, tracking an incident");
                self.active = true;
                self.history.clear();
            }
            return false;
        }
        if mean <= self.threshold {
            self.active = false;
            return true;
        }
        false
    }
}

pub struct DynamicSubgraphBuilder {
    store: Arc<DataStore>,
    watchlist: Arc<Watchlist>,
    detection: Arc<FaultDetection>,
    sag: Arc<SuspiciousActivityGraph>,
    fte: FaultTrajectoryExtraction,
    mode: RunMode,
    cycle_interval: Duration,
    blindspot_interval: u64,
    blindspot_counter: u64,
    cpu_threshold: f64,
    abort: AbortCriterion,
}

impl DynamicSubgraphBuilder {
    pub fn new(
        config: &Config,
        store: Arc<DataStore>,
        watchlist: Arc<Watchlist>,
        detection: Arc<FaultDetection>,
        sag: Arc<SuspiciousActivityGraph>,
        mode: RunMode,
    ) -> Self {
        let cycle_interval = detection.cycle_interval();
        Self {
            store,
            watchlist,
            detection,
            sag,
            fte: FaultTrajectoryExtraction::new(),
            mode,
            cycle_interval,
            blindspot_interval: config.blindspot_interval,
            blindspot_counter: 0,
            cpu_threshold: config.blindspot_cpu_threshold,
            abort: AbortCriterion::new(
                config.alert_rate.nr_normalisation_values,
                config.alert_rate.abortion_criteria_threshold,
            ),
        }
    }

    /// Runs until the shutdown channel fires. Spawns the data store
    /// ingestion, watchlist resolver and fault detection loops, then drives
    /// the main cycle.
    pub async fn run(mut self, shutdown: broadcast::Sender<()>) -> Result<(), FaultlineError> {
        if self.mode == RunMode::Holistic {
            info!("holistic mode: watching every known member");
            for proxy in self.store.get_all_members().await? {
                if let Err(e) = self.watchlist.add_member_sync(&proxy, EntryKind::Initial).await
                {
                    warn!("failed to pre-watch {proxy}: {e}");
                }
            }
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(
            self.store
                .clone()
                .run(shutdown.subscribe(), self.cycle_interval),
        );
        tasks.spawn(
            self.watchlist
                .clone()
                .run(shutdown.subscribe(), WATCHLIST_RESOLVE_INTERVAL),
        );
        tasks.spawn(self.detection.clone().run(shutdown.subscribe()));

        let mut cpu_source = self.store.get_cpu_utilisation_source().await?;
        let mut cpu = match cpu_source.receive().await? {
            ShmFrame::Numerical { value } => value,
            ShmFrame::Textual { .. } => {
                return Err(FaultlineError::Protocol(
                    "expected a numerical seed on the CPU-utilisation channel".to_string(),
                ));
            }
        };

        info!("dynamic subgraph builder started");
        let mut shutdown_rx = shutdown.subscribe();
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {}
            }

            // The source is drained completely so the next cycle reads a
            // fresh value; an empty cycle keeps the last one.
            if let Some(value) = cpu_source.drain_latest_numerical() {
                cpu = value;
            }

            if self.mode == RunMode::Normal {
                if self.blindspot_counter == 0 && cpu < self.cpu_threshold {
                    // A failed topology exchange is a protocol violation and
                    // leaves the programme state inconsistent.
                    self.blindspot_scan().await?;
                }
                self.blindspot_counter = (self.blindspot_counter + 1) % self.blindspot_interval;
            }

            let mut alerts = self.detection.get_emitted_alerts();
            let new_alerts = alerts
                .iter()
                .filter(|alert| !self.sag.contains_key(alert.member.primary_key()))
                .count();

            if self.abort.observe(new_alerts) {
                info!("alert rate subsided, handing off and resetting");
                // Let in-flight watchlist insertions land before wiping.
                self.watchlist.drain_pending().await;
                self.fte.extract(&self.sag, &alerts);
                self.detection.reset();
                self.watchlist.reset();
                self.sag.reset();
                let mut last_moment = self.detection.get_emitted_alerts();
                alerts.append(&mut last_moment);
                debug!("{} alert(s) retired with the hand-off", alerts.len());
            } else if !alerts.is_empty() {
                self.extend_subgraph(&alerts);
            }
        }

        info!("dynamic subgraph builder shutting down");
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// Fetches the full graph view and watches every enumerated blindspot
    /// not already on the list.
    async fn blindspot_scan(&self) -> Result<(), FaultlineError> {
        let view = self.store.get_full_graph_view().await?;
        let blindspots = view.blindspots();
        debug!(
            "blindspot scan over {} vertices found {} candidate(s)",
            view.len(),
            blindspots.len()
        );
        for proxy in blindspots {
            if self.watchlist.contains(&proxy.primary_key) {
                continue;
            }
            if let Err(e) = self.watchlist.add_member_sync(&proxy, EntryKind::Blindspot).await {
                warn!("failed to watch blindspot {proxy}: {e}");
            }
        }
        Ok(())
    }

    /// Adds every alerting member to the graph; for the newly inserted ones,
    /// queues all their incoming neighbours for observation.
    fn extend_subgraph(&self, alerts: &[Alert]) {
        for alert in alerts {
            if self.sag.add(alert.member.clone()) {
                info!(member = %alert.member, "extending the suspicious activity graph");
                for proxy in self.sag.incoming(&alert.member) {
                    self.watchlist.add_member_async(proxy, EntryKind::Normal);
                }
            }
        }
    }
}
