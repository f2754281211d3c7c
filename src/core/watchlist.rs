// src/core/watchlist.rs

//! The dynamic set of members currently under observation.
//!
//! Entries are typed: `Normal` members arrived through subgraph extension,
//! `Initial` members are configured by name and survive resets, and
//! `Blindspot` members are speculative sink candidates that fault detection
//! retires after one full inspection. A member is listed at most once; a
//! blindspot entry may be upgraded, never the other way around.

use crate::config::Config;
use crate::core::errors::FaultlineError;
use crate::core::handle::MemberPtr;
use crate::core::member::{MemberProxy, PrimaryKey};
use crate::core::store::DataStore;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Normal,
    Initial,
    Blindspot,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::Normal => "normal",
            EntryKind::Initial => "initial",
            EntryKind::Blindspot => "blindspot",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct WatchEntry {
    member: MemberPtr,
    kind: EntryKind,
}

pub struct Watchlist {
    entries: Mutex<HashMap<PrimaryKey, WatchEntry>>,
    ignored_topics: HashSet<String>,
    /// Configured initial member names not resolved yet.
    initial_names: Mutex<Vec<String>>,
    /// In-flight asynchronous insertions; drained by the builder before a reset.
    pending_inserts: AtomicUsize,
    store: Arc<DataStore>,
}

impl Watchlist {
    pub fn new(config: &Config, store: Arc<DataStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ignored_topics: config.ignored_topics.iter().cloned().collect(),
            initial_names: Mutex::new(config.initial_watchlist_members.clone()),
            pending_inserts: AtomicUsize::new(0),
            store,
        }
    }

    /// Acquires the member behind `proxy` and inserts it. Returns whether a
    /// new entry was created; an existing entry is at most upgraded from
    /// `Blindspot`. Ignored topics are dropped silently.
    pub async fn add_member_sync(
        &self,
        proxy: &MemberProxy,
        kind: EntryKind,
    ) -> Result<bool, FaultlineError> {
        if proxy.is_topic && self.ignored_topics.contains(&proxy.primary_key) {
            debug!("{proxy} is ignored, not watching");
            return Ok(false);
        }
        if self.upgrade_if_present(&proxy.primary_key, kind) {
            return Ok(false);
        }

        let member = self.store.get(proxy).await?;
        if member.is_topic() {
            let name = member.lock().name.clone();
            if self.ignored_topics.contains(&name) {
                debug!("topic '{name}' is ignored, not watching");
                return Ok(false);
            }
        }
        Ok(self.insert_resolved(member, kind))
    }

    /// Enqueues an insertion without waiting for the member acquisition.
    /// The entry becomes observable to `contains`/`get_members` once the
    /// spawned insert lands; [`Self::drain_pending`] awaits all of them.
    pub fn add_member_async(self: &Arc<Self>, proxy: MemberProxy, kind: EntryKind) {
        self.pending_inserts.fetch_add(1, Ordering::SeqCst);
        let watchlist = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = watchlist.add_member_sync(&proxy, kind).await {
                warn!("failed to add {proxy} to the watchlist: {e}");
            }
            watchlist.pending_inserts.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn remove_member(&self, primary: &PrimaryKey) -> bool {
        self.entries.lock().remove(primary).is_some()
    }

    pub fn contains(&self, primary: &PrimaryKey) -> bool {
        self.entries.lock().contains_key(primary)
    }

    pub fn entry_kind(&self, primary: &PrimaryKey) -> Option<EntryKind> {
        self.entries.lock().get(primary).map(|entry| entry.kind)
    }

    /// Point-in-time snapshot of the observed set.
    pub fn get_members(&self) -> Vec<(MemberPtr, EntryKind)> {
        self.entries
            .lock()
            .values()
            .map(|entry| (entry.member.clone(), entry.kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every non-initial entry, releasing the member handles.
    pub fn reset(&self) {
        self.entries
            .lock()
            .retain(|_, entry| entry.kind == EntryKind::Initial);
    }

    pub fn pending_inserts(&self) -> usize {
        self.pending_inserts.load(Ordering::SeqCst)
    }

    /// Waits until every asynchronous insertion enqueued so far has landed.
    pub async fn drain_pending(&self) {
        while self.pending_inserts.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Background resolver for the configured initial member names: probes
    /// the data store each tick until every name resolved, then idles.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        interval: Duration,
    ) {
        if self.initial_names.lock().is_empty() {
            debug!("no initial watchlist members configured");
            return;
        }
        info!("watchlist resolver started");
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("watchlist resolver shutting down");
                    return;
                }
                _ = timer.tick() => {}
            }

            let unresolved: Vec<String> = self.initial_names.lock().clone();
            for name in unresolved {
                match self.store.get_node_by_name(&name).await {
                    Ok(Some(member)) => {
                        info!("initial watchlist member '{name}' resolved to {member}");
                        self.insert_resolved(member, EntryKind::Initial);
                        self.initial_names.lock().retain(|n| n != &name);
                    }
                    Ok(None) => debug!("initial watchlist member '{name}' not yet known"),
                    Err(e) => warn!("resolving initial watchlist member '{name}' failed: {e}"),
                }
            }
            if self.initial_names.lock().is_empty() {
                info!("all initial watchlist members resolved");
                return;
            }
        }
    }

    /// Inserts an already acquired member under the single entries lock, so
    /// concurrent insertions of the same key cannot both land.
    fn insert_resolved(&self, member: MemberPtr, kind: EntryKind) -> bool {
        let mut entries = self.entries.lock();
        match entries.entry(member.primary_key().clone()) {
            Entry::Occupied(mut entry) => {
                Self::upgrade(entry.get_mut(), kind);
                false
            }
            Entry::Vacant(entry) => {
                debug!("watching {member} as {kind}");
                entry.insert(WatchEntry { member, kind });
                true
            }
        }
    }

    fn upgrade_if_present(&self, primary: &PrimaryKey, kind: EntryKind) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(primary) {
            Some(entry) => {
                Self::upgrade(entry, kind);
                true
            }
            None => false,
        }
    }

    /// Blindspot entries may become normal or initial; no other transition.
    fn upgrade(entry: &mut WatchEntry, kind: EntryKind) {
        if entry.kind == EntryKind::Blindspot && kind != EntryKind::Blindspot {
            debug!("upgrading {} from blindspot to {kind}", entry.member);
            entry.kind = kind;
        }
    }
}
