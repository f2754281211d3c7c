// src/core/handle.rs

//! The ref-counted member handle handed out by the data store.
//!
//! The store owns the backing cells; a [`MemberPtr`] only pins one. Every
//! clone bumps the cell's use counter and every drop releases it, so the
//! ingestion loop can tell when a record has no outside observers left and
//! may be evicted.

use crate::core::counter::AtomicCounter;
use crate::core::member::{Member, MemberProxy, PrimaryKey};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Backing storage of one cached member. Identity is kept outside the lock
/// so handles can answer key/kind queries without contending for the member.
#[derive(Debug)]
pub struct MemberCell {
    primary_key: PrimaryKey,
    is_topic: bool,
    member: Mutex<Member>,
    counter: AtomicCounter,
}

impl MemberCell {
    pub fn new(member: Member) -> Self {
        Self {
            primary_key: member.primary_key.clone(),
            is_topic: member.is_topic(),
            member: Mutex::new(member),
            counter: AtomicCounter::new(0),
        }
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    pub fn is_topic(&self) -> bool {
        self.is_topic
    }

    pub fn lock(&self) -> MutexGuard<'_, Member> {
        self.member.lock()
    }

    /// Number of outstanding handles onto this cell.
    pub fn use_count(&self) -> usize {
        self.counter.get()
    }
}

/// A shared handle onto a member owned by the data store. Equality is by
/// primary key.
#[derive(Debug)]
pub struct MemberPtr {
    cell: Arc<MemberCell>,
}

impl MemberPtr {
    /// Pins `cell`. Only the data store creates fresh handles; everyone else
    /// clones an existing one.
    pub fn new(cell: Arc<MemberCell>) -> Self {
        cell.counter.increase();
        Self { cell }
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        self.cell.primary_key()
    }

    pub fn is_topic(&self) -> bool {
        self.cell.is_topic()
    }

    pub fn proxy(&self) -> MemberProxy {
        MemberProxy::new(self.cell.primary_key().clone(), self.cell.is_topic())
    }

    pub fn lock(&self) -> MutexGuard<'_, Member> {
        self.cell.lock()
    }

    pub fn use_count(&self) -> usize {
        self.cell.use_count()
    }
}

impl Clone for MemberPtr {
    fn clone(&self) -> Self {
        self.cell.counter.increase();
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl Drop for MemberPtr {
    fn drop(&mut self) {
        self.cell.counter.decrease();
    }
}

impl PartialEq for MemberPtr {
    fn eq(&self, other: &Self) -> bool {
        self.primary_key() == other.primary_key()
    }
}

impl Eq for MemberPtr {}

impl fmt::Display for MemberPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_topic() { "Topic" } else { "Node" };
        write!(
            f,
            "Ptr({}({}), uses={})",
            kind,
            self.primary_key(),
            self.use_count()
        )
    }
}
