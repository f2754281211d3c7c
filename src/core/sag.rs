// src/core/sag.rs

//! The suspicious activity graph: the growing set of members implicated by
//! alerts. Vertices are never removed except by a full reset.
//!
//! `outgoing` filters to members already in the graph (it describes the
//! implicated subgraph itself); `incoming` returns all predecessors, since
//! it feeds the watchlist with members that still need observation.

use crate::core::handle::MemberPtr;
use crate::core::member::{MemberDetails, MemberProxy, PrimaryKey};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct SuspiciousActivityGraph {
    vertices: Mutex<HashMap<PrimaryKey, MemberPtr>>,
}

impl SuspiciousActivityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member; true iff it was not present yet.
    pub fn add(&self, member: MemberPtr) -> bool {
        let mut vertices = self.vertices.lock();
        match vertices.entry(member.primary_key().clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(member);
                true
            }
        }
    }

    pub fn contains(&self, proxy: &MemberProxy) -> bool {
        self.contains_key(&proxy.primary_key)
    }

    pub fn contains_key(&self, primary: &PrimaryKey) -> bool {
        self.vertices.lock().contains_key(primary)
    }

    pub fn len(&self) -> usize {
        self.vertices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.lock().is_empty()
    }

    /// Drops every vertex, releasing the member handles.
    pub fn reset(&self) {
        self.vertices.lock().clear();
    }

    pub fn members(&self) -> Vec<MemberPtr> {
        self.vertices.lock().values().cloned().collect()
    }

    /// Successors of `member` that are themselves part of the graph.
    pub fn outgoing(&self, member: &MemberPtr) -> Vec<MemberProxy> {
        let candidates = Self::outgoing_neighbours(member);
        let vertices = self.vertices.lock();
        candidates
            .into_iter()
            .filter(|proxy| vertices.contains_key(&proxy.primary_key))
            .collect()
    }

    /// All predecessors of `member`, unfiltered.
    pub fn incoming(&self, member: &MemberPtr) -> Vec<MemberProxy> {
        Self::incoming_neighbours(member)
    }

    fn outgoing_neighbours(member: &MemberPtr) -> Vec<MemberProxy> {
        let member = member.lock();
        match &member.details {
            MemberDetails::Topic(topic) => {
                topic.subscribers.iter().map(|e| e.node.clone()).collect()
            }
            MemberDetails::Node(node) => {
                let mut out: Vec<MemberProxy> =
                    node.clients.values().flatten().cloned().collect();
                out.extend(node.action_clients.values().flatten().cloned());
                out.extend(node.publishes_to.iter().cloned());
                out
            }
        }
    }

    fn incoming_neighbours(member: &MemberPtr) -> Vec<MemberProxy> {
        let member = member.lock();
        match &member.details {
            MemberDetails::Topic(topic) => {
                topic.publishers.iter().map(|e| e.node.clone()).collect()
            }
            MemberDetails::Node(node) => {
                let mut incoming: Vec<MemberProxy> = node.servers.values().cloned().collect();
                incoming.extend(node.action_servers.values().cloned());
                incoming.extend(node.subscribes_to.iter().cloned());
                incoming
            }
        }
    }
}
