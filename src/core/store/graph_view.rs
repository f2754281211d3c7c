// src/core/store/graph_view.rs

//! A point-in-time view of the full computation graph topology, parsed from
//! the chunked textual document the graph information service streams back
//! for the topology query, plus the blindspot enumeration that seeds the
//! watchlist with suspected sinks.

use crate::core::errors::FaultlineError;
use crate::core::member::{MemberProxy, PrimaryKey};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GraphVertex {
    pub proxy: MemberProxy,
    pub outgoing: Vec<PrimaryKey>,
}

/// Vertices keyed by primary key. A `BTreeMap` keeps traversal order
/// deterministic, which the blindspot enumeration relies on.
#[derive(Debug, Default)]
pub struct GraphView {
    vertices: BTreeMap<PrimaryKey, GraphVertex>,
}

fn protocol(message: impl Into<String>) -> FaultlineError {
    FaultlineError::Protocol(message.into())
}

impl GraphView {
    /// Parses the reassembled topology document. The interesting payload
    /// lives at `results[0].data[0].row[0]`: the `active` (node) and
    /// `passive` (topic) key arrays plus the `pub`, `sub` and `send` edge
    /// arrays. Edge entries with a null `rel` are skipped.
    pub fn parse(document: &str) -> Result<Self, FaultlineError> {
        let root: Value = serde_json::from_str(document)
            .map_err(|e| protocol(format!("unparsable topology document: {e}")))?;
        let row = root
            .pointer("/results/0/data/0/row/0")
            .ok_or_else(|| protocol("topology document misses results[0].data[0].row[0]"))?;

        let mut view = GraphView::default();
        for key in string_array(row, "active")? {
            view.vertices.insert(
                key.clone(),
                GraphVertex {
                    proxy: MemberProxy::node(key),
                    outgoing: Vec::new(),
                },
            );
        }
        for key in string_array(row, "passive")? {
            view.vertices.insert(
                key.clone(),
                GraphVertex {
                    proxy: MemberProxy::topic(key),
                    outgoing: Vec::new(),
                },
            );
        }

        // pub connects node -> topic, sub connects topic -> node and send
        // connects node -> node; all three only add outgoing edges here.
        for field in ["pub", "sub", "send"] {
            for (from, to) in edge_list(row, field)? {
                match view.vertices.get_mut(&from) {
                    Some(vertex) => vertex.outgoing.push(to),
                    None => debug!("{field} edge from unknown vertex '{from}', skipped"),
                }
            }
        }
        Ok(view)
    }

    pub fn get(&self, primary: &str) -> Option<&GraphVertex> {
        self.vertices.get(primary)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Identity proxies of every vertex in the view.
    pub fn proxies(&self) -> Vec<MemberProxy> {
        self.vertices.values().map(|v| v.proxy.clone()).collect()
    }

    /// Enumerates blindspots: vertices with no outgoing edges, or whose
    /// outgoing edges all lead to vertices the traversal has already
    /// visited (sinks of a cycle).
    ///
    /// Depth-first over a visited set with an explicit stack, so the walk
    /// cannot overflow on long paths. Roots are taken in key order; every
    /// vertex is inspected exactly once.
    pub fn blindspots(&self) -> Vec<MemberProxy> {
        let mut visited: BTreeSet<&PrimaryKey> = BTreeSet::new();
        let mut blindspots = Vec::new();

        for root in self.vertices.keys() {
            if !visited.insert(root) {
                continue;
            }
            let mut stack = vec![root];
            while let Some(key) = stack.pop() {
                let vertex = &self.vertices[key];
                let mut terminal = true;
                for successor in &vertex.outgoing {
                    match self.vertices.get_key_value(successor) {
                        Some((successor_key, _)) => {
                            if visited.insert(successor_key) {
                                stack.push(successor_key);
                                terminal = false;
                            }
                        }
                        None => {
                            // An edge out of the view: the consumer exists
                            // but is not observable, so the vertex is not a
                            // terminal one.
                            terminal = false;
                        }
                    }
                }
                if terminal {
                    blindspots.push(vertex.proxy.clone());
                }
            }
        }
        blindspots
    }
}

fn string_array(row: &Value, field: &str) -> Result<Vec<String>, FaultlineError> {
    let entries = row
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| protocol(format!("topology document misses the '{field}' array")))?;
    Ok(entries
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

fn edge_list(row: &Value, field: &str) -> Result<Vec<(String, String)>, FaultlineError> {
    let entries = row
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| protocol(format!("topology document misses the '{field}' array")))?;
    let mut edges = Vec::new();
    for entry in entries {
        if entry.is_null() || entry.get("rel").is_none_or(Value::is_null) {
            continue;
        }
        let (Some(from), Some(to)) = (
            entry.get("from").and_then(Value::as_str),
            entry.get("to").and_then(Value::as_str),
        ) else {
            continue;
        };
        edges.push((from.to_string(), to.to_string()));
    }
    Ok(edges)
}
