// src/core/member.rs

//! The member model: nodes (computing participants) and topics (routing
//! participants) of the observed publish/subscribe graph, plus the
//! identity-only [`MemberProxy`] used for cross-references.
//!
//! Edge sets are mutated exclusively by the data store's ingestion loop via
//! [`Member::apply_update`]; attribute feeds are drained by whoever samples
//! the member, normally the fault detection loop.

use crate::core::errors::FaultlineError;
use crate::ipc::channel::ShmChannel;
use crate::ipc::client::IpcClient;
use crate::ipc::proto::{
    GraphUpdate, MAX_STRING_SIZE, MemberState, NodeResponse, RequestId, ShmFrame,
    SingleAttributesResponse, TopicEdge, TopicResponse,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::warn;

/// Opaque, stable identifier of a graph member.
pub type PrimaryKey = String;

pub type AttributeDescriptor = String;

pub type Timestamp = DateTime<Utc>;

/// An identity-only reference to a member. Holds no ownership; equality,
/// ordering and hashing go by primary key alone.
#[derive(Debug, Clone)]
pub struct MemberProxy {
    pub primary_key: PrimaryKey,
    pub is_topic: bool,
}

impl MemberProxy {
    pub fn new(primary_key: PrimaryKey, is_topic: bool) -> Self {
        Self {
            primary_key,
            is_topic,
        }
    }

    pub fn node(primary_key: impl Into<PrimaryKey>) -> Self {
        Self::new(primary_key.into(), false)
    }

    pub fn topic(primary_key: impl Into<PrimaryKey>) -> Self {
        Self::new(primary_key.into(), true)
    }
}

impl PartialEq for MemberProxy {
    fn eq(&self, other: &Self) -> bool {
        self.primary_key == other.primary_key
    }
}

impl Eq for MemberProxy {}

impl PartialOrd for MemberProxy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemberProxy {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary_key.cmp(&other.primary_key)
    }
}

impl Hash for MemberProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary_key.hash(state);
    }
}

impl fmt::Display for MemberProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_topic {
            write!(f, "Proxy(Topic({}))", self.primary_key)
        } else {
            write!(f, "Proxy(Node({}))", self.primary_key)
        }
    }
}

/// One inbound numeric sample feed of a member.
#[derive(Debug)]
pub struct Attribute {
    pub descriptor: AttributeDescriptor,
    channel: ShmChannel,
    pub request_id: RequestId,
    pub last_value: f64,
}

/// A publish or subscribe edge of a topic together with its owning node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TopicEndpoint {
    pub edge_id: u64,
    pub node: MemberProxy,
}

impl From<TopicEdge> for TopicEndpoint {
    fn from(edge: TopicEdge) -> Self {
        Self {
            edge_id: edge.edge_id,
            node: MemberProxy::node(edge.node),
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeDetails {
    pub pkg_name: String,
    pub alive: bool,
    pub alive_change_time: Timestamp,
    pub boot_count: u32,
    pub process_id: i32,
    /// Topics this node publishes to (outgoing).
    pub publishes_to: BTreeSet<MemberProxy>,
    /// Topics this node subscribes to (incoming).
    pub subscribes_to: BTreeSet<MemberProxy>,
    /// Services this node provides, with the client nodes calling them.
    pub clients: BTreeMap<String, BTreeSet<MemberProxy>>,
    /// Actions this node provides, with the client nodes calling them.
    pub action_clients: BTreeMap<String, BTreeSet<MemberProxy>>,
    /// Services this node calls, keyed by service name, valued by the server.
    pub servers: BTreeMap<String, MemberProxy>,
    /// Actions this node calls, keyed by action name, valued by the server.
    pub action_servers: BTreeMap<String, MemberProxy>,
}

#[derive(Debug, Default)]
pub struct TopicDetails {
    pub type_name: String,
    pub publishers: BTreeSet<TopicEndpoint>,
    pub subscribers: BTreeSet<TopicEndpoint>,
}

#[derive(Debug)]
pub enum MemberDetails {
    Node(NodeDetails),
    Topic(TopicDetails),
}

#[derive(Debug)]
pub struct Member {
    pub primary_key: PrimaryKey,
    pub name: String,
    attributes: Vec<Attribute>,
    pub details: MemberDetails,
}

fn checked_name(name: String) -> Result<String, FaultlineError> {
    if name.len() > MAX_STRING_SIZE {
        return Err(FaultlineError::Protocol(format!(
            "member name of {} bytes exceeds the {} byte limit",
            name.len(),
            MAX_STRING_SIZE
        )));
    }
    Ok(name)
}

fn timestamp_from_unix(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl Member {
    pub fn from_node_response(response: NodeResponse) -> Result<Self, FaultlineError> {
        Ok(Self {
            primary_key: response.primary_key,
            name: checked_name(response.name)?,
            attributes: Vec::new(),
            details: MemberDetails::Node(NodeDetails {
                pkg_name: response.pkg_name,
                alive: response.state == MemberState::Active,
                alive_change_time: timestamp_from_unix(response.state_change_time),
                boot_count: response.boot_count,
                process_id: response.process_id,
                ..NodeDetails::default()
            }),
        })
    }

    pub fn from_topic_response(response: TopicResponse) -> Result<Self, FaultlineError> {
        Ok(Self {
            primary_key: response.primary_key,
            name: checked_name(response.name)?,
            attributes: Vec::new(),
            details: MemberDetails::Topic(TopicDetails {
                type_name: response.type_name,
                publishers: response.publishers.into_iter().map(Into::into).collect(),
                subscribers: response.subscribers.into_iter().map(Into::into).collect(),
            }),
        })
    }

    pub fn is_topic(&self) -> bool {
        matches!(self.details, MemberDetails::Topic(_))
    }

    pub fn proxy(&self) -> MemberProxy {
        MemberProxy::new(self.primary_key.clone(), self.is_topic())
    }

    pub fn as_node(&self) -> Option<&NodeDetails> {
        match &self.details {
            MemberDetails::Node(details) => Some(details),
            MemberDetails::Topic(_) => None,
        }
    }

    pub fn as_topic(&self) -> Option<&TopicDetails> {
        match &self.details {
            MemberDetails::Topic(details) => Some(details),
            MemberDetails::Node(_) => None,
        }
    }

    /// Drains every attribute channel of pending samples and returns the
    /// freshest value per descriptor. Feeds that delivered nothing since the
    /// last drain report their cached value.
    pub fn get_attributes(&mut self) -> BTreeMap<AttributeDescriptor, f64> {
        let mut output = BTreeMap::new();
        for attribute in &mut self.attributes {
            if let Some(value) = attribute.channel.drain_latest_numerical() {
                attribute.last_value = value;
            }
            output.insert(attribute.descriptor.clone(), attribute.last_value);
        }
        output
    }

    /// Opens the sample channel named in `response`, performs one awaiting
    /// receive to seed the cached value, and retains the channel for the
    /// non-blocking drains of [`Self::get_attributes`].
    pub async fn add_attribute_source(
        &mut self,
        descriptor: AttributeDescriptor,
        response: &SingleAttributesResponse,
        ipc: &IpcClient,
    ) -> Result<(), FaultlineError> {
        let mut channel = ipc.open_channel(&response.mem_address);
        let seed = match channel.receive().await? {
            ShmFrame::Numerical { value } => value,
            ShmFrame::Textual { .. } => {
                return Err(FaultlineError::Protocol(format!(
                    "expected a numerical seed on attribute channel '{}'",
                    response.mem_address
                )));
            }
        };
        self.attributes.push(Attribute {
            descriptor,
            channel,
            request_id: response.request_id,
            last_value: seed,
        });
        Ok(())
    }

    /// Subscription ids of every attribute feed, for release on eviction.
    pub fn attribute_request_ids(&self) -> Vec<RequestId> {
        self.attributes.iter().map(|a| a.request_id).collect()
    }

    /// Applies one streamed update. A kind that does not fit the member's
    /// variant is logged and dropped.
    pub fn apply_update(&mut self, update: GraphUpdate) {
        match (&mut self.details, update) {
            (MemberDetails::Node(node), GraphUpdate::NodePublishesTo { topic, .. }) => {
                node.publishes_to.insert(MemberProxy::topic(topic));
            }
            (MemberDetails::Node(node), GraphUpdate::NodeSubscribesTo { topic, .. }) => {
                node.subscribes_to.insert(MemberProxy::topic(topic));
            }
            (MemberDetails::Node(node), GraphUpdate::NodeServerFor { service, client, .. }) => {
                node.clients
                    .entry(service)
                    .or_default()
                    .insert(MemberProxy::node(client));
            }
            (MemberDetails::Node(node), GraphUpdate::NodeClientOf { service, server, .. }) => {
                node.servers.insert(service, MemberProxy::node(server));
            }
            (
                MemberDetails::Node(node),
                GraphUpdate::NodeActionServerFor { action, client, .. },
            ) => {
                node.action_clients
                    .entry(action)
                    .or_default()
                    .insert(MemberProxy::node(client));
            }
            (
                MemberDetails::Node(node),
                GraphUpdate::NodeActionClientOf { action, server, .. },
            ) => {
                node.action_servers.insert(action, MemberProxy::node(server));
            }
            (MemberDetails::Node(node), GraphUpdate::NodeState { state, change_time, .. }) => {
                let alive_now = state == MemberState::Active;
                if alive_now != node.alive {
                    node.alive = alive_now;
                    node.alive_change_time = timestamp_from_unix(change_time);
                }
            }
            (
                MemberDetails::Node(node),
                GraphUpdate::NodeBoot { boot_count, process_id, .. },
            ) => {
                node.boot_count = boot_count;
                node.process_id = process_id;
            }
            (MemberDetails::Topic(topic), GraphUpdate::TopicPublishers { publisher, .. }) => {
                topic.publishers.insert(publisher.into());
            }
            (MemberDetails::Topic(topic), GraphUpdate::TopicSubscribers { subscriber, .. }) => {
                topic.subscribers.insert(subscriber.into());
            }
            (_, update) => {
                warn!(
                    "update kind {:?} does not fit member '{}', dropped",
                    update.kind(),
                    self.primary_key
                );
            }
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_topic() {
            write!(f, "Topic({})", self.primary_key)
        } else {
            write!(f, "Node({})", self.primary_key)
        }
    }
}
