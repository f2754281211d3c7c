// src/ipc/proto.rs

//! Wire model of the graph information service.
//!
//! Requests travel inside a [`RequestEnvelope`] carrying a client-assigned
//! request id; everything the service sends back is a [`ServiceMessage`].
//! Replies are correlated by request id, streamed sample frames are routed
//! by channel address, and graph updates are queued per [`UpdateKind`].

use crate::core::member::PrimaryKey;
use serde::{Deserialize, Serialize};

/// Correlates a reply (and a later unsubscribe) with the request that caused it.
pub type RequestId = u64;

/// Upper bound on member display names accepted from the wire. The service
/// stores names in fixed-size fields; anything longer is a protocol error.
pub const MAX_STRING_SIZE: usize = 256;

/// Attribute descriptor for a node's CPU load feed.
pub const CPU_UTILISATION_ATTRIBUTE: &str = "cpu-utilisation";

/// Attribute descriptor prefix for a topic's per-publisher message rate feed.
/// The full descriptor is `publishing-rate/<publisher primary key>`.
pub const PUBLISHING_RATE_ATTRIBUTE: &str = "publishing-rate";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Node(NodeRequest),
    Topic(TopicRequest),
    Search(SearchRequest),
    SingleAttributes(SingleAttributesRequest),
    CustomMember(CustomMemberRequest),
    Unsubscribe(UnsubscribeRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    pub primary_key: PrimaryKey,
    /// Subscribe to streaming updates for this node after the response.
    pub updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRequest {
    pub primary_key: PrimaryKey,
    pub updates: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    Node,
    Topic,
}

/// Resolve a display name to a primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub scope: SearchScope,
    pub name: String,
}

/// Which side of the member's edges the attribute is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleAttributesRequest {
    pub attribute: String,
    pub direction: Direction,
    /// Keep the sample stream open until unsubscribed.
    pub continuous: bool,
    pub primary_key: PrimaryKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomMemberRequest {
    pub query: String,
    pub continuous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Node(NodeResponse),
    Topic(TopicResponse),
    Search(SearchResponse),
    SingleAttributes(SingleAttributesResponse),
    CustomMember(CustomMemberResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub primary_key: PrimaryKey,
    pub name: String,
    pub pkg_name: String,
    pub state: MemberState,
    /// Unix timestamp of the last state flip.
    pub state_change_time: i64,
    pub boot_count: u32,
    pub process_id: i32,
}

/// One publish or subscribe edge of a topic, as the service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEdge {
    pub edge_id: u64,
    pub node: PrimaryKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    pub primary_key: PrimaryKey,
    pub name: String,
    pub type_name: String,
    pub publishers: Vec<TopicEdge>,
    pub subscribers: Vec<TopicEdge>,
}

/// An empty `primary_key` means the name did not resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub primary_key: PrimaryKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleAttributesResponse {
    pub request_id: RequestId,
    /// Address of the sample channel carrying this attribute's feed.
    pub mem_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomMemberResponse {
    pub request_id: RequestId,
    pub mem_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceMessage {
    Reply { request_id: RequestId, reply: Reply },
    Update(GraphUpdate),
    Frame { address: String, frame: ShmFrame },
}

/// One framed record read from a sample channel. `Textual` frames carry a
/// `number`/`total` pair for reassembling chunked documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShmFrame {
    Numerical { value: f64 },
    Textual { number: u32, total: u32, text: String },
}

/// Streaming updates mutating cached members. One FIFO queue is kept per kind
/// so the ingestion loop can drain them independently without blocking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GraphUpdate {
    NodePublishesTo { node: PrimaryKey, topic: PrimaryKey },
    NodeSubscribesTo { node: PrimaryKey, topic: PrimaryKey },
    NodeServerFor { node: PrimaryKey, service: String, client: PrimaryKey },
    NodeClientOf { node: PrimaryKey, service: String, server: PrimaryKey },
    NodeActionServerFor { node: PrimaryKey, action: String, client: PrimaryKey },
    NodeActionClientOf { node: PrimaryKey, action: String, server: PrimaryKey },
    NodeState { node: PrimaryKey, state: MemberState, change_time: i64 },
    NodeBoot { node: PrimaryKey, boot_count: u32, process_id: i32 },
    TopicPublishers { topic: PrimaryKey, publisher: TopicEdge },
    TopicSubscribers { topic: PrimaryKey, subscriber: TopicEdge },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    NodePublishesTo,
    NodeSubscribesTo,
    NodeServerFor,
    NodeClientOf,
    NodeActionServerFor,
    NodeActionClientOf,
    NodeState,
    NodeBoot,
    TopicPublishers,
    TopicSubscribers,
}

pub const ALL_UPDATE_KINDS: [UpdateKind; 10] = [
    UpdateKind::NodePublishesTo,
    UpdateKind::NodeSubscribesTo,
    UpdateKind::NodeServerFor,
    UpdateKind::NodeClientOf,
    UpdateKind::NodeActionServerFor,
    UpdateKind::NodeActionClientOf,
    UpdateKind::NodeState,
    UpdateKind::NodeBoot,
    UpdateKind::TopicPublishers,
    UpdateKind::TopicSubscribers,
];

impl GraphUpdate {
    pub fn kind(&self) -> UpdateKind {
        match self {
            GraphUpdate::NodePublishesTo { .. } => UpdateKind::NodePublishesTo,
            GraphUpdate::NodeSubscribesTo { .. } => UpdateKind::NodeSubscribesTo,
            GraphUpdate::NodeServerFor { .. } => UpdateKind::NodeServerFor,
            GraphUpdate::NodeClientOf { .. } => UpdateKind::NodeClientOf,
            GraphUpdate::NodeActionServerFor { .. } => UpdateKind::NodeActionServerFor,
            GraphUpdate::NodeActionClientOf { .. } => UpdateKind::NodeActionClientOf,
            GraphUpdate::NodeState { .. } => UpdateKind::NodeState,
            GraphUpdate::NodeBoot { .. } => UpdateKind::NodeBoot,
            GraphUpdate::TopicPublishers { .. } => UpdateKind::TopicPublishers,
            GraphUpdate::TopicSubscribers { .. } => UpdateKind::TopicSubscribers,
        }
    }

    /// Primary key of the cached member this update targets.
    pub fn primary_key(&self) -> &PrimaryKey {
        match self {
            GraphUpdate::NodePublishesTo { node, .. }
            | GraphUpdate::NodeSubscribesTo { node, .. }
            | GraphUpdate::NodeServerFor { node, .. }
            | GraphUpdate::NodeClientOf { node, .. }
            | GraphUpdate::NodeActionServerFor { node, .. }
            | GraphUpdate::NodeActionClientOf { node, .. }
            | GraphUpdate::NodeState { node, .. }
            | GraphUpdate::NodeBoot { node, .. } => node,
            GraphUpdate::TopicPublishers { topic, .. }
            | GraphUpdate::TopicSubscribers { topic, .. } => topic,
        }
    }

    /// Whether the targeted member lives in the topic collection.
    pub fn targets_topic(&self) -> bool {
        matches!(
            self,
            GraphUpdate::TopicPublishers { .. } | GraphUpdate::TopicSubscribers { .. }
        )
    }
}
