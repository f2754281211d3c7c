// tests/common/mod.rs

//! Shared test harness: an in-process stand-in for the graph information
//! service, speaking the real wire protocol over a Unix socket pair.

#![allow(dead_code)]

use faultline::ipc::IpcClient;
use faultline::ipc::proto::{
    CustomMemberResponse, GraphUpdate, MemberState, NodeResponse, Reply, Request, RequestEnvelope,
    RequestId, SearchResponse, SearchScope, ServiceMessage, ShmFrame, SingleAttributesResponse,
    TopicEdge, TopicResponse,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Clone)]
pub struct NodeSpec {
    pub key: String,
    pub name: String,
    pub alive: bool,
}

impl NodeSpec {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            alive: true,
        }
    }

    pub fn dead(mut self) -> Self {
        self.alive = false;
        self
    }
}

#[derive(Clone, Default)]
pub struct TopicSpec {
    pub key: String,
    pub name: String,
    pub type_name: String,
    /// (edge id, publishing node key)
    pub publishers: Vec<(u64, String)>,
    pub subscribers: Vec<(u64, String)>,
}

impl TopicSpec {
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            type_name: "std_msgs/msg/String".to_string(),
            ..Default::default()
        }
    }

    pub fn published_by(mut self, edge_id: u64, node: &str) -> Self {
        self.publishers.push((edge_id, node.to_string()));
        self
    }

    pub fn subscribed_by(mut self, edge_id: u64, node: &str) -> Self {
        self.subscribers.push((edge_id, node.to_string()));
        self
    }
}

#[derive(Default)]
pub struct ServiceSpec {
    pub nodes: Vec<NodeSpec>,
    pub topics: Vec<TopicSpec>,
    /// Key returned for node searches that match no configured name. The
    /// engine's CPU host lookup searches for the local host name, so tests
    /// funnel that onto a well-known node here.
    pub host_node: Option<String>,
    /// Document streamed for the topology query, chunked automatically.
    pub topology_document: Option<String>,
    /// Overrides the automatic chunking, e.g. to misorder frames.
    pub topology_frames: Option<Vec<ShmFrame>>,
    /// Seed value sent on every freshly subscribed attribute channel.
    pub initial_attribute_value: f64,
}

impl ServiceSpec {
    pub fn new() -> Self {
        Self {
            initial_attribute_value: 0.2,
            ..Default::default()
        }
    }
}

/// Builds the transactional-API style document the topology query returns.
pub fn topology_document(
    active: &[&str],
    passive: &[&str],
    pub_edges: &[(&str, &str)],
    sub_edges: &[(&str, &str)],
    send_edges: &[(&str, &str)],
) -> String {
    let edge_array = |edges: &[(&str, &str)], rel: &str| -> Vec<serde_json::Value> {
        edges
            .iter()
            .map(|(from, to)| serde_json::json!({"from": from, "to": to, "rel": rel}))
            .collect()
    };
    serde_json::json!({
        "results": [{
            "columns": ["row"],
            "data": [{
                "row": [{
                    "active": active,
                    "passive": passive,
                    "pub": edge_array(pub_edges, "PUBLISHES_TO"),
                    "sub": edge_array(sub_edges, "SUBSCRIBES_TO"),
                    "send": edge_array(send_edges, "SENDS_TO"),
                }]
            }]
        }],
        "errors": []
    })
    .to_string()
}

/// Address the fake service hands out for an attribute subscription.
pub fn attribute_address(primary_key: &str, attribute: &str) -> String {
    format!("{primary_key}/{attribute}")
}

pub struct FakeService {
    /// Every request the service received, in arrival order.
    pub requests: Arc<Mutex<Vec<Request>>>,
    cmd_tx: mpsc::UnboundedSender<ServiceMessage>,
    handle: JoinHandle<()>,
}

impl FakeService {
    /// Spawns the service loop on one end of a socket pair and returns the
    /// connected client for the other.
    pub fn spawn(spec: ServiceSpec) -> (IpcClient, FakeService) {
        let (client_stream, service_stream) = UnixStream::pair().expect("socket pair");
        let client = IpcClient::from_stream(client_stream);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(service_loop(
            service_stream,
            spec,
            requests.clone(),
            cmd_rx,
        ));
        (
            client,
            FakeService {
                requests,
                cmd_tx,
                handle,
            },
        )
    }

    pub fn send_update(&self, update: GraphUpdate) {
        self.cmd_tx
            .send(ServiceMessage::Update(update))
            .expect("service loop gone");
    }

    pub fn send_frame(&self, address: &str, frame: ShmFrame) {
        self.cmd_tx
            .send(ServiceMessage::Frame {
                address: address.to_string(),
                frame,
            })
            .expect("service loop gone");
    }

    pub fn node_requests(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, Request::Node(_)))
            .count()
    }

    pub fn unsubscribes(&self) -> Vec<RequestId> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| match r {
                Request::Unsubscribe(req) => Some(req.id),
                _ => None,
            })
            .collect()
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn service_loop(
    stream: UnixStream,
    spec: ServiceSpec,
    requests: Arc<Mutex<Vec<Request>>>,
    mut cmd_rx: mpsc::UnboundedReceiver<ServiceMessage>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, LengthDelimitedCodec::new());
    let mut writer = FramedWrite::new(write_half, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            Some(message) = cmd_rx.recv() => send_message(&mut writer, &message).await,
            frame = reader.next() => {
                let Some(Ok(bytes)) = frame else { break };
                let (envelope, _): (RequestEnvelope, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                        .expect("undecodable request");
                requests.lock().push(envelope.request.clone());
                route(&mut writer, &spec, envelope).await;
            }
        }
    }
}

async fn route(
    writer: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    spec: &ServiceSpec,
    envelope: RequestEnvelope,
) {
    let RequestEnvelope {
        request_id,
        request,
    } = envelope;
    match request {
        Request::Node(req) => {
            if let Some(node) = spec.nodes.iter().find(|n| n.key == req.primary_key) {
                reply(writer, request_id, Reply::Node(node_response(node))).await;
            }
        }
        Request::Topic(req) => {
            if let Some(topic) = spec.topics.iter().find(|t| t.key == req.primary_key) {
                reply(writer, request_id, Reply::Topic(topic_response(topic))).await;
            }
        }
        Request::Search(req) => {
            let primary_key = match req.scope {
                SearchScope::Node => spec
                    .nodes
                    .iter()
                    .find(|n| n.name == req.name)
                    .map(|n| n.key.clone())
                    .or_else(|| spec.host_node.clone())
                    .unwrap_or_default(),
                SearchScope::Topic => spec
                    .topics
                    .iter()
                    .find(|t| t.name == req.name)
                    .map(|t| t.key.clone())
                    .unwrap_or_default(),
            };
            reply(writer, request_id, Reply::Search(SearchResponse { primary_key })).await;
        }
        Request::SingleAttributes(req) => {
            let address = attribute_address(&req.primary_key, &req.attribute);
            reply(
                writer,
                request_id,
                Reply::SingleAttributes(SingleAttributesResponse {
                    request_id,
                    mem_address: address.clone(),
                }),
            )
            .await;
            send_message(
                writer,
                &ServiceMessage::Frame {
                    address,
                    frame: ShmFrame::Numerical {
                        value: spec.initial_attribute_value,
                    },
                },
            )
            .await;
        }
        Request::CustomMember(_) => {
            let address = format!("topology/{request_id}");
            reply(
                writer,
                request_id,
                Reply::CustomMember(CustomMemberResponse {
                    request_id,
                    mem_address: address.clone(),
                }),
            )
            .await;
            let frames = match (&spec.topology_frames, &spec.topology_document) {
                (Some(frames), _) => frames.clone(),
                (None, Some(document)) => chunk_document(document),
                (None, None) => chunk_document(&topology_document(&[], &[], &[], &[], &[])),
            };
            for frame in frames {
                send_message(
                    writer,
                    &ServiceMessage::Frame {
                        address: address.clone(),
                        frame,
                    },
                )
                .await;
            }
        }
        Request::Unsubscribe(_) => {}
    }
}

fn node_response(node: &NodeSpec) -> NodeResponse {
    NodeResponse {
        primary_key: node.key.clone(),
        name: node.name.clone(),
        pkg_name: "demo_pkg".to_string(),
        state: if node.alive {
            MemberState::Active
        } else {
            MemberState::Inactive
        },
        state_change_time: 1_700_000_000,
        boot_count: 1,
        process_id: 4242,
    }
}

fn topic_response(topic: &TopicSpec) -> TopicResponse {
    let edges = |list: &[(u64, String)]| {
        list.iter()
            .map(|(edge_id, node)| TopicEdge {
                edge_id: *edge_id,
                node: node.clone(),
            })
            .collect()
    };
    TopicResponse {
        primary_key: topic.key.clone(),
        name: topic.name.clone(),
        type_name: topic.type_name.clone(),
        publishers: edges(&topic.publishers),
        subscribers: edges(&topic.subscribers),
    }
}

/// Splits a document into two ordered textual frames (one if it is tiny).
fn chunk_document(document: &str) -> Vec<ShmFrame> {
    if document.len() < 8 {
        return vec![ShmFrame::Textual {
            number: 1,
            total: 1,
            text: document.to_string(),
        }];
    }
    let mut mid = document.len() / 2;
    while !document.is_char_boundary(mid) {
        mid += 1;
    }
    let (head, tail) = document.split_at(mid);
    vec![
        ShmFrame::Textual {
            number: 1,
            total: 2,
            text: head.to_string(),
        },
        ShmFrame::Textual {
            number: 2,
            total: 2,
            text: tail.to_string(),
        },
    ]
}

async fn reply(
    writer: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    request_id: RequestId,
    reply: Reply,
) {
    send_message(writer, &ServiceMessage::Reply { request_id, reply }).await;
}

async fn send_message(
    writer: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    message: &ServiceMessage,
) {
    let bytes = bincode::serde::encode_to_vec(message, bincode::config::standard())
        .expect("encodable message");
    writer.send(bytes.into()).await.expect("writable stream");
}
