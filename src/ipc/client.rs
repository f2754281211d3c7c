// src/ipc/client.rs

//! Client for the external graph information service.
//!
//! One Unix domain socket carries everything: framed, bincode-encoded
//! requests go out, and a background reader task sorts what comes back into
//! three lanes — replies matched to their pending request, sample frames
//! routed to the channel named by their address, and graph updates queued
//! per kind for the data store's non-blocking polls.

use crate::config::IpcConfig;
use crate::core::errors::FaultlineError;
use crate::ipc::channel::ShmChannel;
use crate::ipc::proto::{
    GraphUpdate, Reply, Request, RequestEnvelope, RequestId, ServiceMessage, ShmFrame,
    UnsubscribeRequest, UpdateKind,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

/// Routing slot for one sample channel address. The receiver is parked until
/// a consumer claims it via [`IpcClient::open_channel`]; frames arriving
/// before that moment are buffered in the parked receiver.
struct ChannelSlot {
    tx: mpsc::UnboundedSender<ShmFrame>,
    parked: Option<mpsc::UnboundedReceiver<ShmFrame>>,
}

impl ChannelSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            parked: Some(rx),
        }
    }
}

struct Shared {
    pending: DashMap<RequestId, oneshot::Sender<Reply>>,
    channels: Mutex<HashMap<String, ChannelSlot>>,
    updates: Mutex<HashMap<UpdateKind, VecDeque<GraphUpdate>>>,
}

impl Shared {
    fn dispatch(&self, message: ServiceMessage) {
        match message {
            ServiceMessage::Reply { request_id, reply } => {
                match self.pending.remove(&request_id) {
                    Some((_, tx)) => {
                        // A dropped receiver means the requester gave up; the
                        // reply is simply discarded.
                        let _ = tx.send(reply);
                    }
                    None => warn!(request_id, "reply without a pending request, dropped"),
                }
            }
            ServiceMessage::Frame { address, frame } => {
                let mut channels = self.channels.lock();
                let slot = channels.entry(address).or_insert_with(ChannelSlot::new);
                if slot.tx.send(frame).is_err() {
                    debug!("sample frame for a closed channel, dropped");
                }
            }
            ServiceMessage::Update(update) => {
                self.updates
                    .lock()
                    .entry(update.kind())
                    .or_default()
                    .push_back(update);
            }
        }
    }
}

pub struct IpcClient {
    next_request_id: AtomicU64,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl IpcClient {
    /// Socket address of the service for a given project id.
    pub fn socket_path(project_id: u32) -> PathBuf {
        std::env::temp_dir().join(format!("graph-info-{project_id}.sock"))
    }

    /// Attaches to the service, retrying per the configured attempt count and
    /// back-off. Exhaustion is fatal for the caller.
    pub async fn connect(config: &IpcConfig) -> Result<Self, FaultlineError> {
        let path = Self::socket_path(config.project_id);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match UnixStream::connect(&path).await {
                Ok(stream) => {
                    info!(path = %path.display(), "connected to the graph information service");
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => {
                    if !config.retry_connection || attempt >= config.retry_attempts {
                        return Err(FaultlineError::Connection(format!(
                            "failed to reach the graph information service at '{}' after {} attempt(s): {}",
                            path.display(),
                            attempt,
                            e
                        )));
                    }
                    warn!(
                        attempt,
                        "connection to '{}' failed ({}), retrying in {}ms",
                        path.display(),
                        e,
                        config.retry_timeout_ms
                    );
                    tokio::time::sleep(Duration::from_millis(config.retry_timeout_ms)).await;
                }
            }
        }
    }

    /// Wraps an already connected stream. Used by [`Self::connect`] and by
    /// tests that drive the service end of a socket pair in-process.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            channels: Mutex::new(HashMap::new()),
            updates: Mutex::new(HashMap::new()),
        });
        let reader = tokio::spawn(Self::read_loop(read_half, shared.clone()));
        Self {
            next_request_id: AtomicU64::new(0),
            writer: tokio::sync::Mutex::new(FramedWrite::new(
                write_half,
                LengthDelimitedCodec::new(),
            )),
            shared,
            reader,
        }
    }

    async fn read_loop(read_half: OwnedReadHalf, shared: Arc<Shared>) {
        let mut framed = FramedRead::new(read_half, LengthDelimitedCodec::new());
        while let Some(result) = framed.next().await {
            match result {
                Ok(bytes) => {
                    match bincode::serde::decode_from_slice::<ServiceMessage, _>(
                        &bytes,
                        bincode::config::standard(),
                    ) {
                        Ok((message, _)) => shared.dispatch(message),
                        Err(e) => {
                            error!("undecodable frame from the graph information service: {e}");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("IPC stream error: {e}");
                    break;
                }
            }
        }
        // Dropping the pending senders wakes every awaiting requester with a
        // closed channel, which surfaces as a protocol error there.
        shared.pending.clear();
    }

    /// Sends `request` and awaits the matching reply. Returns the request id
    /// alongside so subscriptions can be released later.
    pub async fn request(&self, request: Request) -> Result<(RequestId, Reply), FaultlineError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(request_id, tx);

        if let Err(e) = self.send(RequestEnvelope { request_id, request }).await {
            self.shared.pending.remove(&request_id);
            return Err(e);
        }

        match rx.await {
            Ok(reply) => Ok((request_id, reply)),
            Err(_) => Err(FaultlineError::Protocol(format!(
                "the graph information service went away before answering request {request_id}"
            ))),
        }
    }

    /// Releases a subscription. Fire-and-forget; the service does not reply
    /// to unsubscribes.
    pub async fn unsubscribe(&self, id: RequestId) -> Result<(), FaultlineError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.send(RequestEnvelope {
            request_id,
            request: Request::Unsubscribe(UnsubscribeRequest { id }),
        })
        .await
    }

    /// Claims the consumer end of the sample channel at `address`. Frames
    /// that arrived before the claim are already buffered in it.
    pub fn open_channel(&self, address: &str) -> ShmChannel {
        let mut channels = self.shared.channels.lock();
        let slot = channels
            .entry(address.to_string())
            .or_insert_with(ChannelSlot::new);
        match slot.parked.take() {
            Some(rx) => ShmChannel::new(address.to_string(), rx),
            None => {
                // The previous consumer is gone; start the address over with
                // a fresh pair so the new consumer does not observe its tail.
                let (tx, rx) = mpsc::unbounded_channel();
                slot.tx = tx;
                ShmChannel::new(address.to_string(), rx)
            }
        }
    }

    /// Non-blocking poll of the update queue for `kind`.
    pub fn try_poll_update(&self, kind: UpdateKind) -> Option<GraphUpdate> {
        self.shared.updates.lock().get_mut(&kind)?.pop_front()
    }

    async fn send(&self, envelope: RequestEnvelope) -> Result<(), FaultlineError> {
        let bytes = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())?;
        let mut writer = self.writer.lock().await;
        writer.send(bytes.into()).await?;
        Ok(())
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
