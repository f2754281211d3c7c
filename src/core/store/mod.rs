// src/core/store/mod.rs

//! The data store: a ref-counted, thread-safe cache of live graph members.
//!
//! It is the single point of outbound IPC for lookups and subscriptions.
//! Lookups hand out [`MemberPtr`] handles; a cache miss acquires the member
//! from the graph information service and subscribes its attribute feeds.
//! The ingestion loop evicts records nobody holds a handle onto anymore and
//! applies the streamed graph updates to the cached members, in that order,
//! so an update for a key evicted in the same cycle is dropped.

pub mod graph_view;

use crate::core::errors::FaultlineError;
use crate::core::handle::{MemberCell, MemberPtr};
use crate::core::member::{Member, MemberProxy, PrimaryKey};
use crate::core::store::graph_view::GraphView;
use crate::ipc::channel::ShmChannel;
use crate::ipc::client::IpcClient;
use crate::ipc::proto::{
    ALL_UPDATE_KINDS, CPU_UTILISATION_ATTRIBUTE, CustomMemberRequest, Direction, GraphUpdate,
    MAX_STRING_SIZE, NodeRequest, PUBLISHING_RATE_ATTRIBUTE, Reply, Request, RequestId,
    SearchRequest, SearchScope, ShmFrame, SingleAttributesRequest, SingleAttributesResponse,
    TopicRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The topology query the graph information service expects, verbatim. The
/// reply is the usual transactional-API envelope whose single row carries
/// the `active`/`passive` key arrays and the `pub`/`sub`/`send` edge arrays.
pub const GRAPH_TOPOLOGY_QUERY: &str = "\
MATCH (n:Node)
WITH collect(DISTINCT n.primaryKey) AS active
MATCH (t:Topic)
WITH active, collect(DISTINCT t.primaryKey) AS passive
OPTIONAL MATCH (pn:Node)-[pr:PUBLISHES_TO]->(pt:Topic)
WITH active, passive,
     collect({from: pn.primaryKey, to: pt.primaryKey, rel: type(pr)}) AS pub
OPTIONAL MATCH (sn:Node)-[sr:SUBSCRIBES_TO]->(st:Topic)
WITH active, passive, pub,
     collect({from: st.primaryKey, to: sn.primaryKey, rel: type(sr)}) AS sub
OPTIONAL MATCH (cn:Node)-[dr:SENDS_TO]->(dn:Node)
RETURN {active: active, passive: passive, pub: pub, sub: sub,
        send: collect({from: cn.primaryKey, to: dn.primaryKey, rel: type(dr)})}";

/// One cached member plus the id of its update subscription.
struct MemberRecord {
    cell: Arc<MemberCell>,
    request_id: RequestId,
}

type Records = Mutex<HashMap<PrimaryKey, MemberRecord>>;

pub struct DataStore {
    nodes: Records,
    topics: Records,
    ipc: IpcClient,
}

impl DataStore {
    pub fn new(ipc: IpcClient) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            topics: Mutex::new(HashMap::new()),
            ipc,
        }
    }

    /// Returns a handle onto the node with the given key, acquiring it from
    /// the service on a cache miss.
    pub async fn get_node(&self, primary: &PrimaryKey) -> Result<MemberPtr, FaultlineError> {
        if let Some(handle) = Self::lookup(&self.nodes, primary) {
            return Ok(handle);
        }
        self.request_node(primary.clone()).await
    }

    pub async fn get_topic(&self, primary: &PrimaryKey) -> Result<MemberPtr, FaultlineError> {
        if let Some(handle) = Self::lookup(&self.topics, primary) {
            return Ok(handle);
        }
        self.request_topic(primary.clone()).await
    }

    /// Resolves a node by display name: linear cache scan first, then a
    /// remote search. `None` when the name is unknown remotely too.
    pub async fn get_node_by_name(
        &self,
        name: &str,
    ) -> Result<Option<MemberPtr>, FaultlineError> {
        if let Some(handle) = Self::lookup_by_name(&self.nodes, name) {
            return Ok(Some(handle));
        }
        match self.search(SearchScope::Node, name).await? {
            Some(primary) => self.get_node(&primary).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn get_topic_by_name(
        &self,
        name: &str,
    ) -> Result<Option<MemberPtr>, FaultlineError> {
        if let Some(handle) = Self::lookup_by_name(&self.topics, name) {
            return Ok(Some(handle));
        }
        match self.search(SearchScope::Topic, name).await? {
            Some(primary) => self.get_topic(&primary).await.map(Some),
            None => Ok(None),
        }
    }

    /// Dispatches on the proxy's kind.
    pub async fn get(&self, proxy: &MemberProxy) -> Result<MemberPtr, FaultlineError> {
        if proxy.is_topic {
            self.get_topic(&proxy.primary_key).await
        } else {
            self.get_node(&proxy.primary_key).await
        }
    }

    /// Issues the topology query and reassembles the streamed document into
    /// a [`GraphView`].
    pub async fn get_full_graph_view(&self) -> Result<GraphView, FaultlineError> {
        let (_, reply) = self
            .ipc
            .request(Request::CustomMember(CustomMemberRequest {
                query: GRAPH_TOPOLOGY_QUERY.to_string(),
                continuous: false,
            }))
            .await?;
        let response = match reply {
            Reply::CustomMember(response) => response,
            other => {
                return Err(FaultlineError::Protocol(format!(
                    "unexpected reply to the topology query: {other:?}"
                )));
            }
        };

        let mut channel = self.ipc.open_channel(&response.mem_address);
        let document = Self::reassemble_textual(&mut channel).await?;
        if let Err(e) = self.ipc.unsubscribe(response.request_id).await {
            warn!("failed to release the topology query subscription: {e}");
        }
        GraphView::parse(&document)
    }

    /// Subscribes a continuous CPU-utilisation feed for the member named
    /// like this host and returns its sample channel.
    pub async fn get_cpu_utilisation_source(&self) -> Result<ShmChannel, FaultlineError> {
        let host = sysinfo::System::host_name()
            .ok_or_else(|| FaultlineError::Internal("host name unavailable".to_string()))?;
        if host.len() > MAX_STRING_SIZE {
            return Err(FaultlineError::Protocol(format!(
                "host name '{host}' does not fit the wire field"
            )));
        }
        let primary = self
            .search(SearchScope::Node, &host)
            .await?
            .ok_or(FaultlineError::UnknownMember(host))?;
        let response = self
            .subscribe_attribute(CPU_UTILISATION_ATTRIBUTE.to_string(), primary)
            .await?;
        Ok(self.ipc.open_channel(&response.mem_address))
    }

    /// Every member currently known to the service, as identity proxies.
    pub async fn get_all_members(&self) -> Result<Vec<MemberProxy>, FaultlineError> {
        Ok(self.get_full_graph_view().await?.proxies())
    }

    /// Background ingestion loop: one [`Self::run_ingestion_cycle`] per tick
    /// until the shutdown channel fires.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        cycle_interval: Duration,
    ) {
        info!("data store ingestion loop started");
        let mut interval = tokio::time::interval(cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("data store ingestion loop shutting down");
                    return;
                }
                _ = interval.tick() => self.run_ingestion_cycle().await,
            }
        }
    }

    /// One ingestion cycle: evict unused records (releasing their
    /// subscriptions), then apply the pending graph updates.
    pub async fn run_ingestion_cycle(&self) {
        self.evict_unused(&self.nodes).await;
        self.evict_unused(&self.topics).await;
        self.apply_pending_updates();
    }

    fn lookup(collection: &Records, primary: &str) -> Option<MemberPtr> {
        collection
            .lock()
            .get(primary)
            .map(|record| MemberPtr::new(record.cell.clone()))
    }

    fn lookup_by_name(collection: &Records, name: &str) -> Option<MemberPtr> {
        let records = collection.lock();
        records
            .values()
            .find(|record| record.cell.lock().name == name)
            .map(|record| MemberPtr::new(record.cell.clone()))
    }

    async fn request_node(&self, primary: PrimaryKey) -> Result<MemberPtr, FaultlineError> {
        let (request_id, reply) = self
            .ipc
            .request(Request::Node(NodeRequest {
                primary_key: primary.clone(),
                updates: true,
            }))
            .await?;
        let response = match reply {
            Reply::Node(response) => response,
            other => {
                return Err(FaultlineError::Protocol(format!(
                    "unexpected reply to a node request: {other:?}"
                )));
            }
        };

        let mut member = Member::from_node_response(response)?;
        let attributes = self
            .subscribe_attribute(CPU_UTILISATION_ATTRIBUTE.to_string(), primary.clone())
            .await?;
        member
            .add_attribute_source(CPU_UTILISATION_ATTRIBUTE.to_string(), &attributes, &self.ipc)
            .await?;
        self.install(&self.nodes, primary, member, request_id).await
    }

    async fn request_topic(&self, primary: PrimaryKey) -> Result<MemberPtr, FaultlineError> {
        let (request_id, reply) = self
            .ipc
            .request(Request::Topic(TopicRequest {
                primary_key: primary.clone(),
                updates: true,
            }))
            .await?;
        let response = match reply {
            Reply::Topic(response) => response,
            other => {
                return Err(FaultlineError::Protocol(format!(
                    "unexpected reply to a topic request: {other:?}"
                )));
            }
        };

        // One publishing-rate feed per publisher edge.
        let publishers: Vec<PrimaryKey> =
            response.publishers.iter().map(|e| e.node.clone()).collect();
        let mut member = Member::from_topic_response(response)?;
        for publisher in publishers {
            let descriptor = format!("{PUBLISHING_RATE_ATTRIBUTE}/{publisher}");
            let attributes = self
                .subscribe_attribute(descriptor.clone(), primary.clone())
                .await?;
            member
                .add_attribute_source(descriptor, &attributes, &self.ipc)
                .await?;
        }
        self.install(&self.topics, primary, member, request_id).await
    }

    async fn search(
        &self,
        scope: SearchScope,
        name: &str,
    ) -> Result<Option<PrimaryKey>, FaultlineError> {
        let (_, reply) = self
            .ipc
            .request(Request::Search(SearchRequest {
                scope,
                name: name.to_string(),
            }))
            .await?;
        match reply {
            Reply::Search(response) if response.primary_key.is_empty() => Ok(None),
            Reply::Search(response) => Ok(Some(response.primary_key)),
            other => Err(FaultlineError::Protocol(format!(
                "unexpected reply to a search request: {other:?}"
            ))),
        }
    }

    async fn subscribe_attribute(
        &self,
        attribute: String,
        primary_key: PrimaryKey,
    ) -> Result<SingleAttributesResponse, FaultlineError> {
        let (_, reply) = self
            .ipc
            .request(Request::SingleAttributes(SingleAttributesRequest {
                attribute,
                direction: Direction::Inbound,
                continuous: true,
                primary_key,
            }))
            .await?;
        match reply {
            Reply::SingleAttributes(response) => Ok(response),
            other => Err(FaultlineError::Protocol(format!(
                "unexpected reply to an attribute subscription: {other:?}"
            ))),
        }
    }

    /// Installs a freshly acquired member, or — when a concurrent lookup for
    /// the same key won the race — keeps the earlier record and releases the
    /// duplicate's subscriptions.
    async fn install(
        &self,
        collection: &Records,
        primary: PrimaryKey,
        member: Member,
        request_id: RequestId,
    ) -> Result<MemberPtr, FaultlineError> {
        let (handle, duplicate_ids) = {
            let mut records = collection.lock();
            match records.entry(primary) {
                Entry::Occupied(entry) => {
                    let mut ids = member.attribute_request_ids();
                    ids.push(request_id);
                    (MemberPtr::new(entry.get().cell.clone()), ids)
                }
                Entry::Vacant(entry) => {
                    let cell = Arc::new(MemberCell::new(member));
                    let handle = MemberPtr::new(cell.clone());
                    entry.insert(MemberRecord { cell, request_id });
                    (handle, Vec::new())
                }
            }
        };
        for id in duplicate_ids {
            if let Err(e) = self.ipc.unsubscribe(id).await {
                warn!("failed to release a duplicate subscription {id}: {e}");
            }
        }
        Ok(handle)
    }

    /// Concatenates a chunked textual stream. Frame numbers must increase
    /// strictly; the stream is complete once `total` frames arrived.
    async fn reassemble_textual(channel: &mut ShmChannel) -> Result<String, FaultlineError> {
        let mut document = String::new();
        let mut previous = 0u32;
        let mut seen = 0u32;
        let mut expected_total = None;
        loop {
            match channel.receive().await? {
                ShmFrame::Textual { number, total, text } => {
                    if number <= previous {
                        return Err(FaultlineError::Protocol(format!(
                            "topology frame {number} arrived after frame {previous}"
                        )));
                    }
                    if total == 0 {
                        return Err(FaultlineError::Protocol(
                            "chunked stream announced zero frames".to_string(),
                        ));
                    }
                    match expected_total {
                        Some(expected) if expected != total => {
                            return Err(FaultlineError::Protocol(format!(
                                "chunked stream changed its frame count from {expected} to {total}"
                            )));
                        }
                        _ => expected_total = Some(total),
                    }
                    previous = number;
                    seen += 1;
                    document.push_str(&text);
                    if seen == total {
                        return Ok(document);
                    }
                }
                ShmFrame::Numerical { .. } => {
                    return Err(FaultlineError::Protocol(
                        "numerical frame in a chunked textual stream".to_string(),
                    ));
                }
            }
        }
    }

    async fn evict_unused(&self, collection: &Records) {
        let evicted: Vec<(PrimaryKey, Vec<RequestId>)> = {
            let mut records = collection.lock();
            let unused: Vec<PrimaryKey> = records
                .iter()
                .filter(|(_, record)| record.cell.use_count() == 0)
                .map(|(key, _)| key.clone())
                .collect();
            unused
                .into_iter()
                .filter_map(|key| {
                    records.remove(&key).map(|record| {
                        let mut ids = vec![record.request_id];
                        ids.extend(record.cell.lock().attribute_request_ids());
                        (key, ids)
                    })
                })
                .collect()
        };
        for (key, ids) in evicted {
            debug!("evicting unused member '{key}'");
            for id in ids {
                // The remote side may have invalidated the subscription
                // already; failure here is not fatal.
                if let Err(e) = self.ipc.unsubscribe(id).await {
                    warn!("unsubscribe {id} for evicted member '{key}' failed: {e}");
                }
            }
        }
    }

    fn apply_pending_updates(&self) {
        for kind in ALL_UPDATE_KINDS {
            while let Some(update) = self.ipc.try_poll_update(kind) {
                self.apply_update(update);
            }
        }
    }

    fn apply_update(&self, update: GraphUpdate) {
        let collection = if update.targets_topic() {
            &self.topics
        } else {
            &self.nodes
        };
        let records = collection.lock();
        match records.get(update.primary_key()) {
            Some(record) => record.cell.lock().apply_update(update),
            None => debug!(
                "update {:?} targets unknown member '{}', dropped",
                update.kind(),
                update.primary_key()
            ),
        }
    }
}
