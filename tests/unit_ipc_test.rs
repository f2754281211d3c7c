mod common;

use common::{FakeService, NodeSpec, ServiceSpec};
use faultline::ipc::proto::{
    GraphUpdate, MemberState, Reply, Request, SearchRequest, SearchScope, ShmFrame,
    SingleAttributesRequest, UpdateKind,
};
use faultline::ipc::{IpcClient, proto::Direction};
use std::time::Duration;

fn spec_with_node(key: &str, name: &str) -> ServiceSpec {
    let mut spec = ServiceSpec::new();
    spec.nodes.push(NodeSpec::new(key, name));
    spec
}

async fn poll_update(client: &IpcClient, kind: UpdateKind) -> GraphUpdate {
    for _ in 0..200 {
        if let Some(update) = client.try_poll_update(kind) {
            return update;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no {kind:?} update arrived");
}

#[tokio::test]
async fn test_request_reply_correlation() {
    let (client, _service) = FakeService::spawn(spec_with_node("N1", "sensor_driver"));
    let (request_id, reply) = client
        .request(Request::Search(SearchRequest {
            scope: SearchScope::Node,
            name: "sensor_driver".to_string(),
        }))
        .await
        .unwrap();
    assert!(request_id > 0);
    match reply {
        Reply::Search(response) => assert_eq!(response.primary_key, "N1"),
        other => panic!("expected a search reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_ids_are_unique() {
    let (client, _service) = FakeService::spawn(spec_with_node("N1", "sensor_driver"));
    let mut seen = Vec::new();
    for _ in 0..3 {
        let (request_id, _) = client
            .request(Request::Search(SearchRequest {
                scope: SearchScope::Node,
                name: "sensor_driver".to_string(),
            }))
            .await
            .unwrap();
        assert!(!seen.contains(&request_id));
        seen.push(request_id);
    }
}

#[tokio::test]
async fn test_frames_arriving_before_the_channel_is_claimed_are_kept() {
    let (client, _service) = FakeService::spawn(spec_with_node("N1", "sensor_driver"));
    // The fake service sends the seed frame right after the reply; the
    // channel is only claimed afterwards and must still see it.
    let (_, reply) = client
        .request(Request::SingleAttributes(SingleAttributesRequest {
            attribute: "cpu-utilisation".to_string(),
            direction: Direction::Inbound,
            continuous: true,
            primary_key: "N1".to_string(),
        }))
        .await
        .unwrap();
    let response = match reply {
        Reply::SingleAttributes(response) => response,
        other => panic!("expected an attribute reply, got {other:?}"),
    };
    let mut channel = client.open_channel(&response.mem_address);
    match channel.receive().await.unwrap() {
        ShmFrame::Numerical { value } => assert!((value - 0.2).abs() < 1e-12),
        other => panic!("expected the numerical seed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_updates_are_queued_per_kind_in_order() {
    let (client, service) = FakeService::spawn(ServiceSpec::new());
    service.send_update(GraphUpdate::NodeState {
        node: "A".to_string(),
        state: MemberState::Inactive,
        change_time: 1,
    });
    service.send_update(GraphUpdate::NodeState {
        node: "B".to_string(),
        state: MemberState::Active,
        change_time: 2,
    });
    service.send_update(GraphUpdate::TopicSubscribers {
        topic: "T".to_string(),
        subscriber: faultline::ipc::proto::TopicEdge {
            edge_id: 1,
            node: "A".to_string(),
        },
    });

    let first = poll_update(&client, UpdateKind::NodeState).await;
    match first {
        GraphUpdate::NodeState { node, .. } => assert_eq!(node, "A"),
        other => panic!("unexpected update {other:?}"),
    }
    let second = poll_update(&client, UpdateKind::NodeState).await;
    match second {
        GraphUpdate::NodeState { node, .. } => assert_eq!(node, "B"),
        other => panic!("unexpected update {other:?}"),
    }
    let topical = poll_update(&client, UpdateKind::TopicSubscribers).await;
    assert!(matches!(topical, GraphUpdate::TopicSubscribers { .. }));
    // Queues are now drained.
    assert!(client.try_poll_update(UpdateKind::NodeState).is_none());
}

#[tokio::test]
async fn test_unsubscribe_reaches_the_service() {
    let (client, service) = FakeService::spawn(ServiceSpec::new());
    client.unsubscribe(7).await.unwrap();
    for _ in 0..200 {
        if service.unsubscribes().contains(&7) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("unsubscribe never arrived");
}
