mod common;

use common::{FakeService, NodeSpec, ServiceSpec, attribute_address};
use faultline::core::member::MemberProxy;
use faultline::core::store::DataStore;
use faultline::ipc::proto::ShmFrame;
use std::time::Duration;

async fn settle() {
    // Frames cross the in-process socket quickly, but not instantly.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn spec() -> ServiceSpec {
    let mut spec = ServiceSpec::new();
    spec.nodes.push(NodeSpec::new("N1", "sensor_driver"));
    spec
}

#[tokio::test]
async fn test_attributes_start_from_the_seeded_value() {
    let (client, _service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let handle = store.get_node(&"N1".to_string()).await.unwrap();

    let attributes = handle.lock().get_attributes();
    assert_eq!(attributes.len(), 1);
    assert!((attributes["cpu-utilisation"] - 0.2).abs() < 1e-12);
}

#[tokio::test]
async fn test_drain_keeps_only_the_newest_sample() {
    let (client, service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let handle = store.get_node(&"N1".to_string()).await.unwrap();

    let address = attribute_address("N1", "cpu-utilisation");
    for value in [0.3, 0.4, 0.75] {
        service.send_frame(&address, ShmFrame::Numerical { value });
    }
    settle().await;

    let attributes = handle.lock().get_attributes();
    assert!((attributes["cpu-utilisation"] - 0.75).abs() < 1e-12);
}

#[tokio::test]
async fn test_empty_channel_reports_the_cached_value() {
    let (client, service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let handle = store.get_node(&"N1".to_string()).await.unwrap();

    let address = attribute_address("N1", "cpu-utilisation");
    service.send_frame(&address, ShmFrame::Numerical { value: 0.6 });
    settle().await;
    assert!((handle.lock().get_attributes()["cpu-utilisation"] - 0.6).abs() < 1e-12);

    // Nothing new arrived; the cached value is repeated.
    assert!((handle.lock().get_attributes()["cpu-utilisation"] - 0.6).abs() < 1e-12);
}

#[tokio::test]
async fn test_textual_frames_on_a_numeric_feed_are_ignored() {
    let (client, service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let handle = store.get_node(&"N1".to_string()).await.unwrap();

    let address = attribute_address("N1", "cpu-utilisation");
    service.send_frame(&address, ShmFrame::Numerical { value: 0.5 });
    service.send_frame(
        &address,
        ShmFrame::Textual {
            number: 1,
            total: 1,
            text: "not a sample".to_string(),
        },
    );
    settle().await;

    let attributes = handle.lock().get_attributes();
    assert!((attributes["cpu-utilisation"] - 0.5).abs() < 1e-12);
}

#[tokio::test]
async fn test_handles_compare_by_primary_key() {
    let (client, _service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let first = store.get_node(&"N1".to_string()).await.unwrap();
    let second = first.clone();
    assert_eq!(first, second);
    assert_eq!(first.proxy(), MemberProxy::node("N1"));
    assert_eq!(format!("{}", first.proxy()), "Proxy(Node(N1))");
}

#[tokio::test]
async fn test_clone_and_drop_move_the_use_counter() {
    let (client, _service) = FakeService::spawn(spec());
    let store = DataStore::new(client);
    let first = store.get_node(&"N1".to_string()).await.unwrap();
    assert_eq!(first.use_count(), 1);
    let second = first.clone();
    assert_eq!(first.use_count(), 2);
    drop(second);
    assert_eq!(first.use_count(), 1);
}
