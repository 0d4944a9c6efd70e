//! Integration tests for the capability proxy layer: shapes, forwarding,
//! recursive wrapping and detachment.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{fixture, manager};
use tokio_util::sync::CancellationToken;
use trellis_resource::{Error, MemoryStore, Proxy, Value};

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_requests_yield_interchangeable_proxies() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let a = manager.create("Cell").unwrap();
    let b = manager.create("Cell").unwrap();

    let first = manager.get_proxy(a).unwrap();
    let second = manager.get_proxy(a).unwrap();
    let other = manager.get_proxy(b).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.shape().capabilities(), second.shape().capabilities());
    assert_ne!(first, other);
    assert!(Arc::ptr_eq(first.shape(), other.shape()));
}

#[tokio::test]
async fn derived_types_share_shape_only_without_new_capabilities() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let cell = manager.get_proxy(manager.create("Cell").unwrap()).unwrap();
    let station = manager.get_proxy(manager.create("Station").unwrap()).unwrap();
    let smart = manager.get_proxy(manager.create("SmartCell").unwrap()).unwrap();

    assert!(Arc::ptr_eq(cell.shape(), station.shape()));
    assert!(!Arc::ptr_eq(cell.shape(), smart.shape()));
    assert!(smart.implements("ISmart"));
    assert!(smart.implements("ICell"));
    assert!(!cell.implements("ISmart"));
}

#[tokio::test]
async fn type_without_capabilities_gets_an_empty_proxy() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let bare = manager.get_proxy(manager.create("Bare").unwrap()).unwrap();

    assert!(bare.shape().capabilities().is_empty());
    assert!(matches!(
        bare.get("Name"),
        Err(Error::MemberNotExposed { .. })
    ));
}

#[tokio::test]
async fn binding_checks_the_requested_capability() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let key = manager.create("Cell").unwrap();

    assert!(matches!(
        manager.bind_as(key, "ICollection"),
        Err(Error::UnsupportedCapability { .. })
    ));
    assert!(matches!(
        manager.bind_as(key, "ISmart"),
        Err(Error::CapabilityNotImplemented { .. })
    ));
    assert!(matches!(
        manager.bind_as(key, "INope"),
        Err(Error::UnknownCapability { .. })
    ));
    assert!(manager.bind_as(key, "ICell").unwrap().implements("ICell"));
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn properties_forward_to_the_resource() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let cell = manager.get_proxy(manager.create("Cell").unwrap()).unwrap();

    cell.set("Speed", 42_i64).unwrap();
    cell.set("Name", "press").unwrap();

    assert_eq!(cell.get("Speed").unwrap().as_int(), Some(42));
    assert_eq!(cell.get("Name").unwrap().as_str(), Some("press"));
    assert_eq!(manager.graph().core(cell.key()).unwrap().name, "press");
}

#[tokio::test]
async fn read_only_and_undeclared_members_are_rejected() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let tool = manager.get_proxy(manager.create("Tool").unwrap()).unwrap();

    assert!(matches!(
        tool.set("Wear", 3_i64),
        Err(Error::Invocation { .. })
    ));
    assert!(matches!(
        tool.invoke("Run", Vec::new()),
        Err(Error::MemberNotExposed { .. })
    ));
}

#[tokio::test]
async fn resource_values_cross_the_boundary_as_proxies() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let cell = manager.get_proxy(manager.create("Cell").unwrap()).unwrap();
    let tool = manager.get_proxy(manager.create("Tool").unwrap()).unwrap();
    let spare = manager.get_proxy(manager.create("Tool").unwrap()).unwrap();

    cell.set("Primary", &tool).unwrap();
    cell.add("Candidates", &tool).unwrap();
    cell.add("Candidates", &spare).unwrap();

    // The graph stores keys, never proxies.
    let refs = manager.graph().references(cell.key()).unwrap();
    assert_eq!(refs.single("Primary"), Some(tool.key()));

    let primary = cell.get("Primary").unwrap();
    assert_eq!(primary.as_resource(), Some(&tool));

    let candidates = cell.get("Candidates").unwrap();
    let members: Vec<&Proxy> = candidates
        .as_list()
        .unwrap()
        .iter()
        .filter_map(Value::as_resource)
        .collect();
    assert_eq!(members, vec![&tool, &spare]);

    let echoed = cell.invoke("Run", vec![Value::from(&spare)]).unwrap();
    assert_eq!(echoed.as_list().unwrap()[0].as_resource(), Some(&spare));
}

#[tokio::test]
async fn events_report_the_proxy_as_sender() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let cell = manager.get_proxy(manager.create("Cell").unwrap()).unwrap();
    let tool = manager.get_proxy(manager.create("Tool").unwrap()).unwrap();

    let seen: Arc<Mutex<Vec<(Proxy, Vec<Value<Proxy>>)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    cell.subscribe("Done", move |event| {
        sink.lock()
            .unwrap()
            .push((event.sender.clone(), event.args.clone()));
    })
    .unwrap();

    cell.invoke("Run", vec![Value::from(&tool)]).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, cell);
    assert_eq!(seen[0].1[0].as_resource(), Some(&tool));
}

#[tokio::test]
async fn unsubscribed_listener_stays_silent() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    let cell = manager.get_proxy(manager.create("Cell").unwrap()).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let subscription = cell
        .subscribe("Done", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    cell.invoke("Run", Vec::new()).unwrap();
    assert!(cell.unsubscribe(subscription));
    assert!(!cell.unsubscribe(subscription));
    cell.invoke("Run", Vec::new()).unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Detachment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stopping_the_manager_detaches_proxies_for_good() {
    let fx = fixture();
    let manager = manager(&fx, &MemoryStore::new());
    manager.initialize(&CancellationToken::new()).await.unwrap();
    manager.start().await.unwrap();

    let key = manager.create("Cell").unwrap();
    let cell = manager.get_proxy(key).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    cell.subscribe("Done", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    cell.invoke("Run", Vec::new()).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    manager.stop().await.unwrap();

    assert!(!cell.is_attached());
    assert!(matches!(
        cell.invoke("Run", Vec::new()),
        Err(Error::ProxyDetached { .. })
    ));
    assert!(matches!(cell.get("Speed"), Err(Error::ProxyDetached { .. })));
    assert!(matches!(
        manager.get_proxy(key),
        Err(Error::ProxyDetached { .. })
    ));

    // The resource still raises events; the detached listener hears nothing.
    manager.graph().invoke(key, "Run", Vec::new()).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // A restart brings a fresh controller; old proxies stay detached.
    manager.start().await.unwrap();
    let fresh = manager.get_proxy(key).unwrap();
    assert!(fresh.is_attached());
    assert_ne!(fresh, cell);
    assert!(matches!(
        cell.invoke("Run", Vec::new()),
        Err(Error::ProxyDetached { .. })
    ));
    manager.stop().await.unwrap();
}
