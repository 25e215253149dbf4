// Thing lifecycle tests: address allocation, inclusion and exclusion
// reporting, persistent state and the adapter command routings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use plexkit_core::adapter::report::{
    CMD_THING_DELETE, CMD_THING_GET_INCLUSION_REPORT, CMD_THING_PING, EVT_THING_CONNECTIVITY_REPORT,
    EVT_THING_EXCLUSION_REPORT, EVT_THING_INCLUSION_REPORT, PROP_NEW,
};
use plexkit_core::adapter::{
    routing, AdapterState, ConnectionQuality, ConnectionType, ConnectivityDetails, ConnectivityReport,
    InclusionReport, ServiceSpecification, StaticConnector,
};
use plexkit_core::event::CLASS_INCLUSION_REPORT_SENT;
use plexkit_core::{
    Adapter, AdapterConfig, CoreError, EventFilter, EventManager, EventPayload, Router, RouterConfig,
    TaskManager, Thing, ThingContext, ThingFactory, ThingState,
};
use plexkit_fimp::address::MSG_TYPE_CMD;
use plexkit_fimp::{Address, FimpMessage, MemoryTransport, Message, Transport, Value, EVT_ERROR_REPORT};

const ADAPTER: &str = "vinculum";
const EVENT_TOPIC: &str = "pt:j1/mt:evt/rt:ad/rn:vinculum/ad:1";

// ── Helpers ─────────────────────────────────────────────────────────

/// Builds virtual lamps. IDs listed in `failing` cannot be built; IDs
/// listed in `offline` publish through a bus that was never started.
#[derive(Default)]
struct LampFactory {
    failing: Mutex<BTreeSet<String>>,
    offline: Mutex<BTreeSet<String>>,
    connectors: Mutex<BTreeMap<String, Arc<StaticConnector>>>,
}

impl LampFactory {
    fn fail_for(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_owned());
    }

    fn offline_for(&self, id: &str) {
        self.offline.lock().unwrap().insert(id.to_owned());
    }

    fn connector(&self, id: &str) -> Arc<StaticConnector> {
        Arc::clone(&self.connectors.lock().unwrap()[id])
    }
}

fn lamp_report(address: &str, alias: &str) -> InclusionReport {
    InclusionReport {
        address: address.to_owned(),
        alias: alias.to_owned(),
        product_hash: "virtual_lamp".into(),
        comm_tech: "virtual".into(),
        services: vec![ServiceSpecification::new(
            "out_bin_switch",
            format!("pt:j1/mt:cmd/rt:dev/rn:{ADAPTER}/ad:1/sv:out_bin_switch/ad:{address}_0"),
        )],
        ..InclusionReport::default()
    }
}

#[async_trait]
impl ThingFactory for LampFactory {
    async fn create(&self, ctx: &ThingContext, state: ThingState) -> Result<Thing, CoreError> {
        if self.failing.lock().unwrap().contains(state.id()) {
            return Err(CoreError::handler("device unreachable"));
        }
        let alias: String = state
            .info::<serde_json::Value>()?
            .and_then(|info| info["alias"].as_str().map(str::to_owned))
            .unwrap_or_default();

        let ctx = if self.offline.lock().unwrap().contains(state.id()) {
            ThingContext::new(
                ctx.adapter_name(),
                ctx.adapter_address(),
                Arc::new(MemoryTransport::new()),
                ctx.events().clone(),
            )
        } else {
            ctx.clone()
        };

        let connector = Arc::new(StaticConnector::default());
        self.connectors
            .lock()
            .unwrap()
            .insert(state.id().to_owned(), Arc::clone(&connector));
        Thing::new(&ctx, state.id(), lamp_report(state.address(), &alias), connector)
    }
}

async fn started_bus() -> MemoryTransport {
    let bus = MemoryTransport::new();
    bus.start().await.unwrap();
    bus
}

fn adapter_on(bus: &MemoryTransport, dir: &Path, factory: Arc<LampFactory>) -> Adapter {
    Adapter::new(
        AdapterConfig::new(ADAPTER, "1", dir),
        Arc::new(bus.clone()),
        EventManager::new(),
        factory,
    )
    .unwrap()
}

fn command(msg_type: &str, value: Value) -> Message {
    Message::new(
        Address::adapter(MSG_TYPE_CMD, ADAPTER, "1"),
        FimpMessage::new(msg_type, ADAPTER, value),
    )
}

async fn wait_published(bus: &MemoryTransport, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), bus.wait_published(count))
        .await
        .unwrap();
}

// ── Address allocation ──────────────────────────────────────────────

#[test]
fn test_address_allocation_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let state = AdapterState::open(dir.path()).unwrap();
    let first: Vec<String> = (0..3).map(|_| state.acquire_address().unwrap()).collect();
    assert_eq!(first, vec!["1", "2", "3"]);
    drop(state);

    let reopened = AdapterState::open(dir.path()).unwrap();
    assert_eq!(reopened.acquire_address().unwrap(), "4");
    assert!(dir.path().join("adapter.json.bak").exists());
}

// ── Inclusion / exclusion ───────────────────────────────────────────

#[tokio::test]
async fn test_inclusion_on_add_then_refresh_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;

    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    let events = adapter.context().events().clone();
    let sub = events.subscribe("test", 4, [EventFilter::class(CLASS_INCLUSION_REPORT_SENT)]);

    adapter
        .create_thing("lamp", json!({ "alias": "Kitchen" }))
        .await
        .unwrap();

    let added = bus.published_of_type(EVT_THING_INCLUSION_REPORT);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].topic, EVENT_TOPIC);
    assert_eq!(added[0].payload.service, ADAPTER);
    assert_eq!(added[0].payload.property(PROP_NEW), Some("true"));
    let descriptor: InclusionReport = added[0].payload.value.as_object().unwrap();
    assert_eq!(descriptor.address, "1");
    assert_eq!(descriptor.alias, "Kitchen");

    assert_eq!(
        sub.try_recv().unwrap().payload,
        Some(EventPayload::InclusionReportSent {
            address: "1".into(),
            is_new: true
        })
    );
    drop(adapter);

    // Restart with the same working directory.
    bus.clear_published();
    let factory = Arc::new(LampFactory::default());
    let restarted = adapter_on(&bus, dir.path(), Arc::clone(&factory));
    assert!(restarted.things().is_empty());
    restarted.initialize_things().await.unwrap();

    let refreshed = bus.published_of_type(EVT_THING_INCLUSION_REPORT);
    assert_eq!(refreshed.len(), 1);
    assert_eq!(refreshed[0].topic, EVENT_TOPIC);
    assert_eq!(refreshed[0].payload.property(PROP_NEW), Some("false"));
    assert_eq!(refreshed[0].payload.value, added[0].payload.value);
    assert!(factory.connector("lamp").is_connected());
}

#[tokio::test]
async fn test_add_thing_keeps_registration_when_publish_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bus = MemoryTransport::new();
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));

    let connector = Arc::new(StaticConnector::default());
    let thing = Thing::new(
        adapter.context(),
        "manual",
        lamp_report("42", "Hall"),
        connector.clone(),
    )
    .unwrap();

    let result = adapter.add_thing(thing).await;
    assert!(matches!(result, Err(CoreError::Transport(_))));
    assert!(adapter.thing_by_address("42").is_some());
    assert!(connector.is_connected());
}

#[tokio::test]
async fn test_remove_thing_disconnects_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let factory = Arc::new(LampFactory::default());
    let adapter = adapter_on(&bus, dir.path(), Arc::clone(&factory));
    adapter.create_thing("lamp", json!({})).await.unwrap();

    adapter.remove_thing("1").await.unwrap();

    assert!(adapter.thing_by_address("1").is_none());
    assert!(!factory.connector("lamp").is_connected());
    let excluded = bus.published_of_type(EVT_THING_EXCLUSION_REPORT);
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].payload.value.as_object::<serde_json::Value>().unwrap(), json!({ "address": "1" }));

    // Already gone.
    assert!(adapter.remove_thing("1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_register_replaces_and_disconnects_previous_thing() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));

    let old = Arc::new(StaticConnector::default());
    let new = Arc::new(StaticConnector::default());
    let first = Thing::new(adapter.context(), "old", lamp_report("7", "Old"), old.clone()).unwrap();
    let second = Thing::new(adapter.context(), "new", lamp_report("7", "New"), new.clone()).unwrap();

    adapter.register_thing(first).await.unwrap();
    adapter.register_thing(second).await.unwrap();

    assert_eq!(adapter.things().len(), 1);
    assert_eq!(adapter.thing_by_address("7").unwrap().id(), "new");
    assert!(!old.is_connected());
    assert!(new.is_connected());
    assert!(bus.published().is_empty());
}

// ── Persistent things ───────────────────────────────────────────────

#[tokio::test]
async fn test_ensure_things_creates_and_destroys_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));

    let desired = BTreeMap::from([
        ("lamp".to_owned(), json!({ "alias": "Lamp" })),
        ("plug".to_owned(), json!({ "alias": "Plug" })),
    ]);
    adapter.ensure_things(desired.clone()).await.unwrap();
    assert_eq!(adapter.things().len(), 2);

    // Idempotent.
    adapter.ensure_things(desired).await.unwrap();
    assert_eq!(adapter.state().address_index(), 2);

    let lamp_address = adapter.thing_by_id("lamp").unwrap().address().to_owned();
    adapter
        .ensure_things(BTreeMap::from([
            ("plug".to_owned(), json!({})),
            ("heater".to_owned(), json!({})),
        ]))
        .await
        .unwrap();

    assert!(adapter.thing_by_id("lamp").is_none());
    assert!(adapter.state().record("lamp").is_none());
    let heater = adapter.thing_by_id("heater").unwrap();
    assert_ne!(heater.address(), lamp_address);
    assert_eq!(heater.address(), "3");
    assert_eq!(bus.published_of_type(EVT_THING_EXCLUSION_REPORT).len(), 1);
}

#[tokio::test]
async fn test_destroy_unknown_thing_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));

    adapter.destroy_thing("ghost").await.unwrap();
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn test_destroy_deletes_record_when_exclusion_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    adapter.create_thing("lamp", json!({})).await.unwrap();

    bus.stop().await.unwrap();
    let err = adapter.destroy_thing("lamp").await.unwrap_err();
    assert!(matches!(err, CoreError::Transport(_)));
    assert!(adapter.thing_by_id("lamp").is_none());
    assert!(adapter.state().ids().is_empty());
    drop(adapter);

    bus.start().await.unwrap();
    let restarted = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    restarted.initialize_things().await.unwrap();
    assert!(restarted.things().is_empty());
}

#[tokio::test]
async fn test_failed_factory_leaves_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let factory = Arc::new(LampFactory::default());
    factory.fail_for("broken");
    let adapter = adapter_on(&bus, dir.path(), Arc::clone(&factory));

    let err = adapter.create_thing("broken", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("broken"));
    assert!(adapter.state().ids().is_empty());
    assert!(adapter.things().is_empty());
}

#[tokio::test]
async fn test_destroy_all_things() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    adapter.create_thing("a", json!({})).await.unwrap();
    adapter.create_thing("b", json!({})).await.unwrap();

    adapter.destroy_all_things().await.unwrap();

    assert!(adapter.things().is_empty());
    assert!(adapter.state().ids().is_empty());
    assert_eq!(bus.published_of_type(EVT_THING_EXCLUSION_REPORT).len(), 2);
}

// ── Connectivity ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connectivity_pass_continues_past_failing_thing() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let factory = Arc::new(LampFactory::default());
    factory.offline_for("dead");
    let adapter = adapter_on(&bus, dir.path(), Arc::clone(&factory));

    // Registered first, but its inclusion report cannot go out.
    assert!(adapter.create_thing("dead", json!({})).await.is_err());
    adapter.create_thing("lamp", json!({})).await.unwrap();
    assert_eq!(adapter.thing_by_id("dead").unwrap().address(), "1");
    bus.clear_published();

    let err = routing::report_connectivity(&adapter).await.unwrap_err();
    assert!(matches!(err, CoreError::Transport(_)));
    let reports = bus.published_of_type(EVT_THING_CONNECTIVITY_REPORT);
    assert_eq!(reports.len(), 1);
    let body: ConnectivityReport = reports[0].payload.value.as_object().unwrap();
    assert_eq!(body.address, "2");

    // Every tick still reaches the lamp.
    factory
        .connector("lamp")
        .set(ConnectivityDetails::up(ConnectionType::Direct, ConnectionQuality::High));
    let tasks = TaskManager::new([routing::connectivity_task(&adapter, Duration::from_secs(60))]);
    tasks.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    tasks.stop().await.unwrap();

    let reports = bus.published_of_type(EVT_THING_CONNECTIVITY_REPORT);
    assert_eq!(reports.len(), 2);
    let body: ConnectivityReport = reports[1].payload.value.as_object().unwrap();
    assert_eq!(body.address, "2");
    assert_eq!(body.details.connection_status.to_string(), "UP");
}

// ── Lookup ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_service_lookup_by_topic() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    adapter.create_thing("a", json!({})).await.unwrap();
    adapter.create_thing("b", json!({})).await.unwrap();

    let topic = format!("pt:j1/mt:cmd/rt:dev/rn:{ADAPTER}/ad:1/sv:out_bin_switch/ad:2_0");
    assert_eq!(adapter.thing_by_topic(&topic).unwrap().id(), "b");
    assert_eq!(adapter.service_by_topic(&topic).unwrap().name(), "out_bin_switch");
    assert_eq!(adapter.services("out_bin_switch").len(), 2);
    assert_eq!(adapter.services("").len(), 2);
    assert!(adapter.service_by_topic("pt:j1/mt:cmd/rt:dev/rn:zwave/ad:1/sv:out_bin_switch/ad:9_0").is_none());
}

// ── Adapter routings ────────────────────────────────────────────────

#[tokio::test]
async fn test_adapter_commands_through_router() {
    let dir = tempfile::tempdir().unwrap();
    let bus = started_bus().await;
    let adapter = adapter_on(&bus, dir.path(), Arc::new(LampFactory::default()));
    adapter.create_thing("lamp", json!({})).await.unwrap();
    bus.clear_published();

    let router = Router::new(RouterConfig::default(), Arc::new(bus.clone()));
    router.register_topics([adapter.command_topic()]);
    router.register_routings(routing::routings(&adapter));
    router.start().await.unwrap();

    bus.inject(command(CMD_THING_GET_INCLUSION_REPORT, Value::from("1"))).await;
    wait_published(&bus, 1).await;
    let report = &bus.published()[0];
    assert_eq!(report.topic, EVENT_TOPIC);
    assert_eq!(report.payload.msg_type, EVT_THING_INCLUSION_REPORT);

    bus.inject(command(CMD_THING_PING, Value::from("1"))).await;
    wait_published(&bus, 2).await;
    assert_eq!(bus.published()[1].payload.msg_type, EVT_ERROR_REPORT);

    let delete = Value::StrMap(BTreeMap::from([("address".to_owned(), "1".to_owned())]));
    bus.inject(command(CMD_THING_DELETE, delete)).await;
    wait_published(&bus, 3).await;
    assert_eq!(bus.published()[2].payload.msg_type, EVT_THING_EXCLUSION_REPORT);

    router.stop().await.unwrap();
    assert!(adapter.thing_by_id("lamp").is_none());
    assert!(adapter.state().ids().is_empty());
}
