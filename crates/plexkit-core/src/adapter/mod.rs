// ── Adapter ──
//
// Owns the thing registry of one adapter instance and orchestrates
// inclusion, exclusion and persistence. The registry lock is a std
// `RwLock` that is never held across an await; create/destroy calls are
// serialized by a separate async mutex so each one is atomic per thing.

pub mod connector;
pub mod report;
pub mod routing;
pub mod service;
pub mod state;
pub mod thing;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use plexkit_fimp::address::MSG_TYPE_CMD;
use plexkit_fimp::{Address, FimpMessage, Publisher};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::error::CoreError;
use crate::event::{Event, EventManager, EventPayload, CLASS_EXCLUSION_REPORT_SENT, DOMAIN_ADAPTER};

pub use connector::{Connector, ControllableConnector, Pinger, StaticConnector};
pub use report::{
    ConnectionQuality, ConnectionStatus, ConnectionType, ConnectivityDetails, ConnectivityReport,
    ExclusionReport, InclusionReport, Interface, InterfaceType, Operationability, PingDetails,
    PingReport, PingStatus, ServiceSpecification,
};
pub use service::Service;
pub use state::{AdapterState, ThingRecord, ThingState};
pub use thing::{Thing, ThingContext, ThingFactory};

/// Cheaply cloneable; clones share the registry and state.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    config: AdapterConfig,
    ctx: ThingContext,
    state: AdapterState,
    factory: Arc<dyn ThingFactory>,
    things: RwLock<IndexMap<String, Arc<Thing>>>,
    mutation: Mutex<()>,
}

impl Adapter {
    /// Open the adapter state under `config.data_dir`. Things are not
    /// materialized until [`Adapter::initialize_things`].
    pub fn new(
        config: AdapterConfig,
        publisher: Arc<dyn Publisher>,
        events: EventManager,
        factory: Arc<dyn ThingFactory>,
    ) -> Result<Self, CoreError> {
        let state = AdapterState::open(&config.data_dir)?;
        let ctx = ThingContext::new(config.name.clone(), config.address.clone(), publisher, events);
        Ok(Self {
            inner: Arc::new(AdapterInner {
                config,
                ctx,
                state,
                factory,
                things: RwLock::new(IndexMap::new()),
                mutation: Mutex::new(()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    /// Command topic of this adapter, for router subscriptions.
    pub fn command_topic(&self) -> String {
        Address::adapter(MSG_TYPE_CMD, self.name(), self.address()).to_string()
    }

    pub fn context(&self) -> &ThingContext {
        &self.inner.ctx
    }

    pub fn state(&self) -> &AdapterState {
        &self.inner.state
    }

    // ── Lookup ───────────────────────────────────────────────────────

    /// Registered things in registration order.
    pub fn things(&self) -> Vec<Arc<Thing>> {
        self.read_things().values().cloned().collect()
    }

    pub fn thing_by_address(&self, address: &str) -> Option<Arc<Thing>> {
        self.read_things().get(address).cloned()
    }

    pub fn thing_by_id(&self, id: &str) -> Option<Arc<Thing>> {
        self.read_things().values().find(|t| t.id() == id).cloned()
    }

    /// Owner of the first service matching `topic`.
    pub fn thing_by_topic(&self, topic: &str) -> Option<Arc<Thing>> {
        self.read_things()
            .values()
            .find(|t| t.service_by_topic(topic).is_some())
            .cloned()
    }

    /// Services called `name` across all things; empty name returns all.
    pub fn services(&self, name: &str) -> Vec<Arc<Service>> {
        self.read_things()
            .values()
            .flat_map(|t| t.services(name))
            .collect()
    }

    pub fn service_by_topic(&self, topic: &str) -> Option<Arc<Service>> {
        self.read_things()
            .values()
            .find_map(|t| t.service_by_topic(topic))
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Index `thing` and connect it. A thing already registered at the
    /// same address is replaced and disconnected. Nothing is published.
    pub async fn register_thing(&self, thing: Thing) -> Result<Arc<Thing>, CoreError> {
        let thing = Arc::new(thing);
        let previous = self
            .write_things()
            .insert(thing.address().to_owned(), Arc::clone(&thing));
        if let Some(previous) = previous {
            warn!(address = %thing.address(), replaced = %previous.id(), "replaced registered thing");
            if let Err(e) = previous.disconnect().await {
                warn!(address = %thing.address(), error = %e, "disconnect of replaced thing failed");
            }
        }

        thing.connect().await?;
        debug!(thing = %thing.id(), address = %thing.address(), "thing registered");
        Ok(thing)
    }

    /// Disconnect the thing at `address` and drop it from the index.
    /// Nothing is published.
    pub async fn unregister_thing(&self, address: &str) -> Result<Arc<Thing>, CoreError> {
        let thing = self
            .thing_by_address(address)
            .ok_or_else(|| CoreError::not_found("thing", address))?;

        thing.disconnect().await?;
        self.write_things().shift_remove(address);
        debug!(thing = %thing.id(), address, "thing unregistered");
        Ok(thing)
    }

    /// Register and connect `thing`, then publish its inclusion report
    /// flagged new. The thing stays registered if publishing fails.
    pub async fn add_thing(&self, thing: Thing) -> Result<Arc<Thing>, CoreError> {
        let thing = self.register_thing(thing).await?;
        thing.send_inclusion_report(true).await?;
        Ok(thing)
    }

    /// Drop the thing at `address` from the index, disconnect it and
    /// publish an exclusion report.
    pub async fn remove_thing(&self, address: &str) -> Result<(), CoreError> {
        let thing = self
            .write_things()
            .shift_remove(address)
            .ok_or_else(|| CoreError::not_found("thing", address))?;

        if let Err(e) = thing.disconnect().await {
            warn!(address, error = %e, "disconnect failed during removal");
        }
        self.send_exclusion_report(address).await
    }

    /// Remove every registered thing. Continues past failures and returns
    /// the first one.
    pub async fn remove_all_things(&self) -> Result<(), CoreError> {
        let addresses: Vec<String> = self.read_things().keys().cloned().collect();
        let mut first_error = None;
        for address in addresses {
            if let Err(e) = self.remove_thing(&address).await {
                warn!(%address, error = %e, "failed to remove thing");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ── Reports ──────────────────────────────────────────────────────

    pub async fn send_exclusion_report(&self, address: &str) -> Result<(), CoreError> {
        let body = ExclusionReport {
            address: address.to_owned(),
        };
        let payload = FimpMessage::object(report::EVT_THING_EXCLUSION_REPORT, "", &body)?;
        self.inner.ctx.publish_adapter_event(payload).await?;

        info!(address, "exclusion report sent");
        self.inner.ctx.events().publish(&Event::new(
            DOMAIN_ADAPTER,
            CLASS_EXCLUSION_REPORT_SENT,
            EventPayload::ExclusionReportSent {
                address: address.to_owned(),
            },
        ));
        Ok(())
    }

    /// Publish one aggregate connectivity report covering every thing.
    pub async fn send_all_nodes_report(&self) -> Result<(), CoreError> {
        let mut reports = Vec::new();
        for thing in self.things() {
            reports.push(thing.connectivity_report().await);
        }
        let payload = FimpMessage::object(report::EVT_NETWORK_ALL_NODES_REPORT, "", &reports)?;
        self.inner.ctx.publish_adapter_event(payload).await
    }

    // ── Persistent things ────────────────────────────────────────────

    /// Materialize every persisted thing, register it and publish a
    /// refresh inclusion report. Stops at the first failure.
    pub async fn initialize_things(&self) -> Result<(), CoreError> {
        let _guard = self.inner.mutation.lock().await;
        let records = self.inner.state.records();
        info!(count = records.len(), "initializing things");

        for record in records {
            let thing = self.materialize(&record).await?;
            let thing = self.register_thing(thing).await?;
            thing.send_inclusion_report(false).await?;
        }
        Ok(())
    }

    /// Bring the persisted set in line with `desired` (ID to descriptor).
    /// Things missing from `desired` are destroyed; new IDs are created.
    /// Each thing is handled atomically, the batch is not.
    pub async fn ensure_things(
        &self,
        desired: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), CoreError> {
        let persisted = self.inner.state.ids();

        for id in persisted.iter().filter(|id| !desired.contains_key(*id)) {
            self.destroy_thing(id).await?;
        }
        for (id, info) in desired {
            if !persisted.contains(&id) {
                self.create_thing(&id, info).await?;
            }
        }
        Ok(())
    }

    /// Persist a record for `id` with a fresh address, materialize the
    /// thing and add it. A factory failure removes the record again.
    pub async fn create_thing(&self, id: &str, info: serde_json::Value) -> Result<Arc<Thing>, CoreError> {
        let _guard = self.inner.mutation.lock().await;
        let record = self.inner.state.create_record(id, info)?;

        let thing = match self.materialize(&record).await {
            Ok(thing) => thing,
            Err(e) => {
                self.inner.state.delete_record(id)?;
                return Err(e);
            }
        };
        info!(thing = %id, address = %record.address, "thing created");
        self.add_thing(thing).await
    }

    /// Remove the thing with `id` and delete its record. Unknown IDs are
    /// a no-op. The record is deleted even when the exclusion report
    /// cannot be published; that error is returned afterwards.
    pub async fn destroy_thing(&self, id: &str) -> Result<(), CoreError> {
        let _guard = self.inner.mutation.lock().await;

        let removed = match self.thing_by_id(id) {
            Some(thing) => self.remove_thing(thing.address()).await,
            None => Ok(()),
        };
        if self.inner.state.delete_record(id)? {
            info!(thing = %id, "thing destroyed");
        }
        removed
    }

    pub async fn destroy_all_things(&self) -> Result<(), CoreError> {
        for id in self.inner.state.ids() {
            self.destroy_thing(&id).await?;
        }
        Ok(())
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn materialize(&self, record: &ThingRecord) -> Result<Thing, CoreError> {
        let state = self.inner.state.thing_state(record);
        self.inner
            .factory
            .create(&self.inner.ctx, state)
            .await
            .map_err(|e| e.for_thing(&record.id))
    }

    fn read_things(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<Thing>>> {
        self.inner
            .things
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_things(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<Thing>>> {
        self.inner
            .things
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.inner.config.name)
            .field("address", &self.inner.config.address)
            .field("things", &self.read_things().len())
            .finish_non_exhaustive()
    }
}
