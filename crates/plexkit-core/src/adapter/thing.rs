// ── Things ──
//
// In-memory representation of one backing device: its inclusion report,
// the services built from it, and the connector capabilities the device
// implementation provides.

use std::sync::Arc;

use async_trait::async_trait;
use plexkit_fimp::address::MSG_TYPE_EVT;
use plexkit_fimp::{Address, FimpMessage, Message, Publisher};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::connector::{ControllableConnector, Pinger};
use super::report::{
    ConnectivityDetails, ConnectivityReport, InclusionReport, PingReport,
    EVT_THING_CONNECTIVITY_REPORT, EVT_THING_INCLUSION_REPORT, PROP_NEW,
};
use super::service::{topic_has_suffix, Service};
use super::state::ThingState;
use crate::error::CoreError;
use crate::event::{
    Event, EventManager, EventPayload, CLASS_CONNECTIVITY_CHANGED, CLASS_INCLUSION_REPORT_SENT,
    DOMAIN_ADAPTER,
};

/// What a thing needs from its adapter: identity for adapter-level
/// events, a publisher, and the event manager.
#[derive(Clone)]
pub struct ThingContext {
    adapter_name: String,
    adapter_address: String,
    publisher: Arc<dyn Publisher>,
    events: EventManager,
}

impl ThingContext {
    pub fn new(
        adapter_name: impl Into<String>,
        adapter_address: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        events: EventManager,
    ) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            adapter_address: adapter_address.into(),
            publisher,
            events,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn adapter_address(&self) -> &str {
        &self.adapter_address
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    /// `pt:j1/mt:evt/rt:ad/rn:<name>/ad:<address>`
    pub fn event_address(&self) -> Address {
        Address::adapter(MSG_TYPE_EVT, &self.adapter_name, &self.adapter_address)
    }

    /// Publish an adapter-level event with `serv` set to the adapter name.
    pub(crate) async fn publish_adapter_event(&self, mut payload: FimpMessage) -> Result<(), CoreError> {
        payload.service.clone_from(&self.adapter_name);
        self.publisher
            .publish(Message::new(self.event_address(), payload))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for ThingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingContext")
            .field("adapter_name", &self.adapter_name)
            .field("adapter_address", &self.adapter_address)
            .finish_non_exhaustive()
    }
}

/// Materializes a thing from its persisted record.
#[async_trait]
pub trait ThingFactory: Send + Sync {
    async fn create(&self, ctx: &ThingContext, state: ThingState) -> Result<Thing, CoreError>;
}

pub struct Thing {
    id: String,
    report: InclusionReport,
    services: Vec<Arc<Service>>,
    connector: Arc<dyn ControllableConnector>,
    pinger: Option<Arc<dyn Pinger>>,
    ctx: ThingContext,
    last_connectivity: Mutex<Option<ConnectivityDetails>>,
}

impl Thing {
    /// Build a thing and its services from `report`. Service topics must
    /// parse as FIMP addresses.
    pub fn new(
        ctx: &ThingContext,
        id: impl Into<String>,
        report: InclusionReport,
        connector: Arc<dyn ControllableConnector>,
    ) -> Result<Self, CoreError> {
        let services = report
            .services
            .iter()
            .map(|spec| Service::new(spec.clone(), Arc::clone(&ctx.publisher)).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.into(),
            report,
            services,
            connector,
            pinger: None,
            ctx: ctx.clone(),
            last_connectivity: Mutex::new(None),
        })
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.report.address
    }

    /// Inclusion report with the live service specifications.
    pub fn inclusion_report(&self) -> InclusionReport {
        InclusionReport {
            services: self.services.iter().map(|s| s.specification()).collect(),
            ..self.report.clone()
        }
    }

    /// Services called `name`; an empty name returns all of them.
    pub fn services(&self, name: &str) -> Vec<Arc<Service>> {
        self.services
            .iter()
            .filter(|s| name.is_empty() || s.name() == name)
            .cloned()
            .collect()
    }

    /// First service, in declaration order, whose topic is a suffix of
    /// `topic`.
    pub fn service_by_topic(&self, topic: &str) -> Option<Arc<Service>> {
        self.services
            .iter()
            .find(|s| topic_has_suffix(topic, &s.topic_key()))
            .cloned()
    }

    pub fn service_topics(&self) -> Vec<String> {
        self.services.iter().map(|s| s.topic().to_owned()).collect()
    }

    pub async fn connect(&self) -> Result<(), CoreError> {
        self.connector.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), CoreError> {
        self.connector.disconnect().await
    }

    pub async fn connectivity_report(&self) -> ConnectivityReport {
        ConnectivityReport::from_inclusion(&self.report, self.connector.connectivity().await)
    }

    pub async fn ping(&self) -> Result<PingReport, CoreError> {
        let pinger = self
            .pinger
            .as_ref()
            .ok_or_else(|| CoreError::unsupported(format!("ping of thing {}", self.address())))?;
        Ok(PingReport {
            address: self.report.address.clone(),
            details: pinger.ping().await?,
        })
    }

    /// Publish the inclusion report, flagged `new` on first inclusion,
    /// then emit `InclusionReportSent`.
    pub async fn send_inclusion_report(&self, is_new: bool) -> Result<(), CoreError> {
        let payload = FimpMessage::object(EVT_THING_INCLUSION_REPORT, "", &self.inclusion_report())?
            .with_property(PROP_NEW, is_new.to_string());
        self.ctx.publish_adapter_event(payload).await?;

        info!(thing = %self.id, address = %self.address(), is_new, "inclusion report sent");
        self.ctx.events.publish(&Event::new(
            DOMAIN_ADAPTER,
            CLASS_INCLUSION_REPORT_SENT,
            EventPayload::InclusionReportSent {
                address: self.address().to_owned(),
                is_new,
            },
        ));
        Ok(())
    }

    /// Publish the connectivity report if it changed since the last send
    /// or `force` is set. Returns whether a report went out.
    ///
    /// Concurrent callers are serialized, so one change is reported once.
    pub async fn send_connectivity_report(&self, force: bool) -> Result<bool, CoreError> {
        let mut last = self.last_connectivity.lock().await;
        let report = self.connectivity_report().await;
        let changed = last.as_ref() != Some(&report.details);
        if !changed && !force {
            return Ok(false);
        }

        let payload = FimpMessage::object(EVT_THING_CONNECTIVITY_REPORT, "", &report)?;
        self.ctx.publish_adapter_event(payload).await?;
        *last = Some(report.details.clone());
        drop(last);

        if changed {
            debug!(
                thing = %self.id,
                status = %report.details.connection_status,
                "connectivity changed"
            );
            self.ctx.events.publish(&Event::new(
                DOMAIN_ADAPTER,
                CLASS_CONNECTIVITY_CHANGED,
                EventPayload::ConnectivityChanged {
                    address: report.address.clone(),
                    status: report.details.connection_status.to_string(),
                },
            ));
        }
        Ok(true)
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("id", &self.id)
            .field("address", &self.report.address)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::connector::StaticConnector;
    use crate::adapter::report::{ConnectionQuality, ConnectionType, ServiceSpecification};
    use crate::event::EventFilter;
    use plexkit_fimp::{MemoryTransport, Transport};

    fn report() -> InclusionReport {
        InclusionReport {
            address: "5".into(),
            product_hash: "virtual_lamp".into(),
            services: vec![
                ServiceSpecification::new("out_bin_switch", "/rt:dev/rn:vinculum/ad:1/sv:out_bin_switch/ad:5_0"),
                ServiceSpecification::new("out_lvl_switch", "/rt:dev/rn:vinculum/ad:1/sv:out_lvl_switch/ad:5_0"),
            ],
            ..InclusionReport::default()
        }
    }

    async fn thing(bus: &MemoryTransport, connector: Arc<StaticConnector>) -> (Thing, EventManager) {
        bus.start().await.unwrap();
        let events = EventManager::new();
        let ctx = ThingContext::new("vinculum", "1", Arc::new(bus.clone()), events.clone());
        (Thing::new(&ctx, "lamp", report(), connector).unwrap(), events)
    }

    #[tokio::test]
    async fn services_resolve_by_name_and_topic() {
        let bus = MemoryTransport::new();
        let (thing, _) = thing(&bus, Arc::new(StaticConnector::default())).await;

        assert_eq!(thing.services("").len(), 2);
        assert_eq!(thing.services("out_lvl_switch").len(), 1);
        assert!(thing.services("meter_elec").is_empty());

        let service = thing
            .service_by_topic("pt:j1/mt:cmd/rt:dev/rn:vinculum/ad:1/sv:out_lvl_switch/ad:5_0")
            .unwrap();
        assert_eq!(service.name(), "out_lvl_switch");
        assert!(thing.service_by_topic("pt:j1/mt:cmd/rt:dev/rn:vinculum/ad:1/sv:out_lvl_switch/ad:15_0").is_none());
    }

    #[tokio::test]
    async fn connectivity_report_only_on_change() {
        let bus = MemoryTransport::new();
        let connector = Arc::new(StaticConnector::default());
        let (thing, events) = thing(&bus, Arc::clone(&connector)).await;
        let sub = events.subscribe("watch", 8, [EventFilter::class(CLASS_CONNECTIVITY_CHANGED)]);

        assert!(thing.send_connectivity_report(false).await.unwrap());
        assert!(!thing.send_connectivity_report(false).await.unwrap());
        assert!(thing.send_connectivity_report(true).await.unwrap());

        connector.set(ConnectivityDetails::up(ConnectionType::Direct, ConnectionQuality::High));
        assert!(thing.send_connectivity_report(false).await.unwrap());

        assert_eq!(bus.published_of_type(EVT_THING_CONNECTIVITY_REPORT).len(), 3);
        assert!(sub.try_recv().is_some());
        let up = sub.try_recv().unwrap();
        assert_eq!(
            up.payload,
            Some(EventPayload::ConnectivityChanged {
                address: "5".into(),
                status: "UP".into()
            })
        );
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn concurrent_senders_report_a_change_once() {
        let bus = MemoryTransport::new();
        let (thing, _) = thing(&bus, Arc::new(StaticConnector::default())).await;

        let (a, b) = tokio::join!(
            thing.send_connectivity_report(false),
            thing.send_connectivity_report(false)
        );
        assert!(a.unwrap() ^ b.unwrap());
        assert_eq!(bus.published_of_type(EVT_THING_CONNECTIVITY_REPORT).len(), 1);
    }

    #[tokio::test]
    async fn ping_without_pinger_is_unsupported() {
        let bus = MemoryTransport::new();
        let (thing, _) = thing(&bus, Arc::new(StaticConnector::default())).await;
        assert!(matches!(
            thing.ping().await,
            Err(CoreError::Unsupported { .. })
        ));
    }
}
