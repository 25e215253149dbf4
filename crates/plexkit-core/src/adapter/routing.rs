// ── Adapter routings ──
//
// Standard adapter-level commands, addressed to the adapter's own topic
// with `serv` set to the adapter name.

use std::future::Future;
use std::time::Duration;

use plexkit_fimp::{FimpMessage, Message};
use tracing::warn;

use super::report::{
    CMD_NETWORK_GET_ALL_NODES, CMD_THING_DELETE, CMD_THING_GET_INCLUSION_REPORT, CMD_THING_PING,
    EVT_THING_INCLUSION_REPORT, EVT_THING_PING_REPORT, PROP_NEW,
};
use super::Adapter;
use crate::error::CoreError;
use crate::router::{handler_fn, Predicate, Routing};
use crate::task::Task;

type Reply = Result<Option<FimpMessage>, CoreError>;

/// All adapter command routings.
pub fn routings(adapter: &Adapter) -> Vec<Routing> {
    vec![
        bind(adapter, CMD_THING_GET_INCLUSION_REPORT, get_inclusion_report),
        bind(adapter, CMD_NETWORK_GET_ALL_NODES, get_all_nodes),
        bind(adapter, CMD_THING_DELETE, delete_thing),
        bind(adapter, CMD_THING_PING, ping_thing),
    ]
}

/// Periodic connectivity surveillance: every `interval`, each thing
/// publishes its connectivity report if it changed.
pub fn connectivity_task(adapter: &Adapter, interval: Duration) -> Task {
    let adapter = adapter.clone();
    Task::new("connectivity", interval, move || {
        let adapter = adapter.clone();
        async move { report_connectivity(&adapter).await }
    })
}

/// One connectivity pass over every thing. A failing thing does not
/// stop the pass; the first failure is returned at the end.
pub async fn report_connectivity(adapter: &Adapter) -> Result<(), CoreError> {
    let mut first_error = None;
    for thing in adapter.things() {
        if let Err(e) = thing.send_connectivity_report(false).await {
            warn!(thing = %thing.id(), address = %thing.address(), error = %e, "connectivity report failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Route `msg_type` addressed to this adapter to `handler`.
fn bind<F, Fut>(adapter: &Adapter, msg_type: &str, handler: F) -> Routing
where
    F: Fn(Adapter, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let predicates = [
        Predicate::for_service(adapter.name()),
        Predicate::for_type(msg_type),
    ];
    let adapter = adapter.clone();
    Routing::new(
        handler_fn(move |message| handler(adapter.clone(), message)),
        predicates,
    )
}

// ── Handlers ─────────────────────────────────────────────────────────

/// String value is the thing address. Replies with its inclusion report.
async fn get_inclusion_report(adapter: Adapter, message: Message) -> Reply {
    let address = message.payload.value.as_str()?;
    let thing = adapter
        .thing_by_address(address)
        .ok_or_else(|| CoreError::not_found("thing", address))?;

    let reply = FimpMessage::object(EVT_THING_INCLUSION_REPORT, adapter.name(), &thing.inclusion_report())?
        .with_property(PROP_NEW, "false");
    Ok(Some(reply))
}

async fn get_all_nodes(adapter: Adapter, _message: Message) -> Reply {
    adapter.send_all_nodes_report().await?;
    Ok(None)
}

/// Str-map value with an `address` entry.
async fn delete_thing(adapter: Adapter, message: Message) -> Reply {
    let address = message
        .payload
        .value
        .as_str_map()?
        .get("address")
        .ok_or_else(|| CoreError::InvalidRequest {
            message: "missing 'address' in thing.delete".into(),
        })?;
    let thing = adapter
        .thing_by_address(address)
        .ok_or_else(|| CoreError::not_found("thing", address.as_str()))?;

    adapter.destroy_thing(thing.id()).await?;
    Ok(None)
}

async fn ping_thing(adapter: Adapter, message: Message) -> Reply {
    let address = message.payload.value.as_str()?;
    let thing = adapter
        .thing_by_address(address)
        .ok_or_else(|| CoreError::not_found("thing", address))?;

    let report = thing.ping().await?;
    Ok(Some(FimpMessage::object(EVT_THING_PING_REPORT, adapter.name(), &report)?))
}
