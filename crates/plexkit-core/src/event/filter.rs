// ── Event filter predicates ──

use super::{Event, EventKind};

/// Predicate deciding whether a subscription receives an event.
pub enum EventFilter {
    All,
    Domain(String),
    Class(String),
    /// Matches events whose payload is of the given variant.
    Kind(EventKind),
    And(Vec<EventFilter>),
    Or(Vec<EventFilter>),
    Custom(Box<dyn Fn(&Event) -> bool + Send + Sync>),
}

impl EventFilter {
    pub fn domain(domain: impl Into<String>) -> Self {
        Self::Domain(domain.into())
    }

    pub fn class(class: impl Into<String>) -> Self {
        Self::Class(class.into())
    }

    pub fn custom(f: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Box::new(f))
    }

    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Domain(d) => event.domain == *d,
            Self::Class(c) => event.class == *c,
            Self::Kind(k) => event.kind() == Some(*k),
            Self::And(filters) => filters.iter().all(|f| f.matches(event)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(event)),
            Self::Custom(f) => f(event),
        }
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Domain(d) => f.debug_tuple("Domain").field(d).finish(),
            Self::Class(c) => f.debug_tuple("Class").field(c).finish(),
            Self::Kind(k) => f.debug_tuple("Kind").field(k).finish(),
            Self::And(v) => f.debug_tuple("And").field(v).finish(),
            Self::Or(v) => f.debug_tuple("Or").field(v).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
