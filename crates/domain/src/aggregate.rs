//! Core aggregate and domain event traits.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, used for logging and metric labels.
    fn event_type(&self) -> &'static str;
}

/// Version number of a persisted aggregate, used for optimistic concurrency.
///
/// A freshly built aggregate is at version 0; the first successful write
/// stores version 1 and every later write increments by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for an unsaved aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of the first persisted write.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Trait for aggregates whose state changes are expressed as events.
///
/// Commands are methods on `&self` that validate against the current state
/// and return the events to record; [`Aggregate::apply`] folds an event into
/// the state and must never fail.
pub trait Aggregate: Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors commands on this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the version the aggregate was loaded at.
    fn version(&self) -> Version;

    /// Sets the aggregate version after a successful write.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic: given the same state and
    /// event it always produces the same new state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Runs a command against the current state and applies the events it
    /// produced. On error the aggregate is left untouched.
    fn handle<F>(&mut self, command: F) -> Result<Vec<Self::Event>, Self::Error>
    where
        F: FnOnce(&Self) -> Result<Vec<Self::Event>, Self::Error>,
    {
        let events = command(self)?;
        self.apply_events(events.iter().cloned());
        Ok(events)
    }
}
