//! Multi-producer, multi-consumer, fire-and-forget event bus (spec.md §5,
//! "Shared-resource policy"; §4.4).
//!
//! Grounded in the teacher pack's `spacedriveapp-spacedrive`
//! `infrastructure/events` module: a `tokio::sync::broadcast` channel
//! wrapped so deep call sites hold a cheap handle rather than reaching
//! through a type namespace (spec.md §9, "Event emission from deep call
//! sites").

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// One phase of a sync run, used both as the event bus's phase label and as
/// the discriminant for `Phase`-only events (spec.md §4.3, §6 "Event bus").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Diff,
    Write,
    ApplyStructure,
}

impl Phase {
    /// The event bus label named in spec.md §6.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Fetch => "fetch",
            Phase::Diff => "diff",
            Phase::Write => "write",
            Phase::ApplyStructure => "structure",
        }
    }
}

/// Terminal outcome of one asset's download, carried by `RecordCompleted`
/// (spec.md §4.3, §5 "Events for a given asset are emitted ... exactly
/// once on terminal outcome").
#[derive(Debug, Clone)]
pub enum AssetOutcome {
    Succeeded,
    Failed { reason: String },
}

/// A structured cause chain for a fatal error (spec.md §7, "User-visible
/// behavior"): a code, a message, and an optional boxed cause.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub cause: Option<Box<ErrorReport>>,
}

impl ErrorReport {
    pub fn from_engine_error(err: &crate::error::EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            cause: err.source_report().map(Box::new),
        }
    }
}

/// Lifecycle events emitted by the Sync Engine (spec.md §4.3, §6).
#[derive(Debug, Clone)]
pub enum Event {
    Phase(Phase),
    RecordCompleted { asset_uuid: String, outcome: AssetOutcome },
    Done,
    Error(ErrorReport),
}

impl Event {
    /// The event bus label named in spec.md §6.
    pub fn label(&self) -> &'static str {
        match self {
            Event::Phase(phase) => phase.label(),
            Event::RecordCompleted { .. } => "record-completed",
            Event::Done => "done",
            Event::Error(_) => "error",
        }
    }
}

/// Fire-and-forget broadcast bus. `emit` never blocks and ignores the
/// "no receivers" case; handlers are expected not to block either
/// (spec.md §5).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// A `Stream`-based view of the bus, for consumers that want to
    /// combine it with `futures`/`tokio_stream` adapters instead of polling
    /// a raw `broadcast::Receiver` (spec.md §6, "Event bus").
    pub fn subscribe_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
