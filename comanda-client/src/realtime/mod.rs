//! Realtime reconciliation
//!
//! Consumes the backend's change-event stream and folds it into in-memory
//! mirrors of the menu and the session's orders. Folding is idempotent:
//! replays and duplicate deliveries collapse into the same mirror state.
//! Malformed events are never merged; they trigger a full resync of the
//! affected collection. A broken subscription reconnects with backoff and
//! every new subscription starts with a full resync to close the gap.

pub mod mirror;
pub mod reconciler;
pub mod transport;

pub use mirror::{MenuMirror, MirrorEvent, OrderMirror};
pub use reconciler::{CollectionFetch, Reconciler};
pub use transport::{
    EventSource, EventTransport, MemoryEventSource, MemoryEventTransport, TcpEventSource,
    TcpEventTransport, TransportError,
};
