#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chatstore-core** – Engine-agnostic types for the chat history store.
//!
//! This crate defines the contracts a storage driver implements: the
//! message/record types that cross the `store`/`query_*` boundary, the
//! `MessageStore` trait itself, configuration, error types, contractual
//! metric names, and the pure IRC-message qualification and
//! field-derivation rules used by the ingest path. It contains no SQL and
//! no engine-specific code; see `chatstore-sqlite` for the concrete
//! SQLite-backed implementation.

/// The injectable wall-clock source.
pub mod clock;
/// Configuration accepted by storage drivers.
pub mod config;
/// Pure qualification/derivation rules for inbound messages.
pub mod derive;
/// The shared error type.
pub mod error;
/// Message and record types.
pub mod message;
/// Contractual metric names.
pub mod metrics;
/// The `MessageStore` trait.
pub mod store_trait;

pub use clock::{system_clock, Clock, SystemClock};
pub use config::Config;
pub use derive::{derive as derive_event, DerivedEvent};
pub use error::{Result, StoreError};
pub use message::{
    ClientContext, Direction, EventKind, HistoryCursor, InboundMessage, NetworkId, PayloadId,
    StoredMessage, UpstreamContext, UserId,
};
pub use store_trait::MessageStore;

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use crate::{
        clock::{system_clock, Clock, SystemClock},
        config::Config,
        derive::{derive as derive_event, DerivedEvent},
        error::{Result, StoreError},
        message::{
            ClientContext, Direction, EventKind, HistoryCursor, InboundMessage, NetworkId,
            PayloadId, StoredMessage, UpstreamContext, UserId,
        },
        store_trait::MessageStore,
    };
}
