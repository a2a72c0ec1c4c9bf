//! AVDECC Controller Core.
//!
//! This crate is the enumeration engine and state-tracking machinery for an
//! IEEE 1722.1 / Milan AVDECC controller: it discovers remote entities on an
//! AVB network, enumerates their AEM descriptor trees through a multi-phase
//! query protocol, tracks dynamic state, maintains derived graphs (stream
//! connections, media-clock chains, channel connections), validates
//! standards compliance, and exposes an observable model to clients.
//!
//! It does not implement ADP/AECP/ACMP/MVU framing or socket I/O itself —
//! those live behind the [`protocol::ProtocolInterface`] trait a host
//! application supplies. See [`controller::Controller`] for the
//! top-level entry point.

pub mod access_registry;
pub mod compatibility_validator;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod entity;
pub mod enumeration;
pub mod error;
pub mod executor;
pub mod graphs;
pub mod identifiers;
pub mod model;
pub mod network_interface;
pub mod observer;
pub mod protocol;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use access_registry::{AccessKind, AccessRegistry, ExclusiveAccessHandle};
pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{AccessError, ModelError, NetworkInterfaceError, SnapshotError};
pub use identifiers::EntityID;
pub use observer::{ControllerEvent, ControllerObserver};
