//! Per-entity state and its sub-components.

pub mod access_state;
pub mod compatibility;
pub mod controlled_entity;
pub mod diagnostics;
pub mod enumeration_state;
pub mod guard;
pub mod statistics;

pub use controlled_entity::{ControlledEntity, InterfaceInfo, MilanDynamicState, MilanInfo};
pub use guard::{ControlledEntityHandle, ControlledEntityRef};
