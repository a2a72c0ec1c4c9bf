//! The AEM descriptor tree: static shape, dynamic state, and the access
//! policy that governs lookups against it (§3 "Static model" / "Dynamic
//! model", §4.B).

pub mod access;
pub mod descriptors;
pub mod dynamic;
pub mod tree;

pub use access::TreeModelAccessStrategy;
pub use tree::{walk_defaulted, ConfigurationTree, DefaultedVisitor, EntityModel};
