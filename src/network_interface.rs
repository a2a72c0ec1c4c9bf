//! Network Interface Helper.
//!
//! OS-specific interface enumeration is explicitly out of scope (§1
//! Non-goals) — only the narrow boundary the Controller needs is defined
//! here: resolving a local interface name to the MAC address ADP
//! advertisements go out on, and whether the link is currently up.
//! Per-OS backends are not part of this crate.

use std::collections::BTreeMap;

use crate::error::NetworkInterfaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedInterface {
  pub mac_address: [u8; 6],
  pub up: bool,
}

pub trait NetworkInterfaceResolver: Send + Sync {
  fn resolve(&self, name: &str) -> Result<ResolvedInterface, NetworkInterfaceError>;
}

/// In-memory fixture for tests and virtual-only deployments.
#[derive(Debug, Clone, Default)]
pub struct FixtureNetworkInterfaceResolver {
  interfaces: BTreeMap<String, ResolvedInterface>,
}

impl FixtureNetworkInterfaceResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_interface(mut self, name: impl Into<String>, mac_address: [u8; 6], up: bool) -> Self {
    self.interfaces.insert(name.into(), ResolvedInterface { mac_address, up });
    self
  }
}

impl NetworkInterfaceResolver for FixtureNetworkInterfaceResolver {
  fn resolve(&self, name: &str) -> Result<ResolvedInterface, NetworkInterfaceError> {
    let iface = self
      .interfaces
      .get(name)
      .ok_or_else(|| NetworkInterfaceError::NotFound(name.to_string()))?;
    if iface.mac_address == [0; 6] {
      return Err(NetworkInterfaceError::NoMacAddress(name.to_string()));
    }
    Ok(*iface)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_a_registered_interface() {
    let resolver = FixtureNetworkInterfaceResolver::new().with_interface("eth0", [1, 2, 3, 4, 5, 6], true);
    let resolved = resolver.resolve("eth0").unwrap();
    assert_eq!(resolved.mac_address, [1, 2, 3, 4, 5, 6]);
    assert!(resolved.up);
  }

  #[test]
  fn unknown_interface_is_not_found() {
    let resolver = FixtureNetworkInterfaceResolver::new();
    assert_eq!(
      resolver.resolve("eth9").unwrap_err(),
      NetworkInterfaceError::NotFound("eth9".to_string())
    );
  }

  #[test]
  fn zero_mac_is_reported_as_unusable() {
    let resolver = FixtureNetworkInterfaceResolver::new().with_interface("eth0", [0; 6], true);
    assert_eq!(
      resolver.resolve("eth0").unwrap_err(),
      NetworkInterfaceError::NoMacAddress("eth0".to_string())
    );
  }
}
