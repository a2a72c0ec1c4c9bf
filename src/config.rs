//! Controller configuration.
//!
//! `ControllerConfig` is constructed through [`ControllerConfigBuilder`],
//! a setter-chain builder in the same style as other QoS-style configuration
//! structs. [`crate::controller::Controller::new`] takes one of these
//! alongside a `ProtocolInterface` handle.

use std::time::Duration;

use crate::retry::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
  /// How long ADP discovery waits after the initial `discover_entities`
  /// broadcast before giving up on an entity that never advertises.
  pub discovery_delay: Duration,
  /// Whether a previously-cached static model may be reused instead of
  /// re-reading every descriptor.
  pub entity_model_cache_enabled: bool,
  /// Forces the full per-descriptor enumeration path even when the packed
  /// dynamic-info fast path would otherwise be attempted.
  pub full_static_enumeration: bool,
  /// Retry/backoff curve shared by every query class; per-class
  /// attempt budgets themselves are fixed and are not user-configurable
  /// (see `retry::QueryClass::budget`).
  pub backoff: BackoffPolicy,
  /// Preferred locale identifier used when resolving a Locale descriptor's
  /// Strings.
  pub preferred_locale: String,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      discovery_delay: Duration::from_secs(10),
      entity_model_cache_enabled: true,
      full_static_enumeration: false,
      backoff: BackoffPolicy::default(),
      preferred_locale: "en".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerConfigBuilder {
  config: ControllerConfig,
}

impl ControllerConfigBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn discovery_delay(mut self, delay: Duration) -> Self {
    self.config.discovery_delay = delay;
    self
  }

  pub fn entity_model_cache_enabled(mut self, enabled: bool) -> Self {
    self.config.entity_model_cache_enabled = enabled;
    self
  }

  pub fn full_static_enumeration(mut self, enabled: bool) -> Self {
    self.config.full_static_enumeration = enabled;
    self
  }

  pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
    self.config.backoff = backoff;
    self
  }

  pub fn preferred_locale(mut self, locale: impl Into<String>) -> Self {
    self.config.preferred_locale = locale.into();
    self
  }

  pub fn build(self) -> ControllerConfig {
    self.config
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_enables_the_entity_model_cache() {
    let config = ControllerConfig::default();
    assert!(config.entity_model_cache_enabled);
    assert!(!config.full_static_enumeration);
  }

  #[test]
  fn builder_overrides_only_the_fields_it_touches() {
    let config = ControllerConfigBuilder::new()
      .full_static_enumeration(true)
      .preferred_locale("fr")
      .build();
    assert!(config.full_static_enumeration);
    assert_eq!(config.preferred_locale, "fr");
    assert!(config.entity_model_cache_enabled);
  }
}
