//! A reconcilable IPv4/IPv6 pair of listeners sharing one configuration.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::acl::Acl;
use crate::engine::Engine;
use crate::error::Result;
use crate::listener::ListenerConfig;
use crate::session::{ListenerKey, SessionHandler};

/// Desired configuration for a managed endpoint, resolved into at most two
/// concrete bind addresses (one per IP family) by [`ManagedEndpointConfig::resolve`].
#[derive(Clone)]
pub struct ManagedEndpointConfig {
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub bind_v4: Ipv4Addr,
    pub bind_v6: Ipv6Addr,
    pub port: u16,
    pub allowed_sessions: u32,
    pub max_input_buffer: usize,
    pub session_timeout: Duration,
    pub acl: Option<Arc<dyn Acl>>,
}

impl Default for ManagedEndpointConfig {
    fn default() -> Self {
        Self {
            enable_ipv4: true,
            enable_ipv6: true,
            bind_v4: Ipv4Addr::UNSPECIFIED,
            bind_v6: Ipv6Addr::UNSPECIFIED,
            port: 0,
            allowed_sessions: 10,
            // Managed endpoints (long-lived control sessions) default to a
            // two-minute idle timeout rather than the bare listener's "off".
            session_timeout: Duration::from_millis(120_000),
            max_input_buffer: 65536,
            acl: None,
        }
    }
}

impl ManagedEndpointConfig {
    fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            allowed_sessions: self.allowed_sessions as i64,
            max_input_buffer: self.max_input_buffer,
            session_timeout: self.session_timeout,
            acl: self.acl.clone(),
        }
    }

    fn resolved_v4(&self) -> Option<SocketAddr> {
        self.enable_ipv4
            .then(|| SocketAddr::new(IpAddr::V4(self.bind_v4), self.port))
    }

    fn resolved_v6(&self) -> Option<SocketAddr> {
        self.enable_ipv6
            .then(|| SocketAddr::new(IpAddr::V6(self.bind_v6), self.port))
    }
}

/// A pair of listeners (one IPv4, one IPv6) reconciled together against a
/// single [`ManagedEndpointConfig`].
#[derive(Default)]
pub struct ManagedEndpoint {
    v4: Option<ListenerKey>,
    v6: Option<ListenerKey>,
}

impl ManagedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles this endpoint's two listeners against `config`. A family
    /// whose *actual bound address* (read back from the engine, not the
    /// address last requested) is unchanged is left untouched — live
    /// sessions on that family survive the call. A family that is disabled,
    /// or whose bind address changed, has its listener removed (and, if
    /// re-enabled, recreated) without disturbing the other family.
    pub fn apply(
        &mut self,
        engine: &mut Engine,
        config: &ManagedEndpointConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<()> {
        let v4 = self.reconcile_family(engine, self.v4, config.resolved_v4(), config, &handler)?;
        self.v4 = v4;
        let v6 = self.reconcile_family(engine, self.v6, config.resolved_v6(), config, &handler)?;
        self.v6 = v6;
        Ok(())
    }

    fn reconcile_family(
        &self,
        engine: &mut Engine,
        current: Option<ListenerKey>,
        desired: Option<SocketAddr>,
        config: &ManagedEndpointConfig,
        handler: &Arc<dyn SessionHandler>,
    ) -> Result<Option<ListenerKey>> {
        let current_addr = current.and_then(|key| engine.listener(key).map(|l| l.local_addr()));
        match (current, desired) {
            (None, None) => Ok(None),
            (Some(key), None) => {
                engine.remove_listener(key)?;
                Ok(None)
            }
            (None, Some(addr)) => {
                let key = engine.add_listener(addr, config.listener_config(), handler.clone())?;
                Ok(Some(key))
            }
            (Some(key), Some(addr)) => {
                if current_addr == Some(addr) {
                    Ok(Some(key))
                } else {
                    engine.remove_listener(key)?;
                    let new_key =
                        engine.add_listener(addr, config.listener_config(), handler.clone())?;
                    Ok(Some(new_key))
                }
            }
        }
    }

    pub fn v4_listener(&self) -> Option<ListenerKey> {
        self.v4
    }

    pub fn v6_listener(&self) -> Option<ListenerKey> {
        self.v6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_respects_family_toggles() {
        let mut config = ManagedEndpointConfig::default();
        config.enable_ipv6 = false;
        config.port = 9000;
        assert!(config.resolved_v4().is_some());
        assert!(config.resolved_v6().is_none());
    }

    #[test]
    fn default_session_timeout_is_two_minutes() {
        let config = ManagedEndpointConfig::default();
        assert_eq!(config.session_timeout, Duration::from_millis(120_000));
    }
}
