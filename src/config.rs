//! Server configuration types.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Well-known EtherNet/IP port, used for both TCP and UDP.
pub const DEFAULT_PORT: u16 = 44818;

/// Largest unconnected reply payload.
pub const DEFAULT_MAX_UNCONNECTED_REPLY: usize = 472;

/// Identity object attributes advertised by ListIdentity and class 0x01.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Vendor ID (attribute 1).
    pub vendor_id: u16,
    /// Device type (attribute 2).
    pub device_type: u16,
    /// Product code (attribute 3).
    pub product_code: u16,
    /// Major and minor revision (attribute 4).
    pub revision: (u8, u8),
    /// Status word (attribute 5).
    pub status: u16,
    /// Serial number (attribute 6).
    pub serial_number: u32,
    /// Product name (attribute 7), at most 255 bytes.
    pub product_name: String,
    /// State (attribute 8).
    pub state: u8,
    /// Address advertised in ListIdentity; the bound address when `None`.
    pub advertised_address: Option<Ipv4Addr>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x0001,
            device_type: 0x000E,
            product_code: 0x0001,
            revision: (1, 0),
            status: 0,
            serial_number: 0x0000_0001,
            product_name: "enip-rs tag server".to_string(),
            state: 3,
            advertised_address: None,
        }
    }
}

impl IdentityConfig {
    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn with_device_type(mut self, device_type: u16) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_product_code(mut self, product_code: u16) -> Self {
        self.product_code = product_code;
        self
    }

    pub fn with_revision(mut self, major: u8, minor: u8) -> Self {
        self.revision = (major, minor);
        self
    }

    pub fn with_serial_number(mut self, serial_number: u32) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn with_product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = name.into();
        self
    }

    pub fn with_advertised_address(mut self, address: Ipv4Addr) -> Self {
        self.advertised_address = Some(address);
        self
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address.
    pub tcp_addr: SocketAddr,
    /// UDP listen address.
    pub udp_addr: SocketAddr,
    /// Whether the UDP listener runs.
    pub udp_enabled: bool,
    /// Idle read/write timeout of a TCP session.
    pub session_timeout: Duration,
    /// Write timeout of a UDP reply.
    pub udp_write_timeout: Duration,
    /// Largest reply payload for unconnected messages.
    pub max_unconnected_reply: usize,
    /// Identity object attributes.
    pub identity: IdentityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT));
        Self {
            tcp_addr: any,
            udp_addr: any,
            udp_enabled: true,
            session_timeout: Duration::from_secs(60),
            udp_write_timeout: Duration::from_secs(1),
            max_unconnected_reply: DEFAULT_MAX_UNCONNECTED_REPLY,
            identity: IdentityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Configuration bound to loopback on ephemeral ports, for tests.
    pub fn loopback() -> Self {
        let local = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            tcp_addr: local,
            udp_addr: local,
            ..Default::default()
        }
    }

    /// Use the same address for TCP and UDP.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.tcp_addr = addr;
        self.udp_addr = addr;
        self
    }

    pub fn with_tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.tcp_addr = addr;
        self
    }

    pub fn with_udp_addr(mut self, addr: SocketAddr) -> Self {
        self.udp_addr = addr;
        self
    }

    /// Enable or disable the UDP listener.
    pub fn with_udp(mut self, enabled: bool) -> Self {
        self.udp_enabled = enabled;
        self
    }

    /// Set the idle session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the UDP reply write timeout.
    pub fn with_udp_write_timeout(mut self, timeout: Duration) -> Self {
        self.udp_write_timeout = timeout;
        self
    }

    /// Set the unconnected reply size limit.
    pub fn with_max_unconnected_reply(mut self, size: usize) -> Self {
        self.max_unconnected_reply = size;
        self
    }

    /// Set the identity attributes.
    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.tcp_addr.port(), DEFAULT_PORT);
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.udp_write_timeout, Duration::from_secs(1));
        assert_eq!(config.max_unconnected_reply, 472);
        assert!(config.udp_enabled);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::loopback()
            .with_udp(false)
            .with_session_timeout(Duration::from_secs(5))
            .with_identity(IdentityConfig::default().with_product_name("press line"));

        assert!(config.tcp_addr.ip().is_loopback());
        assert!(!config.udp_enabled);
        assert_eq!(config.session_timeout, Duration::from_secs(5));
        assert_eq!(config.identity.product_name, "press line");
    }
}
