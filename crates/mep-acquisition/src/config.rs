//! Device session configuration

use mep_core::{config_error, MepResult};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Port the amplifier streams to ("Target Port" on the device)
pub const DEFAULT_DATA_PORT: u16 = 50000;

/// Fixed device-side port for the JOIN packet
pub const DEFAULT_JOIN_PORT: u16 = 5050;

/// Address shown on the amplifier's display
pub const DEFAULT_DEVICE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 200, 220);

/// Largest datagram accepted
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Configuration for one device session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Local address the data socket binds to
    pub local_addr: SocketAddr,
    /// Device address the JOIN packet is sent to
    pub device_addr: SocketAddr,
    /// Per-receive timeout; bounds how long `stop()` waits
    pub recv_timeout_ms: u64,
    /// Pause between unanswered JOIN attempts
    pub retry_interval_ms: u64,
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_DATA_PORT)),
            device_addr: SocketAddr::V4(SocketAddrV4::new(DEFAULT_DEVICE_IP, DEFAULT_JOIN_PORT)),
            recv_timeout_ms: 1000,
            retry_interval_ms: 500,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// Session on loopback with an ephemeral data port, talking to `device_addr`
    pub fn loopback(device_addr: SocketAddr) -> Self {
        Self {
            local_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            device_addr,
            ..Default::default()
        }
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> MepResult<()> {
        if self.recv_timeout_ms == 0 {
            return Err(config_error!("recv_timeout_ms must be greater than 0"));
        }
        if self.device_addr.port() == 0 {
            return Err(config_error!("device_addr {} has no port", self.device_addr));
        }
        if self.recv_buffer_size < mep_core::frame::SAMPLES_PAYLOAD_OFFSET {
            return Err(config_error!(
                "recv_buffer_size {} cannot hold a frame header",
                self.recv_buffer_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.local_addr.port(), 50000);
        assert_eq!(config.device_addr.to_string(), "192.168.200.220:5050");
        assert_eq!(config.recv_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = SessionConfig::default();
        config.recv_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.recv_buffer_size = 8;
        assert!(config.validate().is_err());

        let config = SessionConfig::loopback("127.0.0.1:0".parse().unwrap());
        assert!(config.validate().is_err());
    }
}
