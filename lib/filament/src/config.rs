use serde_derive::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use crate::support::NetResult;

pub const DEFAULT_PORT: u16 = 1111;
pub const DEFAULT_THREADS: usize = 1;

/// Internet protocol family for an endpoint.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protocol {
    V4,
    V6,
}

impl Protocol {
    /// The wildcard listen address of the family.
    #[inline]
    pub fn any(self) -> IpAddr {
        match self {
            Protocol::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Protocol::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Advisory socket options, applied best-effort before bind/connect.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default)]
pub struct SocketOptions {
    pub no_delay: bool,
    pub reuse_address: bool,
    pub reuse_port: bool,
    pub keep_alive: bool,
    pub receive_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

/// Per-endpoint settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    /// Worker threads serving handler callbacks.
    pub threads: usize,
    /// Run the reactor in a polling loop with idle notifications instead
    /// of blocking for readiness.
    pub polling: bool,
    /// Serialize all callbacks of one session on a strand.
    pub strand_required: bool,
    pub options: SocketOptions,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            protocol: Protocol::V4,
            address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            threads: DEFAULT_THREADS,
            polling: false,
            strand_required: false,
            options: SocketOptions::default(),
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Settings {
        serdeconv::from_toml_file(path).expect("Error loading endpoint configuration file")
    }

    /// The configured socket address. An empty address means the wildcard
    /// of the configured protocol family.
    pub fn socket_addr(&self) -> NetResult<SocketAddr> {
        if self.address.is_empty() {
            return Ok(SocketAddr::new(self.protocol.any(), self.port));
        }

        let ip: IpAddr = self.address.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let mut settings = Settings::default();
        settings.address = "127.0.0.1".to_string();
        settings.port = 8080;

        assert_eq!(settings.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_socket_addr_malformed() {
        let mut settings = Settings::default();
        settings.address = "not-an-address".to_string();

        assert!(settings.socket_addr().is_err());
    }

    #[test]
    fn test_wildcard() {
        assert!(Protocol::V4.any().is_ipv4());
        assert!(Protocol::V6.any().is_ipv6());

        let mut settings = Settings::default();
        settings.address = String::new();
        settings.protocol = Protocol::V6;

        assert!(settings.socket_addr().unwrap().ip().is_ipv6());
    }
}
