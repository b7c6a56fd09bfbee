//! The immutable 5-tuple flow key.
//!
//! Keyed purely on logical address/port/protocol equality, with an explicit
//! client/server orientation rather than an originator/responder split.
//! Tables are keyed on the kernel's conntrack id, never on the tuple itself.

use std::fmt;
use std::net::IpAddr;

/// Layer-4 protocol number (IANA), e.g. 6 for TCP, 17 for UDP.
pub type Protocol = u8;

/// A single flow's 5-tuple, as observed from one side of a NAT boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub protocol: Protocol,
    pub client_addr: IpAddr,
    pub client_port: u16,
    pub server_addr: IpAddr,
    pub server_port: u16,
}

impl Tuple {
    pub fn new(
        protocol: Protocol,
        client_addr: IpAddr,
        client_port: u16,
        server_addr: IpAddr,
        server_port: u16,
    ) -> Self {
        Tuple {
            protocol,
            client_addr,
            client_port,
            server_addr,
            server_port,
        }
    }
}

impl fmt::Display for Tuple {
    /// Canonical logging form: `proto|cIP:cPort->sIP:sPort`. Never used as a
    /// table key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}:{}->{}:{}",
            self.protocol, self.client_addr, self.client_port, self.server_addr, self.server_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_component_wise() {
        let a = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        let b = Tuple::new(6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        assert_eq!(a, b);
    }

    #[test]
    fn v4_and_v6_addresses_never_alias() {
        let v4 = Tuple::new(6, "127.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        let v6 = Tuple::new(6, "::1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        assert_ne!(v4, v6);
    }

    #[test]
    fn display_uses_canonical_form() {
        let t = Tuple::new(6, "10.0.0.5".parse().unwrap(), 54321, "93.184.216.34".parse().unwrap(), 443);
        assert_eq!(t.to_string(), "6|10.0.0.5:54321->93.184.216.34:443");
    }
}
