//! IP networks used as database keys.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::error_handling::CodecError;

/// An address prefix. The address is always stored with host bits cleared,
/// so two equal networks compare and hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    /// Builds a network, clearing host bits. Fails when `prefix` is longer
    /// than the address family allows.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, CodecError> {
        if prefix > max_prefix(&addr) {
            return Err(CodecError::InvalidNetwork { addr, prefix });
        }
        Ok(Self::masked(addr, prefix))
    }

    /// The single-host network of `addr` (/32 or /128).
    pub fn host(addr: IpAddr) -> Self {
        Network {
            addr,
            prefix: max_prefix(&addr),
        }
    }

    pub(crate) fn masked(addr: IpAddr, prefix: u8) -> Self {
        let addr = match addr {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4);
                let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
                IpAddr::V4(Ipv4Addr::from(bits & mask))
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                let mask = if prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                IpAddr::V6(Ipv6Addr::from(bits & mask))
            }
        };
        Network { addr, prefix }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// True for /32 and /128 networks.
    pub fn is_host(&self) -> bool {
        self.prefix == max_prefix(&self.addr)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        if ip.is_ipv4() != self.addr.is_ipv4() {
            return false;
        }
        Self::masked(ip, self.prefix).addr == self.addr
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

pub(crate) fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}
