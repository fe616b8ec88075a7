//! VXLAN multicast group address.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// An IPv4 or IPv6 multicast address used as the VXLAN flood group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MulticastGroup(IpAddr);

impl MulticastGroup {
    /// Creates a group from an address, rejecting unicast addresses.
    pub fn new(addr: IpAddr) -> Result<Self, ParseError> {
        if addr.is_multicast() {
            Ok(MulticastGroup(addr))
        } else {
            Err(ParseError::NotMulticast(addr.to_string()))
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.0
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }
}

impl fmt::Display for MulticastGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MulticastGroup {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: IpAddr = s
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        MulticastGroup::new(addr)
    }
}

impl TryFrom<String> for MulticastGroup {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MulticastGroup> for String {
    fn from(group: MulticastGroup) -> String {
        group.to_string()
    }
}

impl From<MulticastGroup> for IpAddr {
    fn from(group: MulticastGroup) -> IpAddr {
        group.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ipv6_default_group() {
        let group: MulticastGroup = "FF02:0:0:0:0:0:0:14".parse().unwrap();
        assert!(group.is_ipv6());
        assert_eq!(group.to_string(), "ff02::14");
    }

    #[test]
    fn test_ipv4_group() {
        let group: MulticastGroup = "239.1.1.1".parse().unwrap();
        assert!(!group.is_ipv6());
    }

    #[test]
    fn test_unicast_rejected() {
        assert_eq!(
            "10.0.0.1".parse::<MulticastGroup>(),
            Err(ParseError::NotMulticast("10.0.0.1".to_string()))
        );
        assert!("2001:db8::1".parse::<MulticastGroup>().is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(
            "not-an-ip".parse::<MulticastGroup>(),
            Err(ParseError::InvalidAddress("not-an-ip".to_string()))
        );
    }
}
