//! Per-spoke endpoint settings.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macvtap forwarding mode.
///
/// Parsing accepts the empty string as `bridge`; the default for an
/// unspecified request is `passthru`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MacvtapMode {
    Bridge,
    Private,
    Vepa,
    #[default]
    Passthru,
}

impl MacvtapMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MacvtapMode::Bridge => "bridge",
            MacvtapMode::Private => "private",
            MacvtapMode::Vepa => "vepa",
            MacvtapMode::Passthru => "passthru",
        }
    }
}

impl fmt::Display for MacvtapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacvtapMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "bridge" => Ok(MacvtapMode::Bridge),
            "private" => Ok(MacvtapMode::Private),
            "vepa" => Ok(MacvtapMode::Vepa),
            "passthru" => Ok(MacvtapMode::Passthru),
            other => Err(ParseError::InvalidMacvtapMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for MacvtapMode {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacvtapMode> for String {
    fn from(mode: MacvtapMode) -> String {
        mode.as_str().to_string()
    }
}

/// How a spoke's host-side endpoint is built from the LAN bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One veth pair per spoke; the peer end stays on the bridge.
    #[default]
    Veth,
    /// One VLAN sub-interface of the bridge per spoke, VLAN id = ordinal + 1.
    Vlan,
}

impl Topology {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topology::Veth => "veth",
            Topology::Vlan => "vlan",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "veth" => Ok(Topology::Veth),
            "vlan" => Ok(Topology::Vlan),
            _ => Err(ParseError::InvalidTopology(s.to_string())),
        }
    }
}
