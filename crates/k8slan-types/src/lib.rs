//! Types describing a multi-host VXLAN overlay LAN.
//!
//! This crate holds the declarative side of the fabric:
//!
//! - [`LanSpec`]: the desired state as it arrives on the wire
//! - [`Lan`]: a spec that passed [`LanSpec::validate`]
//! - [`IfName`], [`Vni`], [`MulticastGroup`]: validated primitives
//! - [`MacvtapMode`], [`Topology`]: per-spoke endpoint settings

mod group;
mod lan;
mod mode;
mod name;
mod vni;

pub use group::MulticastGroup;
pub use lan::{
    validate_update, Lan, LanResource, LanSpec, ObjectMeta, UplinkSelector, DEFAULT_GROUP,
    DEFAULT_PORT, DEVICE_SUFFIX, MAX_SPOKES, UPLINK_AUTO,
};
pub use mode::{MacvtapMode, Topology};
pub use name::IfName;
pub use vni::Vni;

/// Error type for parsing individual values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid interface name {name:?}: {reason}")]
    InvalidInterfaceName { name: String, reason: String },

    #[error("invalid vni {0}, must be 1..16777215")]
    InvalidVni(i64),

    #[error("{0} is not a valid address")]
    InvalidAddress(String),

    #[error("{0} is not a multicast address")]
    NotMulticast(String),

    #[error("unknown macvtap mode {0:?}")]
    InvalidMacvtapMode(String),

    #[error("unknown topology {0:?}, expected veth or vlan")]
    InvalidTopology(String),
}

/// A spec field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wraps a value-level parse failure under the field it came from.
    pub fn from_parse(field: impl Into<String>, err: ParseError) -> Self {
        Self::new(field, err.to_string())
    }
}
