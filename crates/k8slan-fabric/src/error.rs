//! Error types for fabric operations.
//!
//! Every engine operation returns [`FabricResult`]. Errors are descriptive
//! values; callers decide whether to retry.

use crate::inspector::Drift;
use crate::kernel::LinkKind;
use k8slan_types::{ParseError, ValidationError};
use std::io;
use thiserror::Error;

/// Result type alias for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors that can occur while converging or tearing down a LAN.
#[derive(Debug, Error)]
pub enum FabricError {
    /// The LAN spec failed validation; nothing was touched.
    #[error("invalid LAN spec: {0}")]
    Validation(#[from] ValidationError),

    /// Creating, opening or entering a network namespace failed.
    #[error("network namespace '{name}': {message}")]
    Namespace {
        /// Namespace name or path.
        name: String,
        /// Error message.
        message: String,
    },

    /// The namespace file already exists, typically created by a concurrent pass.
    #[error("network namespace '{name}' already exists")]
    NamespaceExists { name: String },

    /// No usable underlay device for the VXLAN tunnel.
    #[error("uplink device not found: {selector}")]
    UplinkNotFound {
        /// The selector that failed to resolve ("auto" or a device name).
        selector: String,
    },

    /// A link the operation depends on does not exist.
    #[error("link '{name}' not found")]
    LinkNotFound {
        /// The link name.
        name: String,
    },

    /// A link with the expected name exists but has a different kind.
    #[error("interface {name} already exists but is a {found} interface, expected {expected}")]
    KindMismatch {
        name: String,
        expected: LinkKind,
        found: LinkKind,
    },

    /// A macvtap name is held by a link the engine must not replace.
    #[error("macvtap name {tap} is taken: {reason}")]
    TapConflict { tap: String, reason: String },

    /// An existing VXLAN link's attributes do not match the desired state.
    #[error("existing vxlan interface {link} has {drift}")]
    Drift {
        /// The drifted link name.
        link: String,
        /// First mismatch found.
        drift: Drift,
    },

    /// The uplink MTU is too small to carry the VXLAN overhead.
    #[error("uplink {uplink} mtu {mtu} leaves no room for vxlan encapsulation")]
    InvalidMtu { uplink: String, mtu: u32 },

    /// The topology cannot build the requested endpoint.
    #[error("{topology} topology: {message}")]
    InvalidTopology { topology: String, message: String },

    /// The requested spoke is not listed in the LAN spec.
    #[error("spoke '{spoke}' is not part of LAN namespace {namespace}")]
    UnknownSpoke { spoke: String, namespace: String },

    /// A macvtap mode string was not recognised.
    #[error("invalid macvtap mode: {0}")]
    InvalidMode(#[source] ParseError),

    /// A netlink request was rejected by the kernel.
    #[error("netlink {operation} failed: {source}")]
    Netlink {
        /// The operation that failed (e.g. "add link br0").
        operation: String,
        /// The kernel's errno.
        #[source]
        source: io::Error,
    },

    /// A link name did not disappear within the settle budget.
    #[error("timed out waiting for link '{name}' to be released")]
    SettleTimeout { name: String },

    /// IO error outside netlink.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FabricError {
    /// Creates a namespace error.
    pub fn namespace(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Namespace {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a netlink error.
    pub fn netlink(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Netlink {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a netlink error from a raw errno.
    pub fn errno(operation: impl Into<String>, errno: i32) -> Self {
        Self::netlink(operation, io::Error::from_raw_os_error(errno))
    }

    /// Creates a link not found error.
    pub fn link_not_found(name: impl Into<String>) -> Self {
        Self::LinkNotFound { name: name.into() }
    }

    /// Returns the kernel errno carried by this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            FabricError::Netlink { source, .. } | FabricError::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// Returns true if the error means the object was already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FabricError::LinkNotFound { .. })
            || matches!(self.raw_os_error(), Some(libc::ENODEV) | Some(libc::ENOENT))
    }

    /// Returns true if the error means the object already exists.
    pub fn is_exists(&self) -> bool {
        matches!(self, FabricError::NamespaceExists { .. })
            || self.raw_os_error() == Some(libc::EEXIST)
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FabricError::SettleTimeout { .. })
            || matches!(self.raw_os_error(), Some(libc::EBUSY) | Some(libc::EAGAIN))
    }
}
