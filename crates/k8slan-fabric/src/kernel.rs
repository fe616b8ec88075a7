//! Kernel seam: link tables and namespace-scoped execution.
//!
//! The engine never talks to the kernel directly. [`LinkOps`] is one link
//! table bound to a single network namespace; [`Kernel`] owns namespace
//! creation and the ability to run work inside a namespace.

use crate::error::{FabricError, FabricResult};
use k8slan_types::MacvtapMode;
use std::fmt;
use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// VXLAN FDB ageing time in seconds.
pub const VXLAN_AGEING_SECS: u32 = 3600;

/// Transmit queue length given to new VXLAN links.
pub const VXLAN_TX_QUEUE_LEN: u32 = 1024;

/// Link type as reported by IFLA_INFO_KIND.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Bridge,
    Vxlan,
    Veth,
    Vlan,
    Macvtap,
    /// A link without a kind, such as loopback or a physical NIC.
    Device,
    Other(String),
}

impl LinkKind {
    /// Maps a kernel kind string to a [`LinkKind`].
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "" => LinkKind::Device,
            "bridge" => LinkKind::Bridge,
            "vxlan" => LinkKind::Vxlan,
            "veth" => LinkKind::Veth,
            "vlan" => LinkKind::Vlan,
            "macvtap" => LinkKind::Macvtap,
            other => LinkKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Bridge => f.write_str("bridge"),
            LinkKind::Vxlan => f.write_str("vxlan"),
            LinkKind::Veth => f.write_str("veth"),
            LinkKind::Vlan => f.write_str("vlan"),
            LinkKind::Macvtap => f.write_str("macvtap"),
            LinkKind::Device => f.write_str("device"),
            LinkKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// VXLAN attributes compared for drift.
///
/// The default value stands for attributes the kernel did not report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VxlanAttrs {
    pub vni: u32,
    pub group: Option<IpAddr>,
    /// Underlay device index, as seen from the namespace that created the link.
    pub uplink: Option<u32>,
    pub port: u16,
}

/// Snapshot of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
    pub kind: LinkKind,
    pub mtu: u32,
    pub tx_queue_len: u32,
    /// IFLA_LINK: the lower device, or the peer for a veth.
    pub parent: Option<u32>,
    /// IFLA_MASTER: the bridge this link is enslaved to.
    pub master: Option<u32>,
    /// Administrative up flag.
    pub up: bool,
    pub vxlan: Option<VxlanAttrs>,
    pub vlan_id: Option<u16>,
}

impl Link {
    /// A down link with kernel defaults for MTU and queue length.
    pub fn new(index: u32, name: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            mtu: 1500,
            tx_queue_len: 1000,
            parent: None,
            master: None,
            up: false,
            vxlan: None,
            vlan_id: None,
        }
    }

    pub fn is(&self, kind: &LinkKind) -> bool {
        &self.kind == kind
    }
}

/// A link creation request.
#[derive(Debug, Clone)]
pub enum NewLink {
    Bridge {
        name: String,
        mtu: u32,
    },
    /// Created with learning on, ageing [`VXLAN_AGEING_SECS`], proxy off.
    Vxlan {
        name: String,
        mtu: u32,
        vni: u32,
        group: IpAddr,
        uplink: u32,
        port: u16,
        /// Namespace the link is placed in after creation.
        namespace: Option<NetNs>,
    },
    /// Both ends are created in the current namespace.
    Veth {
        name: String,
        peer: String,
        mtu: u32,
    },
    Vlan {
        name: String,
        parent: u32,
        vlan_id: u16,
        mtu: u32,
    },
    Macvtap {
        name: String,
        lower: u32,
        mode: MacvtapMode,
        tx_queue_len: u32,
    },
}

impl NewLink {
    pub fn name(&self) -> &str {
        match self {
            NewLink::Bridge { name, .. }
            | NewLink::Vxlan { name, .. }
            | NewLink::Veth { name, .. }
            | NewLink::Vlan { name, .. }
            | NewLink::Macvtap { name, .. } => name,
        }
    }

    pub fn kind(&self) -> LinkKind {
        match self {
            NewLink::Bridge { .. } => LinkKind::Bridge,
            NewLink::Vxlan { .. } => LinkKind::Vxlan,
            NewLink::Veth { .. } => LinkKind::Veth,
            NewLink::Vlan { .. } => LinkKind::Vlan,
            NewLink::Macvtap { .. } => LinkKind::Macvtap,
        }
    }
}

/// Handle to a network namespace.
///
/// Clones share the underlying file descriptor.
#[derive(Debug, Clone)]
pub struct NetNs {
    name: String,
    path: PathBuf,
    file: Option<Arc<File>>,
}

impl NetNs {
    /// Opens the namespace file at `path`.
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(Self {
            name: name.into(),
            path,
            file: Some(Arc::new(file)),
        })
    }

    /// A handle without an open file, for kernels that track namespaces by name.
    pub fn detached(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> Option<&File> {
        self.file.as_deref()
    }
}

/// One link table, bound to the namespace it was opened in.
pub trait LinkOps {
    fn link_by_name(&mut self, name: &str) -> FabricResult<Option<Link>>;

    fn link_by_index(&mut self, index: u32) -> FabricResult<Option<Link>>;

    fn add_link(&mut self, link: &NewLink) -> FabricResult<()>;

    fn delete_link(&mut self, index: u32) -> FabricResult<()>;

    fn set_up(&mut self, index: u32) -> FabricResult<()>;

    /// Enslaves `index` to the bridge `master`.
    fn set_master(&mut self, index: u32, master: u32) -> FabricResult<()>;

    /// Sets IFLA_BRPORT_GROUP_FWD_MASK on a bridge port.
    fn set_group_fwd_mask(&mut self, index: u32, mask: u16) -> FabricResult<()>;

    /// Moves a link into another namespace.
    fn move_to_namespace(&mut self, index: u32, ns: &NetNs) -> FabricResult<()>;

    /// Egress interface of the first default route (0.0.0.0/0 or ::/0).
    fn default_route_link(&mut self) -> FabricResult<Option<u32>>;

    /// Looks up a link that must exist.
    fn require(&mut self, name: &str) -> FabricResult<Link> {
        self.link_by_name(name)?
            .ok_or_else(|| FabricError::link_not_found(name))
    }

    /// Deletes a link by name, treating "not found" as success.
    ///
    /// Returns true if a link was deleted.
    fn delete_by_name(&mut self, name: &str) -> FabricResult<bool> {
        let Some(link) = self.link_by_name(name)? else {
            return Ok(false);
        };
        match self.delete_link(link.index) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Access to the host's namespaces and link tables.
pub trait Kernel {
    type Links: LinkOps;

    /// The namespace the engine was started in.
    fn host(&self) -> &NetNs;

    /// Opens a link table in the host namespace.
    fn links(&self) -> FabricResult<Self::Links>;

    /// Opens a named namespace, or `None` if it does not exist.
    fn open_namespace(&self, name: &str) -> FabricResult<Option<NetNs>>;

    /// Creates a named namespace.
    fn create_namespace(&self, name: &str) -> FabricResult<NetNs>;

    /// Runs `f` with a link table opened inside `ns`.
    ///
    /// The work runs on an OS thread that is dedicated to it for its whole
    /// duration; the thread's previous namespace is restored on every exit path.
    fn run_in<T, F>(&self, ns: &NetNs, f: F) -> FabricResult<T>
    where
        T: Send,
        F: FnOnce(&mut Self::Links) -> FabricResult<T> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(LinkKind::from_kind(""), LinkKind::Device);
        assert_eq!(LinkKind::from_kind("vxlan"), LinkKind::Vxlan);
        assert_eq!(
            LinkKind::from_kind("dummy"),
            LinkKind::Other("dummy".to_string())
        );
        assert_eq!(LinkKind::Macvtap.to_string(), "macvtap");
    }

    #[test]
    fn test_new_link_name_and_kind() {
        let link = NewLink::Veth {
            name: "s1".to_string(),
            peer: "s1p".to_string(),
            mtu: 1426,
        };
        assert_eq!(link.name(), "s1");
        assert_eq!(link.kind(), LinkKind::Veth);
    }

    #[test]
    fn test_detached_namespace() {
        let ns = NetNs::detached("lan1", "/var/run/netns/lan1");
        assert_eq!(ns.name(), "lan1");
        assert_eq!(ns.path(), Path::new("/var/run/netns/lan1"));
        assert!(ns.file().is_none());
    }
}
