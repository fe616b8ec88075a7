//! In-memory kernel for driving the fabric engine in tests.
//!
//! Models just enough of rtnetlink for the engine: one link table per
//! namespace, veth pairs spanning namespaces, lower/upper cascades on
//! delete, and EEXIST/ENODEV where the kernel would return them.

use k8slan_fabric::kernel::VXLAN_TX_QUEUE_LEN;
use k8slan_fabric::{
    FabricError, FabricResult, Kernel, Link, LinkKind, LinkOps, NetNs, NewLink, VxlanAttrs,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Path standing in for the host namespace.
pub const HOST_NS_PATH: &str = "/proc/1/ns/net";

const RUN_DIR: &str = "/var/run/netns";
const LOOPBACK: &str = "lo";

#[derive(Debug, Clone)]
struct FakeLink {
    ns: PathBuf,
    link: Link,
    /// Other end of a veth pair.
    peer: Option<u32>,
    group_fwd_mask: Option<u16>,
    /// Lookups left before a deleted link disappears.
    lingering: Option<u32>,
}

#[derive(Debug)]
struct FakeState {
    namespaces: BTreeSet<PathBuf>,
    links: BTreeMap<u32, FakeLink>,
    next_index: u32,
    mutations: u64,
    linger: u32,
    default_route: Option<u32>,
    /// Namespaces the next open reports as missing.
    hidden: BTreeSet<PathBuf>,
}

impl FakeState {
    fn find(&self, ns: &Path, name: &str) -> Option<u32> {
        self.links
            .iter()
            .find(|(_, l)| l.ns == ns && l.link.name == name)
            .map(|(index, _)| *index)
    }

    /// Returns a visible link, expiring lingering ones as they are polled.
    fn visible(&mut self, index: u32) -> Option<Link> {
        let entry = self.links.get_mut(&index)?;
        match entry.lingering {
            None => Some(entry.link.clone()),
            Some(0) => {
                self.links.remove(&index);
                None
            }
            Some(left) => {
                entry.lingering = Some(left - 1);
                Some(entry.link.clone())
            }
        }
    }

    fn live(&self, ns: &Path, index: u32) -> Option<&FakeLink> {
        self.links
            .get(&index)
            .filter(|l| l.ns == ns && l.lingering.is_none())
    }

    fn insert(&mut self, ns: &Path, mut link: Link) -> u32 {
        self.next_index += 1;
        link.index = self.next_index;
        self.links.insert(
            link.index,
            FakeLink {
                ns: ns.to_path_buf(),
                link,
                peer: None,
                group_fwd_mask: None,
                lingering: None,
            },
        );
        self.next_index
    }

    /// Deletes a link and everything the kernel would take down with it.
    ///
    /// Only the link itself and its veth peer linger; stacked devices on
    /// top of it go away immediately.
    fn remove(&mut self, index: u32) {
        let mut pending = vec![(index, true)];
        while let Some((index, linger)) = pending.pop() {
            let Some(entry) = self.links.get(&index) else {
                continue;
            };
            if entry.lingering.is_some() {
                continue;
            }
            if let Some(peer) = entry.peer {
                pending.push((peer, linger));
            }
            for (other, l) in &self.links {
                if l.lingering.is_none() && l.link.parent == Some(index) && l.peer.is_none() {
                    pending.push((*other, false));
                }
            }
            for l in self.links.values_mut() {
                if l.link.master == Some(index) {
                    l.link.master = None;
                }
            }

            if linger && self.linger > 0 {
                if let Some(entry) = self.links.get_mut(&index) {
                    entry.lingering = Some(self.linger);
                }
            } else {
                self.links.remove(&index);
            }
        }
    }
}

/// Shared in-memory kernel. Clones see the same state.
#[derive(Debug, Clone)]
pub struct FakeKernel {
    state: Arc<Mutex<FakeState>>,
    host: NetNs,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    /// A host namespace holding only an up loopback.
    pub fn new() -> Self {
        let host = PathBuf::from(HOST_NS_PATH);
        let mut state = FakeState {
            namespaces: BTreeSet::from([host.clone()]),
            links: BTreeMap::new(),
            next_index: 0,
            mutations: 0,
            linger: 0,
            default_route: None,
            hidden: BTreeSet::new(),
        };
        let mut lo = Link::new(0, LOOPBACK, LinkKind::Device);
        lo.up = true;
        state.insert(&host, lo);

        Self {
            state: Arc::new(Mutex::new(state)),
            host: NetNs::detached("host", host),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ns_path(name: &str) -> PathBuf {
        Path::new(RUN_DIR).join(name)
    }

    fn resolve(&self, ns: &str) -> PathBuf {
        if ns == self.host.name() {
            self.host.path().to_path_buf()
        } else {
            Self::ns_path(ns)
        }
    }

    /// Adds a physical device to the host namespace and returns its index.
    pub fn add_uplink(&self, name: &str, mtu: u32) -> u32 {
        let mut link = Link::new(0, name, LinkKind::Device);
        link.mtu = mtu;
        link.up = true;
        let host = self.host.path().to_path_buf();
        self.lock().insert(&host, link)
    }

    /// Points the host default route at `index`.
    pub fn set_default_route(&self, index: u32) {
        self.lock().default_route = Some(index);
    }

    /// Places an arbitrary link, bypassing the engine. `ns` is a namespace
    /// name or `"host"`.
    pub fn insert_link(&self, ns: &str, name: &str, kind: LinkKind) -> u32 {
        let path = self.resolve(ns);
        self.lock().insert(&path, Link::new(0, name, kind))
    }

    /// Rewrites a link's VXLAN attributes in place.
    pub fn set_vxlan_attrs(&self, ns: &str, name: &str, attrs: VxlanAttrs) {
        let path = self.resolve(ns);
        let mut state = self.lock();
        if let Some(index) = state.find(&path, name) {
            if let Some(entry) = state.links.get_mut(&index) {
                entry.link.vxlan = Some(attrs);
            }
        }
    }

    /// Makes the next `open_namespace(ns)` miss an existing namespace, as if
    /// another agent created it between the open and the create.
    pub fn hide_namespace_once(&self, ns: &str) {
        let path = self.resolve(ns);
        self.lock().hidden.insert(path);
    }

    /// Keeps deleted links visible for `polls` lookups.
    pub fn set_linger(&self, polls: u32) {
        self.lock().linger = polls;
    }

    /// Number of write operations performed so far.
    pub fn mutations(&self) -> u64 {
        self.lock().mutations
    }

    pub fn has_namespace(&self, ns: &str) -> bool {
        let path = self.resolve(ns);
        self.lock().namespaces.contains(&path)
    }

    /// A live link by namespace and name.
    pub fn link(&self, ns: &str, name: &str) -> Option<Link> {
        let path = self.resolve(ns);
        let state = self.lock();
        state
            .links
            .values()
            .find(|l| l.ns == path && l.link.name == name && l.lingering.is_none())
            .map(|l| l.link.clone())
    }

    /// Names of all live links in a namespace, sorted.
    pub fn link_names(&self, ns: &str) -> Vec<String> {
        let path = self.resolve(ns);
        let state = self.lock();
        let mut names: Vec<String> = state
            .links
            .values()
            .filter(|l| l.ns == path && l.lingering.is_none())
            .map(|l| l.link.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn group_fwd_mask(&self, ns: &str, name: &str) -> Option<u16> {
        let path = self.resolve(ns);
        let state = self.lock();
        state
            .links
            .values()
            .find(|l| l.ns == path && l.link.name == name && l.lingering.is_none())
            .and_then(|l| l.group_fwd_mask)
    }

    fn table(&self, ns: PathBuf) -> FakeLinks {
        FakeLinks {
            state: Arc::clone(&self.state),
            ns,
            host: self.host.path().to_path_buf(),
        }
    }
}

impl Kernel for FakeKernel {
    type Links = FakeLinks;

    fn host(&self) -> &NetNs {
        &self.host
    }

    fn links(&self) -> FabricResult<FakeLinks> {
        Ok(self.table(self.host.path().to_path_buf()))
    }

    fn open_namespace(&self, name: &str) -> FabricResult<Option<NetNs>> {
        let path = Self::ns_path(name);
        let mut state = self.lock();
        if state.hidden.remove(&path) {
            return Ok(None);
        }
        if state.namespaces.contains(&path) {
            Ok(Some(NetNs::detached(name, path)))
        } else {
            Ok(None)
        }
    }

    fn create_namespace(&self, name: &str) -> FabricResult<NetNs> {
        let path = Self::ns_path(name);
        let mut state = self.lock();
        if !state.namespaces.insert(path.clone()) {
            return Err(FabricError::NamespaceExists {
                name: name.to_string(),
            });
        }
        state.mutations += 1;
        state.insert(&path, Link::new(0, LOOPBACK, LinkKind::Device));
        Ok(NetNs::detached(name, path))
    }

    fn run_in<T, F>(&self, ns: &NetNs, f: F) -> FabricResult<T>
    where
        T: Send,
        F: FnOnce(&mut FakeLinks) -> FabricResult<T> + Send,
    {
        if !self.lock().namespaces.contains(ns.path()) {
            return Err(FabricError::namespace(ns.name(), "no such namespace"));
        }
        let mut links = self.table(ns.path().to_path_buf());
        f(&mut links)
    }
}

/// Link table of one namespace in a [`FakeKernel`].
#[derive(Debug)]
pub struct FakeLinks {
    state: Arc<Mutex<FakeState>>,
    ns: PathBuf,
    host: PathBuf,
}

impl FakeLinks {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_live(state: &FakeState, ns: &Path, index: u32, op: &str) -> FabricResult<()> {
        state
            .live(ns, index)
            .map(drop)
            .ok_or_else(|| FabricError::errno(op, libc::ENODEV))
    }
}

impl LinkOps for FakeLinks {
    fn link_by_name(&mut self, name: &str) -> FabricResult<Option<Link>> {
        let mut state = self.lock();
        Ok(match state.find(&self.ns, name) {
            Some(index) => state.visible(index),
            None => None,
        })
    }

    fn link_by_index(&mut self, index: u32) -> FabricResult<Option<Link>> {
        let mut state = self.lock();
        if state.links.get(&index).is_some_and(|l| l.ns == self.ns) {
            Ok(state.visible(index))
        } else {
            Ok(None)
        }
    }

    fn add_link(&mut self, link: &NewLink) -> FabricResult<()> {
        let op = format!("add {} link {}", link.kind(), link.name());
        let mut state = self.lock();

        let target = match link {
            NewLink::Vxlan {
                namespace: Some(ns),
                ..
            } => ns.path().to_path_buf(),
            _ => self.ns.clone(),
        };
        if !state.namespaces.contains(&target) {
            return Err(FabricError::errno(op, libc::EINVAL));
        }
        if state.find(&target, link.name()).is_some() {
            return Err(FabricError::errno(op, libc::EEXIST));
        }

        match link {
            NewLink::Bridge { name, mtu } => {
                let mut new = Link::new(0, name.as_str(), LinkKind::Bridge);
                new.mtu = *mtu;
                state.insert(&target, new);
            }
            NewLink::Vxlan {
                name,
                mtu,
                vni,
                group,
                uplink,
                port,
                ..
            } => {
                Self::require_live(&state, &self.ns, *uplink, &op)?;
                let mut new = Link::new(0, name.as_str(), LinkKind::Vxlan);
                new.mtu = *mtu;
                new.tx_queue_len = VXLAN_TX_QUEUE_LEN;
                new.parent = Some(*uplink);
                new.vxlan = Some(VxlanAttrs {
                    vni: *vni,
                    group: Some(*group),
                    uplink: Some(*uplink),
                    port: *port,
                });
                state.insert(&target, new);
            }
            NewLink::Veth { name, peer, mtu } => {
                if state.find(&target, peer).is_some() {
                    return Err(FabricError::errno(op, libc::EEXIST));
                }
                let mut end = Link::new(0, name.as_str(), LinkKind::Veth);
                end.mtu = *mtu;
                let mut other = Link::new(0, peer.as_str(), LinkKind::Veth);
                other.mtu = *mtu;

                let a = state.insert(&target, end);
                let b = state.insert(&target, other);
                for (index, peer) in [(a, b), (b, a)] {
                    if let Some(entry) = state.links.get_mut(&index) {
                        entry.peer = Some(peer);
                        entry.link.parent = Some(peer);
                    }
                }
            }
            NewLink::Vlan {
                name,
                parent,
                vlan_id,
                mtu,
            } => {
                Self::require_live(&state, &self.ns, *parent, &op)?;
                let mut new = Link::new(0, name.as_str(), LinkKind::Vlan);
                new.mtu = *mtu;
                new.parent = Some(*parent);
                new.vlan_id = Some(*vlan_id);
                state.insert(&target, new);
            }
            NewLink::Macvtap {
                name,
                lower,
                tx_queue_len,
                ..
            } => {
                Self::require_live(&state, &self.ns, *lower, &op)?;
                let mut new = Link::new(0, name.as_str(), LinkKind::Macvtap);
                new.parent = Some(*lower);
                new.tx_queue_len = *tx_queue_len;
                state.insert(&target, new);
            }
        }

        state.mutations += 1;
        Ok(())
    }

    fn delete_link(&mut self, index: u32) -> FabricResult<()> {
        let op = format!("delete link #{index}");
        let mut state = self.lock();
        Self::require_live(&state, &self.ns, index, &op)?;
        state.remove(index);
        state.mutations += 1;
        Ok(())
    }

    fn set_up(&mut self, index: u32) -> FabricResult<()> {
        let op = format!("set link #{index} up");
        let mut state = self.lock();
        Self::require_live(&state, &self.ns, index, &op)?;
        if let Some(entry) = state.links.get_mut(&index) {
            entry.link.up = true;
        }
        state.mutations += 1;
        Ok(())
    }

    fn set_master(&mut self, index: u32, master: u32) -> FabricResult<()> {
        let op = format!("set link #{index} master #{master}");
        let mut state = self.lock();
        Self::require_live(&state, &self.ns, index, &op)?;
        match state.live(&self.ns, master) {
            Some(l) if l.link.is(&LinkKind::Bridge) => {}
            Some(_) => return Err(FabricError::errno(op, libc::EOPNOTSUPP)),
            None => return Err(FabricError::errno(op, libc::ENODEV)),
        }
        if let Some(entry) = state.links.get_mut(&index) {
            entry.link.master = Some(master);
        }
        state.mutations += 1;
        Ok(())
    }

    fn set_group_fwd_mask(&mut self, index: u32, mask: u16) -> FabricResult<()> {
        let op = format!("set link #{index} group_fwd_mask {mask}");
        let mut state = self.lock();
        let enslaved = state
            .live(&self.ns, index)
            .ok_or_else(|| FabricError::errno(op.as_str(), libc::ENODEV))?
            .link
            .master
            .is_some();
        if !enslaved {
            return Err(FabricError::errno(op, libc::EOPNOTSUPP));
        }
        if let Some(entry) = state.links.get_mut(&index) {
            entry.group_fwd_mask = Some(mask);
        }
        state.mutations += 1;
        Ok(())
    }

    fn move_to_namespace(&mut self, index: u32, ns: &NetNs) -> FabricResult<()> {
        let op = format!("move link #{index} to netns {}", ns.name());
        let mut state = self.lock();
        Self::require_live(&state, &self.ns, index, &op)?;
        if !state.namespaces.contains(ns.path()) {
            return Err(FabricError::errno(op, libc::EINVAL));
        }
        let name = state.links[&index].link.name.clone();
        if state.find(ns.path(), &name).is_some() {
            return Err(FabricError::errno(op, libc::EEXIST));
        }
        if let Some(entry) = state.links.get_mut(&index) {
            entry.ns = ns.path().to_path_buf();
            entry.link.master = None;
            entry.link.up = false;
        }
        state.mutations += 1;
        Ok(())
    }

    fn default_route_link(&mut self) -> FabricResult<Option<u32>> {
        if self.ns != self.host {
            return Ok(None);
        }
        Ok(self.lock().default_route)
    }
}
