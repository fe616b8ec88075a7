//! The live kernel: rtnetlink for links, setns for namespaces.

mod netlink;
mod netns;

pub use netlink::RtNetlink;

use crate::error::{FabricError, FabricResult};
use crate::kernel::{Kernel, NetNs};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory holding named namespaces, as used by `ip netns`.
pub const DEFAULT_NETNS_RUN_DIR: &str = "/var/run/netns";

/// [`Kernel`] backed by the running Linux kernel.
pub struct SystemKernel {
    run_dir: PathBuf,
    host: NetNs,
}

impl SystemKernel {
    /// Uses the calling thread's namespace as the host namespace.
    pub fn new() -> FabricResult<Self> {
        Self::with_run_dir(DEFAULT_NETNS_RUN_DIR)
    }

    pub fn with_run_dir(run_dir: impl Into<PathBuf>) -> FabricResult<Self> {
        let host = NetNs::open("host", netns::THREAD_NS_PATH)
            .map_err(|e| FabricError::namespace("host", e.to_string()))?;
        Ok(Self {
            run_dir: run_dir.into(),
            host,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Kernel for SystemKernel {
    type Links = RtNetlink;

    fn host(&self) -> &NetNs {
        &self.host
    }

    fn links(&self) -> FabricResult<RtNetlink> {
        RtNetlink::open()
    }

    fn open_namespace(&self, name: &str) -> FabricResult<Option<NetNs>> {
        let path = self.run_dir.join(name);
        match netns::is_mounted_namespace(&path) {
            Ok(true) => {}
            Ok(false) => {
                warn!(namespace = name, path = %path.display(), "Namespace file has no namespace mounted, treating it as absent");
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FabricError::namespace(name, e.to_string())),
        }

        match NetNs::open(name, path) {
            Ok(ns) => Ok(Some(ns)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FabricError::namespace(name, e.to_string())),
        }
    }

    fn create_namespace(&self, name: &str) -> FabricResult<NetNs> {
        netns::create(&self.run_dir, name)
    }

    fn run_in<T, F>(&self, ns: &NetNs, f: F) -> FabricResult<T>
    where
        T: Send,
        F: FnOnce(&mut RtNetlink) -> FabricResult<T> + Send,
    {
        netns::run_in(ns, || {
            let mut links = RtNetlink::open()?;
            f(&mut links)
        })
    }
}
