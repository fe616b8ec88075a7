//! Network namespace lifecycle and scoped execution.

use crate::error::{FabricError, FabricResult};
use crate::kernel::{Kernel, LinkOps, NetNs};
use tracing::{debug, info, instrument};

const LOOPBACK: &str = "lo";

/// Ensures LAN namespaces exist and runs work inside them.
pub struct NamespaceManager<'k, K> {
    kernel: &'k K,
}

impl<'k, K: Kernel> NamespaceManager<'k, K> {
    pub fn new(kernel: &'k K) -> Self {
        Self { kernel }
    }

    /// Opens the namespace `name`, creating it if it does not exist.
    ///
    /// Loopback is brought up inside it; a namespace with `lo` down drops
    /// traffic terminating in it.
    #[instrument(skip(self))]
    pub fn ensure_namespace(&self, name: &str) -> FabricResult<NetNs> {
        let ns = match self.kernel.open_namespace(name)? {
            Some(ns) => ns,
            None => match self.kernel.create_namespace(name) {
                Ok(ns) => {
                    info!(namespace = name, path = %ns.path().display(), "Created network namespace");
                    ns
                }
                // Lost a race with another pass creating the same namespace.
                Err(e) if e.is_exists() => {
                    debug!(namespace = name, "Namespace appeared concurrently, reopening");
                    self.kernel
                        .open_namespace(name)?
                        .ok_or_else(|| FabricError::namespace(name, "namespace vanished after creation"))?
                }
                Err(e) => return Err(e),
            },
        };

        self.kernel.run_in(&ns, bring_up_loopback)?;
        Ok(ns)
    }

    /// Runs `f` inside `ns`. See [`Kernel::run_in`].
    pub fn run_in<T, F>(&self, ns: &NetNs, f: F) -> FabricResult<T>
    where
        T: Send,
        F: FnOnce(&mut K::Links) -> FabricResult<T> + Send,
    {
        self.kernel.run_in(ns, f)
    }
}

fn bring_up_loopback<L: LinkOps>(links: &mut L) -> FabricResult<()> {
    let lo = links.require(LOOPBACK)?;
    if !lo.up {
        links.set_up(lo.index)?;
        debug!("Loopback brought up");
    }
    Ok(())
}
