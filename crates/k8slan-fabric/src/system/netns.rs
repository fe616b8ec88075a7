//! Named network namespaces and thread-pinned execution inside them.
//!
//! Namespaces follow the iproute2 convention: a file under the run
//! directory bind-mounted over a thread's `/proc/.../ns/net`.

use crate::error::{FabricError, FabricResult};
use crate::kernel::NetNs;
use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::panic;
use std::path::Path;
use std::thread;
use tracing::{debug, error, warn};

/// Network namespace of the calling thread.
pub(crate) const THREAD_NS_PATH: &str = "/proc/thread-self/ns/net";

/// Switches the current thread into a namespace and back on drop.
struct NsGuard {
    original: File,
}

impl NsGuard {
    fn enter(ns: &NetNs) -> FabricResult<Self> {
        let original = File::open(THREAD_NS_PATH)
            .map_err(|e| FabricError::namespace("host", format!("open {THREAD_NS_PATH}: {e}")))?;
        let target = ns
            .file()
            .ok_or_else(|| FabricError::namespace(ns.name(), "namespace handle is not open"))?;

        setns(target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| FabricError::namespace(ns.name(), format!("setns: {e}")))?;
        Ok(Self { original })
    }
}

impl Drop for NsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            error!(error = %e, "Failed to restore network namespace");
        }
    }
}

/// Runs `f` on a dedicated OS thread switched into `ns`.
///
/// The thread exists only for `f`, so nothing else can observe it in the
/// wrong namespace. A panic in `f` is resumed on the caller.
pub(crate) fn run_in<T, F>(ns: &NetNs, f: F) -> FabricResult<T>
where
    T: Send,
    F: FnOnce() -> FabricResult<T> + Send,
{
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name(format!("netns-{}", ns.name()))
            .spawn_scoped(scope, move || {
                let _guard = NsGuard::enter(ns)?;
                f()
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}

/// True if `path` has a namespace mounted on it, rather than being a plain
/// file left behind by an interrupted create.
pub(crate) fn is_mounted_namespace(path: &Path) -> io::Result<bool> {
    let nsfs = fs::metadata(THREAD_NS_PATH)?.dev();
    Ok(fs::metadata(path)?.dev() == nsfs)
}

/// Makes `run_dir` a recursively shared mount point so namespaces mounted
/// under it show up in other mount namespaces.
fn share_run_dir(run_dir: &Path) -> nix::Result<()> {
    let shared = MsFlags::MS_SHARED | MsFlags::MS_REC;
    match mount(None::<&str>, run_dir, Some("none"), shared, None::<&str>) {
        // Not a mount point yet: bind it onto itself first.
        Err(Errno::EINVAL) => {
            mount(
                Some(run_dir),
                run_dir,
                Some("none"),
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )?;
            mount(None::<&str>, run_dir, Some("none"), shared, None::<&str>)
        }
        result => result,
    }
}

/// Creates the namespace `name` under `run_dir`, like `ip netns add`.
pub(crate) fn create(run_dir: &Path, name: &str) -> FabricResult<NetNs> {
    fs::create_dir_all(run_dir)
        .map_err(|e| FabricError::namespace(name, format!("create {}: {e}", run_dir.display())))?;
    share_run_dir(run_dir).map_err(|e| {
        FabricError::namespace(name, format!("make {} shared: {e}", run_dir.display()))
    })?;

    let path = run_dir.join(name);
    match is_mounted_namespace(&path) {
        Ok(true) => {
            return Err(FabricError::NamespaceExists {
                name: name.to_string(),
            })
        }
        Ok(false) => {
            warn!(namespace = name, path = %path.display(), "Removing stale namespace file");
            fs::remove_file(&path).map_err(|e| {
                FabricError::namespace(name, format!("remove {}: {e}", path.display()))
            })?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(FabricError::namespace(
                name,
                format!("stat {}: {e}", path.display()),
            ))
        }
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => FabricError::NamespaceExists {
                name: name.to_string(),
            },
            _ => FabricError::namespace(name, format!("create {}: {e}", path.display())),
        })?;

    // unshare() moves the calling thread, so do it on a throwaway one.
    let bound = thread::scope(|scope| {
        scope
            .spawn(|| -> nix::Result<()> {
                unshare(CloneFlags::CLONE_NEWNET)?;
                mount(
                    Some(THREAD_NS_PATH),
                    path.as_path(),
                    None::<&str>,
                    MsFlags::MS_BIND,
                    None::<&str>,
                )
            })
            .join()
    });

    match bound {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = fs::remove_file(&path);
            return Err(FabricError::namespace(name, format!("bind mount: {e}")));
        }
        Err(payload) => {
            let _ = fs::remove_file(&path);
            panic::resume_unwind(payload);
        }
    }

    debug!(namespace = name, path = %path.display(), "Bind-mounted new network namespace");
    NetNs::open(name, &path).map_err(|e| FabricError::namespace(name, e.to_string()))
}
