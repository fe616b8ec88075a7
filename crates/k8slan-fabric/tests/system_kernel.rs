//! Live kernel tests for SystemKernel
//!
//! Each test moves its own thread into a fresh network namespace and keeps
//! named namespaces under a temporary run directory, so the host's links
//! and /var/run/netns are never touched.
//!
//! Needs root (CAP_SYS_ADMIN and CAP_NET_ADMIN) and the macvtap module.
//!
//! Run with: cargo test -p k8slan-fabric --test system_kernel -- --ignored --test-threads=1

#![cfg(target_os = "linux")]

use k8slan_fabric::{
    FabricError, FabricResult, Kernel, LanFabric, LanState, LinkKind, LinkOps, NewLink,
    SystemKernel, TapRequest,
};
use k8slan_types::{LanSpec, MacvtapMode};
use nix::mount::{umount2, MntFlags};
use nix::sched::{unshare, CloneFlags};
use pretty_assertions::assert_eq;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tempfile::TempDir;

const THREAD_NS: &str = "/proc/thread-self/ns/net";

fn ns_inode() -> u64 {
    fs::metadata(THREAD_NS).unwrap().ino()
}

/// Puts the test thread in a new network namespace and returns a kernel
/// whose run directory lives in a temporary directory.
fn isolated_kernel() -> (SystemKernel, TempDir) {
    unshare(CloneFlags::CLONE_NEWNET).unwrap();
    let run_dir = tempfile::tempdir().unwrap();
    let kernel = SystemKernel::with_run_dir(run_dir.path()).unwrap();
    (kernel, run_dir)
}

/// Detaches every namespace mounted under `run_dir`, then the run
/// directory's own bind mount.
fn unmount_all(run_dir: &Path) {
    for entry in fs::read_dir(run_dir).unwrap() {
        let _ = umount2(&entry.unwrap().path(), MntFlags::MNT_DETACH);
    }
    let _ = umount2(run_dir, MntFlags::MNT_DETACH);
}

#[test]
#[ignore = "needs root"]
fn test_run_in_error_restores_caller_namespace() {
    let (kernel, run_dir) = isolated_kernel();
    let ns = kernel.create_namespace("errns").unwrap();
    let before = ns_inode();

    let mut inside = 0;
    let err = kernel
        .run_in(&ns, |_| -> FabricResult<()> {
            inside = ns_inode();
            Err(FabricError::namespace("errns", "failed on purpose"))
        })
        .unwrap_err();

    assert!(err.to_string().contains("failed on purpose"));
    assert_ne!(inside, before);
    assert_eq!(inside, fs::metadata(ns.path()).unwrap().ino());
    assert_eq!(ns_inode(), before);

    unmount_all(run_dir.path());
}

#[test]
#[ignore = "needs root"]
fn test_run_in_panic_restores_caller_namespace() {
    let (kernel, run_dir) = isolated_kernel();
    let ns = kernel.create_namespace("panicns").unwrap();
    let before = ns_inode();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        kernel.run_in(&ns, |_| -> FabricResult<()> { panic!("worker blew up") })
    }));
    assert!(caught.is_err());
    assert_eq!(ns_inode(), before);

    // The namespace is still usable afterwards.
    let inside = kernel.run_in(&ns, |_| Ok(ns_inode())).unwrap();
    assert_ne!(inside, before);

    unmount_all(run_dir.path());
}

#[test]
#[ignore = "needs root"]
fn test_create_namespace_twice_is_exists() {
    let (kernel, run_dir) = isolated_kernel();
    kernel.create_namespace("dupns").unwrap();

    let err = kernel.create_namespace("dupns").unwrap_err();
    assert!(err.is_exists());
    assert!(kernel.open_namespace("dupns").unwrap().is_some());

    unmount_all(run_dir.path());
}

#[test]
#[ignore = "needs root"]
fn test_stale_namespace_file_is_replaced() {
    let (kernel, run_dir) = isolated_kernel();
    // Left behind by a create that died before its bind mount.
    fs::write(run_dir.path().join("stalens"), b"").unwrap();

    assert!(kernel.open_namespace("stalens").unwrap().is_none());

    let ns = kernel.create_namespace("stalens").unwrap();
    let inside = kernel.run_in(&ns, |_| Ok(ns_inode())).unwrap();
    assert_ne!(inside, ns_inode());
    assert!(kernel.open_namespace("stalens").unwrap().is_some());

    unmount_all(run_dir.path());
}

#[test]
#[ignore = "needs root"]
fn test_ensure_observe_remove_round_trip() {
    let (kernel, run_dir) = isolated_kernel();

    let mut host = kernel.links().unwrap();
    host.add_link(&NewLink::Veth {
        name: "up0".to_string(),
        peer: "up0p".to_string(),
        mtu: 1500,
    })
    .unwrap();
    let uplink = host.require("up0").unwrap();
    host.set_up(uplink.index).unwrap();

    let spec = LanSpec {
        ns: "rtlan".to_string(),
        bridge: "br0".to_string(),
        vxlan: "vx0".to_string(),
        vni: 100,
        vxlan_grp: "239.1.1.1".to_string(),
        default_vxlan_dev: "up0".to_string(),
        spokes: vec!["s1".to_string()],
        ..Default::default()
    };
    let fabric = LanFabric::new(kernel);
    assert_eq!(fabric.observe(&spec, "node1").unwrap(), LanState::Absent);

    let request = TapRequest::new("s1", "s1Mvp0", MacvtapMode::Bridge);
    let index = fabric.ensure(&spec, "node1", &request).unwrap();

    let tap = host.require("s1Mvp0").unwrap();
    assert_eq!(tap.index, index);
    assert_eq!(tap.kind, LinkKind::Macvtap);
    assert_eq!(tap.parent, Some(host.require("s1").unwrap().index));
    assert_eq!(fabric.observe(&spec, "node1").unwrap(), LanState::Converged);

    // A second pass recreates the macvtap and leaves the overlay alone.
    let again = fabric.ensure(&spec, "node1", &request).unwrap();
    assert_eq!(host.require("s1Mvp0").unwrap().index, again);
    assert_eq!(fabric.observe(&spec, "node1").unwrap(), LanState::Converged);

    let report = fabric.remove(&spec).unwrap();
    assert!(report.is_clean(), "teardown failed: {:?}", report.failed);
    assert!(host.link_by_name("s1").unwrap().is_none());
    assert!(host.link_by_name("s1Mvp0").unwrap().is_none());
    assert_eq!(fabric.observe(&spec, "node1").unwrap(), LanState::Absent);

    unmount_all(run_dir.path());
}
