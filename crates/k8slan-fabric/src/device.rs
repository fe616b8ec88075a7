//! Device-plugin naming for macvtap taps.
//!
//! Each spoke is advertised as a resource `macvtap.k8slan.io/<spoke>` with
//! devices `<spoke>Mvp0..<spoke>Mvp<capacity-1>`. The device ID doubles as
//! the macvtap interface name; allocation hands out `/dev/tap<index>`.

use std::path::PathBuf;

pub use k8slan_types::DEVICE_SUFFIX;

/// Resource namespace under which spokes are advertised.
pub const RESOURCE_NAMESPACE: &str = "macvtap.k8slan.io";

/// Devices advertised per spoke when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 1;

const TAP_PATH_PREFIX: &str = "/dev/tap";

/// Fully qualified resource name for a spoke.
pub fn resource_name(spoke: &str) -> String {
    format!("{RESOURCE_NAMESPACE}/{spoke}")
}

/// Device IDs advertised for a spoke. A capacity of 0 uses [`DEFAULT_CAPACITY`].
pub fn device_ids(spoke: &str, capacity: usize) -> Vec<String> {
    let capacity = if capacity == 0 {
        DEFAULT_CAPACITY
    } else {
        capacity
    };
    (0..capacity)
        .map(|i| format!("{spoke}{DEVICE_SUFFIX}{i}"))
        .collect()
}

/// Splits a device ID into its spoke name and ordinal.
pub fn parse_device_id(id: &str) -> Option<(&str, usize)> {
    let (spoke, ordinal) = id.rsplit_once(DEVICE_SUFFIX)?;
    if spoke.is_empty() {
        return None;
    }
    Some((spoke, ordinal.parse().ok()?))
}

/// Character device backing a macvtap link.
pub fn tap_device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("{TAP_PATH_PREFIX}{index}"))
}

/// A device handed to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAllocation {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub permissions: String,
}

impl DeviceAllocation {
    /// Exposes the tap at the same path inside the container, read-write.
    pub fn for_tap(index: u32) -> Self {
        let path = tap_device_path(index);
        Self {
            host_path: path.clone(),
            container_path: path,
            permissions: "rw".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name("s1"), "macvtap.k8slan.io/s1");
    }

    #[test]
    fn test_device_ids() {
        assert_eq!(device_ids("s1", 0), vec!["s1Mvp0"]);
        assert_eq!(device_ids("s1", 3), vec!["s1Mvp0", "s1Mvp1", "s1Mvp2"]);
    }

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("s1Mvp0"), Some(("s1", 0)));
        assert_eq!(parse_device_id("aMvpbMvp12"), Some(("aMvpb", 12)));
        assert_eq!(parse_device_id("Mvp0"), None);
        assert_eq!(parse_device_id("s1Mvpx"), None);
        assert_eq!(parse_device_id("s1"), None);
    }

    #[test]
    fn test_allocation() {
        let alloc = DeviceAllocation::for_tap(42);
        assert_eq!(alloc.host_path, PathBuf::from("/dev/tap42"));
        assert_eq!(alloc.container_path, alloc.host_path);
        assert_eq!(alloc.permissions, "rw");
    }
}
