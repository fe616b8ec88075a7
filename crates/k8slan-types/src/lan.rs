//! LAN spec: wire form, defaulting and validation.

use crate::{IfName, MulticastGroup, Topology, ValidationError, Vni};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// IANA-assigned VXLAN UDP port.
pub const DEFAULT_PORT: u16 = 4789;

/// Flood group used when none is given.
pub const DEFAULT_GROUP: &str = "FF02:0:0:0:0:0:0:14";

/// Uplink value asking for the default-route egress device.
pub const UPLINK_AUTO: &str = "auto";

/// Upper bound on the number of spokes in one LAN.
pub const MAX_SPOKES: usize = 4095;

/// Separator between a spoke name and a device ordinal in macvtap names
/// (`<spoke>Mvp<n>`).
pub const DEVICE_SUFFIX: &str = "Mvp";

/// Desired state of a LAN as supplied by the declarative resource.
///
/// Field names match the resource schema. Missing fields deserialize to
/// empty values; [`LanSpec::validate`] reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanSpec {
    /// Network namespace hosting the LAN's bridge and vxlan.
    #[serde(default)]
    pub ns: String,

    #[serde(default)]
    pub bridge: String,

    #[serde(default)]
    pub vxlan: String,

    #[serde(default)]
    pub vni: i64,

    /// VXLAN flood group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vxlan_grp: String,

    /// Uplink used when a host has no entry in `vxlan_dev_map`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_vxlan_dev: String,

    /// Per-host uplink overrides, keyed by hostname.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vxlan_dev_map: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub vxlan_port: i64,

    /// Spoke names. A spoke's macvtaps are named `<spoke>Mvp<n>`, so names
    /// longer than 11 bytes validate but cannot carry a macvtap.
    #[serde(default)]
    pub spokes: Vec<String>,

    /// Rebuild mismatched links instead of failing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,

    #[serde(default)]
    pub topology: Topology,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl LanSpec {
    /// Fills in the flood group, port and default uplink when unset.
    pub fn with_defaults(mut self) -> Self {
        if self.vxlan_grp.trim().is_empty() {
            self.vxlan_grp = DEFAULT_GROUP.to_string();
        }
        if self.vxlan_port == 0 {
            self.vxlan_port = i64::from(DEFAULT_PORT);
        }
        if self.default_vxlan_dev.trim().is_empty() {
            self.default_vxlan_dev = UPLINK_AUTO.to_string();
        }
        self
    }

    /// Checks every field and returns the validated form.
    ///
    /// Defaults are applied first, so an otherwise valid spec with no group,
    /// port or uplink passes.
    pub fn validate(&self) -> Result<Lan, ValidationError> {
        let spec = self.clone().with_defaults();

        let bridge =
            IfName::new(spec.bridge.as_str()).map_err(|e| ValidationError::from_parse("bridge", e))?;
        let vxlan =
            IfName::new(spec.vxlan.as_str()).map_err(|e| ValidationError::from_parse("vxlan", e))?;

        let namespace = spec.ns.trim();
        if namespace.is_empty() {
            return Err(ValidationError::new("ns", "ns is not specified"));
        }

        let vni = Vni::new(spec.vni).map_err(|e| ValidationError::from_parse("vni", e))?;
        let group: MulticastGroup = spec
            .vxlan_grp
            .parse()
            .map_err(|e| ValidationError::from_parse("vxlanGrp", e))?;

        let port = u16::try_from(spec.vxlan_port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                ValidationError::new(
                    "vxlanPort",
                    format!("invalid port {}, must be 1..65535", spec.vxlan_port),
                )
            })?;

        if bridge == vxlan {
            return Err(ValidationError::new(
                "vxlan",
                format!("vxlan name {vxlan} is the same as the bridge name"),
            ));
        }

        if spec.spokes.is_empty() || spec.spokes.len() > MAX_SPOKES {
            return Err(ValidationError::new(
                "spokes",
                format!("the number of spokes must be in range of 1..{MAX_SPOKES}"),
            ));
        }

        let mut seen = HashSet::with_capacity(spec.spokes.len());
        let mut spokes = Vec::with_capacity(spec.spokes.len());
        for raw in &spec.spokes {
            let spoke =
                IfName::new(raw.as_str()).map_err(|e| ValidationError::from_parse("spokes", e))?;
            if spoke == bridge || spoke == vxlan {
                return Err(ValidationError::new(
                    "spokes",
                    format!("spoke {spoke} collides with the bridge or vxlan name"),
                ));
            }
            if !seen.insert(spoke.clone()) {
                return Err(ValidationError::new(
                    "spokes",
                    format!("duplicate spoke {spoke}"),
                ));
            }
            spokes.push(spoke);
        }

        let names: HashSet<&str> = spokes.iter().map(IfName::as_str).collect();
        for spoke in &spokes {
            if let Some(owner) = device_owner(spoke.as_str()).filter(|o| names.contains(o)) {
                return Err(ValidationError::new(
                    "spokes",
                    format!("spoke {spoke} collides with a macvtap name of spoke {owner}"),
                ));
            }
        }

        let default_uplink = UplinkSelector::parse(&spec.default_vxlan_dev)
            .ok_or_else(|| ValidationError::new("defaultVxlanDev", "device name is empty"))?;
        let mut uplink_overrides = BTreeMap::new();
        for (host, dev) in &spec.vxlan_dev_map {
            let selector = UplinkSelector::parse(dev).ok_or_else(|| {
                ValidationError::new(format!("vxlanDevMap[{host}]"), "device name is empty")
            })?;
            uplink_overrides.insert(host.clone(), selector);
        }

        Ok(Lan {
            namespace: namespace.to_string(),
            bridge,
            vxlan,
            vni,
            group,
            port,
            default_uplink,
            uplink_overrides,
            spokes,
            force: spec.force,
            topology: spec.topology,
        })
    }
}

/// The spoke a `<spoke>Mvp<n>` name would belong to.
fn device_owner(name: &str) -> Option<&str> {
    let (owner, ordinal) = name.rsplit_once(DEVICE_SUFFIX)?;
    let numeric = !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit());
    (numeric && !owner.is_empty()).then_some(owner)
}

/// Rejects any change to an accepted spec.
///
/// A LAN is rebuilt by deleting and recreating the resource.
pub fn validate_update(old: &LanSpec, new: &LanSpec) -> Result<(), ValidationError> {
    if old != new {
        return Err(ValidationError::new(
            "spec",
            "updates to the spec are not allowed; delete and recreate the resource instead",
        ));
    }
    Ok(())
}

/// Where the VXLAN tunnel's underlay device comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UplinkSelector {
    /// Egress device of the default route.
    Auto,
    /// A device looked up by name in the host namespace.
    Named(String),
}

impl UplinkSelector {
    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            UPLINK_AUTO => Some(UplinkSelector::Auto),
            name => Some(UplinkSelector::Named(name.to_string())),
        }
    }
}

impl fmt::Display for UplinkSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UplinkSelector::Auto => f.write_str(UPLINK_AUTO),
            UplinkSelector::Named(name) => f.write_str(name),
        }
    }
}

/// A LAN spec that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lan {
    pub namespace: String,
    pub bridge: IfName,
    pub vxlan: IfName,
    pub vni: Vni,
    pub group: MulticastGroup,
    pub port: u16,
    pub default_uplink: UplinkSelector,
    pub uplink_overrides: BTreeMap<String, UplinkSelector>,
    pub spokes: Vec<IfName>,
    pub force: bool,
    pub topology: Topology,
}

impl Lan {
    /// Uplink selector for `hostname`: its override if any, else the default.
    pub fn uplink_for(&self, hostname: &str) -> &UplinkSelector {
        self.uplink_overrides
            .get(hostname)
            .unwrap_or(&self.default_uplink)
    }

    /// Spokes whose first macvtap name, `<spoke>Mvp0`, exceeds the kernel's
    /// interface name limit.
    pub fn untappable_spokes(&self) -> impl Iterator<Item = &IfName> {
        self.spokes
            .iter()
            .filter(|s| s.as_str().len() + DEVICE_SUFFIX.len() + 1 > IfName::MAX_KERNEL_LEN)
    }

    /// Position and name of a spoke.
    pub fn spoke(&self, name: &str) -> Option<(usize, &IfName)> {
        self.spokes
            .iter()
            .enumerate()
            .find(|(_, spoke)| spoke.as_str() == name)
    }
}

/// Object metadata carried by a LAN resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A complete LAN resource document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: LanSpec,
}
