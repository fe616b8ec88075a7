//! Linux interface names.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A Linux network interface name.
///
/// LAN-managed names (bridge, vxlan, spokes) are limited to 13 bytes so that a
/// one-character suffix still fits in the kernel's 15-byte limit. Names created
/// outside that convention, such as macvtap devices, use [`IfName::kernel`].
///
/// # Examples
///
/// ```
/// use k8slan_types::IfName;
///
/// let name = IfName::new("br-lan").unwrap();
/// assert_eq!(name.as_str(), "br-lan");
///
/// assert!(IfName::new("").is_err());
/// assert!(IfName::new("abcdefghijklmn").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IfName(String);

impl IfName {
    /// Maximum length of a LAN-managed interface name.
    pub const MAX_LEN: usize = 13;

    /// Maximum length the kernel accepts (IFNAMSIZ - 1).
    pub const MAX_KERNEL_LEN: usize = 15;

    /// Creates a LAN-managed interface name (1-13 bytes).
    pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
        Self::with_limit(name.into(), Self::MAX_LEN)
    }

    /// Creates an interface name checked only against the kernel limit (1-15 bytes).
    pub fn kernel(name: impl Into<String>) -> Result<Self, ParseError> {
        Self::with_limit(name.into(), Self::MAX_KERNEL_LEN)
    }

    fn with_limit(name: String, max: usize) -> Result<Self, ParseError> {
        let invalid = |reason: String| ParseError::InvalidInterfaceName {
            name: name.clone(),
            reason,
        };

        if name.is_empty() || name.len() > max {
            return Err(invalid(format!("length must be 1..{max}")));
        }
        if name == "." || name == ".." {
            return Err(invalid("reserved name".to_string()));
        }
        if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
            return Err(invalid("contains '/', ':' or whitespace".to_string()));
        }

        Ok(IfName(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns this name with `suffix` appended, checked against the kernel limit.
    ///
    /// Used for the bridge-side end of a spoke veth pair.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self, ParseError> {
        Self::kernel(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for IfName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IfName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IfName::new(s)
    }
}

impl TryFrom<String> for IfName {
    type Error = ParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        IfName::new(name)
    }
}

impl From<IfName> for String {
    fn from(name: IfName) -> String {
        name.0
    }
}

impl AsRef<str> for IfName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for IfName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_length_boundaries() {
        assert!(IfName::new("a").is_ok());
        assert!(IfName::new("abcdefghijklm").is_ok());
        assert!(IfName::new("").is_err());
        assert!(IfName::new("abcdefghijklmn").is_err());
    }

    #[test]
    fn test_kernel_limit() {
        assert!(IfName::kernel("abcdefghijklmno").is_ok());
        assert!(IfName::kernel("abcdefghijklmnop").is_err());
    }

    #[test]
    fn test_rejects_reserved_and_separators() {
        assert!(IfName::new(".").is_err());
        assert!(IfName::new("..").is_err());
        assert!(IfName::new("eth0/1").is_err());
        assert!(IfName::new("eth0:1").is_err());
        assert!(IfName::new("eth 0").is_err());
    }

    #[test]
    fn test_with_suffix() {
        let spoke = IfName::new("abcdefghijklm").unwrap();
        assert_eq!(spoke.with_suffix("p").unwrap().as_str(), "abcdefghijklmp");
    }

    #[test]
    fn test_error_message() {
        let err = IfName::new("abcdefghijklmn").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid interface name \"abcdefghijklmn\": length must be 1..13"
        );
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let ok: IfName = serde_json::from_str("\"vx0\"").unwrap();
        assert_eq!(ok.as_str(), "vx0");
        assert!(serde_json::from_str::<IfName>("\"\"").is_err());
    }
}
