//! VXLAN network identifier.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// VXLAN Network Identifier (1-16777215).
///
/// VNI 0 is not accepted; the identifier is 24 bits wide.
///
/// # Examples
///
/// ```
/// use k8slan_types::Vni;
///
/// let vni = Vni::new(100).unwrap();
/// assert_eq!(vni.as_u32(), 100);
///
/// assert!(Vni::new(0).is_err());
/// assert!(Vni::new(16_777_216).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct Vni(u32);

impl Vni {
    /// Minimum valid VNI.
    pub const MIN: u32 = 1;

    /// Maximum valid VNI.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Creates a new VNI.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is outside 1-16777215.
    pub const fn new(id: i64) -> Result<Self, ParseError> {
        if id >= Self::MIN as i64 && id <= Self::MAX as i64 {
            Ok(Vni(id as u32))
        } else {
            Err(ParseError::InvalidVni(id))
        }
    }

    /// Returns the VNI as a u32.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Vni {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: i64 = s.trim().parse().map_err(|_| ParseError::InvalidVni(0))?;
        Vni::new(id)
    }
}

impl TryFrom<i64> for Vni {
    type Error = ParseError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Vni::new(id)
    }
}

impl From<Vni> for u32 {
    fn from(vni: Vni) -> u32 {
        vni.0
    }
}
