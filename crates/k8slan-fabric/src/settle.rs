//! Waiting for the kernel to release a link name.
//!
//! Deleting one end of a veth pair removes the other end asynchronously, and
//! the name cannot be reused until it is gone. Instead of sleeping a fixed
//! time, the name is polled with a bounded exponential backoff.

use crate::error::{FabricError, FabricResult};
use crate::kernel::LinkOps;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tracing::debug;

/// Bounds for [`wait_until_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total time budget before giving up.
    pub max_elapsed: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(200),
            max_elapsed: Duration::from_secs(5),
        }
    }
}

impl SettlePolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        }
    }
}

/// Polls `links` until no link named `name` exists.
///
/// Fails with [`FabricError::SettleTimeout`] once the policy's budget is spent.
pub fn wait_until_absent<L: LinkOps>(
    links: &mut L,
    name: &str,
    policy: &SettlePolicy,
) -> FabricResult<()> {
    let mut polls = 0u32;
    let result = backoff::retry(policy.backoff(), || {
        polls += 1;
        match links.link_by_name(name) {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(backoff::Error::transient(FabricError::SettleTimeout {
                name: name.to_string(),
            })),
            Err(e) => Err(backoff::Error::permanent(e)),
        }
    });

    match result {
        Ok(()) => {
            if polls > 1 {
                debug!(link = name, polls, "Link name released");
            }
            Ok(())
        }
        Err(backoff::Error::Permanent(e)) => Err(e),
        Err(backoff::Error::Transient { err, .. }) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_policy() {
        let policy = SettlePolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_millis(10));
        assert_eq!(policy.max_elapsed, Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let backoff = SettlePolicy::default().backoff();
        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(5)));
        assert_eq!(backoff.max_interval, Duration::from_millis(200));
    }
}
