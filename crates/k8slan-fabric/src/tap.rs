//! Macvtap devices stacked on spoke host ends.

use crate::error::{FabricError, FabricResult};
use crate::kernel::{Link, LinkKind, LinkOps, NewLink};
use k8slan_types::MacvtapMode;
use tracing::{debug, info, instrument};

/// Parses a macvtap mode string.
pub fn parse_mode(mode: &str) -> FabricResult<MacvtapMode> {
    mode.parse().map_err(FabricError::InvalidMode)
}

/// Replaces the macvtap named `tap` with a fresh one on `lower`.
///
/// A missing `tap` is not an error. An existing `tap` is only replaced if it
/// is a macvtap on `lower` or on a lower device that is already gone. The
/// new device copies the lower link's transmit queue length and is brought
/// up. Returns its link index.
#[instrument(skip(links))]
pub fn recreate_tap<L: LinkOps>(
    links: &mut L,
    tap: &str,
    lower: &str,
    mode: MacvtapMode,
) -> FabricResult<u32> {
    let lower = links.require(lower)?;
    if let Some(existing) = links.link_by_name(tap)? {
        check_replaceable(links, &existing, &lower)?;
        if links.delete_by_name(tap)? {
            debug!(tap, "Deleted existing macvtap");
        }
    }

    links.add_link(&NewLink::Macvtap {
        name: tap.to_string(),
        lower: lower.index,
        mode,
        tx_queue_len: lower.tx_queue_len,
    })?;

    let link = links.require(tap)?;
    links.set_up(link.index)?;

    info!(tap, lower = %lower.name, %mode, index = link.index, "Created macvtap");
    Ok(link.index)
}

fn check_replaceable<L: LinkOps>(links: &mut L, existing: &Link, lower: &Link) -> FabricResult<()> {
    let reason = if !existing.is(&LinkKind::Macvtap) {
        format!("it is a {} interface", existing.kind)
    } else {
        match existing.parent {
            Some(parent) if parent != lower.index => match links.link_by_index(parent)? {
                Some(other) => format!("it is a macvtap on {}", other.name),
                None => return Ok(()),
            },
            _ => return Ok(()),
        }
    };
    Err(FabricError::TapConflict {
        tap: existing.name.clone(),
        reason,
    })
}
