//! Pane-to-pane copy operations on raw byte buffers.
//!
//! None of these re-evaluate anything. Callers mark the destination dirty
//! (the store wrappers do) and evaluate once after a batch of copies.

use crate::content::BufferSet;
use std::ops::Range;
use tracing::debug;
use tricmp_common::{Arity, Side, TricmpError};

fn check_panes(buffers: &BufferSet, src: Side, dst: Side) -> Result<(), TricmpError> {
    let count = buffers.side_count();
    for side in [src, dst] {
        if side.index() >= count {
            return Err(TricmpError::InvalidSide(format!(
                "pane {} out of range for {} panes",
                side, count
            )));
        }
    }
    if src == dst {
        return Err(TricmpError::InvalidSide(format!(
            "source and destination are both pane {}",
            src
        )));
    }
    Ok(())
}

fn missing(side: Side) -> TricmpError {
    TricmpError::ContentUnavailable {
        side: side.index(),
        reason: "no buffer loaded".to_string(),
    }
}

/// Overwrite `range` of `dst` with the bytes of `src` at the same offsets.
///
/// The range must lie within both buffers; otherwise nothing is modified.
pub fn copy_selection(
    buffers: &mut BufferSet,
    src: Side,
    dst: Side,
    range: Range<usize>,
) -> Result<(), TricmpError> {
    check_panes(buffers, src, dst)?;
    let src_bytes = buffers.bytes(src).ok_or_else(|| missing(src))?;
    let dst_len = buffers.get(dst).ok_or_else(|| missing(dst))?.len();

    if range.start > range.end || range.end > src_bytes.len() || range.end > dst_len {
        return Err(TricmpError::Range {
            start: range.start,
            end: range.end,
            src_len: src_bytes.len(),
            dst_len,
        });
    }

    let selection = src_bytes[range.clone()].to_vec();
    let target = buffers.get_mut(dst).ok_or_else(|| missing(dst))?;
    target.edit()[range.clone()].copy_from_slice(&selection);

    debug!("Copied bytes {:?} from pane {} to pane {}", range, src, dst);
    Ok(())
}

/// Replace the whole content of `dst` with that of `src`
pub fn copy_all(buffers: &mut BufferSet, src: Side, dst: Side) -> Result<(), TricmpError> {
    check_panes(buffers, src, dst)?;
    let content = buffers.bytes(src).ok_or_else(|| missing(src))?.to_vec();
    let len = content.len();
    buffers.replace(dst, content)?;

    debug!("Copied all {} bytes from pane {} to pane {}", len, src, dst);
    Ok(())
}

/// Copy directions relative to the active pane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneMove {
    /// Active pane's content goes one pane to the right
    ToRight,
    /// Active pane's content goes one pane to the left
    ToLeft,
    /// Active pane receives its left neighbour's content
    FromLeft,
    /// Active pane receives its right neighbour's content
    FromRight,
}

impl PaneMove {
    /// Resolve to a `(src, dst)` pair, clamped to the pane range.
    /// `None` when clamping leaves nothing to copy.
    pub fn resolve(self, active: Side, arity: Arity) -> Option<(Side, Side)> {
        let last = arity.count() - 1;
        let active = active.index().min(last);
        let (src, dst) = match self {
            PaneMove::ToRight => {
                let dst = (active + 1).min(last);
                (dst - 1, dst)
            }
            PaneMove::ToLeft => {
                let dst = active.saturating_sub(1);
                (dst + 1, dst)
            }
            PaneMove::FromLeft => (active.saturating_sub(1), active),
            PaneMove::FromRight => ((active + 1).min(last), active),
        };
        if src == dst {
            return None;
        }
        Some((arity.side(src).ok()?, arity.side(dst).ok()?))
    }
}
