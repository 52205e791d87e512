//! Identity allocation for new items.
//!
//! Allocation is `max(id) + 1` over the records read just before the write.
//! Two creates racing between their read and their write can both observe the
//! same maximum and receive the same id; nothing here guards against that.

use crate::item::Item;

/// Next free identity after the largest id in `existing` (1 for an empty set)
pub fn next_id(existing: &[Item]) -> i64 {
    existing.iter().map(|item| item.id).fold(0, i64::max) + 1
}
