//! Quota recovery policy.

/// Per-item size estimate used when the real size is unknown.
pub const ITEM_BYTES_ESTIMATE: u64 = 48;

/// Room left free below the quota after a recovery pass.
pub const DEFAULT_HEADROOM_BYTES: u64 = 1024 * 1024;

/// How many of the oldest entries a quota failure should drop.
///
/// The estimate is deliberately coarse. Every pass over a non-empty list
/// drops at least one entry, so repeated failures always make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRecovery {
    pub item_bytes_estimate: u64,
    pub headroom_bytes: u64,
}

impl Default for QuotaRecovery {
    fn default() -> Self {
        Self {
            item_bytes_estimate: ITEM_BYTES_ESTIMATE,
            headroom_bytes: DEFAULT_HEADROOM_BYTES,
        }
    }
}

impl QuotaRecovery {
    /// Number of entries to drop for a write of `attempted_bytes` against
    /// `quota_bytes`, given a list of `len` entries.
    pub fn items_to_delete(&self, attempted_bytes: u64, quota_bytes: u64, len: usize) -> usize {
        let target = quota_bytes.saturating_sub(self.headroom_bytes);
        let excess = attempted_bytes.saturating_sub(target);
        if excess == 0 || len == 0 {
            return 0;
        }

        let estimate = self.item_bytes_estimate.max(1);
        let wanted = excess.div_ceil(estimate);
        usize::try_from(wanted).map_or(len, |wanted| wanted.min(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_to_delete() {
        let policy = QuotaRecovery {
            item_bytes_estimate: 48,
            headroom_bytes: 100,
        };

        // 1100 attempted, target 900: 200 excess, 5 items of 48 bytes.
        assert_eq!(policy.items_to_delete(1100, 1000, 50), 5);
        // Never more than the list holds.
        assert_eq!(policy.items_to_delete(1100, 1000, 3), 3);
        // Under target means nothing to do.
        assert_eq!(policy.items_to_delete(800, 1000, 50), 0);
        assert_eq!(policy.items_to_delete(1100, 1000, 0), 0);
    }

    #[test]
    fn test_headroom_larger_than_quota() {
        let policy = QuotaRecovery::default();
        assert_eq!(policy.items_to_delete(480, 1000, 100), 10);
    }
}
