//! Reference-counted channel sets.

use std::collections::HashMap;

use arcmesh_protocol::Channel;

use crate::DirectorError;

/// A multiset of channels.
///
/// `add` and `remove` report the edges (0 → 1 and 1 → 0) so callers can
/// subscribe and unsubscribe upstream exactly once per channel.
#[derive(Debug, Clone, Default)]
pub struct InterestTable {
    counts: HashMap<Channel, u32>,
}

impl InterestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments `channel`. Returns `true` if it was not present before.
    pub fn add(&mut self, channel: Channel) -> bool {
        let count = self.counts.entry(channel).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrements `channel`. Returns `true` if this released the last
    /// reference. Removing an absent channel is a no-op.
    pub fn remove(&mut self, channel: Channel) -> bool {
        match self.counts.get_mut(&channel) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&channel);
                true
            }
            None => false,
        }
    }

    /// Drops every reference to `channel`. Returns `true` if it was present.
    pub fn purge(&mut self, channel: Channel) -> bool {
        self.counts.remove(&channel).is_some()
    }

    pub fn count(&self, channel: Channel) -> u32 {
        self.counts.get(&channel).copied().unwrap_or(0)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.counts.contains_key(&channel)
    }

    /// Returns `true` if any of `channels` is present.
    pub fn intersects(&self, channels: &[Channel]) -> bool {
        !self.counts.is_empty() && channels.iter().any(|c| self.counts.contains_key(c))
    }

    /// Present channels, in no particular order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.counts.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Expands the inclusive range `low..=high` into individual channels.
///
/// # Errors
/// - [`DirectorError::InvalidRange`] when `low > high`
/// - [`DirectorError::RangeTooLarge`] when the span exceeds `max_span`
pub fn expand_range(
    low: Channel,
    high: Channel,
    max_span: u64,
) -> Result<Vec<Channel>, DirectorError> {
    if low > high {
        return Err(DirectorError::InvalidRange { low, high });
    }
    let span = (high.0 - low.0).saturating_add(1);
    if span > max_span {
        return Err(DirectorError::RangeTooLarge {
            span,
            max: max_span,
        });
    }
    Ok((low.0..=high.0).map(Channel).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reports_first_reference_only() {
        let mut table = InterestTable::new();
        assert!(table.add(Channel(5)));
        assert!(!table.add(Channel(5)));
        assert_eq!(table.count(Channel(5)), 2);
    }

    #[test]
    fn test_remove_reports_last_reference_only() {
        let mut table = InterestTable::new();
        table.add(Channel(5));
        table.add(Channel(5));
        assert!(!table.remove(Channel(5)));
        assert!(table.contains(Channel(5)));
        assert!(table.remove(Channel(5)));
        assert!(!table.contains(Channel(5)));
        assert!(!table.remove(Channel(5)));
    }

    #[test]
    fn test_intersects() {
        let mut table = InterestTable::new();
        assert!(!table.intersects(&[Channel(1)]));
        table.add(Channel(2));
        assert!(table.intersects(&[Channel(1), Channel(2)]));
        assert!(!table.intersects(&[]));
    }

    #[test]
    fn test_purge_drops_all_references() {
        let mut table = InterestTable::new();
        table.add(Channel(3));
        table.add(Channel(3));
        assert!(table.purge(Channel(3)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_expand_range() {
        let chans = expand_range(Channel(10), Channel(12), 100).unwrap();
        assert_eq!(chans, vec![Channel(10), Channel(11), Channel(12)]);
        assert!(matches!(
            expand_range(Channel(5), Channel(4), 100),
            Err(DirectorError::InvalidRange { .. })
        ));
        assert!(matches!(
            expand_range(Channel(0), Channel(100), 100),
            Err(DirectorError::RangeTooLarge { span: 101, max: 100 })
        ));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// After any interleaving of adds and removes, a channel is
            /// present exactly when more adds than removes reached it, and
            /// the edge flags fire once per 0 → 1 and 1 → 0 transition.
            #[test]
            fn prop_counts_match_a_model(
                ops in prop::collection::vec((any::<bool>(), 0u64..4), 0..64),
            ) {
                let mut table = InterestTable::new();
                let mut model = [0u32; 4];
                for (add, ch) in ops {
                    let slot = &mut model[ch as usize];
                    if add {
                        prop_assert_eq!(table.add(Channel(ch)), *slot == 0);
                        *slot += 1;
                    } else {
                        prop_assert_eq!(table.remove(Channel(ch)), *slot == 1);
                        *slot = slot.saturating_sub(1);
                    }
                }
                for (ch, count) in model.iter().enumerate() {
                    prop_assert_eq!(table.count(Channel(ch as u64)), *count);
                }
                prop_assert_eq!(table.len(), model.iter().filter(|c| **c > 0).count());
            }
        }
    }
}
