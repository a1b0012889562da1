use std::collections::BTreeMap;
use std::ops::Range;

/// A set of `u64` values stored as disjoint, non-adjacent half-open ranges.
///
/// Adding a value that touches an existing range extends that range, so the number of stored
/// intervals is always the minimum needed to represent the set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntervalSet {
    // start -> end (exclusive)
    ranges: BTreeMap<u64, u64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn num_intervals(&self) -> usize {
        self.ranges.len()
    }

    /// Adds `value`, which must be below `u64::MAX`.
    pub fn add(&mut self, value: u64) {
        debug_assert!(value < u64::MAX, "u64::MAX cannot be stored");
        self.add_range(value, value.saturating_add(1));
    }

    /// Adds every value in `[start, end)`.
    pub fn add_range(&mut self, mut start: u64, mut end: u64) {
        if start >= end {
            return;
        }

        // Merge with a predecessor which overlaps or touches the new range
        let prev = self.ranges.range(..=start).next_back().map(|(&s, &e)| (s, e));
        if let Some((prev_start, prev_end)) = prev {
            if prev_end >= start {
                if prev_end >= end {
                    // Already covered
                    return;
                }

                self.ranges.remove(&prev_start);
                start = prev_start;
            }
        }

        // Absorb every successor which begins inside (or right after) the new range
        loop {
            let next = self.ranges.range(start..).next().map(|(&s, &e)| (s, e));

            let Some((next_start, next_end)) = next else {
                break;
            };

            if next_start > end {
                break;
            }

            self.ranges.remove(&next_start);
            end = end.max(next_end);
        }

        self.ranges.insert(start, end);
    }

    pub fn contains(&self, value: u64) -> bool {
        match self.ranges.range(..=value).next_back() {
            Some((_, &end)) => value < end,
            None => false,
        }
    }

    pub fn min(&self) -> Option<u64> {
        self.ranges.first_key_value().map(|(&start, _)| start)
    }

    pub fn max(&self) -> Option<u64> {
        self.ranges.last_key_value().map(|(_, &end)| end - 1)
    }

    /// Removes every value strictly less than `higher`. Returns true if anything was removed.
    pub fn remove_up_to(&mut self, higher: u64) -> bool {
        let mut removed = false;

        while let Some((start, end)) = self.ranges.first_key_value().map(|(&s, &e)| (s, e)) {
            if start >= higher {
                break;
            }

            self.ranges.remove(&start);
            removed = true;

            if end > higher {
                // Keep the upper part of a straddling range
                self.ranges.insert(higher, end);
                break;
            }
        }

        removed
    }

    /// Removes the interval holding the smallest values. Returns the removed range, if any.
    pub fn remove_smallest_interval(&mut self) -> Option<Range<u64>> {
        self.ranges.pop_first().map(|(start, end)| start..end)
    }

    /// Number of values in the interval holding the largest values.
    pub fn last_interval_length(&self) -> Option<u64> {
        self.ranges.last_key_value().map(|(&start, &end)| end - start)
    }

    /// Iterates over intervals in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|(&start, &end)| start..end)
    }
}
