//! Range partitioning: split the source key domain into contiguous,
//! non-overlapping `[min_value, max_value)` ranges so each one can be copied
//! by its own worker.

use std::fmt;

use serde::Serialize;

use crate::error::CopyError;

/// The probed `[min, max]` key range of the source table (both inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub min: i64,
    pub max: i64,
}

impl Domain {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Number of key values in the domain. Computed wide so the full `i64`
    /// range does not overflow.
    pub fn span(&self) -> i128 {
        self.max as i128 - self.min as i128 + 1
    }
}

/// A single key-range partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub index: usize,
    /// Inclusive lower bound.
    pub min_value: i64,
    /// Exclusive upper bound. For the last partition this is `domain.max + 1`,
    /// or `None` when the domain reaches `i64::MAX` and the range is open.
    pub max_value: Option<i64>,
}

impl Partition {
    pub fn contains(&self, key: i64) -> bool {
        key >= self.min_value
            && match self.max_value {
                Some(max) => key < max,
                None => true,
            }
    }

    /// Number of key values covered.
    pub fn width(&self) -> i128 {
        let end = match self.max_value {
            Some(max) => max as i128,
            None => i64::MAX as i128 + 1,
        };
        end - self.min_value as i128
    }

    /// Return the WHERE clause fragment selecting this partition's keys.
    pub fn where_clause(&self, key_column: &str) -> String {
        match self.max_value {
            Some(max) => format!(
                "{key_column} >= {} AND {key_column} < {max}",
                self.min_value
            ),
            None => format!("{key_column} >= {}", self.min_value),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_value {
            Some(max) => write!(f, "[{}, {})", self.min_value, max),
            None => write!(f, "[{}, unbounded)", self.min_value),
        }
    }
}

/// Split `[min, max]` into `partition_count` contiguous ranges.
///
/// Every partition gets `span / n` keys and the first `span % n` partitions
/// get one extra, so sizes differ by at most one. When the domain holds fewer
/// keys than requested partitions the count is clamped to the span, so no
/// partition is ever empty. The last partition ends at `max + 1`, or is left
/// open when `max` is `i64::MAX`.
pub fn partition(min: i64, max: i64, partition_count: usize) -> Result<Vec<Partition>, CopyError> {
    if partition_count == 0 {
        return Err(CopyError::InvalidConfig(
            "partition count must be at least 1".to_string(),
        ));
    }
    if min > max {
        return Err(CopyError::InvalidConfig(format!(
            "domain minimum {min} is greater than maximum {max}"
        )));
    }

    let span = Domain::new(min, max).span();
    let effective = (partition_count as i128).min(span);
    let base = span / effective;
    let remainder = span % effective;

    let mut partitions = Vec::with_capacity(effective as usize);
    let mut lo = min as i128;
    for i in 0..effective {
        let size = if i < remainder { base + 1 } else { base };
        let hi = lo + size;
        partitions.push(Partition {
            index: i as usize,
            min_value: lo as i64,
            // Only the last bound can exceed i64::MAX.
            max_value: i64::try_from(hi).ok(),
        });
        lo = hi;
    }

    debug_assert_eq!(lo, max as i128 + 1);
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(parts: &[Partition], min: i64, max: i64) {
        assert_eq!(parts.first().unwrap().min_value, min);
        assert_eq!(parts.last().unwrap().max_value, max.checked_add(1));
        for (i, pair) in parts.windows(2).enumerate() {
            assert_eq!(pair[0].index, i);
            assert_eq!(pair[0].max_value, Some(pair[1].min_value));
        }
        let total: i128 = parts.iter().map(Partition::width).sum();
        assert_eq!(total, Domain::new(min, max).span());
    }

    #[test]
    fn test_even_division() {
        let parts = partition(1, 100, 4).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].where_clause("id"), "id >= 1 AND id < 26");
        assert_eq!(parts[1].where_clause("id"), "id >= 26 AND id < 51");
        assert_eq!(parts[2].where_clause("id"), "id >= 51 AND id < 76");
        assert_eq!(parts[3].where_clause("id"), "id >= 76 AND id < 101");
        assert_covers(&parts, 1, 100);
    }

    #[test]
    fn test_remainder_goes_to_first_partitions() {
        let parts = partition(0, 9, 3).unwrap();
        let widths: Vec<i128> = parts.iter().map(Partition::width).collect();
        assert_eq!(widths, vec![4, 3, 3]);
        assert_covers(&parts, 0, 9);
    }

    #[test]
    fn test_last_partition_includes_domain_max() {
        let parts = partition(1, 2500, 4).unwrap();
        let last = parts.last().unwrap();
        assert!(last.contains(2500));
        assert!(!last.contains(2501));
        assert_eq!(parts.iter().filter(|p| p.contains(2500)).count(), 1);
        assert!(parts[0].contains(1));
    }

    #[test]
    fn test_single_partition() {
        let parts = partition(10, 20, 1).unwrap();
        assert_eq!(
            parts,
            vec![Partition {
                index: 0,
                min_value: 10,
                max_value: Some(21)
            }]
        );
    }

    #[test]
    fn test_single_key_domain() {
        let parts = partition(42, 42, 8).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains(42));
    }

    #[test]
    fn test_more_partitions_than_keys_is_clamped() {
        let parts = partition(5, 7, 10).unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.width() == 1));
        assert_covers(&parts, 5, 7);
    }

    #[test]
    fn test_zero_partitions_is_invalid() {
        assert!(matches!(
            partition(0, 100, 0),
            Err(CopyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_inverted_domain_is_invalid() {
        assert!(matches!(
            partition(10, 1, 2),
            Err(CopyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_negative_and_wide_domains() {
        let parts = partition(-50, 49, 7).unwrap();
        assert_covers(&parts, -50, 49);

        let parts = partition(i64::MIN, i64::MAX - 1, 3).unwrap();
        assert_covers(&parts, i64::MIN, i64::MAX - 1);
    }

    #[test]
    fn test_domain_reaching_i64_max_ends_open() {
        let parts = partition(1, i64::MAX, 2).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].max_value, Some(parts[1].min_value));
        assert_eq!(parts[1].max_value, None);
        assert!(parts[1].contains(i64::MAX));
        assert!(!parts[0].contains(i64::MAX));
        assert_eq!(parts[1].where_clause("id"), format!("id >= {}", parts[1].min_value));
        assert_eq!(parts[1].to_string(), format!("[{}, unbounded)", parts[1].min_value));
        assert_covers(&parts, 1, i64::MAX);

        let parts = partition(i64::MIN, i64::MAX, 1).unwrap();
        assert_eq!(parts[0].width(), 1i128 << 64);
        assert!(parts[0].contains(i64::MIN) && parts[0].contains(i64::MAX));
    }

    #[test]
    fn test_sizes_differ_by_at_most_one() {
        for (min, max) in [(0i64, 0i64), (1, 2500), (-7, 13), (100, 1_000_003)] {
            for n in 1..=17usize {
                let parts = partition(min, max, n).unwrap();
                assert_covers(&parts, min, max);
                let widths: Vec<i128> = parts.iter().map(Partition::width).collect();
                let lo = *widths.iter().min().unwrap();
                let hi = *widths.iter().max().unwrap();
                assert!(hi - lo <= 1, "min={min} max={max} n={n} widths={widths:?}");
                assert!(lo >= 1);
            }
        }
    }
}
