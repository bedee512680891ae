use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, Default)]
pub struct DataRange {
    pub start: u64,
    pub length: u64,
    pub checksum: Option<u64>,
}

impl DataRange {
    pub fn new(start: u64, length: u64) -> DataRange {
        DataRange {
            start,
            length,
            checksum: None,
        }
    }

    pub fn with_checksum(start: u64, length: u64, checksum: u64) -> DataRange {
        DataRange {
            start,
            length,
            checksum: Some(checksum),
        }
    }

    pub fn last_point(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn is_same_span(&self, other: &DataRange) -> bool {
        self.start == other.start && self.length == other.length
    }

    /// Identical spans keep their checksum; any other merge drops it.
    pub fn try_merge(a: &DataRange, b: &DataRange) -> Option<DataRange> {
        if a.is_same_span(b) {
            return Some(*a);
        }

        let (first, second) = if a.start <= b.start { (a, b) } else { (b, a) };
        if first.last_point() < second.start {
            return None;
        }

        let start = first.start;
        let last_point = first.last_point().max(second.last_point());
        Some(DataRange::new(start, last_point - start))
    }
}

impl PartialEq for DataRange {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
    }
}

impl Eq for DataRange {}

impl PartialOrd for DataRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start.cmp(&other.start)
    }
}

pub fn merge_ranges(ranges: &[DataRange]) -> Vec<DataRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut merged: Vec<DataRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = merged.last_mut() {
            if let Some(value) = DataRange::try_merge(last, &range) {
                *last = value;
                continue;
            }
        }
        merged.push(range);
    }
    merged
}

#[cfg(test)]
mod test {
    use crate::data_range::{merge_ranges, DataRange};

    fn span(range: Option<DataRange>) -> Option<(u64, u64)> {
        range.map(|r| (r.start, r.length))
    }

    #[test]
    fn test_merge_touching() {
        let a = DataRange::new(0, 10);
        let b = DataRange::new(10, 5);
        assert_eq!(span(DataRange::try_merge(&a, &b)), Some((0, 15)));
        assert_eq!(span(DataRange::try_merge(&b, &a)), Some((0, 15)));
    }

    #[test]
    fn test_merge_overlapping_and_contained() {
        let a = DataRange::new(5, 10);
        let b = DataRange::new(8, 20);
        assert_eq!(span(DataRange::try_merge(&a, &b)), Some((5, 23)));

        let outer = DataRange::new(0, 100);
        let inner = DataRange::new(20, 10);
        assert_eq!(span(DataRange::try_merge(&outer, &inner)), Some((0, 100)));
        assert_eq!(span(DataRange::try_merge(&inner, &outer)), Some((0, 100)));
    }

    #[test]
    fn test_merge_disjoint_fails() {
        let a = DataRange::new(0, 10);
        let b = DataRange::new(11, 5);
        assert!(DataRange::try_merge(&a, &b).is_none());
        assert!(DataRange::try_merge(&b, &a).is_none());
    }

    #[test]
    fn test_merge_identical_keeps_checksum() {
        let a = DataRange::with_checksum(3, 7, 42);
        let merged = DataRange::try_merge(&a, &a).unwrap();
        assert_eq!(merged.checksum, Some(42));
        assert_eq!((merged.start, merged.length), (3, 7));
    }

    #[test]
    fn test_merge_commutative_grid() {
        let ranges = [
            DataRange::new(0, 0),
            DataRange::new(0, 4),
            DataRange::new(2, 2),
            DataRange::new(4, 3),
            DataRange::new(5, 10),
            DataRange::new(20, 1),
        ];
        for a in &ranges {
            for b in &ranges {
                let ab = span(DataRange::try_merge(a, b));
                let ba = span(DataRange::try_merge(b, a));
                assert_eq!(ab, ba);

                let touches = a.start.max(b.start) <= a.last_point().min(b.last_point());
                assert_eq!(ab.is_some(), touches);
                if let Some((start, length)) = ab {
                    assert_eq!(start, a.start.min(b.start));
                    assert_eq!(start + length, a.last_point().max(b.last_point()));
                }
            }
        }
    }

    #[test]
    fn test_last_point_saturates() {
        let range = DataRange::new(u64::MAX - 1, 5);
        assert_eq!(range.last_point(), u64::MAX);
        assert!(DataRange::try_merge(&range, &DataRange::new(u64::MAX - 3, 2)).is_some());
    }

    #[test]
    fn test_merge_ranges() {
        let merged = merge_ranges(&[
            DataRange::new(50, 5),
            DataRange::new(10, 10),
            DataRange::new(20, 10),
            DataRange::new(25, 2),
        ]);
        let spans: Vec<(u64, u64)> = merged.iter().map(|r| (r.start, r.length)).collect();
        assert_eq!(spans, vec![(10, 20), (50, 5)]);
    }
}
