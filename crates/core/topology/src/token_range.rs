/// A half-open interval `(start, end]` on the signed 64-bit token ring.
///
/// A range whose `end` is numerically smaller than or equal to its `start`
/// wraps around the ring. Two ranges are equal iff both endpoints match
/// exactly; overlapping but differently-split ranges are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TokenRange {
    start: i64,
    end: i64,
}

impl TokenRange {
    /// Creates the range `(start, end]`.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The exclusive start token.
    #[must_use]
    pub fn start(&self) -> i64 {
        self.start
    }

    /// The inclusive end token.
    #[must_use]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Whether the range wraps around the end of the ring.
    ///
    /// The full-ring range `(t, t]` is treated as wrapping.
    #[must_use]
    pub fn wraps_around(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `token` falls inside this range.
    #[must_use]
    pub fn contains(&self, token: i64) -> bool {
        if self.wraps_around() {
            token > self.start || token <= self.end
        } else {
            token > self.start && token <= self.end
        }
    }
}

impl std::fmt::Display for TokenRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn non_wrapping_range_contains_its_end_but_not_its_start() {
        //* Given
        let range = TokenRange::new(0, 10);

        //* Then
        assert!(!range.contains(0));
        assert!(range.contains(1));
        assert!(range.contains(10));
        assert!(!range.contains(11));
        assert!(!range.wraps_around());
    }

    #[test]
    fn wrapping_range_covers_both_ring_ends() {
        //* Given
        let range = TokenRange::new(i64::MAX - 10, i64::MIN + 10);

        //* Then
        assert!(range.wraps_around());
        assert!(range.contains(i64::MAX));
        assert!(range.contains(i64::MIN));
        assert!(range.contains(i64::MIN + 10));
        assert!(!range.contains(i64::MAX - 10));
        assert!(!range.contains(0));
    }

    #[test]
    fn equality_requires_exact_endpoints() {
        assert_eq!(TokenRange::new(0, 10), TokenRange::new(0, 10));
        assert_ne!(TokenRange::new(0, 10), TokenRange::new(0, 11));
        assert_ne!(TokenRange::new(0, 10), TokenRange::new(1, 10));
    }

    #[test]
    fn serde_round_trips_endpoints() {
        //* Given
        let range = TokenRange::new(-42, 7);

        //* When
        let json = serde_json::to_value(range).expect("should serialize");

        //* Then
        assert_eq!(json, serde_json::json!({ "start": -42, "end": 7 }));
        let parsed: TokenRange = serde_json::from_value(json).expect("should deserialize");
        assert_eq!(parsed, range);
    }

    proptest! {
        #[test]
        fn every_token_is_covered_by_exactly_one_side_of_a_split(
            split in (i64::MIN + 1)..=i64::MAX,
            token in any::<i64>(),
        ) {
            // Splitting the full ring at an arbitrary token produces two
            // complementary ranges; any token belongs to exactly one of them.
            let low = TokenRange::new(i64::MIN, split);
            let high = TokenRange::new(split, i64::MIN);

            prop_assert_eq!(low.contains(token) ^ high.contains(token), true);
        }
    }
}
