//! First/last commit bounds.
//!
//! Repositories and authors both carry a `[first, last]` pair of
//! timestamps that may only ever widen. [`Bounds`] holds that pair and
//! the widening rule shared by every store implementation.

use chrono::{DateTime, Utc};

/// Earliest and latest commit timestamps observed for a repository or author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
}

impl Bounds {
    pub fn new(first: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> Self {
        Self { first, last }
    }

    /// Bounds covering a single instant.
    pub fn point(ts: DateTime<Utc>) -> Self {
        Self {
            first: Some(ts),
            last: Some(ts),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none()
    }

    /// Extend the bounds to include `ts`.
    pub fn observe(&mut self, ts: DateTime<Utc>) {
        *self = self.widen(&Self::point(ts));
    }

    /// Widen-only merge.
    ///
    /// `first` takes the candidate when unset or when the candidate precedes
    /// it; `last` takes the candidate when unset or when the candidate
    /// follows it. A `None` candidate leaves the side untouched. The
    /// operation is idempotent and commutative.
    pub fn widen(&self, candidate: &Bounds) -> Bounds {
        let first = match (self.first, candidate.first) {
            (Some(cur), Some(c)) => Some(cur.min(c)),
            (cur, c) => cur.or(c),
        };
        let last = match (self.last, candidate.last) {
            (Some(cur), Some(c)) => Some(cur.max(c)),
            (cur, c) => cur.or(c),
        };
        Bounds { first, last }
    }
}

impl FromIterator<DateTime<Utc>> for Bounds {
    fn from_iter<I: IntoIterator<Item = DateTime<Utc>>>(iter: I) -> Self {
        let mut bounds = Bounds::default();
        for ts in iter {
            bounds.observe(ts);
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_widen_from_empty() {
        let b = Bounds::default().widen(&Bounds::new(Some(day(3)), Some(day(5))));
        assert_eq!(b, Bounds::new(Some(day(3)), Some(day(5))));
    }

    #[test]
    fn test_widen_never_narrows() {
        let current = Bounds::new(Some(day(2)), Some(day(9)));
        let b = current.widen(&Bounds::new(Some(day(4)), Some(day(6))));
        assert_eq!(b, current);

        let b = current.widen(&Bounds::new(Some(day(1)), Some(day(10))));
        assert_eq!(b, Bounds::new(Some(day(1)), Some(day(10))));
    }

    #[test]
    fn test_widen_is_idempotent() {
        let current = Bounds::new(Some(day(5)), None);
        let candidate = Bounds::new(Some(day(3)), Some(day(7)));
        let once = current.widen(&candidate);
        let twice = once.widen(&candidate);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_none_candidate_keeps_side() {
        let current = Bounds::new(Some(day(5)), Some(day(6)));
        let b = current.widen(&Bounds::new(None, Some(day(8))));
        assert_eq!(b, Bounds::new(Some(day(5)), Some(day(8))));
    }

    #[test]
    fn test_collect_from_unordered_dates() {
        let b: Bounds = [day(1), day(3), day(2)].into_iter().collect();
        assert_eq!(b, Bounds::new(Some(day(1)), Some(day(3))));
        assert!(!b.is_empty());
        assert!(std::iter::empty::<DateTime<Utc>>()
            .collect::<Bounds>()
            .is_empty());
    }
}
