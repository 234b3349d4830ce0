//! The validity interval — when a version is (or was) in effect.
//!
//! Every version carries a half-open interval `[valid_from, valid_to)`. An
//! absent end means the version is currently in effect. `valid_from` is
//! inclusive and `valid_to` exclusive, so of two adjacent versions exactly
//! one contains the instant they meet at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A half-open validity period `[valid_from, valid_to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
  pub valid_from: DateTime<Utc>,
  /// Exclusive end; `None` means open-ended ("currently in effect").
  pub valid_to:   Option<DateTime<Utc>>,
}

impl ValidityInterval {
  /// An open-ended interval starting at `from`.
  pub fn open(from: DateTime<Utc>) -> Self {
    Self { valid_from: from, valid_to: None }
  }

  /// A closed interval `[from, to)`. Rejects `to <= from`: a version must
  /// have been in effect for a measurable amount of time.
  pub fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
    if to <= from {
      return Err(Error::ZeroWidthInterval { from, to });
    }
    Ok(Self { valid_from: from, valid_to: Some(to) })
  }

  /// Close an open interval at `to`. Same width rule as [`Self::closed`].
  pub fn close_at(&self, to: DateTime<Utc>) -> Result<Self> {
    Self::closed(self.valid_from, to)
  }

  pub fn is_open(&self) -> bool { self.valid_to.is_none() }

  /// Containment per the boundary rule: `valid_from <= t < valid_to`.
  pub fn contains(&self, t: DateTime<Utc>) -> bool {
    if t < self.valid_from {
      return false;
    }
    match self.valid_to {
      Some(to) => t < to,
      None => true,
    }
  }

  /// True iff `self` ends at or before `other` begins. An open-ended
  /// interval precedes nothing.
  pub fn precedes(&self, other: &Self) -> bool {
    match self.valid_to {
      Some(to) => to <= other.valid_from,
      None => false,
    }
  }

  /// True iff the two intervals share at least one instant.
  pub fn overlaps(&self, other: &Self) -> bool {
    let self_starts_in_time = match other.valid_to {
      Some(to) => self.valid_from < to,
      None => true,
    };
    let other_starts_in_time = match self.valid_to {
      Some(to) => other.valid_from < to,
      None => true,
    };
    self_starts_in_time && other_starts_in_time
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
  }

  #[test]
  fn closed_rejects_zero_width() {
    assert!(matches!(
      ValidityInterval::closed(at(10), at(10)),
      Err(Error::ZeroWidthInterval { .. })
    ));
    assert!(matches!(
      ValidityInterval::closed(at(10), at(9)),
      Err(Error::ZeroWidthInterval { .. })
    ));
    assert!(ValidityInterval::closed(at(10), at(11)).is_ok());
  }

  #[test]
  fn contains_is_inclusive_start_exclusive_end() {
    let iv = ValidityInterval::closed(at(10), at(20)).unwrap();
    assert!(!iv.contains(at(9)));
    assert!(iv.contains(at(10)));
    assert!(iv.contains(at(19)));
    assert!(!iv.contains(at(20)));
  }

  #[test]
  fn open_interval_contains_everything_from_start() {
    let iv = ValidityInterval::open(at(10));
    assert!(!iv.contains(at(9)));
    assert!(iv.contains(at(10)));
    assert!(iv.contains(at(1_000_000)));
  }

  #[test]
  fn adjacent_intervals_share_no_instant() {
    let first = ValidityInterval::closed(at(10), at(20)).unwrap();
    let second = ValidityInterval::open(at(20));

    assert!(first.precedes(&second));
    assert!(!first.overlaps(&second));

    // The meeting instant belongs to exactly one of them.
    assert!(!first.contains(at(20)));
    assert!(second.contains(at(20)));
  }

  #[test]
  fn overlapping_intervals_detected() {
    let a = ValidityInterval::closed(at(10), at(30)).unwrap();
    let b = ValidityInterval::closed(at(20), at(40)).unwrap();
    let open = ValidityInterval::open(at(35));

    assert!(a.overlaps(&b));
    assert!(b.overlaps(&a));
    assert!(!a.overlaps(&open));
    assert!(b.overlaps(&open));
  }

  #[test]
  fn open_interval_precedes_nothing() {
    let open = ValidityInterval::open(at(10));
    let later = ValidityInterval::open(at(20));
    assert!(!open.precedes(&later));
  }
}
