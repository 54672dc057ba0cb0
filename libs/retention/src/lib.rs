//! Retention decisions for replicated snapshots.
//!
//! Given every DR copy of one source and the policy named on its youngest
//! snapshot, decide which copies survive. Key concepts:
//!
//! - **Bucket**: a calendar granularity (day, ISO week, month, year). The
//!   first snapshot seen in a bucket is its representative.
//! - **Forward pass**: snapshots are sorted youngest first and evaluated in
//!   one pass; each bucket tracks the last key it saw and how many it kept.
//!
//! # Invariants
//!
//! - Decisions are a pure function of the timestamps and the policy
//! - Appending older history never changes decisions for younger snapshots
//! - An unrecognised policy name never produces a deletion

mod calendar;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use thiserror::Error;

pub use calendar::{iso_week, Calendar};

/// Retention errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetentionError {
    /// The lifecycle tag names a policy this engine does not implement.
    #[error("lifecycle '{0}' not supported")]
    UnsupportedPolicy(String),
}

/// Anything with a creation timestamp can be evaluated.
pub trait Dated {
    fn created_at(&self) -> DateTime<Utc>;
}

impl Dated for DateTime<Utc> {
    fn created_at(&self) -> DateTime<Utc> {
        *self
    }
}

/// Named retention policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionPolicy {
    /// Daily for a week, weekly for five weeks, monthly for a year, yearly for seven.
    Standard,
    /// The last seven days.
    Weekly,
    /// The last fourteen days.
    Fortnightly,
    /// One snapshot from each of the last two ISO weeks.
    Biweekly,
    /// Fourteen dailies, topped up to sixteen with the first of each older week.
    SemiMonthly,
    /// One per day for a trailing calendar month.
    Monthly,
    /// One per day within the youngest snapshot's month.
    CurrentMonth,
    /// The three youngest.
    Test,
}

impl RetentionPolicy {
    pub const ALL: [RetentionPolicy; 8] = [
        RetentionPolicy::Standard,
        RetentionPolicy::Weekly,
        RetentionPolicy::Fortnightly,
        RetentionPolicy::Biweekly,
        RetentionPolicy::SemiMonthly,
        RetentionPolicy::Monthly,
        RetentionPolicy::CurrentMonth,
        RetentionPolicy::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionPolicy::Standard => "Standard",
            RetentionPolicy::Weekly => "Weekly",
            RetentionPolicy::Fortnightly => "Fortnightly",
            RetentionPolicy::Biweekly => "Biweekly",
            RetentionPolicy::SemiMonthly => "SemiMonthly",
            RetentionPolicy::Monthly => "Monthly",
            RetentionPolicy::CurrentMonth => "CurrentMonth",
            RetentionPolicy::Test => "Test",
        }
    }

    /// Upper bound on how many snapshots the policy can retain.
    pub fn capacity(&self) -> usize {
        match self {
            RetentionPolicy::Standard => STANDARD_DAILIES + STANDARD_WEEKLIES + STANDARD_MONTHLIES + STANDARD_YEARLIES,
            RetentionPolicy::Weekly => 7,
            RetentionPolicy::Fortnightly => 14,
            RetentionPolicy::Biweekly => 2,
            RetentionPolicy::SemiMonthly => SEMI_MONTHLY_DAILIES + SEMI_MONTHLY_WEEKLIES,
            // A trailing month or a calendar month has at most 31 days.
            RetentionPolicy::Monthly | RetentionPolicy::CurrentMonth => 31,
            RetentionPolicy::Test => TEST_KEEP,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionPolicy {
    type Err = RetentionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetentionPolicy::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| RetentionError::UnsupportedPolicy(s.to_string()))
    }
}

const STANDARD_DAILIES: usize = 7;
const STANDARD_WEEKLIES: usize = 5;
const STANDARD_MONTHLIES: usize = 12;
const STANDARD_YEARLIES: usize = 7;
const SEMI_MONTHLY_DAILIES: usize = 14;
/// Older weeks kept on top of the dailies.
const SEMI_MONTHLY_WEEKLIES: usize = 2;
const TEST_KEEP: usize = 3;

/// A snapshot annotated with its calendar components and the decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Marked<T> {
    pub snapshot: T,
    pub calendar: Calendar,
    pub retain: bool,
}

/// First-seen tracker for one bucket granularity.
struct Bucket<K> {
    last: Option<K>,
    kept: usize,
    cap: usize,
}

impl<K: PartialEq> Bucket<K> {
    fn capped(cap: usize) -> Self {
        Self {
            last: None,
            kept: 0,
            cap,
        }
    }

    fn unbounded() -> Self {
        Self::capped(usize::MAX)
    }

    /// Returns true if `key` opens a new bucket and the cap allows keeping it.
    fn offer(&mut self, key: K) -> bool {
        if self.kept >= self.cap || self.last.as_ref() == Some(&key) {
            return false;
        }
        self.last = Some(key);
        self.kept += 1;
        true
    }
}

/// Marks each snapshot retained or not under `policy`.
///
/// The result is sorted youngest first.
pub fn implement_policy<T: Dated>(snapshots: Vec<T>, policy: RetentionPolicy) -> Vec<Marked<T>> {
    let mut marked: Vec<Marked<T>> = snapshots
        .into_iter()
        .map(|snapshot| {
            let calendar = Calendar::of(snapshot.created_at());
            Marked {
                snapshot,
                calendar,
                retain: false,
            }
        })
        .collect();
    marked.sort_by(|a, b| b.calendar.at.cmp(&a.calendar.at));

    let Some(youngest) = marked.first().map(|m| m.calendar) else {
        return marked;
    };

    match policy {
        RetentionPolicy::Standard => {
            let mut days = Bucket::capped(STANDARD_DAILIES);
            let mut weeks = Bucket::capped(STANDARD_WEEKLIES);
            let mut months = Bucket::capped(STANDARD_MONTHLIES);
            let mut years = Bucket::capped(STANDARD_YEARLIES);
            for m in &mut marked {
                // Every bucket sees every snapshot; no short-circuit.
                let day = days.offer(m.calendar.day_key());
                let week = weeks.offer(m.calendar.week_key());
                let month = months.offer(m.calendar.month_key());
                let year = years.offer(m.calendar.year_key());
                m.retain = day | week | month | year;
            }
        }
        RetentionPolicy::Weekly | RetentionPolicy::Fortnightly => {
            let mut days = Bucket::capped(policy.capacity());
            for m in &mut marked {
                m.retain = days.offer(m.calendar.day_key());
            }
        }
        RetentionPolicy::Biweekly => {
            let mut weeks = Bucket::capped(2);
            for m in &mut marked {
                m.retain = weeks.offer(m.calendar.week_key());
            }
        }
        RetentionPolicy::SemiMonthly => {
            // Weeklies only come from weeks no kept daily already covers,
            // so the total reaches the cap regardless of weekday alignment.
            let mut days = Bucket::capped(SEMI_MONTHLY_DAILIES);
            let mut covered: BTreeSet<(i32, u32)> = BTreeSet::new();
            let mut kept = 0;
            for m in &mut marked {
                let week = m.calendar.week_key();
                m.retain = days.offer(m.calendar.day_key())
                    || (kept < policy.capacity() && !covered.contains(&week));
                if m.retain {
                    covered.insert(week);
                    kept += 1;
                }
            }
        }
        RetentionPolicy::Monthly => {
            let baseline = youngest
                .date
                .checked_sub_months(Months::new(1))
                .unwrap_or(youngest.date);
            let mut days = Bucket::unbounded();
            for m in &mut marked {
                m.retain = m.calendar.date > baseline && days.offer(m.calendar.day_key());
            }
        }
        RetentionPolicy::CurrentMonth => {
            let mut days = Bucket::unbounded();
            for m in &mut marked {
                m.retain = m.calendar.month_key() == youngest.month_key()
                    && days.offer(m.calendar.day_key());
            }
        }
        RetentionPolicy::Test => {
            for (ix, m) in marked.iter_mut().enumerate() {
                m.retain = ix < TEST_KEEP;
            }
        }
    }

    marked
}

/// Resolves a lifecycle tag value and marks the snapshots.
pub fn implement_named_policy<T: Dated>(
    snapshots: Vec<T>,
    policy_name: &str,
) -> Result<Vec<Marked<T>>, RetentionError> {
    let policy: RetentionPolicy = policy_name.parse()?;
    Ok(implement_policy(snapshots, policy))
}

/// Snapshots to delete under a named policy.
///
/// An unsupported policy name yields no deletions.
pub fn deletions_for<T: Dated>(snapshots: Vec<T>, policy_name: &str) -> Vec<T> {
    match implement_named_policy(snapshots, policy_name) {
        Ok(marked) => marked
            .into_iter()
            .filter(|m| !m.retain)
            .map(|m| m.snapshot)
            .collect(),
        Err(_) => Vec::new(),
    }
}
