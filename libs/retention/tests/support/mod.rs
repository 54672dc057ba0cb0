//! Generated snapshot histories.

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use draco_retention::{Dated, Marked};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A DR snapshot as the lifecycle runner would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureSnapshot {
    pub id: String,
    pub arn: String,
    pub created_at: DateTime<Utc>,
}

impl Dated for FixtureSnapshot {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn snapshot_id(day: NaiveDate) -> String {
    format!("pgdracotest-{}-22-20", day.format("%Y-%m-%d"))
}

/// One snapshot per day ending on `end` (inclusive), oldest first.
///
/// Each is taken at 22:20 UTC give or take an hour, so jitter never moves
/// a snapshot to another day.
pub fn daily_series(end: NaiveDate, days: u32, seed: u64) -> Vec<FixtureSnapshot> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..days)
        .rev()
        .map(|ago| {
            let day = end - Duration::days(i64::from(ago));
            let jitter = Duration::minutes(rng.random_range(-60..=60));
            let at = Utc
                .from_utc_datetime(&day.and_hms_opt(22, 20, 0).unwrap())
                + jitter;
            let id = snapshot_id(day);
            FixtureSnapshot {
                arn: format!("arn:aws:rds:eu-west-2:166824542191:snapshot:{id}"),
                id,
                created_at: at,
            }
        })
        .collect()
}

/// Ids of the retained snapshots, youngest first.
pub fn kept_ids(marked: &[Marked<FixtureSnapshot>]) -> Vec<String> {
    marked
        .iter()
        .filter(|m| m.retain)
        .map(|m| m.snapshot.id.clone())
        .collect()
}
