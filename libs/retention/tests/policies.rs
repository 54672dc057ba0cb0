//! Per-policy retention scenarios over generated daily histories.

mod support;

use draco_retention::{implement_named_policy, implement_policy, RetentionError, RetentionPolicy};
use rstest::rstest;
use support::{daily_series, date, kept_ids, snapshot_id};

/// Sunday 2020-06-14, 65 days of history.
fn june_sample() -> Vec<support::FixtureSnapshot> {
    daily_series(date(2020, 6, 14), 65, 7)
}

#[rstest]
#[case::weekly(RetentionPolicy::Weekly, 7)]
#[case::fortnightly(RetentionPolicy::Fortnightly, 14)]
#[case::biweekly(RetentionPolicy::Biweekly, 2)]
#[case::semi_monthly(RetentionPolicy::SemiMonthly, 16)]
#[case::test(RetentionPolicy::Test, 3)]
#[case::current_month(RetentionPolicy::CurrentMonth, 14)]
#[case::monthly(RetentionPolicy::Monthly, 31)]
fn test_retained_count(#[case] policy: RetentionPolicy, #[case] expected: usize) {
    let marked = implement_policy(june_sample(), policy);
    assert_eq!(marked.len(), 65);
    assert_eq!(kept_ids(&marked).len(), expected, "policy {policy}");
}

#[test]
fn test_weekly_keeps_last_seven_days() {
    let kept = kept_ids(&implement_policy(june_sample(), RetentionPolicy::Weekly));
    let expected: Vec<String> = (8..=14).rev().map(|d| snapshot_id(date(2020, 6, d))).collect();
    assert_eq!(kept, expected);
}

#[test]
fn test_biweekly_keeps_consecutive_weeks() {
    let marked = implement_policy(june_sample(), RetentionPolicy::Biweekly);
    let kept: Vec<_> = marked.iter().filter(|m| m.retain).collect();

    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].calendar.week, kept[1].calendar.week + 1);
    assert_eq!(kept[0].snapshot.id, snapshot_id(date(2020, 6, 14)));
    assert_eq!(kept[1].snapshot.id, snapshot_id(date(2020, 6, 7)));
}

#[rstest]
#[case::sunday(14)]
#[case::monday(15)]
#[case::tuesday(16)]
#[case::wednesday(17)]
#[case::thursday(18)]
#[case::friday(19)]
#[case::saturday(20)]
fn test_semi_monthly_keeps_sixteen_on_any_weekday(#[case] day: u32) {
    let history = daily_series(date(2020, 6, day), 65, 7);
    let kept = kept_ids(&implement_policy(history, RetentionPolicy::SemiMonthly));
    assert_eq!(kept.len(), 16, "ending 2020-06-{day}");
}

#[test]
fn test_semi_monthly_midweek_skips_covered_weeks() {
    let history = daily_series(date(2020, 6, 17), 65, 7);
    let kept = kept_ids(&implement_policy(history, RetentionPolicy::SemiMonthly));

    // Dailies reach back to Thursday 2020-06-04, whose week is already kept.
    let mut expected: Vec<String> = (4..=17).rev().map(|d| snapshot_id(date(2020, 6, d))).collect();
    expected.push(snapshot_id(date(2020, 5, 31)));
    expected.push(snapshot_id(date(2020, 5, 24)));
    assert_eq!(kept, expected);
}

#[test]
fn test_semi_monthly_dailies_then_weeklies() {
    let kept = kept_ids(&implement_policy(june_sample(), RetentionPolicy::SemiMonthly));

    let mut expected: Vec<String> = (1..=14).rev().map(|d| snapshot_id(date(2020, 6, d))).collect();
    expected.push(snapshot_id(date(2020, 5, 31)));
    expected.push(snapshot_id(date(2020, 5, 24)));
    assert_eq!(kept, expected);
}

#[test]
fn test_standard_over_one_month() {
    let history = daily_series(date(2021, 6, 30), 30, 11);
    let kept = kept_ids(&implement_policy(history, RetentionPolicy::Standard));

    let expected: Vec<String> = [30, 29, 28, 27, 26, 25, 24, 20, 13, 6]
        .into_iter()
        .map(|d| snapshot_id(date(2021, 6, d)))
        .collect();
    assert_eq!(kept, expected);
}

#[test]
fn test_standard_over_two_years() {
    let history = daily_series(date(2021, 6, 30), 731, 3);
    let kept = kept_ids(&implement_policy(history, RetentionPolicy::Standard));

    assert_eq!(kept.len(), 22);
    // Month ends for the trailing year.
    for (y, m, d) in [(2021, 5, 31), (2021, 2, 28), (2020, 12, 31), (2020, 7, 31)] {
        assert!(kept.contains(&snapshot_id(date(y, m, d))), "{y}-{m}-{d}");
    }
    // Thirteenth month is out; the 2019 yearly survives.
    assert!(!kept.contains(&snapshot_id(date(2020, 6, 30))));
    assert!(kept.contains(&snapshot_id(date(2019, 12, 31))));
}

#[test]
fn test_monthly_leap_february() {
    let history = daily_series(date(2020, 2, 29), 29, 5);
    let marked = implement_policy(history, RetentionPolicy::Monthly);
    assert_eq!(kept_ids(&marked).len(), 29);
}

#[test]
fn test_monthly_trails_one_calendar_month() {
    let history = daily_series(date(2021, 3, 31), 90, 13);
    let kept = kept_ids(&implement_policy(history, RetentionPolicy::Monthly));

    // Baseline clamps to 2021-02-28; March only.
    assert_eq!(kept.len(), 31);
    assert_eq!(kept.last(), Some(&snapshot_id(date(2021, 3, 1))));
}

#[test]
fn test_current_month_stops_at_month_start() {
    let kept = kept_ids(&implement_policy(june_sample(), RetentionPolicy::CurrentMonth));
    assert_eq!(kept.first(), Some(&snapshot_id(date(2020, 6, 14))));
    assert_eq!(kept.last(), Some(&snapshot_id(date(2020, 6, 1))));
}

#[test]
fn test_test_policy_with_short_history() {
    let history = daily_series(date(2020, 6, 14), 2, 1);
    assert_eq!(kept_ids(&implement_policy(history, RetentionPolicy::Test)).len(), 2);
}

#[test]
fn test_named_policy_unsupported() {
    let err = implement_named_policy(june_sample(), "Quarterly").unwrap_err();
    assert_eq!(err, RetentionError::UnsupportedPolicy("Quarterly".to_string()));
}
