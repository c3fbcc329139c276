#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, TimeDelta, Utc, Weekday};
use gymstreak_core::config::EngineConfig;
use gymstreak_core::week::WeekWindow;
use proptest::prelude::*;

/// Monday 2026-01-05T00:00Z.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_571_200, 0).expect("valid epoch")
}

pub fn arb_weekday() -> impl Strategy<Value = Weekday> + Clone {
    prop_oneof![
        Just(Weekday::Mon),
        Just(Weekday::Tue),
        Just(Weekday::Wed),
        Just(Weekday::Thu),
        Just(Weekday::Fri),
        Just(Weekday::Sat),
        Just(Weekday::Sun),
    ]
}

/// Offsets from UTC-12:00 to UTC+14:00 in quarter hours.
pub fn arb_offset_minutes() -> impl Strategy<Value = i32> + Clone {
    (-48i32..=56).prop_map(|quarters| quarters * 15)
}

pub fn arb_window() -> impl Strategy<Value = WeekWindow> + Clone {
    (arb_weekday(), arb_offset_minutes()).prop_map(|(weekday, minutes)| {
        let offset = FixedOffset::east_opt(minutes * 60).expect("offset within a day");
        WeekWindow::new(weekday, offset)
    })
}

pub fn arb_config() -> impl Strategy<Value = EngineConfig> + Clone {
    (1u32..=5, arb_weekday(), arb_offset_minutes()).prop_map(|(threshold, weekday, minutes)| {
        let mut config = EngineConfig::default();
        config.streak.threshold = threshold;
        config.streak.week_start = weekday;
        config.streak.utc_offset_minutes = minutes;
        config
    })
}

/// Gap between consecutive check-ins: mostly same-day or next-day visits,
/// sometimes a quiet stretch inside the week, occasionally whole weeks off.
pub fn arb_gap() -> impl Strategy<Value = TimeDelta> + Clone {
    prop_oneof![
        6 => (0i64..36 * 60).prop_map(TimeDelta::minutes),
        2 => (36 * 60i64..7 * 24 * 60).prop_map(TimeDelta::minutes),
        1 => (7 * 24 * 60i64..22 * 24 * 60).prop_map(TimeDelta::minutes),
    ]
}

/// Non-decreasing check-in instants.
pub fn arb_timeline(max_events: usize) -> impl Strategy<Value = Vec<DateTime<Utc>>> + Clone {
    (0i64..14 * 24 * 60, prop::collection::vec(arb_gap(), 1..max_events)).prop_map(
        |(lead, gaps)| {
            let mut at = epoch() + TimeDelta::minutes(lead);
            gaps.into_iter()
                .map(|gap| {
                    at += gap;
                    at
                })
                .collect()
        },
    )
}

/// The same instants in arbitrary arrival order.
pub fn arb_shuffled_timeline(max_events: usize) -> impl Strategy<Value = Vec<DateTime<Utc>>> {
    arb_timeline(max_events).prop_flat_map(|timeline| Just(timeline).prop_shuffle())
}

pub fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> + Clone {
    (-400i64 * 24 * 60..400 * 24 * 60).prop_map(|minutes| epoch() + TimeDelta::minutes(minutes))
}
