use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use stagehand::domain::models::pattern;
use stagehand::domain::models::pipeline::aggregate_state;
use stagehand::domain::models::{Commit, CommitStatus, RateLimit, Stage, StatusState, ThrottleConfig};
use stagehand::services::throttle::compute_throttling;

fn state() -> impl Strategy<Value = StatusState> {
    prop_oneof![
        Just(StatusState::Error),
        Just(StatusState::Failure),
        Just(StatusState::Pending),
        Just(StatusState::Success),
        Just(StatusState::Unknown),
    ]
}

proptest! {
    /// Property: the most severe state wins, whatever the order
    #[test]
    fn prop_aggregate_state_precedence(states in prop::collection::vec(state(), 0..12)) {
        let aggregated = aggregate_state(states.iter().copied());

        let expected = if states.contains(&StatusState::Error) {
            StatusState::Error
        } else if states.contains(&StatusState::Failure) {
            StatusState::Failure
        } else if states.contains(&StatusState::Pending) {
            StatusState::Pending
        } else if !states.is_empty() && states.iter().all(|s| *s == StatusState::Success) {
            StatusState::Success
        } else {
            StatusState::Unknown
        };
        prop_assert_eq!(aggregated, expected);

        let reversed = aggregate_state(states.iter().rev().copied());
        prop_assert_eq!(reversed, aggregated);
    }

    /// Property: trimming a context twice changes nothing
    #[test]
    fn prop_trim_context_idempotent(
        context in "[a-z/_-]{0,24}",
        prefixes in prop::collection::vec("[a-z]{1,4}", 0..3),
    ) {
        let stage = Stage::new("test", vec![]).with_trim_prefixes(prefixes);

        let once = stage.trim_context(&context);
        let twice = stage.trim_context(&once);
        prop_assert_eq!(&twice, &once);
        prop_assert!(!once.starts_with(['-', '/', '_']));
    }

    /// Property: the throttling delay never outlasts the quota window
    #[test]
    fn prop_throttle_delay_bounded(
        limit in 1u64..10_000,
        used in 0u64..10_000,
        reset_in in -600i64..7_200,
        threshold in 0.0f64..0.5,
    ) {
        let now = Utc.with_ymd_and_hms(2016, 8, 3, 12, 0, 0).unwrap();
        let rate = RateLimit {
            limit,
            remaining: limit.saturating_sub(used),
            reset_at: now + Duration::seconds(reset_in),
        };
        let config = ThrottleConfig { threshold, window_secs: 3600 };

        let delay = compute_throttling(now, &rate, &config);

        let time_left = u64::try_from(reset_in.clamp(0, 3600)).unwrap();
        prop_assert!(delay.as_secs_f64() <= time_left as f64 + 1e-6);
        #[allow(clippy::cast_precision_loss)]
        let remaining_fraction = rate.remaining as f64 / limit as f64;
        if remaining_fraction <= threshold {
            prop_assert_eq!(delay.as_secs(), 0);
        }
    }

    /// Property: an item excluded by name is never matched
    #[test]
    fn prop_exclusion_wins(item in "[a-z][a-z0-9/]{0,16}") {
        prop_assert!(pattern::matches(&item, &["*"]));
        let exclusion = format!("-{item}");
        prop_assert!(!pattern::matches(&item, &["*", exclusion.as_str()]));
    }

    /// Property: the newest status of a context is kept, whatever the
    /// order statuses arrive in
    #[test]
    fn prop_newest_status_wins(minutes in prop::collection::btree_set(0i64..1_000, 1..8)) {
        let base = Utc.with_ymd_and_hms(2016, 8, 3, 0, 0, 0).unwrap();
        let statuses: Vec<CommitStatus> = minutes
            .iter()
            .map(|m| {
                CommitStatus::new("units", StatusState::Pending)
                    .with_description(format!("#{m} running"))
                    .at(base + Duration::minutes(*m))
            })
            .collect();
        let newest = minutes.iter().max().copied().unwrap_or_default();

        let mut forward = Commit::new("cafed0d0");
        forward.process_statuses(statuses.iter().cloned());
        let mut backward = Commit::new("cafed0d0");
        backward.process_statuses(statuses.iter().rev().cloned());

        let expected = format!("#{newest} running");
        prop_assert_eq!(forward.statuses["units"].description(), expected.as_str());
        prop_assert_eq!(backward.statuses["units"].description(), expected.as_str());
    }
}
