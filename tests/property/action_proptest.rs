//! Property-based tests for the action state machine

use chrono::{TimeZone, Utc};
use gigsync::shared::action::{clear_action, update_action, Action, ActionRecord};
use gigsync::shared::entity::Trip;
use proptest::prelude::*;

fn requested_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::None),
        Just(Action::Add),
        Just(Action::Update),
        Just(Action::Delete),
    ]
}

fn start(synced: bool) -> Trip {
    let mut trip = Trip::new("2024-01-01", "Uber", 1);
    if synced {
        clear_action(&mut trip, Utc.timestamp_opt(0, 0).unwrap());
    }
    trip
}

proptest! {
    #[test]
    fn test_pending_add_never_becomes_update(
        requests in prop::collection::vec(requested_action(), 0..40)
    ) {
        let mut trip = start(false);
        for (step, requested) in requests.into_iter().enumerate() {
            let before = trip.action();
            update_action(&mut trip, requested, Utc.timestamp_opt(step as i64 + 1, 0).unwrap());
            if before == Action::Add && requested != Action::None {
                prop_assert_eq!(trip.action(), Action::Add);
            }
            prop_assert_ne!((before, trip.action()), (Action::Add, Action::Update));
        }
    }

    #[test]
    fn test_saved_tracks_action(
        synced in any::<bool>(),
        requests in prop::collection::vec(requested_action(), 0..40)
    ) {
        let mut trip = start(synced);
        for (step, requested) in requests.into_iter().enumerate() {
            update_action(&mut trip, requested, Utc.timestamp_opt(step as i64 + 1, 0).unwrap());
            prop_assert_eq!(trip.saved(), trip.action() == Action::None);
        }
    }

    #[test]
    fn test_delete_is_terminal_until_cleared(
        requests in prop::collection::vec(
            prop_oneof![Just(Action::Add), Just(Action::Update), Just(Action::Delete)],
            0..20
        )
    ) {
        let mut trip = start(true);
        update_action(&mut trip, Action::Delete, Utc.timestamp_opt(1, 0).unwrap());
        for requested in requests {
            prop_assert!(!update_action(&mut trip, requested, Utc.timestamp_opt(2, 0).unwrap()));
            prop_assert_eq!(trip.action(), Action::Delete);
        }
    }

    #[test]
    fn test_clear_action_is_idempotent(
        synced in any::<bool>(),
        requests in prop::collection::vec(requested_action(), 0..10),
        secs in 0i64..1_000_000
    ) {
        let mut trip = start(synced);
        for requested in requests {
            update_action(&mut trip, requested, Utc.timestamp_opt(1, 0).unwrap());
        }
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        clear_action(&mut trip, at);
        let once = trip.clone();
        clear_action(&mut trip, at);
        prop_assert_eq!(trip, once);
    }
}
