//! Property-based tests for table identity uniqueness

use gigsync::shared::entity::{Record, Trip};
use gigsync::store::TableData;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Add(Trip),
    Load(Vec<Trip>),
    Append(Vec<Trip>),
}

fn arb_trip() -> impl Strategy<Value = Trip> {
    (
        prop_oneof![Just("2024-01-01"), Just("2024-01-02")],
        prop_oneof![Just("Uber"), Just("Lyft"), Just("uber")],
        1u32..4,
    )
        .prop_map(|(date, service, number)| Trip::new(date, service, number))
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_trip().prop_map(Op::Add),
        1 => prop::collection::vec(arb_trip(), 0..6).prop_map(Op::Load),
        1 => prop::collection::vec(arb_trip(), 0..6).prop_map(Op::Append),
    ]
}

fn assert_unique(data: &TableData<Trip>) -> Result<(), TestCaseError> {
    let keys: HashSet<String> = data.iter().map(|t| t.identity_key()).collect();
    prop_assert_eq!(keys.len(), data.len());
    Ok(())
}

proptest! {
    #[test]
    fn test_trip_keys_stay_unique(ops in prop::collection::vec(arb_op(), 1..30)) {
        let mut data = TableData::<Trip>::default();
        for op in ops {
            let before = data.len();
            match op {
                Op::Add(trip) => {
                    let _ = data.insert(trip);
                }
                Op::Load(trips) => {
                    let _ = data.load(trips);
                }
                Op::Append(trips) => {
                    let size = trips.len();
                    match data.append(trips) {
                        Ok(ids) => prop_assert_eq!(data.len(), before + ids.len()),
                        Err(_) => prop_assert_eq!(data.len(), before),
                    }
                    prop_assert!(data.len() <= before + size);
                }
            }
            assert_unique(&data)?;
        }
    }

    #[test]
    fn test_ids_never_reused(count in 1usize..20, removed in 0usize..20) {
        let mut data = TableData::<Trip>::default();
        let mut seen = HashSet::new();
        for number in 0..count {
            let id = data.insert(Trip::new("2024-01-01", "Uber", number as u32)).unwrap();
            prop_assert!(seen.insert(id));
        }
        data.remove((removed % count) as u64 + 1);
        let id = data.insert(Trip::new("2024-01-02", "Uber", 0)).unwrap();
        prop_assert!(seen.insert(id));
    }
}
