#![cfg(test)]

// Property tests for StableStore kept inside the crate so they can reach
// crate-private configuration and report types.

use crate::config::StoreConfig;
use crate::error::Error;
use crate::stable_store::{StableAddress, StableStore};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug)]
enum Op {
    Insert(u32),
    // Index into the live list, taken modulo its length.
    Erase(usize),
    EraseStale(usize),
    Get(usize),
    Iterate,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        3 => any::<u32>().prop_map(Op::Insert),
        2 => any::<usize>().prop_map(Op::Erase),
        1 => any::<usize>().prop_map(Op::EraseStale),
        1 => any::<usize>().prop_map(Op::Get),
        1 => Just(Op::Iterate),
    ];
    proptest::collection::vec(op, 1..120)
}

// Property: state-machine equivalence against a HashMap keyed by address.
// Invariants exercised across random operation sequences:
// - Every live address resolves to the value inserted at it, at the same
//   pointer, no matter how many segments were added or slots reused since.
// - `erase` hands back the inserted value exactly once; a second erase of
//   the same address is `InvalidAddress`, even if the slot was reused.
// - Stale addresses never resolve.
// - `for_each` visits exactly the live set; `len` matches the model.
// - Capacity never shrinks and slots are reused before the store grows.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        let config = StoreConfig { first_segment_capacity: 2, max_segment_capacity: 8 };
        let sut: StableStore<u32> = StableStore::with_config(config).unwrap();
        let mut model: HashMap<StableAddress<u32>, u32> = HashMap::new();
        let mut live: Vec<StableAddress<u32>> = Vec::new();
        let mut stale: Vec<StableAddress<u32>> = Vec::new();
        let mut capacity = 0;

        for op in ops {
            match op {
                Op::Insert(v) => {
                    let had_vacancy = sut.len() < sut.capacity();
                    let before = sut.capacity();
                    let a = sut.insert(v);
                    if had_vacancy {
                        prop_assert_eq!(sut.capacity(), before, "vacant slot must be reused");
                    }
                    prop_assert!(model.insert(a, v).is_none(), "fresh address must be unique");
                    live.push(a);
                }
                Op::Erase(i) => {
                    if live.is_empty() {
                        continue;
                    }
                    let a = live.swap_remove(i % live.len());
                    let v = sut.erase(a);
                    prop_assert_eq!(v, Ok(model.remove(&a).unwrap()));
                    stale.push(a);
                }
                Op::EraseStale(i) => {
                    if stale.is_empty() {
                        continue;
                    }
                    let a = stale[i % stale.len()];
                    prop_assert_eq!(sut.erase(a), Err(Error::InvalidAddress));
                }
                Op::Get(i) => {
                    if live.is_empty() {
                        continue;
                    }
                    let a = live[i % live.len()];
                    prop_assert_eq!(sut.with(a, |v| *v), Some(model[&a]));
                    let r = unsafe { sut.get(a) }.unwrap();
                    prop_assert_eq!(r as *const u32, a.as_ptr() as *const u32);
                }
                Op::Iterate => {
                    let mut seen = BTreeSet::new();
                    sut.for_each(|a, v| {
                        seen.insert((a.as_ptr() as usize, *v));
                    });
                    let expected: BTreeSet<_> =
                        model.iter().map(|(a, v)| (a.as_ptr() as usize, *v)).collect();
                    prop_assert_eq!(seen, expected);
                }
            }

            for &a in &stale {
                prop_assert!(!sut.contains(a));
                prop_assert!(sut.with(a, |_| ()).is_none());
            }
            for &a in &live {
                prop_assert!(sut.contains(a));
            }
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.is_empty(), model.is_empty());
            prop_assert!(sut.capacity() >= capacity);
            capacity = sut.capacity();
        }
    }
}
