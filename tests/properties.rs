use std::pin::pin;
use std::ptr::NonNull;
use std::time::Duration;

use life_lock::{LifetimeLock, Strong, WaitPolicy, Weak};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    DeriveWeak,
    DeriveStrong,
    Upgrade(usize),
    CloneStrong(usize),
    DropStrong(usize),
    DropWeak(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::DeriveWeak),
        Just(Op::DeriveStrong),
        any::<usize>().prop_map(Op::Upgrade),
        any::<usize>().prop_map(Op::CloneStrong),
        any::<usize>().prop_map(Op::DropStrong),
        any::<usize>().prop_map(Op::DropWeak),
    ]
}

proptest! {
    #[test]
    fn count_tracks_live_strong_handles(ops in proptest::collection::vec(op(), 0..64)) {
        let value = 11_u32;
        let mut lock = pin!(LifetimeLock::new());
        unsafe { lock.as_mut().attach(NonNull::from(&value)) };

        let mut strongs: Vec<Strong<u32>> = Vec::new();
        let mut weaks: Vec<Weak<u32>> = Vec::new();

        for op in ops {
            match op {
                Op::DeriveWeak => weaks.push(unsafe { lock.derive_weak(NonNull::from(&value)) }),
                Op::DeriveStrong => {
                    strongs.push(unsafe { lock.derive_strong(NonNull::from(&value)) }.unwrap())
                }
                Op::Upgrade(i) if !weaks.is_empty() => {
                    let strong = weaks[i % weaks.len()].upgrade();
                    prop_assert!(strong.is_some());
                    strongs.extend(strong);
                }
                Op::CloneStrong(i) if !strongs.is_empty() => {
                    let strong = strongs[i % strongs.len()].clone();
                    strongs.push(strong);
                }
                Op::DropStrong(i) if !strongs.is_empty() => {
                    let len = strongs.len();
                    strongs.swap_remove(i % len);
                }
                Op::DropWeak(i) if !weaks.is_empty() => {
                    let len = weaks.len();
                    weaks.swap_remove(i % len);
                }
                _ => {}
            }
            prop_assert_eq!(lock.strong_count(), strongs.len() + 1);
        }

        prop_assert!(strongs.iter().all(|s| **s == 11));
        strongs.clear();
        lock.as_mut().destroy();
        prop_assert!(weaks.iter().all(|w| w.upgrade().is_none()));
    }

    #[test]
    fn backoff_never_exceeds_cap(start_us in 1_u64..1_000, cap_us in 1_u64..100_000) {
        let policy = WaitPolicy::new()
            .backoff(Duration::from_micros(start_us), Duration::from_micros(cap_us));
        let cap = policy.backoff_cap();

        let schedule: Vec<_> = policy.backoff_schedule().take(40).collect();
        prop_assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        prop_assert!(schedule.iter().all(|pause| *pause <= cap));
        prop_assert_eq!(schedule.last().copied(), Some(cap));
    }
}
