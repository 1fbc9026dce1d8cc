//! End-to-end scenarios exercising the scheduler, finish scopes,
//! isolation, and the mailbox/selector layer together rather than each
//! module in isolation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crt::conveyor::LoopbackConveyor;
use crt::selector::Selector;
use crt::{config, runtime, Runtime};

// `Runtime::init` reads `CRT_WORKERS` from the process environment, which
// is process-global; serialize every test that touches it so they don't
// stomp on each other under `cargo test`'s default thread-per-test model.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn init_with_workers(n: usize) -> Runtime {
    std::env::set_var(config::ENV_WORKERS, n.to_string());
    let runtime = Runtime::init().expect("runtime init");
    std::env::remove_var(config::ENV_WORKERS);
    runtime
}

#[test]
fn s1_one_million_spawns_increment_a_shared_counter_exactly_once_each() {
    let _guard = ENV_LOCK.lock().unwrap();
    let runtime = init_with_workers(4);

    let counter = Arc::new(AtomicU64::new(0));
    {
        let counter = counter.clone();
        runtime::finish(move || {
            for _ in 0..1_000_000u64 {
                let counter = counter.clone();
                runtime::spawn(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        });
    }

    assert_eq!(counter.load(Ordering::Relaxed), 1_000_000);
    runtime.finalize();
}

#[test]
fn s2_nested_finish_observes_every_grandchild_completion() {
    let _guard = ENV_LOCK.lock().unwrap();
    let runtime = init_with_workers(4);

    let completions = Arc::new(AtomicUsize::new(0));
    {
        let completions = completions.clone();
        runtime::finish(move || {
            for _ in 0..10 {
                let completions = completions.clone();
                runtime::spawn(move || {
                    completions.fetch_add(1, Ordering::Relaxed);
                    runtime::finish(|| {
                        for _ in 0..100 {
                            let completions = completions.clone();
                            runtime::spawn(move || {
                                completions.fetch_add(1, Ordering::Relaxed);
                            });
                        }
                    });
                });
            }
        });
    }

    // 10 outer child tasks + 10*100 grandchildren = 1,010.
    assert_eq!(completions.load(Ordering::Relaxed), 1_010);
    runtime.finalize();
}

#[test]
fn s3_isolation_stress_every_address_sum_matches_its_update_count() {
    let _guard = ENV_LOCK.lock().unwrap();
    let runtime = init_with_workers(8);

    const NUM_ADDRS: usize = 64;
    for addr in 0..NUM_ADDRS {
        runtime::enable_isolation(addr);
    }

    let sums: Arc<Vec<AtomicU64>> = Arc::new((0..NUM_ADDRS).map(|_| AtomicU64::new(0)).collect());
    let expected: Arc<Vec<AtomicU64>> =
        Arc::new((0..NUM_ADDRS).map(|_| AtomicU64::new(0)).collect());

    runtime::finish(|| {
        for t in 0..10_000u64 {
            let sums = sums.clone();
            let expected = expected.clone();
            runtime::spawn(move || {
                let mut state = 0x9E3779B97F4A7C15u64 ^ (t + 1);
                let mut next = move || {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    state
                };
                let mut addrs: Vec<usize> = (0..3).map(|_| (next() % NUM_ADDRS as u64) as usize).collect();
                addrs.sort_unstable();
                addrs.dedup();

                for &a in &addrs {
                    expected[a].fetch_add(1, Ordering::Relaxed);
                }
                runtime::isolated_execution(&addrs, || {
                    for &a in &addrs {
                        sums[a].fetch_add(1, Ordering::Relaxed);
                    }
                });
            });
        }
    });

    for addr in 0..NUM_ADDRS {
        assert_eq!(
            sums[addr].load(Ordering::Relaxed),
            expected[addr].load(Ordering::Relaxed),
            "address {} diverged",
            addr
        );
        runtime::disable_isolation(addr);
    }

    runtime.finalize();
}

#[test]
fn s5_deque_overflow_still_executes_every_spawned_task() {
    let _guard = ENV_LOCK.lock().unwrap();
    // A single worker with a small deque forces every spawn past the
    // first 16 to overflow into the warn-and-execute-inline path.
    std::env::set_var(config::ENV_WORKERS, "1");
    std::env::set_var(config::ENV_MM_ALLOC_BATCH_SIZE, "16");
    let runtime = Runtime::init().expect("runtime init");
    std::env::remove_var(config::ENV_WORKERS);
    std::env::remove_var(config::ENV_MM_ALLOC_BATCH_SIZE);

    let executed = Arc::new(AtomicUsize::new(0));
    {
        let executed = executed.clone();
        runtime::finish(move || {
            for _ in 0..64 {
                let executed = executed.clone();
                runtime::spawn(move || {
                    executed.fetch_add(1, Ordering::Relaxed);
                });
            }
        });
    }

    assert_eq!(executed.load(Ordering::Relaxed), 64);
    runtime.finalize();
}

#[test]
fn s6_stats_report_matches_the_fixed_schema_and_steals_never_exceed_pushes() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var(config::ENV_STATS, "1");
    let runtime = init_with_workers(4);

    runtime::finish(|| {
        for _ in 0..1_000 {
            runtime::spawn(|| {});
        }
    });

    // `finalize` logs the stats report; re-derive it directly to check the
    // schema without needing a log capture harness.
    let report = runtime.master().scheduler.stats.report(std::time::Instant::now());
    let mut lines = report.lines();
    assert_eq!(
        lines.next().unwrap(),
        "time.mu\ttotalPushOutDeq\ttotalPushInDeq\ttotalStealsInDeq"
    );

    let fields: Vec<&str> = lines.next().unwrap().split('\t').collect();
    assert_eq!(fields.len(), 4, "expected time/pushOut/pushIn/steals");
    fields[0].parse::<f64>().expect("elapsed time is numeric");
    for field in &fields[1..] {
        field.parse::<u64>().expect("every counter is numeric");
    }
    assert!(lines.next().is_none());

    let push_in: u64 = fields[2].parse().unwrap();
    let steals: u64 = fields[3].parse().unwrap();
    assert!(steals <= push_in);

    std::env::remove_var(config::ENV_STATS);
    runtime.finalize();
}

#[test]
fn selector_completion_chain_delivers_every_payload_and_terminates_all_mailboxes() {
    // The conveyor is an opaque, bring-your-own transport (this crate
    // only ships an in-process loopback double), so "destination rank"
    // routing across mailboxes isn't meaningful here -- this instead
    // checks the two properties that don't depend on a real transport:
    // FIFO delivery within one mailbox, and that a single `done(0)`
    // call still terminates both mailboxes' worker loops.
    let selector: Arc<Selector<u64>> = Arc::new(Selector::new(2));
    let received: Arc<Vec<Mutex<Vec<u64>>>> =
        Arc::new((0..2).map(|_| Mutex::new(Vec::new())).collect());

    let handles = selector.start(
        |_| LoopbackConveyor::new(),
        {
            let received = received.clone();
            move |id| {
                let received = received.clone();
                move |payload: u64, _rank: i64| {
                    received[id].lock().unwrap().push(payload);
                }
            }
        },
    );

    const N: u64 = 2_000;
    for i in 0..N {
        selector.send(0, i, 0);
    }
    selector.done(0);
    selector.join(handles);

    let seen: HashSet<u64> = received[0].lock().unwrap().iter().copied().collect();
    assert_eq!(seen.len(), N as usize, "every payload observed exactly once");
    assert_eq!(received[0].lock().unwrap().as_slice(), (0..N).collect::<Vec<_>>().as_slice());
}
