use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Run `probe` over every item with at most `workers` probes in flight
///
/// Each probe gets a hard `budget`. A probe that overruns it is reported as
/// `None`, but its worker stays occupied until the probe actually returns, so
/// a hung collaborator never sees more than `workers` concurrent calls. Items
/// still queued once every worker is stuck are reported as `None` when the
/// cycle runs out of time. Results come back in input order.
pub(crate) fn probe_all<T, R, F>(
    items: Vec<T>,
    workers: usize,
    budget: Duration,
    probe: F,
) -> Vec<(T, Option<R>)>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let queue = Arc::new(Mutex::new(
        items.iter().cloned().enumerate().collect::<VecDeque<_>>(),
    ));
    let probe = Arc::new(probe);
    let (result_tx, result_rx) = mpsc::channel();

    let worker_count = workers.max(1).min(total);
    debug!("Probing {} targets with {} workers", total, worker_count);

    for _ in 0..worker_count {
        let queue = Arc::clone(&queue);
        let probe = Arc::clone(&probe);
        let result_tx = result_tx.clone();
        thread::spawn(move || loop {
            let next = match queue.lock() {
                Ok(mut queue) => queue.pop_front(),
                Err(_) => None,
            };
            let Some((index, item)) = next else {
                break;
            };

            let (done_tx, done_rx) = mpsc::channel();
            let probe = Arc::clone(&probe);
            thread::spawn(move || {
                let _ = done_tx.send(probe(&item));
            });

            let (outcome, overran) = match done_rx.recv_timeout(budget) {
                Ok(result) => (Some(result), false),
                Err(_) => {
                    warn!("Probe {} exceeded its {:?} budget", index, budget);
                    (None, true)
                }
            };
            if result_tx.send((index, outcome)).is_err() {
                break;
            }
            if overran {
                // hold the slot until the abandoned call is over
                let _ = done_rx.recv();
            }
        });
    }
    drop(result_tx);

    let rounds = u32::try_from(total.div_ceil(worker_count)).unwrap_or(u32::MAX);
    let deadline = Instant::now() + budget.saturating_mul(rounds.saturating_add(1));
    let mut outcomes: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut settled = 0;
    let mut past_deadline = false;
    while settled < total {
        let wait = if past_deadline {
            budget
        } else {
            deadline.saturating_duration_since(Instant::now())
        };
        match result_rx.recv_timeout(wait) {
            Ok((index, outcome)) => {
                outcomes[index] = outcome;
                settled += 1;
            }
            Err(RecvTimeoutError::Timeout) if !past_deadline => {
                past_deadline = true;
                let stranded = match queue.lock() {
                    Ok(mut queue) => queue.drain(..).count(),
                    Err(poisoned) => poisoned.into_inner().drain(..).count(),
                };
                if stranded > 0 {
                    warn!(
                        "{} probes never started: all {} workers held by overrunning probes",
                        stranded, worker_count
                    );
                }
                settled += stranded;
            }
            Err(_) => break,
        }
    }

    items.into_iter().zip(outcomes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = probe_all(items, 4, Duration::from_secs(5), |n| {
            thread::sleep(Duration::from_millis(20 - *n));
            n * 2
        });
        assert_eq!(results.len(), 20);
        for (i, (item, outcome)) in results.iter().enumerate() {
            assert_eq!(*item, i as u64);
            assert_eq!(*outcome, Some(i as u64 * 2));
        }
    }

    #[test]
    fn test_slow_probe_is_abandoned_at_budget() {
        let started = Instant::now();
        let results = probe_all(vec![1u32, 2], 2, Duration::from_millis(100), |n| {
            if *n == 2 {
                thread::sleep(Duration::from_secs(3));
            }
            *n
        });
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(results[0].1, Some(1));
        assert_eq!(results[1].1, None);
    }

    #[test]
    fn test_in_flight_never_exceeds_workers() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        probe_all((0..12).collect::<Vec<u32>>(), 3, Duration::from_secs(5), move |_| {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            f.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_overrunning_probes_keep_their_worker_busy() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let started = Instant::now();
        let items: Vec<u32> = (0..6).collect();
        let results = probe_all(items, 2, Duration::from_millis(50), move |_| {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(800));
            f.fetch_sub(1, Ordering::SeqCst);
        });

        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, outcome)| outcome.is_none()));
        let order: Vec<u32> = results.iter().map(|(item, _)| *item).collect();
        assert_eq!(order, (0..6).collect::<Vec<_>>());

        // let the hung calls drain before checking the ceiling
        thread::sleep(Duration::from_millis(1_000));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_input() {
        let results: Vec<(u8, Option<u8>)> = probe_all(Vec::new(), 4, Duration::from_secs(1), |n| *n);
        assert!(results.is_empty());
    }
}
