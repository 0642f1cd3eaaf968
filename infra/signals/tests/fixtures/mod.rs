use parking_lot::{Condvar, Mutex, RwLock};
use pulse_signals::{Context, Signal};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Polls `condition` every millisecond until it holds or [`WAIT_LIMIT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Shared log of listener invocations.
#[derive(Debug, Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self { seen: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn record(&self, value: T) {
        self.seen.lock().push(value);
    }

    #[must_use]
    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

/// A latch that blocks listeners until the test opens it.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn wait(&self) {
        let (open, condvar) = &*self.state;
        let mut open = open.lock();
        while !*open {
            condvar.wait(&mut open);
        }
    }

    pub fn open(&self) {
        let (open, condvar) = &*self.state;
        *open.lock() = true;
        condvar.notify_all();
    }
}

#[derive(Debug, thiserror::Error)]
#[error("listener {0} rejected the payload")]
pub struct Rejected(pub &'static str);

/// Adds, removes, emits and resets from `threads` threads at once.
///
/// Every successful change is booked in a ledger: adds before they happen,
/// removes after, so the registry can never hold more listeners than the
/// ledger. Resets and the periodic count checks take the ledger exclusively;
/// at those points the listener count must match it exactly.
pub fn churn<S: Signal<usize> + Sync>(signal: &S, threads: usize, rounds: usize) {
    let changes = RwLock::new(());
    let net = AtomicUsize::new(0);
    let generation = AtomicUsize::new(0);

    thread::scope(|scope| {
        for thread_id in 0..threads {
            let (changes, net, generation) = (&changes, &net, &generation);
            scope.spawn(move || {
                let mut owned: Vec<(String, usize)> = Vec::new();
                for round in 0..rounds {
                    match round % 6 {
                        0 | 1 => {
                            let _shared = changes.read();
                            let key = format!("{thread_id}-{round}");
                            net.fetch_add(1, Ordering::AcqRel);
                            if signal.add_keyed_listener(&key, |_, _| {}).is_ok() {
                                owned.push((key, generation.load(Ordering::Acquire)));
                            } else {
                                net.fetch_sub(1, Ordering::AcqRel);
                            }
                        },
                        2 => {
                            let _shared = changes.read();
                            // Keys added before the last reset are already gone.
                            if let Some((key, added_in)) = owned.pop()
                                && added_in == generation.load(Ordering::Acquire)
                            {
                                signal.remove_listener(&key);
                                net.fetch_sub(1, Ordering::AcqRel);
                            }
                        },
                        3 => {
                            let _shared = changes.read();
                            net.fetch_add(1, Ordering::AcqRel);
                            signal.add_listener(|_, _| {});
                        },
                        4 if round % 60 == 4 => {
                            let _exclusive = changes.write();
                            signal.reset();
                            net.store(0, Ordering::Release);
                            generation.fetch_add(1, Ordering::AcqRel);
                        },
                        _ => signal.emit(&Context::background(), &round),
                    }

                    if round % 10 == 9 {
                        let _exclusive = changes.write();
                        assert_eq!(signal.len(), net.load(Ordering::Acquire));
                    }
                }
            });
        }
    });

    assert_eq!(signal.len(), net.load(Ordering::Acquire));
}
