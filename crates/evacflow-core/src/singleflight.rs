//! Collapses concurrent computations for the same key into one.
//!
//! The first caller for a key becomes the leader and runs the computation.
//! Callers arriving while it runs wait for the leader's value, up to their
//! own deadline. A follower whose wait runs out, or whose leader panicked,
//! computes the value itself. Correctness never depends on the collapse,
//! only the amount of work does.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
enum State<V> {
    Running,
    Done(V),
    /// The leader unwound before publishing.
    Abandoned,
}

#[derive(Debug)]
struct Flight<V> {
    state: Mutex<State<V>>,
    done: Condvar,
    waiting: AtomicUsize,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::Running),
            done: Condvar::new(),
            waiting: AtomicUsize::new(0),
        }
    }
}

/// How a call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the computation and published it.
    Leader,
    /// Received the leader's value.
    Follower,
    /// Ran the computation without publishing, after a timeout or a failed
    /// leader.
    Independent,
}

#[derive(Debug)]
pub struct SingleFlight<K, V> {
    flights: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Callers currently parked on the computation for `key`.
    pub fn waiting(&self, key: &K) -> usize {
        self.flights
            .lock()
            .get(key)
            .map_or(0, |f| f.waiting.load(Ordering::SeqCst))
    }

    /// Run `f` for `key`, or wait up to `wait` for a running leader.
    pub fn run<F>(&self, key: K, wait: Duration, f: F) -> (V, Role)
    where
        F: FnOnce() -> V,
    {
        let (flight, leader) = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.clone(), flight.clone());
                    (flight, true)
                }
            }
        };

        if leader {
            let guard = LeaderGuard {
                owner: self,
                key,
                flight,
                published: false,
            };
            let value = f();
            guard.publish(value.clone());
            return (value, Role::Leader);
        }

        flight.waiting.fetch_add(1, Ordering::SeqCst);
        let joined = wait_for(&flight, wait);
        flight.waiting.fetch_sub(1, Ordering::SeqCst);
        match joined {
            Some(value) => (value, Role::Follower),
            None => (f(), Role::Independent),
        }
    }

    /// Like [`run`](Self::run), for callers that cannot block: joins nothing,
    /// but still leads when no one else is computing the key.
    pub fn run_nowait<F>(&self, key: K, f: F) -> (V, Role)
    where
        F: FnOnce() -> V,
    {
        self.run(key, Duration::ZERO, f)
    }

    fn finish(&self, key: &K, flight: &Arc<Flight<V>>) {
        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            flights.remove(key);
        }
    }
}

/// Block until the flight publishes or `wait` elapses. `None` means the
/// caller has to compute for itself.
fn wait_for<V: Clone>(flight: &Flight<V>, wait: Duration) -> Option<V> {
    let deadline = Instant::now().checked_add(wait);
    let mut state = flight.state.lock();
    loop {
        match &*state {
            State::Done(value) => return Some(value.clone()),
            State::Abandoned => return None,
            State::Running => {}
        }
        match deadline {
            Some(deadline) => {
                if flight.done.wait_until(&mut state, deadline).timed_out() {
                    return match &*state {
                        State::Done(value) => Some(value.clone()),
                        _ => None,
                    };
                }
            }
            None => flight.done.wait(&mut state),
        }
    }
}

/// Publishes the leader's value, or marks the flight abandoned if the
/// leader unwinds first.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    owner: &'a SingleFlight<K, V>,
    key: K,
    flight: Arc<Flight<V>>,
    published: bool,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn publish(mut self, value: V) {
        *self.flight.state.lock() = State::Done(value);
        self.published = true;
        self.flight.done.notify_all();
        self.owner.finish(&self.key, &self.flight);
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if self.published {
            return;
        }
        *self.flight.state.lock() = State::Abandoned;
        self.flight.done.notify_all();
        self.owner.finish(&self.key, &self.flight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn until_waiting<K: Eq + Hash + Clone, V: Clone>(sf: &SingleFlight<K, V>, key: &K) {
        while sf.waiting(key) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn single_caller_leads() {
        let sf: SingleFlight<&str, u32> = SingleFlight::new();
        let (v, role) = sf.run("k", Duration::from_secs(1), || 7);
        assert_eq!((v, role), (7, Role::Leader));
        assert_eq!(sf.in_flight(), 0);
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let sf = Arc::new(SingleFlight::<String, u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let leader = {
            let (sf, calls, started, release) =
                (sf.clone(), calls.clone(), started.clone(), release.clone());
            thread::spawn(move || {
                sf.run("key".to_string(), Duration::from_secs(5), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    started.wait();
                    release.wait();
                    42
                })
            })
        };

        started.wait();
        let follower = {
            let (sf, calls) = (sf.clone(), calls.clone());
            thread::spawn(move || {
                sf.run("key".to_string(), Duration::from_secs(5), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    0
                })
            })
        };
        until_waiting(&sf, &"key".to_string());
        release.wait();

        assert_eq!(leader.join().unwrap(), (42, Role::Leader));
        assert_eq!(follower.join().unwrap(), (42, Role::Follower));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_keys_do_not_wait() {
        let sf = Arc::new(SingleFlight::<u32, u32>::new());
        let gate = Arc::new(Barrier::new(2));
        let slow = {
            let (sf, gate) = (sf.clone(), gate.clone());
            thread::spawn(move || {
                sf.run(1, Duration::from_secs(5), || {
                    gate.wait();
                    1
                })
            })
        };
        // Completes while key 1 is still blocked on the gate.
        let (v, role) = sf.run(2, Duration::from_secs(5), || 2);
        assert_eq!((v, role), (2, Role::Leader));
        gate.wait();
        assert_eq!(slow.join().unwrap().0, 1);
    }

    #[test]
    fn follower_timeout_computes_independently() {
        let sf = Arc::new(SingleFlight::<u32, u32>::new());
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let leader = {
            let (sf, started, release) = (sf.clone(), started.clone(), release.clone());
            thread::spawn(move || {
                sf.run(1, Duration::from_secs(5), || {
                    started.wait();
                    release.wait();
                    10
                })
            })
        };
        started.wait();
        let (v, role) = sf.run(1, Duration::from_millis(10), || 20);
        assert_eq!((v, role), (20, Role::Independent));
        let (v, role) = sf.run_nowait(1, || 30);
        assert_eq!((v, role), (30, Role::Independent));
        release.wait();
        assert_eq!(leader.join().unwrap(), (10, Role::Leader));
    }

    #[test]
    fn panicking_leader_releases_followers() {
        let sf = Arc::new(SingleFlight::<u32, u32>::new());
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let leader = {
            let (sf, started, release) = (sf.clone(), started.clone(), release.clone());
            thread::spawn(move || {
                sf.run(1, Duration::from_secs(5), || -> u32 {
                    started.wait();
                    release.wait();
                    panic!("leader failed");
                })
            })
        };
        started.wait();
        let follower = {
            let sf = sf.clone();
            thread::spawn(move || sf.run(1, Duration::from_secs(5), || 99))
        };
        until_waiting(&sf, &1);
        release.wait();

        assert!(leader.join().is_err());
        assert_eq!(follower.join().unwrap(), (99, Role::Independent));
        assert_eq!(sf.in_flight(), 0);
    }
}
