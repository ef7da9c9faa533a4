//! The transmission cadence for each enabled `(netif, proto)` pair (§4.4).
//!
//! Every eligible pair fires immediately once on startup, then on a jittered cadence (±10% of the
//! configured interval, so that a fleet of identically configured hosts booted at the same moment
//! doesn't send bursts of frames in lockstep). The jitter source is a tiny xorshift PRNG seeded
//! from the pair's own key rather than a dependency on the `rand` crate: the jitter only needs to
//! avoid synchronized bursts, not to resist prediction.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::proto::Proto;

#[derive(Debug, Clone, Copy)]
struct Slot {
    next_at: Instant,
    /// Set once the pair has actually been handed to the parent for transmission; a goodbye is
    /// only owed to pairs that reached this state (§4.4, §8).
    ever_sent: bool,
    rng: u64,
}

/// Schedules transmissions for a changing set of `(ifindex, proto)` pairs on a fixed, jittered
/// cadence.
#[derive(Debug)]
pub struct TxScheduler {
    interval: Duration,
    slots: BTreeMap<(u32, Proto), Slot>,
}

impl TxScheduler {
    pub fn new(interval: Duration) -> Self {
        TxScheduler {
            interval,
            slots: BTreeMap::new(),
        }
    }

    /// Brings the schedule in line with the currently eligible `(ifindex, proto)` pairs: newly
    /// eligible pairs are scheduled to fire immediately (§4.4 "on startup... emits immediately");
    /// pairs no longer eligible (interface gone, protocol disabled) are dropped without a goodbye
    /// here — goodbyes are a shutdown-only concern, driven separately by [`TxScheduler::due_for_goodbye`].
    pub fn reconcile(&mut self, eligible: impl IntoIterator<Item = (u32, Proto)>, now: Instant) {
        let eligible: Vec<(u32, Proto)> = eligible.into_iter().collect();
        self.slots.retain(|key, _| eligible.contains(key));
        for key in eligible {
            self.slots.entry(key).or_insert_with(|| Slot {
                next_at: now,
                ever_sent: false,
                rng: seed(key),
            });
        }
    }

    /// Returns the pairs due to transmit at `now`, advancing each to its next jittered deadline
    /// and marking it as having been sent at least once.
    pub fn due(&mut self, now: Instant) -> Vec<(u32, Proto)> {
        let mut fired = Vec::new();
        for (&key, slot) in self.slots.iter_mut() {
            if slot.next_at <= now {
                fired.push(key);
                slot.ever_sent = true;
                slot.next_at = now + jittered(self.interval, &mut slot.rng);
            }
        }
        fired
    }

    /// The wait duration the event loop should pass to `poll(2)`: the time until the soonest
    /// deadline, capped at `cap` (§5: `min(next_tx_deadline - now, 1s)`).
    pub fn next_wait(&self, now: Instant, cap: Duration) -> Duration {
        self.slots
            .values()
            .map(|slot| slot.next_at.saturating_duration_since(now))
            .min()
            .unwrap_or(cap)
            .min(cap)
    }

    /// Every currently scheduled pair that has transmitted at least once, i.e. every pair owed
    /// exactly one goodbye frame on clean shutdown (§4.4, §8).
    pub fn due_for_goodbye(&self) -> Vec<(u32, Proto)> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.ever_sent)
            .map(|(&key, _)| key)
            .collect()
    }
}

fn seed(key: (u32, Proto)) -> u64 {
    let (ifindex, proto) = key;
    (ifindex as u64) << 8 | (proto as u8 as u64) | 1
}

/// xorshift64*, good enough for jitter: deterministic per-slot sequence, no external dependency.
fn next_rand(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

/// `base` jittered by up to ±10%, computed as integer nanoseconds to stay precise for small
/// intervals used in tests.
fn jittered(base: Duration, rng: &mut u64) -> Duration {
    let base_nanos = base.as_nanos() as i128;
    let span = base_nanos / 10; // ±10%
    if span == 0 {
        return base;
    }
    let r = (next_rand(rng) % (2 * span as u64 + 1)) as i128 - span;
    let nanos = (base_nanos + r).max(0) as u128;
    Duration::from_nanos(nanos as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newly_eligible_pair_is_due_immediately() {
        let mut sched = TxScheduler::new(Duration::from_secs(30));
        let now = Instant::now();
        sched.reconcile([(1, Proto::Lldp)], now);
        assert_eq!(sched.due(now), vec![(1, Proto::Lldp)]);
    }

    #[test]
    fn pair_is_not_due_again_until_next_jittered_deadline() {
        let mut sched = TxScheduler::new(Duration::from_secs(30));
        let now = Instant::now();
        sched.reconcile([(1, Proto::Lldp)], now);
        assert_eq!(sched.due(now).len(), 1);
        assert!(sched.due(now).is_empty());
        assert!(sched.due(now + Duration::from_secs(20)).is_empty());
        assert_eq!(sched.due(now + Duration::from_secs(40)).len(), 1);
    }

    #[test]
    fn jitter_stays_within_ten_percent_of_interval() {
        let mut rng = seed((1, Proto::Cdp));
        let base = Duration::from_secs(30);
        for _ in 0..100 {
            let d = jittered(base, &mut rng);
            assert!(d >= Duration::from_secs(27) && d <= Duration::from_secs(33), "{d:?}");
        }
    }

    #[test]
    fn removed_pair_drops_out_of_schedule() {
        let mut sched = TxScheduler::new(Duration::from_secs(30));
        let now = Instant::now();
        sched.reconcile([(1, Proto::Lldp), (2, Proto::Lldp)], now);
        sched.reconcile([(1, Proto::Lldp)], now);
        assert_eq!(sched.due(now + Duration::from_secs(40)), vec![(1, Proto::Lldp)]);
    }

    #[test]
    fn goodbye_owed_only_to_pairs_that_actually_transmitted() {
        let mut sched = TxScheduler::new(Duration::from_secs(30));
        let now = Instant::now();
        sched.reconcile([(1, Proto::Lldp), (2, Proto::Cdp)], now);
        sched.due(now); // (1, Lldp) due immediately
        assert_eq!(sched.due_for_goodbye(), vec![(1, Proto::Lldp)]);
    }

    #[test]
    fn next_wait_is_capped() {
        let mut sched = TxScheduler::new(Duration::from_secs(30));
        let now = Instant::now();
        sched.reconcile([(1, Proto::Lldp)], now);
        sched.due(now);
        assert_eq!(sched.next_wait(now, Duration::from_secs(1)), Duration::from_secs(1));
    }
}
