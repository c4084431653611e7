use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MutexGuard};
use serde::{Deserialize, Serialize};

/// Longest a blocked thread sleeps on a condition variable before
/// re-checking its condition.
const BLOCK_SLICE: Duration = Duration::from_millis(50);
const SLEEP_SLICE: Duration = Duration::from_micros(100);

/// How producers wait for ring space and consumers wait for new items.
///
/// `Block` parks on a condition variable and uses no CPU while idle. The
/// other strategies release the lock and back off: `Sleep` briefly, `Yield`
/// to the scheduler, `Spin` in a busy loop. Lower latency costs more CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum WaitStrategy {
    #[default]
    Block,
    Sleep,
    Spin,
    Yield,
}

impl WaitStrategy {
    /// Wait once. The caller re-checks its condition afterwards.
    pub(crate) fn wait<T>(&self, condvar: &Condvar, guard: &mut MutexGuard<'_, T>) {
        match self {
            WaitStrategy::Block => {
                condvar.wait_for(guard, BLOCK_SLICE);
            }
            WaitStrategy::Sleep => MutexGuard::unlocked(guard, || thread::sleep(SLEEP_SLICE)),
            WaitStrategy::Yield => MutexGuard::unlocked(guard, thread::yield_now),
            WaitStrategy::Spin => MutexGuard::unlocked(guard, || {
                for _ in 0..64 {
                    std::hint::spin_loop();
                }
            }),
        }
    }

    /// Like [`wait`](Self::wait) but never past `deadline`.
    pub(crate) fn wait_until<T>(
        &self,
        condvar: &Condvar,
        guard: &mut MutexGuard<'_, T>,
        deadline: Instant,
    ) {
        match self {
            WaitStrategy::Block => {
                let now = Instant::now();
                if now < deadline {
                    condvar.wait_for(guard, (deadline - now).min(BLOCK_SLICE));
                }
            }
            other => other.wait(condvar, guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn block_wait_respects_deadline() {
        let lock = Mutex::new(());
        let condvar = Condvar::new();
        let mut guard = lock.lock();
        let started = Instant::now();
        WaitStrategy::Block.wait_until(&condvar, &mut guard, started + Duration::from_millis(5));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn backoff_strategies_release_the_lock() {
        let lock = Mutex::new(0u32);
        let condvar = Condvar::new();
        for strategy in [WaitStrategy::Sleep, WaitStrategy::Yield, WaitStrategy::Spin] {
            let mut guard = lock.lock();
            strategy.wait(&condvar, &mut guard);
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 3);
    }
}
