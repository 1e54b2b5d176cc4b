//! The miner's pause barrier (§4.7, §9 REDESIGN FLAG: "re-model it with a
//! condition variable... so that `pause()` and `resume()` cannot race").
//!
//! The original "barrier mutex" pattern (take it to block, release it to
//! let the miner through) is expressed here as a boolean guarded by a
//! condvar: `pause()` sets the flag and wakes nobody (there is nothing to
//! wake — the miner only ever waits), `resume()` clears it and notifies.

use parking_lot::{Condvar, Mutex};

/// A gate the mining loop blocks on while paused. Safe to call `pause()`
/// and `resume()` from any thread (the command shell's `stopmining` /
/// `resumemining`); the miner thread only ever waits on it.
#[derive(Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// §4.7 step 1: "acquire the pause barrier... release it immediately".
    /// Blocks the calling thread for as long as the gate is paused.
    pub fn wait_while_paused(&self) {
        let mut guard = self.paused.lock();
        while *guard {
            self.cv.wait(&mut guard);
        }
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn resume_releases_a_waiting_thread() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                gate.wait_while_paused();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        gate.resume();
        waiter.join().unwrap();
    }

    #[test]
    fn unpaused_gate_does_not_block() {
        let gate = PauseGate::new();
        gate.wait_while_paused();
    }
}
