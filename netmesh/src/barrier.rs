//! Start gate for the links of one round.
//!
//! Every link of a round arrives at the gate before issuing its client request. The last
//! arrival waits `release_delay` and opens the gate for everyone, so all tests of a round
//! start together and share the measurement window.

use std::time::Duration;

use log::debug;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default)]
struct GateState {
    arrived: usize,
    released: bool,
}

/// One-shot release barrier for `expected` participants
#[derive(Debug)]
pub struct ReleaseGate {
    expected: usize,
    delay: Duration,
    state: watch::Sender<GateState>,
}

impl ReleaseGate {
    pub fn new(expected: usize, delay: Duration) -> Self {
        Self {
            expected,
            delay,
            state: watch::Sender::new(GateState::default()),
        }
    }

    #[must_use]
    pub fn arrived(&self) -> usize {
        self.state.borrow().arrived
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }

    /// Open the gate now, whoever has arrived.
    pub fn release(&self) {
        self.state.send_modify(|s| s.released = true);
    }

    /// Register arrival and wait until the gate opens.
    pub async fn arrive(&self) {
        let mut rx = self.state.subscribe();

        let mut last = false;
        self.state.send_modify(|s| {
            s.arrived += 1;
            last = s.arrived >= self.expected;
        });

        if last {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            debug!(
                "All {} participant(s) arrived, releasing after {:?}",
                self.expected, self.delay
            );
            self.release();
        } else {
            // the sender lives in `self`, so this only ends on release
            let _ = rx.wait_for(|s| s.released).await;
        }
    }
}
