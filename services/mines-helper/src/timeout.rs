//! Per-session inactivity timers.
//!
//! A timer is a sleeping task that reports an [`Expiry`] on the scheduler's channel. Every armed
//! timer gets a fresh generation number; the coordinator acts on an expiry only while the
//! session's current timer still carries that generation, so a timer that fired just before it
//! was cancelled or replaced is ignored.

use mines_types::SessionId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    /// Waiting for the player to pick a difficulty.
    Offer,
    /// Waiting for the next move in a running game.
    Turn,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutPhase::Offer => "offer",
            TimeoutPhase::Turn => "turn",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry {
    pub session_id: SessionId,
    pub generation: u64,
    pub phase: TimeoutPhase,
}

/// Handle to one armed timer. Dropping the handle does not cancel the timer.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    phase: TimeoutPhase,
    deadline: Instant,
    abort: AbortHandle,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> TimeoutPhase {
        self.phase
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }
}

#[derive(Clone)]
pub struct TimeoutScheduler {
    offer: Duration,
    turn: Duration,
    next_generation: Arc<AtomicU64>,
    expiries: mpsc::UnboundedSender<Expiry>,
}

impl TimeoutScheduler {
    pub fn new(offer: Duration, turn: Duration) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expiries, rx) = mpsc::unbounded_channel();
        (
            Self {
                offer,
                turn,
                next_generation: Arc::new(AtomicU64::new(1)),
                expiries,
            },
            rx,
        )
    }

    pub fn duration_for(&self, phase: TimeoutPhase) -> Duration {
        match phase {
            TimeoutPhase::Offer => self.offer,
            TimeoutPhase::Turn => self.turn,
        }
    }

    /// Arm a full-length timer for `session_id`. Must be called from within a tokio runtime.
    pub fn arm(&self, session_id: SessionId, phase: TimeoutPhase) -> TimerHandle {
        self.arm_until(session_id, phase, Instant::now() + self.duration_for(phase))
    }

    /// Arm a timer that fires at `deadline`; a deadline in the past fires right away.
    pub fn arm_until(
        &self,
        session_id: SessionId,
        phase: TimeoutPhase,
        deadline: Instant,
    ) -> TimerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiries = self.expiries.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            trace!(%session_id, generation, %phase, "timer fired");
            // Receiver gone means the coordinator shut down.
            let _ = expiries.send(Expiry {
                session_id,
                generation,
                phase,
            });
        });
        TimerHandle {
            generation,
            phase,
            deadline,
            abort: task.abort_handle(),
        }
    }
}
