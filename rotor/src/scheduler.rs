//! One-shot, cancellable rotation trigger.
//!
//! Each armed trigger is a sleeping thread that waits on a channel with a
//! timeout. Cancelling (or dropping the [`Trigger`]) disconnects the channel
//! and the thread exits without firing. Triggers carry a generation so a
//! firing that raced with a cancel can tell it is stale.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::warn;

/// A pending trigger. Dropping it cancels the firing.
#[derive(Debug)]
pub(crate) struct Trigger {
    generation: u64,
    cancel: mpsc::Sender<()>,
}

impl Trigger {
    fn cancel(self) {
        let _ = self.cancel.send(());
    }
}

/// Armed/Disarmed state machine for the next rotation.
#[derive(Debug, Default)]
pub(crate) struct RotationScheduler {
    next_generation: u64,
    pending: Option<Trigger>,
}

impl RotationScheduler {
    pub(crate) fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Arm a trigger that calls `fire` with its generation after `delay`.
    ///
    /// Any pending trigger is cancelled first.
    pub(crate) fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm();

        let generation = self.next_generation;
        self.next_generation += 1;
        let (tx, rx) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("rotor-rotation".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(delay) {
                    fire(generation);
                }
            });

        match spawned {
            Ok(_) => {
                self.pending = Some(Trigger {
                    generation,
                    cancel: tx,
                })
            }
            Err(err) => warn!(error = %err, "rotor: failed to arm rotation trigger"),
        }
    }

    /// Cancel the pending trigger. Returns whether one was armed.
    pub(crate) fn disarm(&mut self) -> bool {
        match self.pending.take() {
            Some(trigger) => {
                trigger.cancel();
                true
            }
            None => false,
        }
    }

    /// Consume the pending trigger if it is the one that fired.
    ///
    /// Returns `false` for a stale firing: the trigger was cancelled or
    /// replaced after its timer elapsed.
    pub(crate) fn take_fired(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(trigger) if trigger.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}
