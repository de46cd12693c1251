/// Deferred per-client timers: registration deadline, idle probe and
/// liveness timeout.
///
/// A timer task only sleeps and then sends one [`Event::Timer`] onto the
/// dispatcher queue. It never touches client state. Every arm bumps the
/// slot's generation, and the dispatcher acts on a fired event only if
/// [`Timers::accept`] says it is still the current one, so a callback that
/// fired just before being cancelled is ignored.
use std::time::Duration;

use tokio::task::AbortHandle;

use super::client::ClientId;
use super::queue::{Envelope, Event, Queue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Armed at connect, cancelled on registration.
    Registration,
    /// Re-armed on every bit of activity once registered.
    Idle,
    /// Armed by an idle probe, cancelled by the next activity.
    Liveness,
}

impl Slot {
    /// Disconnect reason when this slot expires, if expiry disconnects.
    pub fn expiry_reason(self) -> Option<&'static str> {
        match self {
            Slot::Registration => Some("registration timed out"),
            Slot::Idle => None,
            Slot::Liveness => Some("connection timeout"),
        }
    }
}

/// Payload of a fired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub slot: Slot,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Timer {
    generation: u64,
    armed: bool,
    task: Option<AbortHandle>,
}

impl Timer {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.armed = false;
    }
}

/// The three timer slots belonging to one client.
#[derive(Debug)]
pub struct Timers {
    client: ClientId,
    queue: Queue,
    registration: Timer,
    idle: Timer,
    liveness: Timer,
}

impl Timers {
    pub fn new(client: ClientId, queue: Queue) -> Self {
        Self {
            client,
            queue,
            registration: Timer::default(),
            idle: Timer::default(),
            liveness: Timer::default(),
        }
    }

    fn timer(&mut self, slot: Slot) -> &mut Timer {
        match slot {
            Slot::Registration => &mut self.registration,
            Slot::Idle => &mut self.idle,
            Slot::Liveness => &mut self.liveness,
        }
    }

    /// Cancel-and-reschedule: replaces whatever was pending in `slot`.
    pub fn arm(&mut self, slot: Slot, delay: Duration) {
        let client = self.client;
        let queue = self.queue.clone();
        let timer = self.timer(slot);

        timer.cancel();
        timer.generation += 1;
        timer.armed = true;

        let fired = Fired {
            slot,
            generation: timer.generation,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.send(Envelope::client(client, Event::Timer(fired)));
        });
        timer.task = Some(task.abort_handle());
    }

    /// Cancelling an unarmed or already-fired slot does nothing.
    pub fn cancel(&mut self, slot: Slot) {
        self.timer(slot).cancel();
    }

    pub fn cancel_all(&mut self) {
        self.registration.cancel();
        self.idle.cancel();
        self.liveness.cancel();
    }

    pub fn is_armed(&self, slot: Slot) -> bool {
        match slot {
            Slot::Registration => self.registration.armed,
            Slot::Idle => self.idle.armed,
            Slot::Liveness => self.liveness.armed,
        }
    }

    /// Claim a fired event. Returns `false` for stale events (cancelled or
    /// re-armed since); otherwise disarms the slot and returns `true`.
    pub fn accept(&mut self, fired: Fired) -> bool {
        let timer = self.timer(fired.slot);
        if !timer.armed || timer.generation != fired.generation {
            return false;
        }
        timer.armed = false;
        timer.task = None;
        true
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
