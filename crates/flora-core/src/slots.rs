//! Connection slots shared by all sessions of a pool.
//!
//! The pool hands out at most `capacity` [`SlotPermit`]s. Connects that find
//! no free slot wait in one of two FIFO queues; a released slot always goes
//! to a foreground waiter before a background one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Queue a waiter is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// A device the user is looking at.
    Foreground,
    /// Everything else.
    Background,
}

#[derive(Debug)]
struct SlotState {
    capacity: usize,
    in_use: usize,
    foreground: VecDeque<oneshot::Sender<()>>,
    background: VecDeque<oneshot::Sender<()>>,
}

impl SlotState {
    /// Give a freed slot to the next live waiter, or return it to the pool.
    fn release_one(&mut self) {
        loop {
            let next = self
                .foreground
                .pop_front()
                .or_else(|| self.background.pop_front());
            match next {
                // ownership of the slot moves to the waiter
                Some(waiter) => {
                    if waiter.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    self.in_use = self.in_use.saturating_sub(1);
                    return;
                }
            }
        }
    }
}

/// Bounded set of connection slots.
#[derive(Debug, Clone)]
pub struct SlotQueue {
    state: Arc<Mutex<SlotState>>,
}

impl SlotQueue {
    /// Create a queue with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                capacity,
                in_use: 0,
                foreground: VecDeque::new(),
                background: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a slot.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// the queue; a slot handed over in the meantime is passed on.
    pub async fn acquire(&self, priority: Priority) -> SlotPermit {
        let rx = {
            let mut state = self.lock();
            if state.in_use < state.capacity {
                state.in_use += 1;
                return SlotPermit {
                    state: Arc::clone(&self.state),
                };
            }
            let (tx, rx) = oneshot::channel();
            match priority {
                Priority::Foreground => state.foreground.push_back(tx),
                Priority::Background => state.background.push_back(tx),
            }
            rx
        };

        let mut guard = WaitGuard {
            queue: self,
            rx: Some(rx),
        };
        guard.wait().await;
        SlotPermit {
            state: Arc::clone(&self.state),
        }
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        let state = self.lock();
        state.capacity.saturating_sub(state.in_use)
    }

    /// Connects waiting for a slot.
    pub fn waiting(&self) -> usize {
        let state = self.lock();
        state
            .foreground
            .iter()
            .chain(state.background.iter())
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

struct WaitGuard<'a> {
    queue: &'a SlotQueue,
    rx: Option<oneshot::Receiver<()>>,
}

impl WaitGuard<'_> {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // senders are only dropped after a successful send or by a
            // cancelled waiter, so either way the wait is over
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if rx.try_recv().is_ok() {
            // a slot arrived between cancellation and close
            self.queue.lock().release_one();
        }
    }
}

/// An occupied connection slot, released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    state: Arc<Mutex<SlotState>>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release_one();
    }
}
