use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key fetch locks. Concurrent misses for the same file queue on one
/// mutex; whoever gets it second finds the file already cached.
#[derive(Default)]
pub struct InFlight {
    slots: DashMap<String, Slot>,
}

struct Slot {
    lock: Arc<Mutex<()>>,
    /// Holder plus queued waiters; the slot goes when this reaches zero.
    users: usize,
}

/// Counts one user of a slot from before it starts waiting, so a waiter
/// dropped mid-acquire still releases its share.
struct Ticket<'a> {
    owner: &'a InFlight,
    key: String,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.owner.slots.remove_if_mut(&self.key, |_, slot| {
            slot.users -= 1;
            slot.users == 0
        });
    }
}

pub struct InFlightGuard<'a> {
    // Field order matters: unlock before giving up the ticket.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket<'a>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> InFlightGuard<'_> {
        let lock = {
            let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(Mutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        let ticket = Ticket {
            owner: self,
            key: key.to_string(),
        };
        let guard = lock.lock_owned().await;
        InFlightGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Keys with a fetch running or queued.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
