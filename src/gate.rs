//! Admission control in front of the executor.
//!
//! At most `max_concurrent` slots are held at once. Pending requests are
//! served by priority, highest first, and FIFO within a priority. There is
//! no aging: a low-priority request can wait indefinitely behind a steady
//! stream of higher-priority ones.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::{request::Priority, RestError, Result};

/// Identifies one admission request; issued in insertion order.
pub type Ticket = u64;

struct QueueEntry {
    priority: Priority,
    sequence: Ticket,
    grant: oneshot::Sender<()>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Max-heap: higher priority first, then lower sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct GateState {
    max_concurrent: usize,
    next_sequence: Ticket,
    queue: BinaryHeap<QueueEntry>,
    admitted: HashSet<Ticket>,
}

impl GateState {
    fn has_capacity(&self) -> bool {
        self.admitted.len() < self.max_concurrent
    }

    /// Grants slots to queued entries while capacity remains. Entries whose
    /// waiter is already gone are skipped.
    fn pump(&mut self) {
        while self.has_capacity() {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            if entry.grant.send(()).is_ok() {
                self.admitted.insert(entry.sequence);
                #[cfg(feature = "tracing")]
                tracing::trace!(ticket = entry.sequence, "dispatch slot granted");
            }
        }
    }
}

/// Priority-ordered concurrency limiter shared by many executors.
#[derive(Clone)]
pub struct DispatchGate {
    state: Arc<Mutex<GateState>>,
}

impl fmt::Debug for DispatchGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DispatchGate")
            .field("max_concurrent", &state.max_concurrent)
            .field("in_flight", &state.admitted.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl DispatchGate {
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(RestError::InvalidConfiguration(
                "max concurrent requests must be positive".to_owned(),
            ));
        }
        Ok(Self {
            state: Arc::new(Mutex::new(GateState {
                max_concurrent,
                next_sequence: 0,
                queue: BinaryHeap::new(),
                admitted: HashSet::new(),
            })),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.lock().max_concurrent
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.lock().admitted.len()
    }

    /// Entries waiting for a slot.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Waits for a slot. Dropping the returned future before it completes
    /// withdraws the entry without leaking capacity.
    pub async fn admit(&self, priority: Priority) -> AdmissionSlot {
        let (ticket, granted) = {
            let mut state = self.lock();
            let ticket = state.next_sequence;
            state.next_sequence += 1;

            if state.queue.is_empty() && state.has_capacity() {
                state.admitted.insert(ticket);
                return AdmissionSlot::new(self.clone(), ticket);
            }

            let (grant, granted) = oneshot::channel();
            state.queue.push(QueueEntry {
                priority,
                sequence: ticket,
                grant,
            });
            #[cfg(feature = "tracing")]
            tracing::trace!(ticket, ?priority, queued = state.queue.len(), "dispatch queued");
            (ticket, granted)
        };

        let mut waiting = Waiting {
            gate: self,
            ticket,
            armed: true,
        };
        // The sender stays queued until granted or withdrawn by `waiting`.
        let _ = granted.await;
        waiting.armed = false;

        AdmissionSlot::new(self.clone(), ticket)
    }

    /// Frees the slot held by `ticket`. Releasing twice, or releasing a
    /// ticket that was never admitted, is a no-op.
    pub fn release(&self, ticket: Ticket) {
        let mut state = self.lock();
        if state.admitted.remove(&ticket) {
            state.pump();
        }
    }

    fn withdraw(&self, ticket: Ticket) {
        let mut state = self.lock();
        state.queue.retain(|entry| entry.sequence != ticket);
        if state.admitted.remove(&ticket) {
            state.pump();
        }
    }

    // State is consistent between statements, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Withdraws a queued entry if the admission future is dropped early.
struct Waiting<'a> {
    gate: &'a DispatchGate,
    ticket: Ticket,
    armed: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.withdraw(self.ticket);
        }
    }
}

/// A held concurrency slot. Released on drop.
#[derive(Debug)]
pub struct AdmissionSlot {
    gate: DispatchGate,
    ticket: Ticket,
}

impl AdmissionSlot {
    fn new(gate: DispatchGate, ticket: Ticket) -> Self {
        Self { gate, ticket }
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.gate.release(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::DispatchGate;
    use crate::{request::Priority, RestError};

    async fn wait_for_queued(gate: &DispatchGate, expected: usize) {
        while gate.queued() < expected {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            DispatchGate::new(0),
            Err(RestError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn admits_up_to_capacity_then_queues() {
        let gate = DispatchGate::new(2).expect("valid gate");
        let first = gate.admit(Priority::Normal).await;
        let _second = gate.admit(Priority::Normal).await;
        assert_eq!(gate.in_flight(), 2);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.admit(Priority::Normal).await })
        };
        wait_for_queued(&gate, 1).await;
        assert_eq!(gate.in_flight(), 2);

        first.release();
        let third = waiter.await.expect("waiter must finish");
        assert_eq!(gate.in_flight(), 2);
        assert_eq!(gate.queued(), 0);
        assert_eq!(third.ticket(), 2);
    }

    #[tokio::test]
    async fn serves_by_priority_then_insertion_order() {
        let gate = DispatchGate::new(1).expect("valid gate");
        let holder = gate.admit(Priority::DontCare).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let entries = [
            ("low-1", Priority::Low),
            ("high-1", Priority::High),
            ("low-2", Priority::Low),
            ("critical", Priority::Critical),
            ("high-2", Priority::High),
        ];
        let mut tasks = Vec::new();
        for (index, (name, priority)) in entries.into_iter().enumerate() {
            let gate_ref = gate.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let slot = gate_ref.admit(priority).await;
                order.lock().expect("order lock").push(name);
                drop(slot);
            }));
            wait_for_queued(&gate, index + 1).await;
        }

        drop(holder);
        for task in tasks {
            task.await.expect("task must finish");
        }

        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["critical", "high-1", "high-2", "low-1", "low-2"]
        );
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let gate = DispatchGate::new(1).expect("valid gate");
        let slot = gate.admit(Priority::Normal).await;
        let ticket = slot.ticket();

        gate.release(ticket);
        gate.release(ticket);
        gate.release(9_999);
        assert_eq!(gate.in_flight(), 0);

        drop(slot);
        assert_eq!(gate.in_flight(), 0);
        let _again = gate.admit(Priority::Normal).await;
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_capacity() {
        let gate = DispatchGate::new(1).expect("valid gate");
        let holder = gate.admit(Priority::Normal).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _slot = gate.admit(Priority::High).await;
                std::future::pending::<()>().await;
            })
        };
        wait_for_queued(&gate, 1).await;
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(gate.queued(), 0);
        drop(holder);
        assert_eq!(gate.in_flight(), 0);
    }
}
