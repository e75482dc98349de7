//! Global memory budget for buffered frames
//!
//! Every decoded frame a job keeps in memory is backed by a [`BudgetToken`].
//! The sum of outstanding tokens never exceeds the limit: grants are checked
//! and recorded under one lock, and a token gives its bytes back when dropped.
//!
//! Grant policy for a registered job:
//! - its *reserve* (taken at registration) is always available to it, so a
//!   job can always hold an incumbent and a challenger frame;
//! - beyond the reserve it may hold up to its fair share, `limit / active`,
//!   where `active` counts registered jobs and jobs waiting to register;
//! - beyond its fair share it may borrow free headroom only while no other
//!   job is waiting.
//!
//! Waiting is cooperative: callers park on a [`Notify`] and re-check after
//! every release. A waiter that is dropped leaves the queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// Error type for budget operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    /// The request can never be satisfied, even with nothing else buffered
    #[error("Requested {requested} bytes but the memory limit is {limit} bytes")]
    Oversubscribed { requested: u64, limit: u64 },
}

#[derive(Debug, Default)]
struct Account {
    reserved: u64,
    held: u64,
    registered: bool,
}

impl Account {
    fn committed(&self) -> u64 {
        self.reserved.max(self.held)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitKind {
    Register,
    Acquire(u64),
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    kind: WaitKind,
}

#[derive(Debug, Default)]
struct Ledger {
    accounts: HashMap<u64, Account>,
    next_account: u64,
    next_ticket: u64,
    waiting: Vec<Waiter>,
    /// Sum of `max(reserved, held)` over all accounts
    committed: u64,
    /// Sum of `held` over all accounts
    outstanding: u64,
    peak_outstanding: u64,
}

impl Ledger {
    fn active_jobs(&self) -> u64 {
        let registered = self.accounts.values().filter(|a| a.registered).count();
        let registering = self
            .waiting
            .iter()
            .filter(|w| w.kind == WaitKind::Register)
            .count();
        (registered + registering).max(1) as u64
    }

    fn others_waiting(&self, account: u64) -> bool {
        self.waiting
            .iter()
            .any(|w| w.kind != WaitKind::Acquire(account))
    }

    fn try_register(&mut self, limit: u64, reserve: u64, ticket: Option<u64>) -> Option<u64> {
        if self.committed + reserve > limit {
            return None;
        }
        let queued_ahead = self.waiting.iter().any(|w| {
            w.kind == WaitKind::Register && ticket.map_or(true, |mine| w.ticket < mine)
        });
        if queued_ahead {
            return None;
        }

        let id = self.next_account;
        self.next_account += 1;
        self.accounts.insert(
            id,
            Account {
                reserved: reserve,
                held: 0,
                registered: true,
            },
        );
        self.committed += reserve;
        Some(id)
    }

    fn try_acquire(&mut self, limit: u64, account: u64, bytes: u64) -> bool {
        let fair_share = limit / self.active_jobs();
        let others_waiting = self.others_waiting(account);
        let Some(acc) = self.accounts.get_mut(&account) else {
            return false;
        };

        let new_held = acc.held + bytes;
        let new_committed = acc.reserved.max(new_held);
        let delta = new_committed - acc.committed();

        let granted = if delta == 0 {
            true
        } else if self.committed + delta > limit {
            false
        } else {
            new_committed <= acc.reserved.max(fair_share) || !others_waiting
        };

        if granted {
            acc.held = new_held;
            self.committed += delta;
            self.outstanding += bytes;
            self.peak_outstanding = self.peak_outstanding.max(self.outstanding);
        }
        granted
    }

    fn release(&mut self, account: u64, bytes: u64) {
        let Some(acc) = self.accounts.get_mut(&account) else {
            return;
        };
        let before = acc.committed();
        let freed = bytes.min(acc.held);
        acc.held -= freed;
        self.committed -= before - acc.committed();
        self.outstanding -= freed;
        if !acc.registered && acc.held == 0 {
            self.accounts.remove(&account);
        }
    }

    fn deregister(&mut self, account: u64) {
        let Some(acc) = self.accounts.get_mut(&account) else {
            return;
        };
        let before = acc.committed();
        acc.reserved = 0;
        acc.registered = false;
        self.committed -= before - acc.committed();
        if acc.held == 0 {
            self.accounts.remove(&account);
        }
    }

    fn enqueue(&mut self, kind: WaitKind) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiting.push(Waiter { ticket, kind });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.waiting.retain(|w| w.ticket != ticket);
    }
}

#[derive(Debug)]
struct Inner {
    limit: u64,
    ledger: Mutex<Ledger>,
    changed: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Park until `attempt` succeeds, queued as `kind`.
    async fn wait_for<T>(
        self: &Arc<Self>,
        kind: WaitKind,
        mut attempt: impl FnMut(&mut Ledger, Option<u64>) -> Option<T>,
    ) -> T {
        let mut queued: Option<QueuedWaiter> = None;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut ledger = self.lock();
                let ticket = queued.as_ref().map(|q| q.ticket);
                if let Some(granted) = attempt(&mut ledger, ticket) {
                    if let Some(ticket) = ticket {
                        ledger.dequeue(ticket);
                    }
                    drop(ledger);
                    if let Some(mut q) = queued.take() {
                        q.dequeued = true;
                    }
                    // Our leaving the queue may unblock borrowers
                    self.changed.notify_waiters();
                    return granted;
                }
                if queued.is_none() {
                    queued = Some(QueuedWaiter {
                        inner: self.clone(),
                        ticket: ledger.enqueue(kind),
                        dequeued: false,
                    });
                }
            }

            notified.await;
        }
    }
}

/// Removes an abandoned waiter from the queue
struct QueuedWaiter {
    inner: Arc<Inner>,
    ticket: u64,
    dequeued: bool,
}

impl Drop for QueuedWaiter {
    fn drop(&mut self) {
        if self.dequeued {
            return;
        }
        self.inner.lock().dequeue(self.ticket);
        self.inner.changed.notify_waiters();
    }
}

/// Memory budget shared by all jobs of a run
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    inner: Arc<Inner>,
}

impl MemoryBudget {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: limit_bytes,
                ledger: Mutex::new(Ledger::default()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn limit(&self) -> u64 {
        self.inner.limit
    }

    /// Bytes currently granted to tokens
    pub fn outstanding(&self) -> u64 {
        self.inner.lock().outstanding
    }

    /// Bytes set aside for tokens and reserves
    pub fn committed(&self) -> u64 {
        self.inner.lock().committed
    }

    /// Highest value `outstanding` ever reached
    pub fn peak_outstanding(&self) -> u64 {
        self.inner.lock().peak_outstanding
    }

    /// Number of registered jobs
    pub fn active_jobs(&self) -> usize {
        self.inner
            .lock()
            .accounts
            .values()
            .filter(|a| a.registered)
            .count()
    }

    /// Check that a job needing `reserve` bytes could ever run
    pub fn check_fits(&self, reserve: u64) -> Result<(), BudgetError> {
        if reserve > self.inner.limit {
            return Err(BudgetError::Oversubscribed {
                requested: reserve,
                limit: self.inner.limit,
            });
        }
        Ok(())
    }

    /// Register a job and set aside `reserve` bytes for it.
    ///
    /// Waits while the reserve does not fit next to the other jobs'
    /// commitments. Registrations are admitted in arrival order.
    pub async fn register(&self, reserve: u64) -> Result<JobBudget, BudgetError> {
        self.check_fits(reserve)?;
        let limit = self.inner.limit;
        let account = self
            .inner
            .wait_for(
                WaitKind::Register,
                |ledger, ticket| ledger.try_register(limit, reserve, ticket),
            )
            .await;
        debug!(account, reserve, "job registered with memory budget");
        Ok(JobBudget {
            inner: self.inner.clone(),
            account,
            reserved: reserve,
        })
    }
}

/// One job's registration with the [`MemoryBudget`]
///
/// Dropping it gives back the reserve. Tokens still alive keep their bytes
/// until they are dropped too.
#[derive(Debug)]
pub struct JobBudget {
    inner: Arc<Inner>,
    account: u64,
    reserved: u64,
}

impl JobBudget {
    /// Bytes this job currently holds
    pub fn held(&self) -> u64 {
        self.inner
            .lock()
            .accounts
            .get(&self.account)
            .map_or(0, |a| a.held)
    }

    /// Acquire `bytes`, waiting until the grant policy allows it
    pub async fn acquire(&self, bytes: u64) -> Result<BudgetToken, BudgetError> {
        let limit = self.inner.limit;
        if bytes > limit {
            return Err(BudgetError::Oversubscribed {
                requested: bytes,
                limit,
            });
        }
        let account = self.account;
        self.inner
            .wait_for(
                WaitKind::Acquire(account),
                move |ledger, _| ledger.try_acquire(limit, account, bytes).then_some(()),
            )
            .await;
        Ok(self.token(bytes))
    }

    /// Acquire `bytes` only if it can be granted right now
    pub fn try_acquire(&self, bytes: u64) -> Option<BudgetToken> {
        let granted = self
            .inner
            .lock()
            .try_acquire(self.inner.limit, self.account, bytes);
        granted.then(|| self.token(bytes))
    }

    fn token(&self, bytes: u64) -> BudgetToken {
        BudgetToken {
            inner: self.inner.clone(),
            account: self.account,
            bytes,
        }
    }
}

impl Drop for JobBudget {
    fn drop(&mut self) {
        self.inner.lock().deregister(self.account);
        self.inner.changed.notify_waiters();
        debug!(account = self.account, "job left memory budget");
    }
}

/// Bytes granted by the budget; returned when dropped
#[derive(Debug)]
pub struct BudgetToken {
    inner: Arc<Inner>,
    account: u64,
    bytes: u64,
}

impl BudgetToken {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Give the bytes back now
    pub fn release(self) {}
}

impl Drop for BudgetToken {
    fn drop(&mut self) {
        self.inner.lock().release(self.account, self.bytes);
        self.inner.changed.notify_waiters();
    }
}
