use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use pg_transaction_template::{ConnectionSource, ManagedConnection};

/// Errors raised by the in-memory bank driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error("no connection available")]
    Exhausted,

    #[error("account {0} does not exist")]
    NoSuchAccount(i64),

    #[error("update of account {0} failed")]
    StatementFailed(i64),

    #[error("begin rejected")]
    BeginRejected,

    #[error("commit rejected")]
    CommitRejected,

    #[error("rollback failed")]
    RollbackFailed,

    #[error("could not restore auto-commit")]
    RestoreFailed,
}

/// Driver calls recorded by the bank, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Acquired,
    Begin,
    Commit,
    Rollback,
    /// `reused` is false when the connection was closed instead of pooled.
    Released { reused: bool },
}

/// Failures to inject into the next driver calls
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_restore: bool,
    pub fail_account: Option<i64>,
}

struct Shared {
    accounts: Mutex<BTreeMap<i64, i64>>,
    available: Mutex<usize>,
    journal: Mutex<Vec<Event>>,
    faults: Mutex<Faults>,
}

/// In-memory connection source holding account balances.
#[derive(Clone)]
pub struct MemoryBank {
    shared: Arc<Shared>,
}

impl MemoryBank {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                accounts: Mutex::new(BTreeMap::new()),
                available: Mutex::new(capacity),
                journal: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// Two accounts: 1 holding 100 and 2 holding 0.
    pub fn with_default_accounts() -> Self {
        let bank = Self::new(4);
        bank.open_account(1, 100);
        bank.open_account(2, 0);
        bank
    }

    pub fn open_account(&self, id: i64, balance: i64) {
        self.shared.accounts.lock().insert(id, balance);
    }

    pub fn balance(&self, id: i64) -> Option<i64> {
        self.shared.accounts.lock().get(&id).copied()
    }

    pub fn inject(&self, faults: Faults) {
        *self.shared.faults.lock() = faults;
    }

    pub fn journal(&self) -> Vec<Event> {
        self.shared.journal.lock().clone()
    }

    pub fn available(&self) -> usize {
        *self.shared.available.lock()
    }

    pub fn count(&self, event: Event) -> usize {
        self.shared.journal.lock().iter().filter(|e| **e == event).count()
    }

    pub fn releases(&self) -> usize {
        self.shared
            .journal
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Released { .. }))
            .count()
    }

    fn record(&self, event: Event) {
        self.shared.journal.lock().push(event);
    }
}

#[async_trait]
impl ConnectionSource for MemoryBank {
    type Connection = MemoryConnection;
    type Error = BankError;

    async fn acquire(&self) -> Result<Self::Connection, Self::Error> {
        {
            let mut available = self.shared.available.lock();
            if *available == 0 {
                return Err(BankError::Exhausted);
            }
            *available -= 1;
        }
        self.record(Event::Acquired);
        Ok(MemoryConnection {
            bank: self.clone(),
            pending: None,
        })
    }

    fn release(&self, connection: Self::Connection) {
        let reused = !connection.is_manual_commit();
        *self.shared.available.lock() += 1;
        self.record(Event::Released { reused });
    }
}

/// Session on a [`MemoryBank`].
///
/// In manual commit mode updates go to a private copy of the balances that replaces the shared
/// ones on commit; in auto-commit mode every update is applied immediately.
pub struct MemoryConnection {
    bank: MemoryBank,
    pending: Option<BTreeMap<i64, i64>>,
}

impl MemoryConnection {
    /// `UPDATE account SET balance = balance + delta WHERE id = account`
    pub async fn add_to_balance(&mut self, account: i64, delta: i64) -> Result<(), BankError> {
        if self.bank.shared.faults.lock().fail_account == Some(account) {
            return Err(BankError::StatementFailed(account));
        }
        let mut shared = self.bank.shared.accounts.lock();
        let accounts = self.pending.as_mut().unwrap_or(&mut *shared);
        let balance = accounts
            .get_mut(&account)
            .ok_or(BankError::NoSuchAccount(account))?;
        *balance += delta;
        Ok(())
    }

    /// Balance as seen by this session, including uncommitted updates.
    pub async fn balance(&self, account: i64) -> Result<i64, BankError> {
        let shared = self.bank.shared.accounts.lock();
        let balance = self
            .pending
            .as_ref()
            .unwrap_or(&*shared)
            .get(&account)
            .copied();
        balance.ok_or(BankError::NoSuchAccount(account))
    }
}

#[async_trait]
impl ManagedConnection for MemoryConnection {
    type Error = BankError;

    async fn set_manual_commit(&mut self, manual: bool) -> Result<(), Self::Error> {
        if manual {
            if self.bank.shared.faults.lock().fail_begin {
                return Err(BankError::BeginRejected);
            }
            if self.pending.is_none() {
                self.pending = Some(self.bank.shared.accounts.lock().clone());
                self.bank.record(Event::Begin);
            }
            return Ok(());
        }

        if self.bank.shared.faults.lock().fail_restore {
            return Err(BankError::RestoreFailed);
        }
        if self.pending.is_some() {
            self.commit().await?;
        }
        Ok(())
    }

    fn is_manual_commit(&self) -> bool {
        self.pending.is_some()
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        self.bank.record(Event::Commit);
        if self.bank.shared.faults.lock().fail_commit {
            return Err(BankError::CommitRejected);
        }
        if let Some(pending) = self.pending.take() {
            *self.bank.shared.accounts.lock() = pending;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        self.bank.record(Event::Rollback);
        if self.bank.shared.faults.lock().fail_rollback {
            return Err(BankError::RollbackFailed);
        }
        self.pending = None;
        Ok(())
    }
}
