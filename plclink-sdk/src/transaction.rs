use crate::error::SpiError;
use parking_lot::Mutex as SyncMutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{Notify, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tracing::{debug, trace, warn};

/// Bounds the number of outstanding requests on one connection.
///
/// The limit starts at the configured value and is overwritten once the
/// peer advertises its capacity. Each admitted request holds a
/// [`RequestTransaction`]; the slot is released when the transaction is
/// ended, failed, or dropped.
#[derive(Debug)]
pub struct RequestTransactionManager {
    gate: Arc<Semaphore>,
    limit: SyncMutex<usize>,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    drained: Arc<Notify>,
    /// Tasks withholding surplus slots after a shrink; aborted on close
    withholders: SyncMutex<Vec<JoinHandle<()>>>,
}

impl RequestTransactionManager {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            gate: Arc::new(Semaphore::new(limit)),
            limit: SyncMutex::new(limit),
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            drained: Arc::new(Notify::new()),
            withholders: SyncMutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn concurrency_limit(&self) -> usize {
        *self.limit.lock()
    }

    #[inline]
    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Resize the gate. Growing takes effect immediately; shrinking
    /// withholds slots as running transactions finish.
    pub fn set_concurrency_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let mut current = self.limit.lock();
        if *current == limit {
            return;
        }
        debug!(from = *current, to = limit, "concurrency limit changed");
        if limit > *current {
            self.gate.add_permits(limit - *current);
        } else {
            let surplus = (*current - limit) as u32;
            match Arc::clone(&self.gate).try_acquire_many_owned(surplus) {
                Ok(permits) => permits.forget(),
                Err(_) => match Handle::try_current() {
                    Ok(handle) => {
                        let gate = Arc::clone(&self.gate);
                        let mut withholders = self.withholders.lock();
                        withholders.retain(|h| !h.is_finished());
                        withholders.push(handle.spawn(async move {
                            if let Ok(permits) = gate.acquire_many_owned(surplus).await {
                                permits.forget();
                            }
                        }));
                    }
                    Err(_) => warn!(surplus, "no runtime to withhold surplus slots"),
                },
            }
        }
        *current = limit;
    }

    /// Acquire a slot, waiting while the limit is reached.
    pub async fn start_transaction(&self) -> Result<RequestTransaction, SpiError> {
        if self.is_shutting_down() {
            return Err(SpiError::ShuttingDown);
        }
        let permit = Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| SpiError::ShuttingDown)?;
        if self.is_shutting_down() {
            return Err(SpiError::ShuttingDown);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(transaction = id, active, "transaction started");
        Ok(RequestTransaction {
            id,
            _permit: permit,
            active: Arc::clone(&self.active),
            drained: Arc::clone(&self.drained),
        })
    }

    /// Run `work` inside a transaction and end it afterwards.
    pub async fn submit<F, Fut, T>(&self, work: F) -> Result<T, SpiError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = T>,
    {
        let transaction = self.start_transaction().await?;
        let out = work(transaction.id()).await;
        transaction.end_request();
        Ok(out)
    }

    /// Refuse new transactions and wake queued callers with `ShuttingDown`.
    pub fn close(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!(active = self.active_requests(), "transaction manager closing");
        }
        self.gate.close();
        for withholder in self.withholders.lock().drain(..) {
            withholder.abort();
        }
    }

    /// Shrink tasks still waiting for running transactions to finish.
    pub fn pending_withholders(&self) -> usize {
        self.withholders.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Close, then wait until running transactions drain. Returns `false`
    /// when `timeout` elapses first.
    pub async fn close_graceful(&self, timeout: Duration) -> bool {
        self.close();
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            if self.active_requests() == 0 {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                warn!(
                    active = self.active_requests(),
                    "transactions still running after graceful close timeout"
                );
                return false;
            }
        }
    }
}

/// One admitted request. Dropping it releases the slot.
#[derive(Debug)]
pub struct RequestTransaction {
    id: u64,
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl RequestTransaction {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Finish the request and release its slot.
    pub fn end_request(self) {
        trace!(transaction = self.id, "transaction ended");
    }

    /// Finish the request with an error and release its slot.
    pub fn fail_request(self, err: &SpiError) {
        debug!(transaction = self.id, error = %err, "transaction failed");
    }
}

impl Drop for RequestTransaction {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}
