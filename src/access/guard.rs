//! Reentrancy guard for async entry points
//!
//! A guarded call marks its id in a task-local set for the duration of the
//! call. Any guarded entry reached again from inside that call (a token
//! callback calling back into the router, for example) sees its own id and
//! fails with [`ExchangeError::ReentrantCall`]. Independent tasks are
//! serialized on an async mutex instead of being rejected.

use crate::error::{ExchangeError, ExchangeResult};

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

tokio::task_local! {
    static ACTIVE_GUARDS: RefCell<Vec<u64>>;
}

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

pub struct ReentrancyGuard {
    id: u64,
    lock: Mutex<()>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
            lock: Mutex::new(()),
        }
    }

    /// Whether the current task is already inside this guard
    pub fn is_entered(&self) -> bool {
        ACTIVE_GUARDS
            .try_with(|active| active.borrow().contains(&self.id))
            .unwrap_or(false)
    }

    /// Run `fut` as the body of a non-reentrant call
    pub async fn run<F, T>(&self, fut: F) -> ExchangeResult<T>
    where
        F: Future<Output = ExchangeResult<T>>,
    {
        match ACTIVE_GUARDS.try_with(|active| active.borrow().contains(&self.id)) {
            Ok(true) => {
                warn!("Rejected reentrant call");
                Err(ExchangeError::ReentrantCall)
            }
            Ok(false) => {
                // Inside another guard's scope: join its set
                let _lock = self.lock.lock().await;
                ACTIVE_GUARDS.with(|active| active.borrow_mut().push(self.id));
                let _entered = Entered(self.id);
                fut.await
            }
            Err(_) => {
                let _lock = self.lock.lock().await;
                ACTIVE_GUARDS.scope(RefCell::new(vec![self.id]), fut).await
            }
        }
    }
}

impl Default for ReentrancyGuard {
    fn default() -> Self {
        Self::new()
    }
}

struct Entered(u64);

impl Drop for Entered {
    fn drop(&mut self) {
        let id = self.0;
        let _ = ACTIVE_GUARDS.try_with(|active| active.borrow_mut().retain(|g| *g != id));
    }
}
