//! Single-flight coordination for access token refresh.
//!
//! At most one refresh runs at a time. Callers arriving while one is in
//! flight await the same future and receive the same result.
//!
//! The shared future empties its own slot in the poll that resolves it, so
//! a caller dropped after resolution cannot leave a finished refresh behind
//! to be replayed by later callers.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use super::AuthError;

type RefreshFuture = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// The pending refresh, tagged with the id it was started under
type Slot = Mutex<Option<(u64, RefreshFuture)>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<(u64, RefreshFuture)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    in_flight: Arc<Slot>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    /// Join the pending refresh, or start one with `start` if none is pending.
    pub(crate) async fn run<F, Fut>(&self, start: F) -> Result<String, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, AuthError>> + Send + 'static,
    {
        let pending = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some((_, pending)) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let refresh = start();
                    let owner = Arc::clone(&self.in_flight);
                    let pending = async move {
                        let result = refresh.await;
                        let mut slot = lock(&owner);
                        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
                            *slot = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        lock(&self.in_flight).is_none()
    }
}
