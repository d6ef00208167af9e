//! Background lease renewal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::MigrationError;
use crate::lock::LockManager;
use crate::types::{ExecutionId, StoreId};

/// Renews a lease on an interval until dropped.
///
/// If a renewal finds the lock gone, the lost flag is raised and renewal
/// stops. Transient renewal errors are logged and retried on the next tick.
pub(crate) struct LeaseHeartbeat {
    handle: JoinHandle<()>,
    lost: Arc<AtomicBool>,
}

impl LeaseHeartbeat {
    pub(crate) fn spawn(
        locks: LockManager,
        store: StoreId,
        execution_id: ExecutionId,
        lease: Duration,
        interval: Duration,
    ) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match locks.renew(&store, &execution_id, lease).await {
                    Ok(_) => {}
                    Err(MigrationError::LockLost { .. }) => {
                        tracing::warn!(
                            store = %store,
                            execution_id = %execution_id,
                            "Migration lock lost, stopping lease renewal"
                        );
                        flag.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            store = %store,
                            execution_id = %execution_id,
                            error = %e,
                            "Lease renewal failed"
                        );
                    }
                }
            }
        });

        Self { handle, lost }
    }

    /// Whether a renewal found the lock taken away.
    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
