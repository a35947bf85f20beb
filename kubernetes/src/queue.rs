//! Fire-and-forget queue for long-running provisioning operations.
//!
//! At most one operation is in flight per (kind, target); duplicate
//! submissions coalesce onto the running operation and every registered
//! callback fires exactly once with its outcome. Shutdown grants in-flight
//! operations a short grace period, then delivers a cancellation outcome.

use std::collections::HashMap;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    ClusterCreate,
    ClusterDelete,
    NamespaceCreate,
    NamespaceDelete,
}

#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl OperationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

pub type OperationCallback = Box<dyn FnOnce(OperationOutcome) + Send>;

struct InFlight {
    id: String,
    callbacks: Vec<OperationCallback>,
}

#[derive(Clone)]
pub struct OperationQueue {
    in_flight: Arc<Mutex<HashMap<(OperationKind, String), InFlight>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl OperationQueue {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Submit `operation` for `(kind, target)` and return its opaque
    /// operation id. If an operation for the pair is already running, the
    /// callback is attached to it and the existing id is returned.
    pub fn submit<F>(
        &self,
        kind: OperationKind,
        target: &str,
        operation: F,
        callback: OperationCallback,
    ) -> String
    where
        F: Future<Output = kecs_common::Result<()>> + Send + 'static,
    {
        let key = (kind, target.to_string());
        let id = uuid::Uuid::new_v4().simple().to_string();
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(entry) = in_flight.get_mut(&key) {
                entry.callbacks.push(callback);
                return entry.id.clone();
            }
            in_flight.insert(
                key.clone(),
                InFlight {
                    id: id.clone(),
                    callbacks: vec![callback],
                },
            );
        }

        let in_flight = self.in_flight.clone();
        let cancel = self.cancel.clone();
        let target = target.to_string();
        self.tracker.spawn(async move {
            tokio::pin!(operation);
            let outcome = tokio::select! {
                result = &mut operation => match result {
                    Ok(()) => OperationOutcome::Completed,
                    Err(err) => OperationOutcome::Failed(err.to_string()),
                },
                _ = cancel.cancelled() => {
                    // Give the operation a grace period to finish on its own.
                    match tokio::time::timeout(SHUTDOWN_GRACE, &mut operation).await {
                        Ok(Ok(())) => OperationOutcome::Completed,
                        Ok(Err(err)) => OperationOutcome::Failed(err.to_string()),
                        Err(_) => OperationOutcome::Cancelled,
                    }
                }
            };
            if let OperationOutcome::Failed(ref reason) = outcome {
                tracing::error!(?kind, target = %target, reason = %reason, "background operation failed");
            }
            let callbacks = in_flight
                .lock()
                .remove(&(kind, target.clone()))
                .map(|e| e.callbacks)
                .unwrap_or_default();
            for callback in callbacks {
                callback(outcome.clone());
            }
        });
        id
    }

    /// True when an operation for `(kind, target)` is currently running.
    pub fn is_in_flight(&self, kind: OperationKind, target: &str) -> bool {
        self.in_flight
            .lock()
            .contains_key(&(kind, target.to_string()))
    }

    /// Cancel pending operations and wait for every callback to have fired.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_callback(counter: Arc<AtomicUsize>) -> OperationCallback {
        Box::new(move |outcome| {
            if outcome.is_completed() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn callbacks_fire_exactly_once() {
        let queue = OperationQueue::new(CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));
        queue.submit(
            OperationKind::ClusterCreate,
            "kecs-prod",
            async { Ok(()) },
            counting_callback(fired.clone()),
        );
        queue.shutdown().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_submissions_coalesce() {
        let queue = OperationQueue::new(CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());

        let release = gate.clone();
        let first = queue.submit(
            OperationKind::ClusterCreate,
            "kecs-prod",
            async move {
                release.notified().await;
                Ok(())
            },
            counting_callback(fired.clone()),
        );
        let second = queue.submit(
            OperationKind::ClusterCreate,
            "kecs-prod",
            async { Ok(()) },
            counting_callback(fired.clone()),
        );
        assert_eq!(first, second);
        assert!(queue.is_in_flight(OperationKind::ClusterCreate, "kecs-prod"));

        gate.notify_one();
        queue.shutdown().await;
        // Both callbacks observed the single coalesced run.
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!queue.is_in_flight(OperationKind::ClusterCreate, "kecs-prod"));
    }

    #[tokio::test]
    async fn distinct_targets_run_independently() {
        let queue = OperationQueue::new(CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));
        let a = queue.submit(
            OperationKind::ClusterCreate,
            "kecs-a",
            async { Ok(()) },
            counting_callback(fired.clone()),
        );
        let b = queue.submit(
            OperationKind::ClusterCreate,
            "kecs-b",
            async { Ok(()) },
            counting_callback(fired.clone()),
        );
        assert_ne!(a, b);
        queue.shutdown().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_stuck_operations_after_grace() {
        let cancel = CancellationToken::new();
        let queue = OperationQueue::new(cancel.clone());
        let cancelled = Arc::new(AtomicUsize::new(0));
        let observed = cancelled.clone();
        queue.submit(
            OperationKind::ClusterDelete,
            "kecs-stuck",
            async {
                // Never completes on its own.
                std::future::pending::<()>().await;
                Ok(())
            },
            Box::new(move |outcome| {
                if matches!(outcome, OperationOutcome::Cancelled) {
                    observed.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        queue.shutdown().await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_reported_not_swallowed() {
        let queue = OperationQueue::new(CancellationToken::new());
        let failed = Arc::new(AtomicUsize::new(0));
        let observed = failed.clone();
        queue.submit(
            OperationKind::NamespaceCreate,
            "prod",
            async { Err(kecs_common::Error::invalid_input("boom")) },
            Box::new(move |outcome| {
                if matches!(outcome, OperationOutcome::Failed(_)) {
                    observed.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        queue.shutdown().await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }
}
