use crate::error::Error;
use crate::metrics::GC_DELETIONS;
use dispatch::{DispatchBackend, LabelSelector, LABEL_NAMESPACE, LABEL_SENDER};
use std::sync::Arc;
use tracing::*;

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub deleted: usize,
    /// Still pending and not forced
    pub retained: usize,
    pub failed: usize,
}

/// Reclaims the pending deliveries an actor created.
#[derive(Clone)]
pub struct GarbageCollector {
    backend: Arc<dyn DispatchBackend>,
    selector: LabelSelector,
    page_size: usize,
}

impl GarbageCollector {
    pub fn new(
        backend: Arc<dyn DispatchBackend>,
        identity: &str,
        namespace: &str,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            selector: LabelSelector::new()
                .with(LABEL_SENDER, identity)
                .with(LABEL_NAMESPACE, namespace),
            page_size,
        }
    }

    /// Deletes completed deliveries, or all of them when `force` is set.
    /// Individual delete failures are logged and skipped; only a failed
    /// listing aborts the pass.
    pub async fn collect(&self, force: bool) -> Result<CollectReport, Error> {
        let deliveries = match self
            .backend
            .list_deliveries(&self.selector, self.page_size)
            .await
        {
            Ok(deliveries) => deliveries,
            Err(err) => {
                warn!("GC could not list deliveries for {}: {err}", self.selector);
                return Err(err.into());
            }
        };

        let mut report = CollectReport::default();
        for delivery in deliveries {
            if !force && !delivery.completed {
                report.retained += 1;
                continue;
            }
            match self.backend.delete_delivery(&delivery.id).await {
                Ok(()) => {
                    trace!("GC deleted delivery {}", delivery.id);
                    GC_DELETIONS.with_label_values(&["success"]).inc();
                    report.deleted += 1;
                }
                Err(err) => {
                    warn!("GC failed to delete delivery {}: {err}", delivery.id);
                    GC_DELETIONS.with_label_values(&["failure"]).inc();
                    report.failed += 1;
                }
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            debug!(
                "GC ({}) force={force}: deleted {}, retained {}, failed {}",
                self.selector, report.deleted, report.retained, report.failed
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dispatch::{DeliveryKind, DeliverySpec, DeliveryStatus, LocalBackend};

    fn spec(sender: &str, namespace: &str) -> DeliverySpec {
        DeliverySpec {
            namespace: namespace.to_string(),
            sender: sender.to_string(),
            recipient: "all".to_string(),
            topic: "hello".to_string(),
            event_type: "io.chatter.message.hello".to_string(),
            mood: "neutral".to_string(),
            kind: DeliveryKind::Utterance,
            message: "hi".to_string(),
        }
    }

    fn collector(backend: &LocalBackend, page_size: usize) -> GarbageCollector {
        GarbageCollector::new(Arc::new(backend.clone()), "alice", "default", page_size)
    }

    #[tokio::test]
    async fn unforced_pass_deletes_only_completed() {
        let backend = LocalBackend::detached();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(backend.create_delivery(spec("alice", "default")).await.unwrap());
        }
        backend.mark_completed(&ids[1]).await.unwrap();

        let report = collector(&backend, 100).collect(false).await.unwrap();
        assert_eq!(
            report,
            CollectReport {
                deleted: 1,
                retained: 2,
                failed: 0
            }
        );
        let left: Vec<String> = backend.deliveries().await.into_iter().map(|d| d.id).collect();
        assert_eq!(left, vec![ids[0].clone(), ids[2].clone()]);
    }

    #[tokio::test]
    async fn forced_pass_is_idempotent() {
        let backend = LocalBackend::detached();
        for _ in 0..3 {
            backend.create_delivery(spec("alice", "default")).await.unwrap();
        }
        let gc = collector(&backend, 100);

        assert_eq!(gc.collect(true).await.unwrap().deleted, 3);
        assert_eq!(gc.collect(true).await.unwrap(), CollectReport::default());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn only_own_deliveries_are_touched() {
        let backend = LocalBackend::detached();
        backend.create_delivery(spec("alice", "default")).await.unwrap();
        backend.create_delivery(spec("bob", "default")).await.unwrap();
        backend.create_delivery(spec("alice", "elsewhere")).await.unwrap();

        assert_eq!(collector(&backend, 100).collect(true).await.unwrap().deleted, 1);
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn page_size_caps_a_pass() {
        let backend = LocalBackend::detached();
        for _ in 0..5 {
            backend.create_delivery(spec("alice", "default")).await.unwrap();
        }
        let gc = collector(&backend, 2);
        assert_eq!(gc.collect(true).await.unwrap().deleted, 2);
        assert_eq!(backend.len().await, 3);
    }

    /// Lists whatever the inner backend has but refuses every delete.
    struct StubbornBackend(LocalBackend);

    #[async_trait]
    impl DispatchBackend for StubbornBackend {
        async fn create_delivery(&self, spec: DeliverySpec) -> Result<String, dispatch::Error> {
            self.0.create_delivery(spec).await
        }

        async fn list_deliveries(
            &self,
            selector: &LabelSelector,
            limit: usize,
        ) -> Result<Vec<DeliveryStatus>, dispatch::Error> {
            self.0.list_deliveries(selector, limit).await
        }

        async fn delete_delivery(&self, id: &str) -> Result<(), dispatch::Error> {
            Err(dispatch::Error::Rejected(format!("{id} is protected")))
        }
    }

    #[tokio::test]
    async fn delete_failures_do_not_stop_the_pass() {
        let inner = LocalBackend::detached();
        let backend = Arc::new(StubbornBackend(inner.clone()));
        for _ in 0..3 {
            backend.create_delivery(spec("alice", "default")).await.unwrap();
        }
        let gc = GarbageCollector::new(backend, "alice", "default", 100);

        let report = gc.collect(true).await.unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.deleted, 0);
        assert_eq!(inner.len().await, 3);
    }
}
