use crate::{DeliverySpec, DeliveryStatus, DispatchBackend, Error, EventSink, LabelSelector};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use svix_ksuid::{Ksuid, KsuidLike};
use tokio::sync::RwLock;
use tracing::*;

/// In-process dispatch backend.
///
/// Every created delivery gets a record and, when a sink is attached, a
/// spawned job that publishes the event and then flips the record to
/// completed. Records stay until someone deletes them, which is exactly
/// what the actor's garbage collector is for.
#[derive(Clone)]
pub struct LocalBackend {
    deliveries: Arc<RwLock<Vec<DeliveryStatus>>>,
    sink: Option<Arc<dyn EventSink>>,
    publish_twice: bool,
}

impl LocalBackend {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            deliveries: Default::default(),
            sink: Some(sink),
            publish_twice: false,
        }
    }

    /// A backend without delivery jobs. Records never complete unless
    /// [`LocalBackend::mark_completed`] is called.
    pub fn detached() -> Self {
        Self {
            deliveries: Default::default(),
            sink: None,
            publish_twice: false,
        }
    }

    /// Makes every job publish its event twice, the way an at-least-once
    /// transport occasionally does.
    pub fn with_duplicate_publishes(mut self, enabled: bool) -> Self {
        self.publish_twice = enabled;
        self
    }

    pub async fn mark_completed(&self, id: &str) -> Result<(), Error> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        delivery.completed = true;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.deliveries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.deliveries.read().await.is_empty()
    }

    /// Snapshot of every record, oldest first.
    pub async fn deliveries(&self) -> Vec<DeliveryStatus> {
        self.deliveries.read().await.clone()
    }

    fn spawn_job(&self, id: String, spec: DeliverySpec, sink: Arc<dyn EventSink>) {
        let deliveries = self.deliveries.clone();
        let attempts = if self.publish_twice { 2 } else { 1 };
        tokio::spawn(async move {
            let event = spec.to_event(&id);
            for _ in 0..attempts {
                if let Err(err) = sink.publish(event.clone()).await {
                    warn!("Delivery {id} failed to publish: {err}");
                    return;
                }
            }
            trace!("Delivery {id} published to {}", spec.recipient);

            // the record may already have been force-collected
            if let Some(delivery) = deliveries.write().await.iter_mut().find(|d| d.id == id) {
                delivery.completed = true;
            }
        });
    }
}

#[async_trait]
impl DispatchBackend for LocalBackend {
    async fn create_delivery(&self, spec: DeliverySpec) -> Result<String, Error> {
        if spec.sender.is_empty() {
            return Err(Error::Rejected("delivery has no sender".to_string()));
        }
        if spec.recipient.is_empty() {
            return Err(Error::Rejected("delivery has no recipient".to_string()));
        }

        let id = Ksuid::new(None, None).to_string();
        self.deliveries.write().await.push(DeliveryStatus {
            id: id.clone(),
            labels: spec.labels(),
            spec: spec.clone(),
            created_at: SystemTime::now(),
            completed: false,
        });
        debug!(
            "Created delivery {id} {} -> {} ({})",
            spec.sender, spec.recipient, spec.topic
        );

        if let Some(sink) = &self.sink {
            self.spawn_job(id.clone(), spec, sink.clone());
        }
        Ok(id)
    }

    async fn list_deliveries(
        &self,
        selector: &LabelSelector,
        limit: usize,
    ) -> Result<Vec<DeliveryStatus>, Error> {
        Ok(self
            .deliveries
            .read()
            .await
            .iter()
            .filter(|d| selector.matches(&d.labels))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_delivery(&self, id: &str) -> Result<(), Error> {
        let mut deliveries = self.deliveries.write().await;
        match deliveries.iter().position(|d| d.id == id) {
            Some(index) => {
                deliveries.remove(index);
                Ok(())
            }
            None => Err(Error::NotFound(id.to_string())),
        }
    }
}
