//! Process-wide resource registry.
//!
//! Tracks every cached producer and live subscription so that a shutdown
//! signal can close them all. The registry moves through
//! `Unstarted -> Running -> Draining -> Closed`; once draining begins, new
//! publishes and subscriptions are refused.
//!
//! The registry is an ordinary value owned by the composition root and
//! handed to the broker client, not a global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Producer};

/// Lifecycle states of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Running,
    Draining,
    Closed,
}

/// Errors raised by the registry or while closing a resource.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Registry is draining")]
    Draining,

    #[error("Registry is closed")]
    Closed,

    #[error("Failed to create producer: {0}")]
    Producer(#[from] BusError),

    #[error("Failed to close {resource}: {message}")]
    Close { resource: String, message: String },

    #[error("Timed out closing {resource} after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },
}

/// A resource the registry can release on shutdown.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Short label for logs, e.g. `subscription course/update_redis-group`.
    fn describe(&self) -> String;

    async fn close(&self) -> Result<(), LifecycleError>;
}

/// Outcome of [`ResourceRegistry::close_all`].
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Resources closed cleanly.
    pub closed: usize,
    /// Resources whose close failed, with the failure.
    pub failed: Vec<(String, String)>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.closed + self.failed.len()
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a subscription may take to stop before it is aborted.
    pub drain_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
        }
    }
}

impl LifecycleConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Registry of producers and subscriptions.
pub struct ResourceRegistry {
    state: RwLock<LifecycleState>,
    producers: Mutex<HashMap<String, Arc<dyn Producer>>>,
    subscriptions: Mutex<Vec<Arc<dyn Closable>>>,
    drain_timeout: Duration,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::with_drain_timeout(LifecycleConfig::default().drain_timeout())
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(LifecycleState::Unstarted),
            producers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Move `Unstarted -> Running`. Returns false if already past `Unstarted`.
    pub async fn start(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Unstarted {
            *state = LifecycleState::Running;
            info!("Resource registry running");
            true
        } else {
            false
        }
    }

    /// Fail unless new resources may be registered. Starts the registry on
    /// first use.
    pub async fn ensure_accepting(&self) -> Result<(), LifecycleError> {
        if self.state().await == LifecycleState::Running {
            return Ok(());
        }
        let mut state = self.state.write().await;
        match *state {
            LifecycleState::Running => Ok(()),
            LifecycleState::Unstarted => {
                *state = LifecycleState::Running;
                info!("Resource registry running");
                Ok(())
            }
            LifecycleState::Draining => Err(LifecycleError::Draining),
            LifecycleState::Closed => Err(LifecycleError::Closed),
        }
    }

    /// Return the cached producer for `topic`, creating it on first use.
    ///
    /// No lock is held while `create` runs. If two callers race, the loser's
    /// producer is closed and the cached one returned.
    pub async fn get_or_create_producer<F, Fut>(
        &self,
        topic: &str,
        create: F,
    ) -> Result<Arc<dyn Producer>, LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Producer>, BusError>>,
    {
        self.ensure_accepting().await?;

        if let Some(existing) = self.producers.lock().await.get(topic) {
            return Ok(existing.clone());
        }

        let created = create().await?;

        let mut producers = self.producers.lock().await;
        if let Some(existing) = producers.get(topic) {
            let existing = existing.clone();
            drop(producers);
            if let Err(e) = created.close().await {
                warn!(topic = %topic, error = %e, "Failed to close duplicate producer");
            }
            return Ok(existing);
        }

        // A drain may have started while the producer was being created.
        if self.state().await != LifecycleState::Running {
            drop(producers);
            let _ = created.close().await;
            return Err(LifecycleError::Draining);
        }

        producers.insert(topic.to_string(), created.clone());
        debug!(topic = %topic, "Producer cached");
        Ok(created)
    }

    /// Register a live subscription for shutdown.
    ///
    /// Fails once draining has begun; the caller then owns closing it.
    pub async fn register_subscription(
        &self,
        subscription: Arc<dyn Closable>,
    ) -> Result<(), LifecycleError> {
        self.ensure_accepting().await?;
        let mut subscriptions = self.subscriptions.lock().await;
        debug!(subscription = %subscription.describe(), "Subscription registered");
        subscriptions.push(subscription);
        Ok(())
    }

    pub async fn producer_count(&self) -> usize {
        self.producers.lock().await.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Close every registered subscription, then every cached producer.
    ///
    /// Best-effort: one failure does not stop the rest. Idempotent; calls
    /// after the first return an empty report.
    pub async fn close_all(&self) -> DrainReport {
        {
            let mut state = self.state.write().await;
            match *state {
                LifecycleState::Closed => return DrainReport::default(),
                _ => *state = LifecycleState::Draining,
            }
        }

        let subscriptions: Vec<Arc<dyn Closable>> =
            self.subscriptions.lock().await.drain(..).collect();
        let producers: Vec<(String, Arc<dyn Producer>)> =
            self.producers.lock().await.drain().collect();

        info!(
            subscriptions = subscriptions.len(),
            producers = producers.len(),
            "Draining resources"
        );

        let mut report = DrainReport::default();

        let results = join_all(subscriptions.iter().map(|s| async move {
            let label = s.describe();
            (label, s.close().await)
        }))
        .await;
        for (label, result) in results {
            record(&mut report, label, result.map_err(|e| e.to_string()));
        }

        let results = join_all(producers.iter().map(|(topic, p)| async move {
            (format!("producer {topic}"), p.close().await)
        }))
        .await;
        for (label, result) in results {
            record(&mut report, label, result.map_err(|e| e.to_string()));
        }

        *self.state.write().await = LifecycleState::Closed;

        if report.is_clean() {
            info!(closed = report.closed, "All resources closed");
        } else {
            warn!(
                closed = report.closed,
                failed = report.failed.len(),
                "Resources closed with failures"
            );
        }

        report
    }
}

fn record(report: &mut DrainReport, label: String, result: Result<(), String>) {
    match result {
        Ok(()) => {
            debug!(resource = %label, "Closed");
            report.closed += 1;
        }
        Err(message) => {
            error!(resource = %label, error = %message, "Failed to close resource");
            report.failed.push((label, message));
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
