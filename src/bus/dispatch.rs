//! Per-partition dispatch.
//!
//! Records from one partition are handled strictly one at a time, in offset
//! order. Distinct partitions run concurrently, each on its own worker task.
//! A worker acknowledges a record once its handler returns, whether or not
//! the handler reported a failure.
//!
//! Partition queues are unbounded: a stuck handler backs up only its own
//! partition and never blocks the reader feeding the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{Acknowledger, Delivery, DeliveryHandler};

struct PartitionWorker {
    tx: mpsc::UnboundedSender<Delivery>,
    task: JoinHandle<()>,
}

pub(crate) struct PartitionDispatcher {
    handler: Arc<dyn DeliveryHandler>,
    acknowledger: Arc<dyn Acknowledger>,
    workers: HashMap<i32, PartitionWorker>,
}

impl PartitionDispatcher {
    pub(crate) fn new(handler: Arc<dyn DeliveryHandler>, acknowledger: Arc<dyn Acknowledger>) -> Self {
        Self {
            handler,
            acknowledger,
            workers: HashMap::new(),
        }
    }

    /// Queue a record on its partition worker, spawning the worker on first use.
    pub(crate) fn dispatch(&mut self, delivery: Delivery) {
        let partition = delivery.partition;
        let worker = self
            .workers
            .entry(partition)
            .or_insert_with(|| spawn_worker(self.handler.clone(), self.acknowledger.clone()));

        if let Err(mpsc::error::SendError(delivery)) = worker.tx.send(delivery) {
            // Worker died (handler panicked). Replace it and retry once.
            error!(
                partition,
                handler = %self.handler.name(),
                "Partition worker stopped unexpectedly, restarting"
            );
            let replacement = spawn_worker(self.handler.clone(), self.acknowledger.clone());
            let _ = replacement.tx.send(delivery);
            self.workers.insert(partition, replacement);
        }
    }

    /// Number of partitions seen so far.
    pub(crate) fn active_partitions(&self) -> usize {
        self.workers.len()
    }

    /// Stop all workers without waiting for in-flight handlers.
    pub(crate) fn abort(&mut self) {
        for (_, worker) in self.workers.drain() {
            worker.task.abort();
        }
    }
}

impl Drop for PartitionDispatcher {
    fn drop(&mut self) {
        self.abort();
    }
}

fn spawn_worker(
    handler: Arc<dyn DeliveryHandler>,
    acknowledger: Arc<dyn Acknowledger>,
) -> PartitionWorker {
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let task = tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            handler.on_delivery(&delivery).await;

            if let Err(e) = acknowledger.ack(&delivery) {
                error!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Failed to acknowledge record"
                );
            } else {
                debug!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Record acknowledged"
                );
            }
        }
    });
    PartitionWorker { tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, NoopAcknowledger};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records (partition, offset) pairs, sleeping on partition 0 to expose
    /// whether partitions run concurrently.
    struct RecordingHandler {
        seen: Mutex<Vec<(i32, i64)>>,
        slow_partition_delay: Duration,
    }

    #[async_trait]
    impl DeliveryHandler for RecordingHandler {
        fn name(&self) -> &str {
            "recording"
        }

        async fn on_delivery(&self, delivery: &Delivery) {
            if delivery.partition == 0 {
                tokio::time::sleep(self.slow_partition_delay).await;
            }
            self.seen
                .lock()
                .unwrap()
                .push((delivery.partition, delivery.offset));
        }
    }

    struct CountingAck(AtomicUsize);

    impl Acknowledger for CountingAck {
        fn ack(&self, _delivery: &Delivery) -> Result<(), BusError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery(partition: i32, offset: i64) -> Delivery {
        Delivery {
            topic: "course".to_string(),
            partition,
            offset,
            key: None,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_partition_order_preserved() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            slow_partition_delay: Duration::from_millis(5),
        });
        let mut dispatcher = PartitionDispatcher::new(handler.clone(), Arc::new(NoopAcknowledger));

        for offset in 0..5 {
            dispatcher.dispatch(delivery(0, offset));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let seen = handler.seen.lock().unwrap().clone();
        let offsets: Vec<i64> = seen.iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_slow_partition_does_not_block_others() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            slow_partition_delay: Duration::from_millis(300),
        });
        let mut dispatcher = PartitionDispatcher::new(handler.clone(), Arc::new(NoopAcknowledger));

        dispatcher.dispatch(delivery(0, 0));
        dispatcher.dispatch(delivery(1, 0));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(1, 0)]);
        assert_eq!(dispatcher.active_partitions(), 2);
    }

    #[tokio::test]
    async fn test_every_record_acknowledged() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            slow_partition_delay: Duration::ZERO,
        });
        let ack = Arc::new(CountingAck(AtomicUsize::new(0)));
        let mut dispatcher = PartitionDispatcher::new(handler, ack.clone());

        for partition in 0..3 {
            dispatcher.dispatch(delivery(partition, 0));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(ack.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stuck_partition_backlog_does_not_block_dispatch() {
        let handler = Arc::new(RecordingHandler {
            seen: Mutex::new(Vec::new()),
            slow_partition_delay: Duration::from_secs(3600),
        });
        let mut dispatcher = PartitionDispatcher::new(handler.clone(), Arc::new(NoopAcknowledger));

        for offset in 0..200 {
            dispatcher.dispatch(delivery(0, offset));
        }
        dispatcher.dispatch(delivery(1, 0));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if handler.seen.lock().unwrap().contains(&(1, 0)) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "partition 1 never handled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!handler.seen.lock().unwrap().iter().any(|(p, _)| *p == 0));
    }
}
