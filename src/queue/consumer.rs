use futures_lite::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use lapin::{options::*, types::FieldTable, Channel, Connection, Error as LapinError};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::retry::{disposition, Disposition};
use super::{SEND_QUEUE, TOKEN_QUEUE};

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Broker error: {0}")]
    BrokerError(#[from] LapinError),

    #[error("Queue setup failed for '{queue}': {source}")]
    SetupError { queue: String, source: LapinError },
}

/// Business logic invoked per message. Errors are treated as opaque text by
/// the consumer's retry classification, so implementations must keep the
/// legacy error phrasings stable.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process_send_message(&self, payload: &[u8]) -> anyhow::Result<()>;
    async fn process_token_message(&self, payload: &[u8]) -> anyhow::Result<()>;
}

/// Which handler a queue is bound to.
#[derive(Debug, Clone, Copy)]
enum HandlerKind {
    Send,
    Token,
}

/// A fixed-size pool of worker slots shared across every dispatch loop of one
/// consumer. `spawn` blocks until a slot frees up, which is the consumer's
/// only backpressure point; the permit travels into the task and is released
/// when the task finishes, whatever the outcome.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub(crate) fn new(slots: usize) -> Self {
        WorkerPool {
            permits: Arc::new(Semaphore::new(slots)),
        }
    }

    pub(crate) async fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // The semaphore is owned by the pool and never closed.
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            let _slot = permit;
            work.await;
        });
    }
}

/// Consumes the push queues with manual acknowledgment and a bounded worker
/// pool. One dispatch loop per queue; all loops share a single pool of
/// `workers` slots.
pub struct PushConsumer<P> {
    conn: Arc<Connection>,
    service: Arc<P>,
    workers: usize,
    send_queue: String,
    token_queue: String,
}

impl<P> PushConsumer<P>
where
    P: MessageProcessor + 'static,
{
    pub fn new(conn: Arc<Connection>, service: Arc<P>, workers: usize) -> Self {
        PushConsumer {
            conn,
            service,
            workers,
            send_queue: SEND_QUEUE.to_string(),
            token_queue: TOKEN_QUEUE.to_string(),
        }
    }

    pub fn with_queues(mut self, send_queue: &str, token_queue: &str) -> Self {
        self.send_queue = send_queue.to_string();
        self.token_queue = token_queue.to_string();
        self
    }

    /// Declares and subscribes every queue binding, then runs until the
    /// shutdown signal flips. A declaration that fails even passively is
    /// fatal for the whole call; no dispatch loop is started for that queue.
    ///
    /// Cancellation is cooperative: dispatch loops stop taking deliveries and
    /// close their channels, but in-flight worker tasks run to completion and
    /// issue their own terminal ack/nack/reject.
    pub async fn consume(&self, shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let pool = WorkerPool::new(self.workers);

        let bindings = [
            (self.send_queue.clone(), HandlerKind::Send),
            (self.token_queue.clone(), HandlerKind::Token),
        ];

        for (queue, kind) in bindings {
            self.bind_queue(&queue, kind, pool.clone(), shutdown.clone())
                .await?;
        }

        let mut shutdown = shutdown;
        if !*shutdown.borrow() {
            // A dropped sender counts as a shutdown request.
            let _ = shutdown.changed().await;
        }
        info!("Shutting down consumer...");
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        kind: HandlerKind,
        pool: WorkerPool,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError> {
        let channel = self.conn.create_channel().await?;
        let channel = self.declare_queue(channel, queue).await?;

        let consumer = channel
            .basic_consume(
                queue,
                &format!("consumer-{}", uuid::Uuid::new_v4()),
                BasicConsumeOptions::default(), // manual ack
                FieldTable::default(),
            )
            .await
            .map_err(|source| ConsumerError::SetupError {
                queue: queue.to_string(),
                source,
            })?;

        let service = self.service.clone();
        let queue_name = queue.to_string();
        tokio::spawn(dispatch_loop(
            consumer, channel, queue_name, kind, service, pool, shutdown,
        ));

        info!("Started consumer for queue: {}", queue);
        Ok(())
    }

    /// Declares the queue with the canonical options (durable, no
    /// auto-delete, non-exclusive, no arguments). If that fails because the
    /// queue already exists with different parameters, falls back to a single
    /// passive declare on a fresh channel; the declare failure closes the
    /// original one.
    async fn declare_queue(
        &self,
        channel: Channel,
        queue: &str,
    ) -> Result<Channel, ConsumerError> {
        let declare = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;

        match declare {
            Ok(_) => Ok(channel),
            Err(err) => {
                warn!(
                    "Queue {} declaration failed: {}. Attempting passive declare...",
                    queue, err
                );
                let fallback = self.conn.create_channel().await?;
                fallback
                    .queue_declare(
                        queue,
                        QueueDeclareOptions {
                            passive: true,
                            durable: true,
                            ..QueueDeclareOptions::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|source| {
                        error!(
                            "Passive declare also failed. Queue {} may need manual deletion: {}",
                            queue, source
                        );
                        ConsumerError::SetupError {
                            queue: queue.to_string(),
                            source,
                        }
                    })?;
                info!("Using existing queue: {}", queue);
                Ok(fallback)
            }
        }
    }
}

/// Takes deliveries in receipt order and hands each to an independent worker
/// task, blocking on slot acquisition when the pool is exhausted. Stops on
/// shutdown or when the subscription stream ends, then closes its channel.
async fn dispatch_loop<P>(
    mut consumer: lapin::Consumer,
    channel: Channel,
    queue: String,
    kind: HandlerKind,
    service: Arc<P>,
    pool: WorkerPool,
    mut shutdown: watch::Receiver<bool>,
) where
    P: MessageProcessor + 'static,
{
    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    error!("Error receiving message from {}: {}", queue, err);
                    if !channel.status().connected() {
                        break;
                    }
                    continue;
                }
                None => break,
            },
        };

        let service = service.clone();
        let queue = queue.clone();
        pool.spawn(async move {
            handle_delivery(delivery, kind, service, queue).await;
        })
        .await;
    }

    info!("Dispatch loop for {} stopped", queue);
    if channel.status().connected() {
        if let Err(err) = channel.close(200, "consumer shutdown").await {
            warn!("Failed to close channel for {}: {}", queue, err);
        }
    }
}

/// Processes one delivery and terminates it exactly once: ack on success,
/// nack with requeue on a transient failure, reject without requeue on a
/// permanent one.
async fn handle_delivery<P>(
    delivery: lapin::message::Delivery,
    kind: HandlerKind,
    service: Arc<P>,
    queue: String,
) where
    P: MessageProcessor,
{
    let start = Instant::now();
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!("[{}] Processing message from {}", correlation_id, queue);

    let outcome = match kind {
        HandlerKind::Send => service.process_send_message(&delivery.data).await,
        HandlerKind::Token => service.process_token_message(&delivery.data).await,
    };

    if let Err(err) = &outcome {
        warn!(
            "[{}] Handler failed after {:?}: {:#}",
            correlation_id,
            start.elapsed(),
            err
        );
    }

    match disposition(&outcome) {
        Disposition::Ack => {
            info!(
                "[{}] Message processed successfully in {:?}",
                correlation_id,
                start.elapsed()
            );
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                error!("[{}] Failed to acknowledge message: {}", correlation_id, err);
            }
        }
        Disposition::Requeue => {
            info!("[{}] Retrying message (transient error)", correlation_id);
            let options = BasicNackOptions {
                requeue: true,
                ..BasicNackOptions::default()
            };
            if let Err(err) = delivery.nack(options).await {
                error!(
                    "[{}] Failed to negatively acknowledge message: {}",
                    correlation_id, err
                );
            }
        }
        Disposition::Reject => {
            info!(
                "[{}] Non-retryable error. Rejecting message without requeue.",
                correlation_id
            );
            if let Err(err) = delivery.reject(BasicRejectOptions { requeue: false }).await {
                error!("[{}] Failed to reject message: {}", correlation_id, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    async fn wait_until(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} completions, saw {}",
            expected,
            counter.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn worker_pool_never_exceeds_slot_count() {
        let pool = WorkerPool::new(10);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        // 25 simultaneous arrivals against 10 slots: the last 15 submissions
        // block in spawn until earlier workers release their slots.
        for _ in 0..25 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let done = done.clone();
            pool.spawn(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(25)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        wait_until(&done, 25).await;
        assert!(peak.load(Ordering::SeqCst) <= 10);
        assert!(peak.load(Ordering::SeqCst) > 1, "workers did not overlap");
    }

    #[tokio::test]
    async fn slots_are_released_when_workers_finish() {
        let pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        // Three rounds through a two-slot pool only work if slots come back.
        for _ in 0..6 {
            let done = done.clone();
            pool.spawn(async move {
                sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        wait_until(&done, 6).await;
    }

    #[tokio::test]
    async fn in_flight_workers_survive_the_dispatcher() {
        let pool = WorkerPool::new(10);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let done = done.clone();
            pool.spawn(async move {
                sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        // Cancellation drops the pool handle, as when a dispatch loop exits;
        // already-spawned tasks must still run to completion.
        drop(pool);

        wait_until(&done, 3).await;
    }
}
