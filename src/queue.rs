// src/queue.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::notifications::{JobEnvelope, NotificationWorker};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue closed")]
    Closed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &JobEnvelope) -> Result<(), QueueError>;

    /// Parks a job that will not be retried again.
    async fn dead_letter(&self, job: &JobEnvelope, reason: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: JobEnvelope,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    fn new(job: &JobEnvelope, reason: &str) -> Self {
        Self {
            job: job.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        }
    }
}

pub struct RabbitQueue {
    conn: Connection,
    channel: Channel,
    queue_name: String,
    dead_letter_queue: String,
}

impl RabbitQueue {
    pub async fn connect(
        url: &str,
        queue_name: &str,
        dead_letter_queue: &str,
    ) -> Result<Self, QueueError> {
        let conn = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = conn.create_channel().await?;

        let durable = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        channel
            .queue_declare(queue_name, durable, FieldTable::default())
            .await?;
        channel
            .queue_declare(dead_letter_queue, durable, FieldTable::default())
            .await?;

        log::info!("rabbitmq connected queue={queue_name} dead_letter_queue={dead_letter_queue}");
        Ok(Self {
            conn,
            channel,
            queue_name: queue_name.to_string(),
            dead_letter_queue: dead_letter_queue.to_string(),
        })
    }

    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), QueueError> {
        self.channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;
        Ok(())
    }

    /// Starts consuming jobs on a fresh channel. Each delivery is handled on
    /// its own task and acked once the worker is done with it.
    pub async fn spawn_consumer(
        &self,
        worker: NotificationWorker,
        prefetch: u16,
    ) -> Result<(), QueueError> {
        let channel = self.conn.create_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        let mut consumer = channel
            .basic_consume(
                &self.queue_name,
                "notification-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tokio::spawn(async move {
            let _channel = channel;
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        log::error!("rabbitmq delivery error: {e}");
                        continue;
                    }
                };

                let worker = worker.clone();
                tokio::spawn(async move {
                    match serde_json::from_slice::<JobEnvelope>(&delivery.data) {
                        Ok(envelope) => {
                            worker.handle(&envelope).await;
                        }
                        Err(e) => log::error!("dropping undecodable notification job: {e}"),
                    }
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        log::error!("rabbitmq ack error: {e}");
                    }
                });
            }
            log::warn!("notification consumer stream ended");
        });

        Ok(())
    }
}

#[async_trait]
impl JobQueue for RabbitQueue {
    async fn enqueue(&self, job: &JobEnvelope) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;
        self.publish(&self.queue_name, &payload).await
    }

    async fn dead_letter(&self, job: &JobEnvelope, reason: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&DeadLetter::new(job, reason))?;
        self.publish(&self.dead_letter_queue, &payload).await
    }
}

/// In-process queue backed by unbounded tokio channels.
#[derive(Clone)]
pub struct ChannelQueue {
    jobs: mpsc::UnboundedSender<JobEnvelope>,
    dead: mpsc::UnboundedSender<DeadLetter>,
}

pub struct ChannelReceivers {
    pub jobs: mpsc::UnboundedReceiver<JobEnvelope>,
    pub dead: mpsc::UnboundedReceiver<DeadLetter>,
}

impl ChannelQueue {
    pub fn new() -> (Self, ChannelReceivers) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        (
            Self {
                jobs: jobs_tx,
                dead: dead_tx,
            },
            ChannelReceivers {
                jobs: jobs_rx,
                dead: dead_rx,
            },
        )
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn enqueue(&self, job: &JobEnvelope) -> Result<(), QueueError> {
        self.jobs.send(job.clone()).map_err(|_| QueueError::Closed)
    }

    async fn dead_letter(&self, job: &JobEnvelope, reason: &str) -> Result<(), QueueError> {
        self.dead
            .send(DeadLetter::new(job, reason))
            .map_err(|_| QueueError::Closed)
    }
}

/// Drains the in-process queue, one task per job.
pub async fn run_local_worker(
    mut jobs: mpsc::UnboundedReceiver<JobEnvelope>,
    worker: NotificationWorker,
) {
    while let Some(envelope) = jobs.recv().await {
        let worker = worker.clone();
        tokio::spawn(async move {
            worker.handle(&envelope).await;
        });
    }
}

/// Logs dead letters produced by the in-process queue.
pub async fn log_dead_letters(mut dead: mpsc::UnboundedReceiver<DeadLetter>) {
    while let Some(letter) = dead.recv().await {
        log::error!(
            "dead letter kind={} job_id={} failed_at={}: {}",
            letter.job.job.kind(),
            letter.job.id,
            letter.failed_at,
            letter.reason
        );
    }
}
