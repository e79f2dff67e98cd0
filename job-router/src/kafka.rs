use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_kafka::admin::{
    create_admin_client, create_topic, fetch_topic_listing, CreateTopicError,
};
use common_kafka::config::{ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::create_kafka_consumer;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use futures::FutureExt;
use rdkafka::admin::AdminClient;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::Message;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::{
    Broker, RecordSink, RecordSource, SourceRecord, TopicAdmin, TopicCreation, TopicListing,
};
use crate::error::{ProvisioningError, PublishError, TransportError};
use crate::metrics_consts::{KAFKA_CONSUMER_ERROR, KAFKA_PRODUCER_ERROR};
use crate::router::RouterConfig;

/// Opens rdkafka clients against the cluster in `kafka`.
#[derive(Clone, Debug)]
pub struct KafkaBroker {
    pub kafka: KafkaConfig,
    pub offset_reset: String,
    pub auto_commit_interval_ms: u32,
    /// Transient consumer errors tolerated in a row before the source gives up
    pub max_consecutive_errors: u64,
    pub graceful_shutdown: Duration,
}

impl KafkaBroker {
    pub fn new(kafka: KafkaConfig) -> Self {
        Self {
            kafka,
            offset_reset: "earliest".to_string(),
            auto_commit_interval_ms: 5000,
            max_consecutive_errors: 30,
            graceful_shutdown: Duration::from_secs(10),
        }
    }

    fn admin_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka.kafka_admin_timeout_ms.into())
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    type Source = KafkaSource;
    type Sink = KafkaSink;
    type Admin = KafkaAdmin;

    async fn open_source(&self, config: &RouterConfig) -> Result<KafkaSource, TransportError> {
        let consumer_config = ConsumerConfig {
            kafka_consumer_offset_reset: self.offset_reset.clone(),
            kafka_consumer_auto_commit_interval_ms: self.auto_commit_interval_ms,
            ..ConsumerConfig::new(&config.consumer_group, &config.source_topic)
        };
        let consumer = create_kafka_consumer(&self.kafka, &consumer_config)?;
        info!(
            "Subscribed to {} as consumer group {}",
            config.source_topic, config.consumer_group
        );

        Ok(KafkaSource {
            consumer,
            source_topic: config.source_topic.clone(),
            max_consecutive_errors: self.max_consecutive_errors,
            error_count: 0,
        })
    }

    async fn open_sink(&self, config: &RouterConfig) -> Result<KafkaSink, TransportError> {
        let client_id = format!("{}-producer", config.consumer_group);
        let producer = create_kafka_producer(&self.kafka, &client_id).await?;

        Ok(KafkaSink {
            producer,
            graceful_shutdown: self.graceful_shutdown,
        })
    }

    async fn open_admin(&self) -> Result<KafkaAdmin, TransportError> {
        let admin = create_admin_client(&self.kafka)?;

        Ok(KafkaAdmin {
            admin: Arc::new(admin),
            timeout: self.admin_timeout(),
        })
    }
}

pub struct KafkaSource {
    consumer: StreamConsumer<KafkaContext>,
    source_topic: String,
    max_consecutive_errors: u64,
    error_count: u64,
}

fn detach(message: &BorrowedMessage<'_>) -> SourceRecord {
    SourceRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

/// What the source does about a consumer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorAction {
    /// Wait this long and keep polling; the client reconnects or seeks on its own
    Retry(Duration),
    Fail,
}

/// Maps a consumer error to its metric label and the action to take.
/// `attempt` is the number of consecutive errors so far, starting at 1.
fn classify_consumer_error(e: &KafkaError, attempt: u64) -> (&'static str, ErrorAction) {
    use ErrorAction::{Fail, Retry};

    match e {
        KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut) => {
            ("op_timed_out", Retry(Duration::ZERO))
        }
        // auto.offset.reset decides where the client seeks to
        KafkaError::MessageConsumption(RDKafkaErrorCode::OffsetOutOfRange) => {
            ("offset_out_of_range", Retry(Duration::from_millis(500)))
        }
        KafkaError::MessageConsumption(_) => (
            "consumer",
            Retry(Duration::from_millis(100 * attempt.min(10))),
        ),
        KafkaError::MessageConsumptionFatal(_) => ("consumer_fatal", Fail),
        KafkaError::Global(RDKafkaErrorCode::AllBrokersDown) => {
            ("all_brokers_down", Retry(Duration::from_secs(attempt.min(5))))
        }
        KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure) => {
            ("broker_transport", Retry(Duration::from_secs(attempt.min(3))))
        }
        KafkaError::Global(RDKafkaErrorCode::Authentication) => ("authentication", Fail),
        KafkaError::Global(_) => (
            "global",
            Retry(Duration::from_millis(500 * attempt.min(6))),
        ),
        _ => (
            "unexpected",
            Retry(Duration::from_millis(100 * attempt.min(10))),
        ),
    }
}

impl KafkaSource {
    /// Adds a received message to `batch`, or accounts for a consumer error.
    /// Returns the error when it is fatal, or when the run of transient
    /// errors exhausted the budget.
    async fn accept(
        &mut self,
        received: Result<SourceRecord, KafkaError>,
        batch: &mut Vec<SourceRecord>,
    ) -> Result<(), TransportError> {
        let e = match received {
            Ok(record) => {
                self.error_count = 0;
                batch.push(record);
                return Ok(());
            }
            Err(e) => e,
        };

        self.error_count += 1;
        let (label, action) = classify_consumer_error(&e, self.error_count);
        match action {
            ErrorAction::Fail => {
                error!(
                    "Fatal consumer error on {}: {:?}",
                    self.source_topic, e
                );
                metrics::counter!(KAFKA_CONSUMER_ERROR, &[("level", "fatal"), ("error", label)])
                    .increment(1);
                return Err(e.into());
            }
            ErrorAction::Retry(backoff) => {
                warn!(
                    "Consumer error on {} ({} in a row), retrying in {:?}: {:?}",
                    self.source_topic, self.error_count, backoff, e
                );
                metrics::counter!(KAFKA_CONSUMER_ERROR, &[("level", "warn"), ("error", label)])
                    .increment(1);
            }
        }

        if self.error_count >= self.max_consecutive_errors {
            error!(
                "{} consecutive consumer errors on {}, giving up",
                self.error_count, self.source_topic
            );
            return Err(TransportError::Disconnected(format!(
                "{} consecutive consumer errors, last: {}",
                self.error_count, e
            )));
        }
        if let ErrorAction::Retry(backoff) = action {
            if !backoff.is_zero() {
                sleep(backoff).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<SourceRecord>, TransportError> {
        let mut batch = Vec::new();

        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(received) => received.map(|message| detach(&message)),
            Err(_) => return Ok(batch),
        };
        self.accept(first, &mut batch).await?;

        // drain what the client already buffered, without waiting again
        while batch.len() < max_records {
            let Some(received) = self.consumer.recv().now_or_never() else {
                break;
            };
            let received = received.map(|message| detach(&message));
            self.accept(received, &mut batch).await?;
        }

        Ok(batch)
    }

    fn close(self) {
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            // NoOffset when nothing was consumed since the last auto-commit
            debug!("Final offset commit for {} skipped: {e}", self.source_topic);
        }
        self.consumer.unsubscribe();
        info!("Unsubscribed from source topic {}", self.source_topic);
    }
}

pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    graceful_shutdown: Duration,
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| PublishError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                metrics::counter!(
                    KAFKA_PRODUCER_ERROR,
                    &[("level", "warn"), ("error", "send_future_canceled"),]
                )
                .increment(1);
                Err(PublishError::Canceled {
                    topic: topic.to_string(),
                })
            }
        }
    }

    fn close(self) {
        info!("Graceful shutdown: flushing producer...");
        match self.producer.flush(self.graceful_shutdown) {
            Ok(_) => info!("Graceful shutdown: producer flushed"),
            Err(e) => {
                warn!("Failed to flush producer on graceful shutdown: {e:?}");
                metrics::counter!(
                    KAFKA_PRODUCER_ERROR,
                    &[("level", "warn"), ("error", "flush_producer"),]
                )
                .increment(1);
            }
        }
    }
}

/// Cloning shares the underlying admin client.
#[derive(Clone)]
pub struct KafkaAdmin {
    admin: Arc<AdminClient<KafkaContext>>,
    timeout: Duration,
}

#[async_trait]
impl TopicAdmin for KafkaAdmin {
    async fn list_topics(&self) -> Result<Vec<TopicListing>, TransportError> {
        let admin = self.admin.clone();
        let timeout = self.timeout;

        // metadata requests block the calling thread
        tokio::task::spawn_blocking(move || fetch_topic_listing(&admin, timeout))
            .await
            .map_err(|e| TransportError::Disconnected(format!("topic listing task failed: {e}")))?
            .map_err(TransportError::from)
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<TopicCreation, ProvisioningError> {
        create_topic(&self.admin, name, partitions, replication_factor, self.timeout)
            .await
            .map_err(|e| match e {
                CreateTopicError::Rejected { topic, code } => ProvisioningError::Rejected {
                    topic,
                    reason: code.to_string(),
                },
                CreateTopicError::Kafka(e) => ProvisioningError::Unavailable {
                    topic: name.to_string(),
                    reason: e.to_string(),
                },
                CreateTopicError::MissingResult(topic) => ProvisioningError::Unavailable {
                    topic,
                    reason: "no result in create topics response".to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_consumer_errors_back_off() {
        let (label, action) = classify_consumer_error(
            &KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            2,
        );
        assert_eq!(label, "all_brokers_down");
        assert_eq!(action, ErrorAction::Retry(Duration::from_secs(2)));

        // backoff stops growing
        let (_, action) = classify_consumer_error(
            &KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition),
            50,
        );
        assert_eq!(action, ErrorAction::Retry(Duration::from_secs(1)));

        let (_, action) = classify_consumer_error(
            &KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut),
            1,
        );
        assert_eq!(action, ErrorAction::Retry(Duration::ZERO));
    }

    #[test]
    fn test_fatal_consumer_errors() {
        for e in [
            KafkaError::MessageConsumptionFatal(RDKafkaErrorCode::Fatal),
            KafkaError::Global(RDKafkaErrorCode::Authentication),
        ] {
            assert_eq!(classify_consumer_error(&e, 1).1, ErrorAction::Fail);
        }
    }
}
