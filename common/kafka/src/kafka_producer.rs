use crate::config::KafkaConfig;

use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientContext;
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const KAFKA_CLIENT_ERROR: &str = "kafka_client_error";

/// Client context shared by every client we build: it routes librdkafka's
/// asynchronous error callbacks into tracing and metrics instead of stderr.
#[derive(Clone, Default)]
pub struct KafkaContext {
    client_id: String,
}

impl KafkaContext {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl ClientContext for KafkaContext {
    fn error(&self, error: KafkaError, reason: &str) {
        warn!(
            client = %self.client_id,
            "librdkafka reported an error: {error}: {reason}"
        );
        metrics::counter!(KAFKA_CLIENT_ERROR, &[("client", self.client_id.clone())]).increment(1);
    }
}

impl ConsumerContext for KafkaContext {}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    client_id: &str,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = config.client_config();
    client_config
        .set("client.id", client_id)
        // a record only counts as published once every in-sync replica has it
        .set("acks", "all")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        );

    debug!("rdkafka producer configuration: {:?}", client_config);
    let api: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext::new(client_id))?;

    // "Ping" the Kafka brokers by requesting metadata
    match api.client().fetch_metadata(
        None,
        std::time::Duration::from_millis(config.kafka_admin_timeout_ms.into()),
    ) {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Serializes every item as JSON and produces it to `topic`, keyed by
/// `key_extractor`. Results come back in the order the items were passed in.
pub async fn send_keyed_iter_to_kafka<T, C: ClientContext>(
    kafka_producer: &FutureProducer<C>,
    topic: &str,
    key_extractor: impl Fn(&T) -> Option<String>,
    iter: impl IntoIterator<Item = T>,
) -> Vec<Result<(), KafkaProduceError>>
where
    T: Serialize,
{
    let mut results = Vec::new();
    let mut handles = Vec::new();

    for (index, item) in iter.into_iter().enumerate() {
        let key = key_extractor(&item);
        let payload = match serde_json::to_string(&item)
            .map_err(|e| KafkaProduceError::SerializationError { error: e })
        {
            Ok(p) => p,
            Err(e) => {
                results.push((index, Err(e)));
                continue;
            }
        };

        let record = FutureRecord {
            topic,
            key: key.as_deref(),
            payload: Some(&payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        match kafka_producer.send_result(record) {
            Ok(future_handle) => handles.push((index, future_handle)),
            Err((e, _)) => results.push((
                index,
                Err(KafkaProduceError::KafkaProduceError { error: e }),
            )),
        }
    }

    for (index, future_handle) in handles {
        match future_handle.await {
            Ok(Ok(_)) => results.push((index, Ok(()))),
            Ok(Err((e, _))) => results.push((
                index,
                Err(KafkaProduceError::KafkaProduceError { error: e }),
            )),
            Err(_) => results.push((index, Err(KafkaProduceError::KafkaProduceCanceled))),
        }
    }

    results.sort_by_key(|e| e.0);

    results.into_iter().map(|(_, r)| r).collect()
}
