use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
};
use tracing::debug;

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::KafkaContext;

/// Builds a consumer in `consumer_config.kafka_consumer_group` and subscribes
/// it to `consumer_config.kafka_consumer_topic`.
///
/// Offset management is left entirely to librdkafka: offsets are stored as
/// messages are handed to the application and committed periodically.
pub fn create_kafka_consumer(
    common_config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
) -> Result<StreamConsumer<KafkaContext>, KafkaError> {
    let mut client_config = common_config.client_config();
    client_config
        .set("group.id", &consumer_config.kafka_consumer_group)
        .set(
            "auto.offset.reset",
            &consumer_config.kafka_consumer_offset_reset,
        )
        .set("enable.auto.commit", "true")
        .set("enable.auto.offset.store", "true")
        .set(
            "auto.commit.interval.ms",
            consumer_config
                .kafka_consumer_auto_commit_interval_ms
                .to_string(),
        )
        .set("enable.partition.eof", "false");

    debug!("rdkafka consumer configuration: {:?}", client_config);
    let consumer: StreamConsumer<KafkaContext> = client_config.create_with_context(
        KafkaContext::new(format!("{}-consumer", consumer_config.kafka_consumer_group)),
    )?;
    consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

    Ok(consumer)
}
