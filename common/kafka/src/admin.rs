use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::util::Timeout;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::kafka_producer::KafkaContext;

/// A topic as reported by the cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicListing {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Successful outcomes of a create-topic request. A topic that already
/// exists is not a failure from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    AlreadyExists,
}

#[derive(Error, Debug)]
pub enum CreateTopicError {
    #[error("broker rejected creation of topic {topic}: {code}")]
    Rejected {
        topic: String,
        code: RDKafkaErrorCode,
    },
    #[error("create topics request failed: {0}")]
    Kafka(#[from] KafkaError),
    #[error("broker returned no result for topic {0}")]
    MissingResult(String),
}

pub fn create_admin_client(config: &KafkaConfig) -> Result<AdminClient<KafkaContext>, KafkaError> {
    let client_config = config.client_config();
    debug!("rdkafka admin configuration: {:?}", client_config);
    client_config.create_with_context(KafkaContext::new("admin"))
}

/// Lists every topic on the cluster. This blocks the calling thread for up
/// to `timeout` while librdkafka fetches metadata.
pub fn fetch_topic_listing(
    admin: &AdminClient<KafkaContext>,
    timeout: Duration,
) -> Result<Vec<TopicListing>, KafkaError> {
    let metadata = admin
        .inner()
        .fetch_metadata(None, Timeout::from(timeout))?;

    let listing: Vec<TopicListing> = metadata
        .topics()
        .iter()
        .filter(|topic| topic.error().is_none())
        .map(|topic| TopicListing {
            name: topic.name().to_string(),
            partitions: topic.partitions().len() as i32,
            replication_factor: topic
                .partitions()
                .first()
                .map(|p| p.replicas().len() as i32)
                .unwrap_or_default(),
        })
        .collect();

    debug!("Fetched metadata for {} topics", listing.len());
    Ok(listing)
}

pub async fn create_topic(
    admin: &AdminClient<KafkaContext>,
    name: &str,
    partitions: i32,
    replication_factor: i32,
    timeout: Duration,
) -> Result<TopicCreation, CreateTopicError> {
    let new_topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication_factor));
    let opts = AdminOptions::new().operation_timeout(Some(timeout));

    let results = admin.create_topics(&[new_topic], &opts).await?;

    match results.into_iter().next() {
        Some(Ok(topic)) => {
            info!(
                "Topic {} created with {} partitions, replication factor {}",
                topic, partitions, replication_factor
            );
            Ok(TopicCreation::Created)
        }
        Some(Err((topic, RDKafkaErrorCode::TopicAlreadyExists))) => {
            info!("Topic {} already existed", topic);
            Ok(TopicCreation::AlreadyExists)
        }
        Some(Err((topic, code))) => Err(CreateTopicError::Rejected { topic, code }),
        None => Err(CreateTopicError::MissingResult(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::mock_kafka_config;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;

    #[test]
    fn test_fetch_topic_listing() {
        let cluster: MockCluster<'static, DefaultProducerContext> =
            MockCluster::new(1).expect("failed to create mock brokers");
        cluster.create_topic("houston-tx-delivery", 3, 1).unwrap();

        let admin = create_admin_client(&mock_kafka_config(cluster.bootstrap_servers())).unwrap();
        let listing = fetch_topic_listing(&admin, Duration::from_secs(5)).unwrap();

        let topic = listing
            .iter()
            .find(|topic| topic.name == "houston-tx-delivery")
            .expect("created topic should be listed");
        assert_eq!(topic.partitions, 3);
        assert_eq!(topic.replication_factor, 1);
    }
}
