use rdkafka::error::KafkaError;
use thiserror::Error;

/// A value that is well structured but outside its allowed domain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0:?} is not a valid U.S. zip code")]
    InvalidZipCode(String),
    #[error("{0:?} is not a two letter U.S. state code")]
    InvalidState(String),
    #[error("latitude {0} is outside (-90, 90)")]
    InvalidLatitude(f64),
    #[error("longitude {0} is outside (-180, 180)")]
    InvalidLongitude(f64),
    #[error("{0:?} is not a valid item size, must be small, medium or large")]
    InvalidItemSize(String),
}

/// An address that doesn't have the expected delimiter structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no city segment between the first and second comma of {0:?}")]
    MissingCity(String),
    #[error("no state token before the zip code of {0:?}")]
    MissingState(String),
}

/// Rejection of a job record at construction or mutation time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A consumed record that can't be routed. Always scoped to one record.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("record has no payload")]
    EmptyPayload,
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("required field {0} is missing or blank")]
    MissingField(&'static str),
    #[error("{0:?} is not a legal topic name")]
    InvalidTopicName(String),
    #[error("job type {0:?} can't be used as a topic name segment")]
    InvalidJobType(String),
}

/// Topic creation failed for a reason other than the topic already existing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisioningError {
    #[error("broker rejected creation of topic {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("could not reach broker to create topic {topic}: {reason}")]
    Unavailable { topic: String, reason: String },
}

/// Broker unreachable, connection lost, or a client that could not be opened.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("broker connection lost: {0}")]
    Disconnected(String),
}

/// The producer gave up on a single record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("failed to publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("delivery to {topic} was canceled")]
    Canceled { topic: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("source topic must not be empty")]
    EmptySourceTopic,
    #[error("{0:?} is not a legal topic name")]
    InvalidSourceTopic(String),
    #[error("consumer group must not be empty")]
    EmptyConsumerGroup,
    #[error("poll timeout must be greater than zero")]
    ZeroPollTimeout,
    #[error("max poll records must be greater than zero")]
    ZeroBatchSize,
    #[error("destination topics need at least one partition, got {0}")]
    InvalidPartitions(i32),
    #[error("destination topics need a replication factor of at least one, got {0}")]
    InvalidReplicationFactor(i32),
}

/// Failures surfaced to whatever owns a router.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("source topic {0} does not exist on the broker")]
    SourceTopicMissing(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("router task failed: {0}")]
    TaskFailed(String),
}
