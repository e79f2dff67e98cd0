//! The seams between the router and the message broker.
//!
//! [`crate::kafka`] implements these over rdkafka; [`crate::test_utils`]
//! implements them in memory.

use std::time::Duration;

use async_trait::async_trait;
pub use common_kafka::admin::{TopicCreation, TopicListing};

use crate::error::{ProvisioningError, PublishError, TransportError};
use crate::router::RouterConfig;

/// A record consumed from a source topic, detached from the client buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// A subscribed consumer. Offsets are committed by the implementation.
#[async_trait]
pub trait RecordSource: Send + 'static {
    /// Waits up to `timeout` for the first record, then returns whatever is
    /// immediately available, up to `max_records`. An empty batch means the
    /// wait timed out. Errors are fatal to the caller.
    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<SourceRecord>, TransportError>;

    /// Leaves the consumer group and releases the client.
    fn close(self);
}

#[async_trait]
pub trait RecordSink: Send + Sync + 'static {
    /// Resolves once the broker acknowledged the record, or the producer gave up.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Flushes anything still queued and releases the client.
    fn close(self);
}

#[async_trait]
pub trait TopicAdmin: Send + Sync + 'static {
    async fn list_topics(&self) -> Result<Vec<TopicListing>, TransportError>;

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<TopicCreation, ProvisioningError>;
}

/// Opens clients against one broker cluster.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Source: RecordSource;
    type Sink: RecordSink;
    type Admin: TopicAdmin;

    /// Opens a consumer in `config.consumer_group`, subscribed to `config.source_topic`.
    async fn open_source(&self, config: &RouterConfig) -> Result<Self::Source, TransportError>;

    async fn open_sink(&self, config: &RouterConfig) -> Result<Self::Sink, TransportError>;

    async fn open_admin(&self) -> Result<Self::Admin, TransportError>;
}
