//! An in-memory broker for exercising routers without a Kafka cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{
    Broker, RecordSink, RecordSource, SourceRecord, TopicAdmin, TopicCreation, TopicListing,
};
use crate::error::{ProvisioningError, PublishError, TransportError};
use crate::router::RouterConfig;

/// A routable delivery-style payload.
pub fn job_payload(customer_id: i64, city: &str, state: &str, job_type: &str) -> Vec<u8> {
    json!({
        "job_type": job_type,
        "customer_id": customer_id,
        "school": "Texas A&M University",
        "city": city,
        "state": state,
        "zip_code": "77840",
    })
    .to_string()
    .into_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, i32>,
    queues: HashMap<String, VecDeque<SourceRecord>>,
    next_offset: HashMap<String, i64>,
    published: HashMap<String, Vec<PublishedRecord>>,

    create_calls: usize,
    open_sources: usize,
    open_sinks: usize,
    source_closes: usize,
    sink_closes: usize,
    publish_attempts: usize,

    reject_creation: Option<String>,
    poll_failure: Option<String>,
    open_source_failure: Option<String>,
    open_sink_failure: Option<String>,
    fail_publishes: bool,
    block_publishes: bool,
    creation_delay: Option<Duration>,
}

struct Inner {
    state: Mutex<State>,
    records_available: Notify,
    publishes_released: Notify,
}

/// Cloning gives another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                records_available: Notify::new(),
                publishes_released: Notify::new(),
            }),
        }
    }

    pub fn admin(&self) -> InMemoryAdmin {
        InMemoryAdmin {
            broker: self.clone(),
        }
    }

    pub fn add_topic(&self, name: &str, partitions: i32) {
        self.state().topics.insert(name.to_string(), partitions);
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.state().topics.contains_key(name)
    }

    pub fn topic_count(&self) -> usize {
        self.state().topics.len()
    }

    /// Appends a record to partition 0 of `topic` and wakes waiting consumers.
    pub fn push(&self, topic: &str, payload: Vec<u8>) {
        {
            let mut state = self.state();
            let offset = state.next_offset.entry(topic.to_string()).or_insert(0);
            let record = SourceRecord {
                topic: topic.to_string(),
                partition: 0,
                offset: *offset,
                key: None,
                payload: Some(payload),
            };
            *offset += 1;
            state
                .queues
                .entry(topic.to_string())
                .or_default()
                .push_back(record);
        }
        self.inner.records_available.notify_waiters();
    }

    pub fn published(&self, topic: &str) -> Vec<PublishedRecord> {
        self.state()
            .published
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn open_sources(&self) -> usize {
        self.state().open_sources
    }

    pub fn open_sinks(&self) -> usize {
        self.state().open_sinks
    }

    pub fn source_closes(&self) -> usize {
        self.state().source_closes
    }

    pub fn sink_closes(&self) -> usize {
        self.state().sink_closes
    }

    pub fn publish_attempts(&self) -> usize {
        self.state().publish_attempts
    }

    /// While set, create requests for new topics fail with `reason`.
    pub fn reject_topic_creation(&self, reason: Option<&str>) {
        self.state().reject_creation = reason.map(str::to_string);
    }

    /// Every poll from now on fails, including the ones already waiting.
    pub fn fail_polls(&self, reason: &str) {
        self.state().poll_failure = Some(reason.to_string());
        self.inner.records_available.notify_waiters();
    }

    pub fn fail_open_source(&self, reason: &str) {
        self.state().open_source_failure = Some(reason.to_string());
    }

    pub fn fail_open_sink(&self, reason: &str) {
        self.state().open_sink_failure = Some(reason.to_string());
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    /// While set, publishes wait without completing, like a producer that
    /// never hears back from the broker.
    pub fn block_publishes(&self, block: bool) {
        self.state().block_publishes = block;
        if !block {
            self.inner.publishes_released.notify_waiters();
        }
    }

    /// Create requests take `delay` before the broker answers.
    pub fn delay_topic_creation(&self, delay: Option<Duration>) {
        self.state().creation_delay = delay;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_batch(
        &self,
        topic: &str,
        max_records: usize,
    ) -> Result<Vec<SourceRecord>, TransportError> {
        let mut state = self.state();
        if let Some(reason) = &state.poll_failure {
            return Err(TransportError::Disconnected(reason.clone()));
        }

        let Some(queue) = state.queues.get_mut(topic) else {
            return Ok(vec![]);
        };
        let take = queue.len().min(max_records);
        Ok(queue.drain(..take).collect())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    type Source = InMemorySource;
    type Sink = InMemorySink;
    type Admin = InMemoryAdmin;

    async fn open_source(&self, config: &RouterConfig) -> Result<InMemorySource, TransportError> {
        let mut state = self.state();
        state.open_sources += 1;
        if let Some(reason) = &state.open_source_failure {
            return Err(TransportError::Disconnected(reason.clone()));
        }

        Ok(InMemorySource {
            broker: self.clone(),
            topic: config.source_topic.clone(),
        })
    }

    async fn open_sink(&self, _config: &RouterConfig) -> Result<InMemorySink, TransportError> {
        let mut state = self.state();
        state.open_sinks += 1;
        if let Some(reason) = &state.open_sink_failure {
            return Err(TransportError::Disconnected(reason.clone()));
        }

        Ok(InMemorySink {
            broker: self.clone(),
        })
    }

    async fn open_admin(&self) -> Result<InMemoryAdmin, TransportError> {
        Ok(self.admin())
    }
}

pub struct InMemorySource {
    broker: InMemoryBroker,
    topic: String,
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn poll(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<SourceRecord>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.broker.inner.records_available.notified();
            tokio::pin!(notified);
            // register before checking, so a push in between isn't missed
            notified.as_mut().enable();

            let batch = self.broker.take_batch(&self.topic, max_records)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(vec![]);
            }
        }
    }

    fn close(self) {
        self.broker.state().source_closes += 1;
    }
}

pub struct InMemorySink {
    broker: InMemoryBroker,
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.broker.state().publish_attempts += 1;
        loop {
            let released = self.broker.inner.publishes_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if !self.broker.state().block_publishes {
                break;
            }
            released.await;
        }

        let mut state = self.broker.state();

        if state.fail_publishes {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        if !state.topics.contains_key(topic) {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "unknown topic or partition".to_string(),
            });
        }

        state
            .published
            .entry(topic.to_string())
            .or_default()
            .push(PublishedRecord {
                key: key.to_string(),
                payload: payload.to_vec(),
            });
        Ok(())
    }

    fn close(self) {
        self.broker.state().sink_closes += 1;
    }
}

pub struct InMemoryAdmin {
    broker: InMemoryBroker,
}

#[async_trait]
impl TopicAdmin for InMemoryAdmin {
    async fn list_topics(&self) -> Result<Vec<TopicListing>, TransportError> {
        let state = self.broker.state();
        Ok(state
            .topics
            .iter()
            .map(|(name, partitions)| TopicListing {
                name: name.clone(),
                partitions: *partitions,
                replication_factor: 1,
            })
            .collect())
    }

    async fn create_topic(
        &self,
        name: &str,
        partitions: i32,
        _replication_factor: i32,
    ) -> Result<TopicCreation, ProvisioningError> {
        let delay = {
            let mut state = self.broker.state();
            state.create_calls += 1;
            state.creation_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.broker.state();

        if state.topics.contains_key(name) {
            return Ok(TopicCreation::AlreadyExists);
        }
        if let Some(reason) = &state.reject_creation {
            return Err(ProvisioningError::Rejected {
                topic: name.to_string(),
                reason: reason.clone(),
            });
        }

        state.topics.insert(name.to_string(), partitions);
        Ok(TopicCreation::Created)
    }
}
