use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{Broker, RecordSink, RecordSource, SourceRecord, TopicAdmin};
use crate::error::{
    ConfigError, ProvisioningError, PublishError, RouterError, RoutingError, TransportError,
};
use crate::metrics_consts::{
    KAFKA_CONSUMER_ERROR, KAFKA_MESSAGE_CONSUMED, KAFKA_MESSAGE_PUBLISHED, KAFKA_PRODUCER_ERROR,
    ROUTING_ERROR,
};
use crate::provisioner::{TopicProvisioner, TopicStatus};
use crate::routing::{derive_topic_name, is_legal_topic_name, RoutableJob};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub source_topic: String,
    pub consumer_group: String,
    pub poll_timeout: Duration,
    pub max_poll_records: usize,
    pub destination_partitions: i32,
    pub destination_replication_factor: i32,
    pub max_known_topics: usize,
}

impl RouterConfig {
    pub fn new(source_topic: &str, consumer_group: &str) -> Self {
        Self {
            source_topic: source_topic.to_string(),
            consumer_group: consumer_group.to_string(),
            poll_timeout: Duration::from_millis(500),
            max_poll_records: 500,
            destination_partitions: 1,
            destination_replication_factor: 1,
            max_known_topics: 10_000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_topic.is_empty() {
            return Err(ConfigError::EmptySourceTopic);
        }
        if !is_legal_topic_name(&self.source_topic) {
            return Err(ConfigError::InvalidSourceTopic(self.source_topic.clone()));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(ConfigError::EmptyConsumerGroup);
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::ZeroPollTimeout);
        }
        if self.max_poll_records == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.destination_partitions < 1 {
            return Err(ConfigError::InvalidPartitions(self.destination_partitions));
        }
        if self.destination_replication_factor < 1 {
            return Err(ConfigError::InvalidReplicationFactor(
                self.destination_replication_factor,
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a router: `Created -> Running -> ShuttingDown -> Closed`.
/// A fatal error while running goes straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    Running,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub consumed: u64,
    pub published: u64,
    pub routing_errors: u64,
    pub provisioning_errors: u64,
    pub publish_errors: u64,
    pub topics_created: u64,
}

/// Why a single record was dropped.
#[derive(Error, Debug)]
enum RecordError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("creation of topic {0} interrupted by shutdown")]
    ProvisioningInterrupted(String),
    #[error("publish to {0} interrupted by shutdown")]
    PublishInterrupted(String),
}

/// Forwards job records from one source topic to per-city destination topics.
///
/// Construction only validates the configuration; nothing is opened until
/// [`StreamRouter::start`].
pub struct StreamRouter<B: Broker> {
    config: RouterConfig,
    broker: B,
    provisioner: Option<Arc<TopicProvisioner<B::Admin>>>,
    state: watch::Sender<RouterState>,
}

impl<B: Broker> StreamRouter<B> {
    pub fn new(config: RouterConfig, broker: B) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(RouterState::Created);

        Ok(Self {
            config,
            broker,
            provisioner: None,
            state,
        })
    }

    /// Uses `provisioner` instead of opening a dedicated admin client, so
    /// several routers can share one topic cache.
    pub fn with_provisioner(mut self, provisioner: Arc<TopicProvisioner<B::Admin>>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    /// Opens the broker clients, subscribes to the source topic and spawns
    /// the routing loop on its own task.
    ///
    /// Any failure here is fatal: whatever was already opened is released,
    /// the router ends up `Closed` and the error is returned.
    pub async fn start(mut self) -> Result<RouterHandle, RouterError> {
        let (provisioner, source, sink) = match self.open().await {
            Ok(opened) => opened,
            Err(e) => {
                error!(
                    "Failed to start router for source topic {}: {}",
                    self.config.source_topic, e
                );
                self.state.send_replace(RouterState::Closed);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        self.state.send_replace(RouterState::Running);
        let state = self.state.subscribe();

        info!(
            "Router running: consuming from '{}' as group '{}'",
            self.config.source_topic, self.config.consumer_group
        );

        let source_topic = self.config.source_topic.clone();
        let routing_loop = RoutingLoop {
            config: self.config,
            source,
            sink,
            provisioner,
            state: self.state,
            cancel: cancel.clone(),
            stats: RouterStats::default(),
        };
        let task = tokio::spawn(routing_loop.run());

        Ok(RouterHandle {
            source_topic,
            state,
            shutdown: ShutdownHandle { cancel },
            task,
        })
    }

    #[allow(clippy::type_complexity)]
    async fn open(
        &mut self,
    ) -> Result<(Arc<TopicProvisioner<B::Admin>>, B::Source, B::Sink), RouterError> {
        let provisioner = match self.provisioner.take() {
            Some(provisioner) => provisioner,
            None => Arc::new(TopicProvisioner::new(
                self.broker.open_admin().await?,
                self.config.max_known_topics,
            )),
        };

        let listing = provisioner.refresh().await?;
        if !listing
            .iter()
            .any(|topic| topic.name == self.config.source_topic)
        {
            return Err(RouterError::SourceTopicMissing(
                self.config.source_topic.clone(),
            ));
        }

        let source = self.broker.open_source(&self.config).await?;
        let sink = match self.broker.open_sink(&self.config).await {
            Ok(sink) => sink,
            Err(e) => {
                source.close();
                return Err(e.into());
            }
        };

        Ok((provisioner, source, sink))
    }
}

/// Requests shutdown of a running router. Cheap to clone, and every request
/// after the first is a no-op.
#[derive(Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Router shutdown requested");
            self.cancel.cancel();
        }
    }
}

/// Owner's side of a started router.
pub struct RouterHandle {
    source_topic: String,
    state: watch::Receiver<RouterState>,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<RouterStats, RouterError>>,
}

impl RouterHandle {
    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<RouterState> {
        self.state.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Resolves once the router is `Closed`, requested or not.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        if state
            .wait_for(|state| *state == RouterState::Closed)
            .await
            .is_err()
        {
            warn!(
                "Router for {} went away without reporting Closed",
                self.source_topic
            );
        }
    }

    /// Waits for the routing loop to end. A clean shutdown returns the run's
    /// stats, a fatal transport error is returned as is.
    pub async fn join(self) -> Result<RouterStats, RouterError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RouterError::TaskFailed(e.to_string())),
        }
    }
}

struct RoutingLoop<S, K, A> {
    config: RouterConfig,
    source: S,
    sink: K,
    provisioner: Arc<TopicProvisioner<A>>,
    state: watch::Sender<RouterState>,
    cancel: CancellationToken,
    stats: RouterStats,
}

impl<S, K, A> RoutingLoop<S, K, A>
where
    S: RecordSource,
    K: RecordSink,
    A: TopicAdmin,
{
    async fn run(mut self) -> Result<RouterStats, RouterError> {
        let outcome: Result<(), TransportError> = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                polled = self.source.poll(self.config.poll_timeout, self.config.max_poll_records) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => break Err(e),
            };

            let batch_len = batch.len();
            for (index, record) in batch.into_iter().enumerate() {
                if self.cancel.is_cancelled() {
                    warn!(
                        "Shutdown requested, leaving {} records of the current batch unrouted",
                        batch_len - index
                    );
                    break;
                }
                self.route(record).await;
            }
        };

        match outcome {
            Ok(()) => {
                self.state.send_replace(RouterState::ShuttingDown);
                info!(
                    "Graceful shutdown: unsubscribing from source topic {}...",
                    self.config.source_topic
                );
                Ok(self.release())
            }
            Err(e) => {
                error!(
                    "FATAL transport error consuming {} - closing router: {}",
                    self.config.source_topic, e
                );
                metrics::counter!(
                    KAFKA_CONSUMER_ERROR,
                    &[("level", "fatal"), ("error", "transport")]
                )
                .increment(1);
                self.release();
                Err(RouterError::Transport(e))
            }
        }
    }

    /// Closes consumer and producer; consuming `self` makes this happen once.
    fn release(self) -> RouterStats {
        let RoutingLoop {
            config,
            source,
            sink,
            state,
            stats,
            ..
        } = self;

        source.close();
        sink.close();
        state.send_replace(RouterState::Closed);
        info!(
            "Router for {} closed: {:?}",
            config.source_topic, stats
        );
        stats
    }

    async fn route(&mut self, record: SourceRecord) {
        self.stats.consumed += 1;
        metrics::counter!(KAFKA_MESSAGE_CONSUMED).increment(1);

        match self.forward(&record).await {
            Ok(()) => {
                self.stats.published += 1;
                metrics::counter!(KAFKA_MESSAGE_PUBLISHED).increment(1);
            }
            Err(RecordError::Routing(e)) => {
                self.stats.routing_errors += 1;
                metrics::counter!(ROUTING_ERROR).increment(1);
                warn!(
                    "Dropping message: failed to route payload ({}:{} offset {}): {e}",
                    record.topic, record.partition, record.offset,
                );
            }
            Err(e @ (RecordError::Provisioning(_) | RecordError::ProvisioningInterrupted(_))) => {
                self.stats.provisioning_errors += 1;
                warn!(
                    "Dropping message: destination topic unavailable ({}:{} offset {}): {e}",
                    record.topic, record.partition, record.offset,
                );
            }
            Err(e @ (RecordError::Publish(_) | RecordError::PublishInterrupted(_))) => {
                self.stats.publish_errors += 1;
                metrics::counter!(
                    KAFKA_PRODUCER_ERROR,
                    &[("level", "error"), ("error", "send_failed")]
                )
                .increment(1);
                warn!(
                    "Dropping message: failed to publish ({}:{} offset {}): {e}",
                    record.topic, record.partition, record.offset,
                );
            }
        }
    }

    async fn forward(&mut self, record: &SourceRecord) -> Result<(), RecordError> {
        let payload = record
            .payload
            .as_deref()
            .ok_or(RoutingError::EmptyPayload)?;
        let job = RoutableJob::decode(payload)?;
        let key = job.customer_key()?;
        let topic = derive_topic_name(&job)?;

        let descriptor = tokio::select! {
            biased;
            ensured = self.provisioner.ensure_topic_exists(
                &topic,
                self.config.destination_partitions,
                self.config.destination_replication_factor,
            ) => ensured?,
            _ = self.cancel.cancelled() => {
                return Err(RecordError::ProvisioningInterrupted(topic.clone()));
            }
        };
        if descriptor.status == TopicStatus::NewlyCreated {
            self.stats.topics_created += 1;
            info!("Created destination topic {}", topic);
        }

        tokio::select! {
            biased;
            published = self.sink.publish(&topic, &key, payload) => Ok(published?),
            _ = self.cancel.cancelled() => Err(RecordError::PublishInterrupted(topic.clone())),
        }
    }
}
