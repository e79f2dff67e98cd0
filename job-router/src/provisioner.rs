use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::broker::{TopicAdmin, TopicCreation, TopicListing};
use crate::error::{ProvisioningError, TransportError};
use crate::metrics_consts::{PROVISIONING_ERROR, TOPIC_CACHE_HIT, TOPIC_CACHE_RESET, TOPIC_CREATED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    /// Never seen by this provisioner
    Unknown,
    /// Already on the broker: seeded from the listing, cached, or lost a creation race
    Existing,
    /// Created by this call
    NewlyCreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub name: String,
    /// None when the topic was only learned about by name
    pub partition_count: Option<i32>,
    pub replication_factor: Option<i32>,
    pub status: TopicStatus,
}

impl TopicDescriptor {
    fn existing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            partition_count: None,
            replication_factor: None,
            status: TopicStatus::Existing,
        }
    }
}

impl From<TopicListing> for TopicDescriptor {
    fn from(listing: TopicListing) -> Self {
        Self {
            name: listing.name,
            partition_count: Some(listing.partitions),
            replication_factor: Some(listing.replication_factor),
            status: TopicStatus::Existing,
        }
    }
}

/// Makes sure destination topics exist before anything is published to them.
///
/// Topics known to exist are cached, so the broker only sees a create request
/// the first time a name comes up. The cache holds at most `max_known_topics`
/// entries; when it would grow past that it is emptied, and names are learned
/// again through (idempotent) create requests or an explicit [`refresh`].
///
/// The cache is behind a mutex that is never held across an await point, so
/// a provisioner can be shared between routers through an `Arc`.
///
/// [`refresh`]: TopicProvisioner::refresh
pub struct TopicProvisioner<A> {
    admin: A,
    known: Mutex<HashMap<String, TopicDescriptor>>,
    max_known_topics: usize,
}

impl<A: TopicAdmin> TopicProvisioner<A> {
    pub fn new(admin: A, max_known_topics: usize) -> Self {
        Self {
            admin,
            known: Mutex::new(HashMap::new()),
            max_known_topics: max_known_topics.max(1),
        }
    }

    /// Creates a provisioner whose cache is seeded from the broker's topic listing.
    pub async fn seeded(admin: A, max_known_topics: usize) -> Result<Self, TransportError> {
        let provisioner = Self::new(admin, max_known_topics);
        provisioner.refresh().await?;
        Ok(provisioner)
    }

    /// Replaces the cache with the broker's current topic listing, and
    /// returns that listing.
    pub async fn refresh(&self) -> Result<Vec<TopicListing>, TransportError> {
        let listing = self.admin.list_topics().await?;

        let mut known = self.known();
        known.clear();
        for topic in listing.iter().take(self.max_known_topics) {
            known.insert(topic.name.clone(), TopicDescriptor::from(topic.clone()));
        }
        if listing.len() > self.max_known_topics {
            warn!(
                "Broker lists {} topics, only caching the first {}",
                listing.len(),
                self.max_known_topics
            );
        }
        info!("Topic cache seeded with {} topics", known.len());

        Ok(listing)
    }

    pub async fn ensure_topic_exists(
        &self,
        name: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<TopicDescriptor, ProvisioningError> {
        let cached = self.known().get(name).cloned();
        if let Some(descriptor) = cached {
            metrics::counter!(TOPIC_CACHE_HIT).increment(1);
            return Ok(descriptor);
        }

        match self
            .admin
            .create_topic(name, partitions, replication_factor)
            .await
        {
            Ok(TopicCreation::Created) => {
                metrics::counter!(TOPIC_CREATED).increment(1);
                let descriptor = TopicDescriptor {
                    name: name.to_string(),
                    partition_count: Some(partitions),
                    replication_factor: Some(replication_factor),
                    status: TopicStatus::Existing,
                };
                self.remember(descriptor.clone());

                Ok(TopicDescriptor {
                    status: TopicStatus::NewlyCreated,
                    ..descriptor
                })
            }
            Ok(TopicCreation::AlreadyExists) => {
                debug!("Topic {} was created concurrently, treating as existing", name);
                let descriptor = TopicDescriptor::existing(name);
                self.remember(descriptor.clone());
                Ok(descriptor)
            }
            Err(e) => {
                metrics::counter!(PROVISIONING_ERROR).increment(1);
                Err(e)
            }
        }
    }

    /// The cached descriptor for `name`, or one with [`TopicStatus::Unknown`].
    pub fn describe(&self, name: &str) -> TopicDescriptor {
        self.known()
            .get(name)
            .cloned()
            .unwrap_or_else(|| TopicDescriptor {
                name: name.to_string(),
                partition_count: None,
                replication_factor: None,
                status: TopicStatus::Unknown,
            })
    }

    pub fn known_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.known().keys().cloned().collect();
        names.sort();
        names
    }

    fn remember(&self, descriptor: TopicDescriptor) {
        let mut known = self.known();
        if !known.contains_key(&descriptor.name) && known.len() >= self.max_known_topics {
            warn!(
                "Topic cache reached {} entries, clearing it",
                self.max_known_topics
            );
            metrics::counter!(TOPIC_CACHE_RESET).increment(1);
            known.clear();
        }
        known.insert(descriptor.name.clone(), descriptor);
    }

    fn known(&self) -> MutexGuard<'_, HashMap<String, TopicDescriptor>> {
        // the map is always left consistent, so a poisoned lock is still usable
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::InMemoryBroker;

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), 100);

        let first = provisioner
            .ensure_topic_exists("austin-tx-delivery", 1, 1)
            .await
            .unwrap();
        let second = provisioner
            .ensure_topic_exists("austin-tx-delivery", 1, 1)
            .await
            .unwrap();

        assert_eq!(first.status, TopicStatus::NewlyCreated);
        assert_eq!(first.partition_count, Some(1));
        assert_eq!(second.status, TopicStatus::Existing);
        assert_eq!(broker.create_calls(), 1);
        assert!(broker.has_topic("austin-tx-delivery"));
    }

    #[tokio::test]
    async fn test_seeded_topics_are_not_created() {
        let broker = InMemoryBroker::new();
        broker.add_topic("houston-tx-delivery", 3);
        let provisioner = TopicProvisioner::seeded(broker.admin(), 100)
            .await
            .unwrap();

        let descriptor = provisioner
            .ensure_topic_exists("houston-tx-delivery", 1, 1)
            .await
            .unwrap();

        assert_eq!(descriptor.status, TopicStatus::Existing);
        assert_eq!(descriptor.partition_count, Some(3));
        assert_eq!(broker.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_creation_race_is_treated_as_existing() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), 100);
        // another provisioner created it after our cache was seeded
        broker.add_topic("dallas-tx-rideshare", 1);

        let descriptor = provisioner
            .ensure_topic_exists("dallas-tx-rideshare", 1, 1)
            .await
            .unwrap();
        assert_eq!(descriptor.status, TopicStatus::Existing);

        provisioner
            .ensure_topic_exists("dallas-tx-rideshare", 1, 1)
            .await
            .unwrap();
        assert_eq!(broker.create_calls(), 1);
        assert_eq!(provisioner.describe("dallas-tx-rideshare").status, TopicStatus::Existing);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_cache_untouched() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), 100);

        broker.reject_topic_creation(Some("quota exceeded"));
        let err = provisioner
            .ensure_topic_exists("austin-tx-delivery", 1, 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProvisioningError::Rejected {
                topic: "austin-tx-delivery".to_string(),
                reason: "quota exceeded".to_string(),
            }
        );
        assert_eq!(provisioner.describe("austin-tx-delivery").status, TopicStatus::Unknown);

        // a later record retries the creation
        broker.reject_topic_creation(None);
        let descriptor = provisioner
            .ensure_topic_exists("austin-tx-delivery", 1, 1)
            .await
            .unwrap();
        assert_eq!(descriptor.status, TopicStatus::NewlyCreated);
        assert_eq!(broker.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin(), 2);

        for name in ["a-tx-delivery", "b-tx-delivery", "c-tx-delivery"] {
            provisioner.ensure_topic_exists(name, 1, 1).await.unwrap();
        }
        assert_eq!(provisioner.known_topics(), vec!["c-tx-delivery".to_string()]);

        // forgotten names come back as existing, without a second creation
        let descriptor = provisioner
            .ensure_topic_exists("a-tx-delivery", 1, 1)
            .await
            .unwrap();
        assert_eq!(descriptor.status, TopicStatus::Existing);
        assert_eq!(broker.topic_count(), 3);

        provisioner.refresh().await.unwrap();
        assert_eq!(provisioner.known_topics().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_between_tasks() {
        let broker = InMemoryBroker::new();
        let provisioner = Arc::new(TopicProvisioner::new(broker.admin(), 100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provisioner = provisioner.clone();
                tokio::spawn(async move {
                    provisioner
                        .ensure_topic_exists("austin-tx-delivery", 1, 1)
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().status == TopicStatus::NewlyCreated {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(broker.topic_count(), 1);
    }
}
