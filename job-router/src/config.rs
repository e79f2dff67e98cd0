use std::time::Duration;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

use crate::kafka::KafkaBroker;
use crate::router::RouterConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    // Producer configuration
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "10")]
    pub kafka_producer_graceful_shutdown_secs: u64,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    #[envconfig(default = "10000")]
    pub kafka_admin_timeout_ms: u32,

    // Router configuration. Each source topic gets its own router, consuming
    // as "<group prefix>-<source topic>".
    #[envconfig(default = "job_router")]
    pub kafka_consumer_group: String,

    // Comma separated, one per school
    #[envconfig(default = "texas-am-university")]
    pub kafka_source_topics: String,

    #[envconfig(default = "1")]
    pub destination_topic_partitions: i32,

    #[envconfig(default = "1")]
    pub destination_topic_replication_factor: i32,

    #[envconfig(default = "500")]
    pub poll_timeout_ms: u64,

    #[envconfig(default = "500")]
    pub max_poll_records: usize,

    #[envconfig(default = "10000")]
    pub max_known_topics: usize,

    #[envconfig(default = "30")]
    pub max_consecutive_transport_errors: u64,

    // HTTP server configuration
    #[envconfig(default = "0.0.0.0:8080")]
    pub bind_address: String,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,
}

impl Config {
    /// Initialize from environment variables (for production and tests)
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            kafka_producer_linger_ms: self.kafka_producer_linger_ms,
            kafka_producer_queue_mib: self.kafka_producer_queue_mib,
            kafka_producer_queue_messages: self.kafka_producer_queue_messages,
            kafka_message_timeout_ms: self.kafka_message_timeout_ms,
            kafka_compression_codec: self.kafka_compression_codec.clone(),
            kafka_admin_timeout_ms: self.kafka_admin_timeout_ms,
            kafka_tls: self.kafka_tls,
            kafka_hosts: self.kafka_hosts.clone(),
        }
    }

    pub fn kafka_broker(&self) -> KafkaBroker {
        KafkaBroker {
            offset_reset: self.kafka_consumer_offset_reset.clone(),
            auto_commit_interval_ms: self.kafka_consumer_auto_commit_interval_ms,
            max_consecutive_errors: self.max_consecutive_transport_errors,
            graceful_shutdown: Duration::from_secs(self.kafka_producer_graceful_shutdown_secs),
            ..KafkaBroker::new(self.kafka_config())
        }
    }

    pub fn source_topics(&self) -> Vec<String> {
        self.kafka_source_topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// One router configuration per source topic. Validation happens when
    /// the routers are built.
    pub fn router_configs(&self) -> Vec<RouterConfig> {
        self.source_topics()
            .iter()
            .map(|topic| RouterConfig {
                source_topic: topic.clone(),
                consumer_group: format!("{}-{}", self.kafka_consumer_group, topic),
                poll_timeout: Duration::from_millis(self.poll_timeout_ms),
                max_poll_records: self.max_poll_records,
                destination_partitions: self.destination_topic_partitions,
                destination_replication_factor: self.destination_topic_replication_factor,
                max_known_topics: self.max_known_topics,
            })
            .collect()
    }
}

/// Settings for the sample job publisher.
#[derive(Envconfig, Clone, Debug)]
pub struct PublishConfig {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "texas-am-university")]
    pub publish_topic: String,

    #[envconfig(default = "Texas A&M University")]
    pub publish_school: String,

    #[envconfig(default = "10")]
    pub publish_count: usize,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.kafka_hosts, "localhost:9092");
        let routers = config.router_configs();
        assert_eq!(routers.len(), 1);
        assert_eq!(routers[0].source_topic, "texas-am-university");
        assert_eq!(routers[0].consumer_group, "job_router-texas-am-university");
        assert_eq!(routers[0].poll_timeout, Duration::from_millis(500));
        assert!(routers[0].validate().is_ok());
    }

    #[test]
    fn test_one_router_per_source_topic() {
        let env = HashMap::from([
            (
                "KAFKA_SOURCE_TOPICS".to_string(),
                "texas-am-university, rice-university,,".to_string(),
            ),
            ("KAFKA_CONSUMER_GROUP".to_string(), "routing".to_string()),
            ("DESTINATION_TOPIC_PARTITIONS".to_string(), "6".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        let routers = config.router_configs();
        assert_eq!(
            routers
                .iter()
                .map(|r| r.consumer_group.as_str())
                .collect::<Vec<_>>(),
            vec!["routing-texas-am-university", "routing-rice-university"]
        );
        assert!(routers.iter().all(|r| r.destination_partitions == 6));
    }

    #[test]
    fn test_broker_settings() {
        let env = HashMap::from([
            ("KAFKA_HOSTS".to_string(), "kafka:9092".to_string()),
            ("KAFKA_CONSUMER_OFFSET_RESET".to_string(), "latest".to_string()),
            (
                "KAFKA_PRODUCER_GRACEFUL_SHUTDOWN_SECS".to_string(),
                "3".to_string(),
            ),
        ]);
        let broker = Config::init_from_hashmap(&env).unwrap().kafka_broker();

        assert_eq!(broker.kafka.kafka_hosts, "kafka:9092");
        assert_eq!(broker.offset_reset, "latest");
        assert_eq!(broker.graceful_shutdown, Duration::from_secs(3));
        assert_eq!(broker.max_consecutive_errors, 30);
    }
}
