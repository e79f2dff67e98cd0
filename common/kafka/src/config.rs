use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10000")]
    pub kafka_admin_timeout_ms: u32, // Bound on metadata fetches and topic creation requests

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

impl KafkaConfig {
    /// Settings every client (consumer, producer, admin) shares.
    pub fn client_config(&self) -> rdkafka::ClientConfig {
        let mut client_config = rdkafka::ClientConfig::new();
        client_config.set("bootstrap.servers", &self.kafka_hosts);

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    // earliest, latest
    pub kafka_consumer_offset_reset: String,

    // Offsets are never stored manually: the client stores each offset as the
    // message is handed out and commits them on this interval.
    pub kafka_consumer_auto_commit_interval_ms: u32,
}

impl ConsumerConfig {
    pub fn new(consumer_group: &str, consumer_topic: &str) -> Self {
        Self {
            kafka_consumer_group: consumer_group.to_string(),
            kafka_consumer_topic: consumer_topic.to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
            kafka_consumer_auto_commit_interval_ms: 5000,
        }
    }
}
