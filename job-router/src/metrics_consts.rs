pub const KAFKA_MESSAGE_CONSUMED: &str = "job_router_message_consumed";
pub const KAFKA_MESSAGE_PUBLISHED: &str = "job_router_message_published";
pub const KAFKA_CONSUMER_ERROR: &str = "job_router_kafka_consumer_error";
pub const KAFKA_PRODUCER_ERROR: &str = "job_router_kafka_producer_error";
pub const ROUTING_ERROR: &str = "job_router_routing_error";
pub const PROVISIONING_ERROR: &str = "job_router_provisioning_error";
pub const TOPIC_CREATED: &str = "job_router_topic_created";
pub const TOPIC_CACHE_HIT: &str = "job_router_topic_cache_hit";
pub const TOPIC_CACHE_RESET: &str = "job_router_topic_cache_reset";
