use std::time::Duration;

use common_kafka::config::ConsumerConfig;
use common_kafka::kafka_consumer::create_kafka_consumer;
use common_kafka::test::{create_mock_kafka, mock_kafka_config};
use job_router::publish::{publish_jobs, sample_jobs};
use rdkafka::Message;
use serde_json::Value;
use tokio::time::timeout;
use uuid::Uuid;

#[tokio::test]
async fn test_sample_jobs_are_keyed_by_customer() {
    let (cluster, producer) = create_mock_kafka().await;
    let topic = format!("school-{}", Uuid::new_v4());
    cluster.create_topic(&topic, 1, 1).unwrap();

    let jobs = sample_jobs("Texas A&M University", 3).unwrap();
    let results = publish_jobs(&producer, &topic, jobs).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));

    let consumer = create_kafka_consumer(
        &mock_kafka_config(cluster.bootstrap_servers()),
        &ConsumerConfig::new("sample-reader", &topic),
    )
    .unwrap();

    let mut keys = vec![];
    for _ in 0..3 {
        let message = timeout(Duration::from_secs(20), consumer.recv())
            .await
            .expect("timed out waiting for a published job")
            .expect("failed to receive published job");

        let payload: Value = serde_json::from_slice(message.payload().unwrap()).unwrap();
        let key = std::str::from_utf8(message.key().unwrap()).unwrap().to_string();
        assert_eq!(payload["customer_id"].to_string(), key);
        keys.push(key);
    }
    assert_eq!(keys, vec!["0", "1", "2"]);
}
