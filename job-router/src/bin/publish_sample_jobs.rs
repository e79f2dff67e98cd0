use anyhow::{Context, Result};
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use job_router::config::PublishConfig;
use job_router::publish::{publish_jobs, sample_jobs};

#[tokio::main]
async fn main() -> Result<()> {
    let config = PublishConfig::init_from_env()
        .context("Failed to load configuration from environment variables")?;

    let log_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();
    tracing_subscriber::registry().with(log_layer).init();

    let producer = create_kafka_producer(&config.kafka, "job-publisher")
        .await
        .context("Failed to create Kafka producer")?;

    let jobs = sample_jobs(&config.publish_school, config.publish_count)
        .context("Failed to build sample jobs")?;
    let results = publish_jobs(&producer, &config.publish_topic, jobs).await;

    let mut failed = 0;
    for (index, result) in results.iter().enumerate() {
        if let Err(e) = result {
            warn!("Job {} not published: {}", index, e);
            failed += 1;
        }
    }
    info!(
        "Published {} of {} jobs to {}",
        results.len() - failed,
        results.len(),
        config.publish_topic
    );

    if failed > 0 {
        anyhow::bail!("{} jobs failed to publish", failed);
    }
    Ok(())
}
