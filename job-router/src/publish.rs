//! Producer side: writes job records to a school's source topic.

use chrono::{Duration, Utc};
use common_kafka::kafka_producer::{send_keyed_iter_to_kafka, KafkaProduceError};
use rdkafka::producer::FutureProducer;
use rdkafka::ClientContext;

use crate::error::JobError;
use crate::job::{DeliveryJob, JobRecord, RideShareJob};

/// Publishes `jobs` to `topic`, keyed by customer id. Results come back in
/// the order of `jobs`.
pub async fn publish_jobs<C: ClientContext>(
    producer: &FutureProducer<C>,
    topic: &str,
    jobs: Vec<JobRecord>,
) -> Vec<Result<(), KafkaProduceError>> {
    send_keyed_iter_to_kafka(
        producer,
        topic,
        |job: &JobRecord| Some(job.customer_id().to_string()),
        jobs,
    )
    .await
}

/// A handful of deliveries and rides around College Station and Houston.
pub fn sample_jobs(school: &str, count: usize) -> Result<Vec<JobRecord>, JobError> {
    const ADDRESSES: [&str; 4] = [
        "400 Bizzell St, College Station, TX 77843",
        "1001 Texas Ave, College Station, TX 77840",
        "6100 Main St, Houston, TX 77005",
        "2800 S University Dr, Fort Worth, TX 76129",
    ];
    const ITEM_SIZES: [&str; 3] = ["small", "medium", "large"];

    let now = Utc::now();
    let mut jobs = Vec::with_capacity(count);
    for i in 0..count {
        let to = ADDRESSES[i % ADDRESSES.len()];
        let from = ADDRESSES[(i + 1) % ADDRESSES.len()];
        let customer_id = i64::try_from(i).unwrap_or(i64::MAX);

        let job: JobRecord = if i % 2 == 0 {
            let mut job = DeliveryJob::new(
                customer_id,
                school,
                to,
                from,
                "Textbooks",
                "Leave at the front desk",
                ITEM_SIZES[i % ITEM_SIZES.len()],
            )?;
            job.set_pickup_time(now + Duration::minutes(30));
            job.into()
        } else {
            let mut job = RideShareJob::new(customer_id, school, to, from, 1 + (i % 3) as u32)?;
            job.set_pickup_time(now + Duration::minutes(15));
            job.into()
        };
        jobs.push(job);
    }

    Ok(jobs)
}
