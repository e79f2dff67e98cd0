//! Job records as they are written to the source topics.
//!
//! The JSON field names here are what the router reads routing keys from, so
//! they must not be renamed independently of [`crate::routing`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::address::{Coordinates, PostalAddress};
use crate::error::{JobError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "delivery", alias = "Delivery")]
    Delivery,
    #[serde(rename = "RideShare", alias = "rideshare", alias = "ride-share")]
    RideShare,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Delivery => "delivery",
            JobType::RideShare => "RideShare",
        }
    }

    /// Recognizes the spellings producers use, ignoring case and any `-`,
    /// `_` or whitespace: `delivery`, `RideShare`, `ride-share`, `ride share`.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| !matches!(c, '-' | '_') && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        match folded.as_str() {
            "delivery" => Some(JobType::Delivery),
            "rideshare" => Some(JobType::RideShare),
            _ => None,
        }
    }

    /// The job type's segment of a destination topic name. Never contains `-`.
    pub fn topic_segment(&self) -> String {
        self.as_str().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemSize {
    Small,
    Medium,
    Large,
}

impl ItemSize {
    pub fn code(&self) -> u8 {
        match self {
            ItemSize::Small => 1,
            ItemSize::Medium => 2,
            ItemSize::Large => 3,
        }
    }
}

impl std::str::FromStr for ItemSize {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(ItemSize::Small),
            "medium" => Ok(ItemSize::Medium),
            "large" => Ok(ItemSize::Large),
            _ => Err(ValidationError::InvalidItemSize(s.to_string())),
        }
    }
}

impl Serialize for ItemSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryJob {
    customer_id: i64,
    school: String,
    to: PostalAddress,
    from: PostalAddress,
    description: String,
    instructions: String,
    item_size: ItemSize,
    pickup_time: Option<DateTime<Utc>>,
}

impl DeliveryJob {
    pub fn new(
        customer_id: i64,
        school: &str,
        to_address: &str,
        from_address: &str,
        description: &str,
        instructions: &str,
        item_size: &str,
    ) -> Result<Self, JobError> {
        Ok(Self {
            customer_id,
            school: school.to_string(),
            to: PostalAddress::parse(to_address)?,
            from: PostalAddress::parse(from_address)?,
            description: description.to_string(),
            instructions: instructions.to_string(),
            item_size: item_size.parse()?,
            pickup_time: None,
        })
    }

    pub fn customer_id(&self) -> i64 {
        self.customer_id
    }

    pub fn school(&self) -> &str {
        &self.school
    }

    pub fn to_address(&self) -> &PostalAddress {
        &self.to
    }

    pub fn from_address(&self) -> &PostalAddress {
        &self.from
    }

    pub fn item_size(&self) -> ItemSize {
        self.item_size
    }

    pub fn pickup_time(&self) -> Option<DateTime<Utc>> {
        self.pickup_time
    }

    /// Replaces the drop-off address. On error the previous address is kept.
    pub fn set_to_address(&mut self, raw: &str) -> Result<(), JobError> {
        self.to = PostalAddress::parse(raw)?;
        Ok(())
    }

    /// Replaces the pickup address. On error the previous address is kept.
    pub fn set_from_address(&mut self, raw: &str) -> Result<(), JobError> {
        self.from = PostalAddress::parse(raw)?;
        Ok(())
    }

    pub fn set_pickup_time(&mut self, pickup_time: DateTime<Utc>) {
        self.pickup_time = Some(pickup_time);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RideShareJob {
    customer_id: i64,
    school: String,
    to: PostalAddress,
    to_coordinates: Option<Coordinates>,
    from: PostalAddress,
    from_coordinates: Option<Coordinates>,
    num_passengers: u32,
    pickup_time: Option<DateTime<Utc>>,
    dropoff_time: Option<DateTime<Utc>>,
}

impl RideShareJob {
    pub fn new(
        customer_id: i64,
        school: &str,
        to_address: &str,
        from_address: &str,
        num_passengers: u32,
    ) -> Result<Self, JobError> {
        Ok(Self {
            customer_id,
            school: school.to_string(),
            to: PostalAddress::parse(to_address)?,
            to_coordinates: None,
            from: PostalAddress::parse(from_address)?,
            from_coordinates: None,
            num_passengers,
            pickup_time: None,
            dropoff_time: None,
        })
    }

    /// Attaches coordinates to both ends of the ride, so consumers don't need
    /// to geocode the addresses again.
    pub fn with_coordinates(
        mut self,
        to: (f64, f64),
        from: (f64, f64),
    ) -> Result<Self, ValidationError> {
        self.to_coordinates = Some(Coordinates::new(to.0, to.1)?);
        self.from_coordinates = Some(Coordinates::new(from.0, from.1)?);
        Ok(self)
    }

    pub fn customer_id(&self) -> i64 {
        self.customer_id
    }

    pub fn school(&self) -> &str {
        &self.school
    }

    pub fn to_address(&self) -> &PostalAddress {
        &self.to
    }

    pub fn from_address(&self) -> &PostalAddress {
        &self.from
    }

    pub fn to_coordinates(&self) -> Option<Coordinates> {
        self.to_coordinates
    }

    pub fn from_coordinates(&self) -> Option<Coordinates> {
        self.from_coordinates
    }

    pub fn num_passengers(&self) -> u32 {
        self.num_passengers
    }

    pub fn set_to_address(&mut self, raw: &str) -> Result<(), JobError> {
        self.to = PostalAddress::parse(raw)?;
        Ok(())
    }

    pub fn set_from_address(&mut self, raw: &str) -> Result<(), JobError> {
        self.from = PostalAddress::parse(raw)?;
        Ok(())
    }

    pub fn set_to_coordinates(&mut self, latitude: f64, longitude: f64) -> Result<(), ValidationError> {
        self.to_coordinates = Some(Coordinates::new(latitude, longitude)?);
        Ok(())
    }

    pub fn set_from_coordinates(
        &mut self,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), ValidationError> {
        self.from_coordinates = Some(Coordinates::new(latitude, longitude)?);
        Ok(())
    }

    pub fn set_pickup_time(&mut self, pickup_time: DateTime<Utc>) {
        self.pickup_time = Some(pickup_time);
    }

    pub fn set_dropoff_time(&mut self, dropoff_time: DateTime<Utc>) {
        self.dropoff_time = Some(dropoff_time);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobRecord {
    Delivery(DeliveryJob),
    RideShare(RideShareJob),
}

impl JobRecord {
    pub fn job_type(&self) -> JobType {
        match self {
            JobRecord::Delivery(_) => JobType::Delivery,
            JobRecord::RideShare(_) => JobType::RideShare,
        }
    }

    pub fn customer_id(&self) -> i64 {
        match self {
            JobRecord::Delivery(job) => job.customer_id(),
            JobRecord::RideShare(job) => job.customer_id(),
        }
    }

    pub fn to_address(&self) -> &PostalAddress {
        match self {
            JobRecord::Delivery(job) => job.to_address(),
            JobRecord::RideShare(job) => job.to_address(),
        }
    }
}

impl From<DeliveryJob> for JobRecord {
    fn from(job: DeliveryJob) -> Self {
        JobRecord::Delivery(job)
    }
}

impl From<RideShareJob> for JobRecord {
    fn from(job: RideShareJob) -> Self {
        JobRecord::RideShare(job)
    }
}

// Wire layouts: address and coordinate fields are flattened with to_/from_ prefixes.

#[derive(Serialize)]
struct DeliveryJobJson<'a> {
    job_type: JobType,
    customer_id: i64,
    school: &'a str,
    to_address: &'a str,
    to_city: &'a str,
    to_state: &'a str,
    to_zipcode: &'a str,
    from_address: &'a str,
    from_city: &'a str,
    from_state: &'a str,
    from_zipcode: &'a str,
    description: &'a str,
    instructions: &'a str,
    item_size: ItemSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pickup_time: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct RideShareJobJson<'a> {
    job_type: JobType,
    customer_id: i64,
    school: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_longitude: Option<f64>,
    to_address: &'a str,
    to_city: &'a str,
    to_state: &'a str,
    to_zipcode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_longitude: Option<f64>,
    from_address: &'a str,
    from_city: &'a str,
    from_state: &'a str,
    from_zipcode: &'a str,
    num_passengers: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pickup_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dropoff_time: Option<DateTime<Utc>>,
}

impl Serialize for DeliveryJob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DeliveryJobJson {
            job_type: JobType::Delivery,
            customer_id: self.customer_id,
            school: &self.school,
            to_address: self.to.raw(),
            to_city: self.to.city(),
            to_state: self.to.state(),
            to_zipcode: self.to.zipcode(),
            from_address: self.from.raw(),
            from_city: self.from.city(),
            from_state: self.from.state(),
            from_zipcode: self.from.zipcode(),
            description: &self.description,
            instructions: &self.instructions,
            item_size: self.item_size,
            pickup_time: self.pickup_time,
        }
        .serialize(serializer)
    }
}

impl Serialize for RideShareJob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RideShareJobJson {
            job_type: JobType::RideShare,
            customer_id: self.customer_id,
            school: &self.school,
            to_latitude: self.to_coordinates.map(|c| c.latitude()),
            to_longitude: self.to_coordinates.map(|c| c.longitude()),
            to_address: self.to.raw(),
            to_city: self.to.city(),
            to_state: self.to.state(),
            to_zipcode: self.to.zipcode(),
            from_latitude: self.from_coordinates.map(|c| c.latitude()),
            from_longitude: self.from_coordinates.map(|c| c.longitude()),
            from_address: self.from.raw(),
            from_city: self.from.city(),
            from_state: self.from.state(),
            from_zipcode: self.from.zipcode(),
            num_passengers: self.num_passengers,
            pickup_time: self.pickup_time,
            dropoff_time: self.dropoff_time,
        }
        .serialize(serializer)
    }
}

impl Serialize for JobRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JobRecord::Delivery(job) => job.serialize(serializer),
            JobRecord::RideShare(job) => job.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use serde_json::json;

    fn delivery() -> DeliveryJob {
        DeliveryJob::new(
            42,
            "Texas A&M University",
            "400 Bizzell St, College Station, TX 77843",
            "1 Main St, Houston, TX 77064",
            "A box of textbooks",
            "Leave at the front desk",
            "Medium",
        )
        .unwrap()
    }

    #[test]
    fn test_delivery_job_derives_address_fields() {
        let job = delivery();
        assert_eq!(job.to_address().city(), "College Station");
        assert_eq!(job.to_address().state(), "TX");
        assert_eq!(job.to_address().zipcode(), "77843");
        assert_eq!(job.from_address().city(), "Houston");
        assert_eq!(job.item_size(), ItemSize::Medium);
    }

    #[test]
    fn test_delivery_job_rejects_bad_input() {
        let err = DeliveryJob::new(
            1,
            "Rice University",
            "6100 Main St, Houston, TX 7700",
            "1 Main St, Houston, TX 77064",
            "",
            "",
            "small",
        )
        .unwrap_err();
        assert_eq!(
            err,
            JobError::Validation(ValidationError::InvalidZipCode("7700".to_string()))
        );

        let err = DeliveryJob::new(
            1,
            "Rice University",
            "6100 Main St Houston TX 77005",
            "1 Main St, Houston, TX 77064",
            "",
            "",
            "small",
        )
        .unwrap_err();
        assert!(matches!(err, JobError::Parse(ParseError::MissingCity(_))));

        let err = DeliveryJob::new(
            1,
            "Rice University",
            "6100 Main St, Houston, TX 77005",
            "1 Main St, Houston, TX 77064",
            "",
            "",
            "huge",
        )
        .unwrap_err();
        assert_eq!(
            err,
            JobError::Validation(ValidationError::InvalidItemSize("huge".to_string()))
        );
    }

    #[test]
    fn test_replacing_address_rederives_fields() {
        let mut job = delivery();
        job.set_to_address("110 Inner Campus Dr, Austin, TX 78712")
            .unwrap();
        assert_eq!(job.to_address().raw(), "110 Inner Campus Dr, Austin, TX 78712");
        assert_eq!(job.to_address().city(), "Austin");
        assert_eq!(job.to_address().zipcode(), "78712");
    }

    #[test]
    fn test_failed_address_replacement_keeps_previous_address() {
        let mut job = delivery();
        let before = job.to_address().clone();

        assert!(job.set_to_address("somewhere, Austin, ZZ 78712").is_err());
        assert_eq!(job.to_address(), &before);
    }

    #[test]
    fn test_delivery_job_wire_format() {
        let value = serde_json::to_value(delivery()).unwrap();
        assert_eq!(
            value,
            json!({
                "job_type": "delivery",
                "customer_id": 42,
                "school": "Texas A&M University",
                "to_address": "400 Bizzell St, College Station, TX 77843",
                "to_city": "College Station",
                "to_state": "TX",
                "to_zipcode": "77843",
                "from_address": "1 Main St, Houston, TX 77064",
                "from_city": "Houston",
                "from_state": "TX",
                "from_zipcode": "77064",
                "description": "A box of textbooks",
                "instructions": "Leave at the front desk",
                "item_size": 2,
            })
        );
    }

    #[test]
    fn test_ride_share_job_wire_format() {
        let job = RideShareJob::new(
            7,
            "University of Texas",
            "110 Inner Campus Dr, Austin, TX 78712",
            "2317 Speedway, Austin, TX 78712",
            3,
        )
        .unwrap()
        .with_coordinates((30.2849, -97.7341), (30.2862, -97.7365))
        .unwrap();

        let value = serde_json::to_value(JobRecord::from(job)).unwrap();
        assert_eq!(value["job_type"], "RideShare");
        assert_eq!(value["customer_id"], 7);
        assert_eq!(value["to_city"], "Austin");
        assert_eq!(value["to_latitude"], 30.2849);
        assert_eq!(value["from_longitude"], -97.7365);
        assert_eq!(value["num_passengers"], 3);
        assert!(value.get("pickup_time").is_none());
    }

    #[test]
    fn test_ride_share_coordinates_are_validated() {
        let mut job = RideShareJob::new(
            7,
            "University of Texas",
            "110 Inner Campus Dr, Austin, TX 78712",
            "2317 Speedway, Austin, TX 78712",
            1,
        )
        .unwrap();

        assert_eq!(
            job.set_to_coordinates(-90.0, 10.0),
            Err(ValidationError::InvalidLatitude(-90.0))
        );
        assert_eq!(job.to_coordinates(), None);

        job.set_from_coordinates(30.0, -97.0).unwrap();
        assert_eq!(job.from_coordinates().map(|c| c.latitude()), Some(30.0));
    }

    #[test]
    fn test_job_type_names() {
        assert_eq!(JobType::Delivery.as_str(), "delivery");
        assert_eq!(
            serde_json::from_value::<JobType>(json!("ride-share")).unwrap(),
            JobType::RideShare
        );
        assert_eq!(delivery_record().job_type(), JobType::Delivery);
    }

    #[test]
    fn test_job_type_from_name() {
        for name in ["RideShare", "rideshare", "ride-share", "Ride Share", "ride_share"] {
            assert_eq!(JobType::from_name(name), Some(JobType::RideShare), "{name}");
        }
        assert_eq!(JobType::from_name(" Delivery "), Some(JobType::Delivery));
        assert_eq!(JobType::from_name("moving"), None);
        assert_eq!(JobType::RideShare.topic_segment(), "rideshare");
    }

    fn delivery_record() -> JobRecord {
        delivery().into()
    }
}
