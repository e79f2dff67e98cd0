use serde::Deserialize;
use serde_json::Value;

use crate::error::RoutingError;
use crate::job::JobType;

// Kafka refuses longer topic names.
const MAX_TOPIC_NAME_LEN: usize = 249;

/// The fields of a job record the router needs, decoded leniently: every
/// field is optional here and checked when it is actually used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutableJob {
    job_type: Option<String>,
    customer_id: Option<Value>,
    city: Option<String>,
    state: Option<String>,
    to_city: Option<String>,
    to_state: Option<String>,
}

impl RoutableJob {
    pub fn decode(payload: &[u8]) -> Result<Self, RoutingError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// The customer identifier, as the string used for the outgoing record key.
    pub fn customer_key(&self) -> Result<String, RoutingError> {
        match &self.customer_id {
            Some(Value::Number(id)) => Ok(id.to_string()),
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            _ => Err(RoutingError::MissingField("customer_id")),
        }
    }

    pub fn city(&self) -> Option<&str> {
        first_non_blank(&self.city, &self.to_city)
    }

    pub fn state(&self) -> Option<&str> {
        first_non_blank(&self.state, &self.to_state)
    }

    pub fn job_type(&self) -> Option<&str> {
        self.job_type.as_deref().filter(|s| !s.trim().is_empty())
    }
}

fn first_non_blank<'a>(primary: &'a Option<String>, fallback: &'a Option<String>) -> Option<&'a str> {
    primary
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| fallback.as_deref().filter(|s| !s.trim().is_empty()))
}

/// `{city, state, job_type}`, normalized: trimmed, lower case, inner
/// whitespace collapsed to `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    pub city: String,
    pub state: String,
    pub job_type: String,
}

impl RoutingKey {
    pub fn from_job(job: &RoutableJob) -> Result<Self, RoutingError> {
        let city = job.city().ok_or(RoutingError::MissingField("city"))?;
        let state = job.state().ok_or(RoutingError::MissingField("state"))?;
        let job_type = job
            .job_type()
            .ok_or(RoutingError::MissingField("job_type"))?;

        Ok(Self {
            city: normalize_segment(city),
            state: normalize_segment(state),
            job_type: job_type_segment(job_type)?,
        })
    }

    /// `"<city>-<state>-<jobtype>"`. This is also the destination topic name.
    pub fn topic_name(&self) -> String {
        format!("{}-{}-{}", self.city, self.state, self.job_type)
    }

    /// Recovers the key from a destination topic name. The state and job
    /// type never contain hyphens, so the name is split from the right and
    /// the city keeps any hyphens of its own.
    pub fn from_topic_name(name: &str) -> Option<Self> {
        let mut parts = name.rsplitn(3, '-');
        let job_type = parts.next()?;
        let state = parts.next()?;
        let city = parts.next()?;

        if city.is_empty() || job_type.is_empty() || state.len() != 2 {
            return None;
        }
        if !crate::address::is_valid_state(&state.to_uppercase()) {
            return None;
        }

        Some(Self {
            city: city.to_string(),
            state: state.to_string(),
            job_type: job_type.to_string(),
        })
    }
}

/// Derives the destination topic for a decoded record.
pub fn derive_topic_name(job: &RoutableJob) -> Result<String, RoutingError> {
    let name = RoutingKey::from_job(job)?.topic_name();
    if !is_legal_topic_name(&name) {
        return Err(RoutingError::InvalidTopicName(name));
    }
    Ok(name)
}

pub fn is_legal_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOPIC_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Known job types get their canonical segment, whatever spelling the
/// producer used. Others are normalized like any segment, but must not
/// contain `-` so the topic name still splits into three parts.
fn job_type_segment(job_type: &str) -> Result<String, RoutingError> {
    if let Some(known) = JobType::from_name(job_type) {
        return Ok(known.topic_segment());
    }

    let segment = normalize_segment(job_type);
    if segment.contains('-') {
        return Err(RoutingError::InvalidJobType(job_type.to_string()));
    }
    Ok(segment)
}

fn normalize_segment(segment: &str) -> String {
    segment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}
