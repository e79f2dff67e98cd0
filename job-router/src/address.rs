//! Postal address and coordinate validation.
//!
//! Addresses are expected in the form `"<street-line>, <city>, <state> <zipcode>"`.
//! Tokenization is a single naive pass: suite/apartment lines, commas inside
//! city names and non-U.S. formats are not supported.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseError, ValidationError};

static STATE_CODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
        "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
        "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
        "VA", "WA", "WV", "WI", "WY",
    ]
    .into_iter()
    .collect()
});

static ZIP_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{5}(?:-[0-9]{4})?$").expect("zip code pattern is valid"));

/// Returns the city: the token between the first and second comma, trimmed.
/// Empty segments (",,") are skipped, as if the commas were one delimiter.
pub fn parse_city(address: &str) -> Result<String, ParseError> {
    address
        .split(',')
        .filter(|segment| !segment.is_empty())
        .nth(1)
        .map(|city| city.trim().to_string())
        .ok_or_else(|| ParseError::MissingCity(address.to_string()))
}

/// Returns the second-to-last space-delimited token.
pub fn parse_state(address: &str) -> Result<String, ParseError> {
    let tokens = space_tokens(address);
    if tokens.len() < 2 {
        return Err(ParseError::MissingState(address.to_string()));
    }
    Ok(tokens[tokens.len() - 2].to_string())
}

/// Returns the last space-delimited token, if it is a valid U.S. zip code.
pub fn parse_zip_code(address: &str) -> Result<String, ValidationError> {
    let zip = space_tokens(address).last().copied().unwrap_or_default();
    if is_valid_zip_code(zip) {
        Ok(zip.to_string())
    } else {
        Err(ValidationError::InvalidZipCode(zip.to_string()))
    }
}

pub fn is_valid_zip_code(zip_code: &str) -> bool {
    ZIP_CODE.is_match(zip_code)
}

/// Two-letter code of one of the 50 U.S. states, upper case.
pub fn is_valid_state(state: &str) -> bool {
    STATE_CODES.contains(state)
}

// Both bounds are exclusive: exactly -90.0 and 90.0 are rejected.
pub fn is_valid_latitude(latitude: f64) -> bool {
    latitude > -90.0 && latitude < 90.0
}

// Both bounds are exclusive: exactly -180.0 and 180.0 are rejected.
pub fn is_valid_longitude(longitude: f64) -> bool {
    longitude > -180.0 && longitude < 180.0
}

// Splits on single spaces, dropping trailing empty tokens only.
fn space_tokens(address: &str) -> Vec<&str> {
    address.trim_end_matches(' ').split(' ').collect()
}

/// A raw address together with the fields derived from it. The derived
/// fields are only ever computed from `raw`, so they can't drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostalAddress {
    raw: String,
    city: String,
    state: String,
    zipcode: String,
}

impl PostalAddress {
    pub fn parse(raw: &str) -> Result<Self, crate::error::JobError> {
        let city = parse_city(raw)?;
        let state = parse_state(raw)?;
        if !is_valid_state(&state) {
            return Err(ValidationError::InvalidState(state).into());
        }
        let zipcode = parse_zip_code(raw)?;

        Ok(Self {
            raw: raw.to_string(),
            city,
            state,
            zipcode,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn zipcode(&self) -> &str {
        &self.zipcode
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !is_valid_latitude(latitude) {
            return Err(ValidationError::InvalidLatitude(latitude));
        }
        if !is_valid_longitude(longitude) {
            return Err(ValidationError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;

    const BIZZELL: &str = "400 Bizzell St, College Station, TX 77843";

    #[test]
    fn test_parses_well_formed_address() {
        assert_eq!(parse_city(BIZZELL).unwrap(), "College Station");
        assert_eq!(parse_state(BIZZELL).unwrap(), "TX");
        assert_eq!(parse_zip_code(BIZZELL).unwrap(), "77843");
    }

    #[test]
    fn test_parses_plus_four_zip() {
        let address = "1 Main St, Houston, TX 77064-1234";
        assert_eq!(parse_city(address).unwrap(), "Houston");
        assert_eq!(parse_state(address).unwrap(), "TX");
        assert_eq!(parse_zip_code(address).unwrap(), "77064-1234");
    }

    #[test]
    fn test_parse_city_requires_two_segments() {
        assert_eq!(
            parse_city("400 Bizzell St College Station TX 77843"),
            Err(ParseError::MissingCity(
                "400 Bizzell St College Station TX 77843".to_string()
            ))
        );
        // consecutive commas don't produce an empty city segment
        assert_eq!(parse_city("1 Main St,, Austin, TX 78701").unwrap(), "Austin");
    }

    #[test]
    fn test_parse_state_requires_two_tokens() {
        assert!(matches!(
            parse_state("77843"),
            Err(ParseError::MissingState(_))
        ));
        // trailing spaces are ignored
        assert_eq!(parse_state("1 Main St, Austin, TX 78701  ").unwrap(), "TX");
    }

    #[test]
    fn test_parse_zip_code_rejects_bad_zip() {
        assert_eq!(
            parse_zip_code("1 Main St, Austin, TX 7870"),
            Err(ValidationError::InvalidZipCode("7870".to_string()))
        );
        assert!(parse_zip_code("").is_err());
    }

    #[test]
    fn test_zip_code_validation() {
        assert!(is_valid_zip_code("12345"));
        assert!(is_valid_zip_code("12345-6789"));
        assert!(!is_valid_zip_code("1234"));
        assert!(!is_valid_zip_code("12345-678"));
        assert!(!is_valid_zip_code("123456"));
        assert!(!is_valid_zip_code("abcde"));
    }

    #[test]
    fn test_state_validation() {
        assert!(is_valid_state("TX"));
        assert!(is_valid_state("WY"));
        assert!(!is_valid_state("ZZ"));
        assert!(!is_valid_state("tx"));
        assert!(!is_valid_state("DC"));
        assert_eq!(STATE_CODES.len(), 50);
    }

    #[test]
    fn test_latitude_bounds_are_exclusive() {
        assert!(is_valid_latitude(89.999999));
        assert!(is_valid_latitude(-89.999999));
        assert!(is_valid_latitude(0.0));
        assert!(!is_valid_latitude(90.0));
        assert!(!is_valid_latitude(-90.0));
        assert!(!is_valid_latitude(f64::NAN));
    }

    #[test]
    fn test_longitude_bounds_are_exclusive() {
        assert!(is_valid_longitude(179.999999));
        assert!(is_valid_longitude(-96.3344));
        assert!(!is_valid_longitude(180.0));
        assert!(!is_valid_longitude(-180.0));
    }

    #[test]
    fn test_postal_address_derives_fields() {
        let address = PostalAddress::parse(BIZZELL).unwrap();
        assert_eq!(address.raw(), BIZZELL);
        assert_eq!(address.city(), "College Station");
        assert_eq!(address.state(), "TX");
        assert_eq!(address.zipcode(), "77843");
    }

    #[test]
    fn test_postal_address_rejects_unknown_state() {
        let err = PostalAddress::parse("1 Main St, Springfield, ZZ 12345").unwrap_err();
        assert!(matches!(
            err,
            JobError::Validation(ValidationError::InvalidState(ref s)) if s == "ZZ"
        ));
    }

    #[test]
    fn test_coordinates() {
        let coordinates = Coordinates::new(30.6187, -96.3365).unwrap();
        assert_eq!(coordinates.latitude(), 30.6187);
        assert_eq!(coordinates.longitude(), -96.3365);

        assert_eq!(
            Coordinates::new(90.0, 0.0),
            Err(ValidationError::InvalidLatitude(90.0))
        );
        assert_eq!(
            Coordinates::new(0.0, -180.0),
            Err(ValidationError::InvalidLongitude(-180.0))
        );
    }
}
