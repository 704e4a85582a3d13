use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::airports;

/// An airport as stored in the schedule store.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = airports)]
#[diesel(primary_key(code))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Airport {
    /// IATA-style short code, unique across the network
    pub code: String,
    pub name: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
}

/// The coordinate view of an airport used by the distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AirportLocation {
    pub code: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl From<Airport> for AirportLocation {
    fn from(airport: Airport) -> Self {
        Self {
            code: airport.code,
            longitude: airport.longitude,
            latitude: airport.latitude,
        }
    }
}

impl AirportLocation {
    pub fn new(code: &str, longitude: f64, latitude: f64) -> Self {
        Self {
            code: code.to_string(),
            longitude,
            latitude,
        }
    }
}
