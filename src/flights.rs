use chrono::{DateTime, Utc};

// Load-ratio regression parameters fit offline against BTS T-100 segment
// statistics: expected passengers on a flight with s seats is
// (LOAD_RATIO_SLOPE * s + LOAD_RATIO_INTERCEPT) * s.
pub const LOAD_RATIO_SLOPE: f64 = 0.000861;
pub const LOAD_RATIO_INTERCEPT: f64 = 0.674728;

/// Expected passenger count for a flight with the given seat total.
pub fn expected_passengers(total_seats: i32) -> f64 {
    let seats = f64::from(total_seats);
    (LOAD_RATIO_SLOPE * seats + LOAD_RATIO_INTERCEPT) * seats
}

/// The minimal flight record the itinerary sampler operates on.
///
/// Millions of these can be held by the flight cache, so the record carries
/// only what the sampler reads: the expected passenger load, the seat total,
/// the two instants and the arrival airport code. No nested airport objects.
#[derive(Debug, Clone, PartialEq)]
pub struct LightFlight {
    pub passengers: f64,
    pub total_seats: i32,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub arrival_airport: String,
}

impl LightFlight {
    pub fn new(
        total_seats: i32,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
        arrival_airport: String,
    ) -> Self {
        Self {
            passengers: expected_passengers(total_seats),
            total_seats,
            departure_time,
            arrival_time,
            arrival_airport,
        }
    }
}
