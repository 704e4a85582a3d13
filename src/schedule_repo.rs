use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use diesel::prelude::*;

use crate::airports::AirportLocation;
use crate::flights::LightFlight;
use crate::web::PgPool;

/// Read-only access to the schedule store.
///
/// The itinerary sampler runs on a blocking worker thread, so both reads are
/// synchronous. Implementations must return flights ordered deterministically
/// (by departure time, then arrival airport) because the termination walk
/// iterates candidates in store order.
pub trait ScheduleSource: Send + Sync {
    /// All known airports with their coordinates. Called once per calculator.
    fn airports(&self) -> Result<Vec<AirportLocation>>;

    /// Flights with seats that depart `airport` on the calendar day `day`,
    /// i.e. with a departure instant in `[day, day + 1 day)`.
    fn flights_departing(&self, airport: &str, day: NaiveDate) -> Result<Vec<LightFlight>>;
}

fn load_airport_locations(pool: &PgPool) -> Result<Vec<AirportLocation>> {
    use crate::schema::airports::dsl::*;

    let mut conn = pool.get()?;
    let rows = airports
        .select((code, longitude, latitude))
        .order(code.asc())
        .load::<(String, f64, f64)>(&mut conn)?;

    Ok(rows
        .into_iter()
        .map(|(airport_code, lon, lat)| AirportLocation {
            code: airport_code,
            longitude: lon,
            latitude: lat,
        })
        .collect())
}

/// Schedule adapter over concrete-dated flight legs (the `flights` table).
pub struct FlightsTable {
    pool: PgPool,
}

impl FlightsTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ScheduleSource for FlightsTable {
    fn airports(&self) -> Result<Vec<AirportLocation>> {
        load_airport_locations(&self.pool)
    }

    fn flights_departing(&self, airport: &str, day: NaiveDate) -> Result<Vec<LightFlight>> {
        use crate::schema::flights::dsl::*;

        let day_start = day.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);

        let mut conn = self.pool.get()?;
        let rows = flights
            .filter(
                departure_airport
                    .eq(airport)
                    .and(total_seats.gt(0))
                    .and(departure_time.ge(day_start))
                    .and(departure_time.lt(day_end)),
            )
            .order((departure_time.asc(), arrival_airport.asc()))
            .select((total_seats, departure_time, arrival_time, arrival_airport))
            .load::<(i32, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>, String)>(
                &mut conn,
            )?;

        Ok(rows
            .into_iter()
            .map(|(seats, departure, arrival, arrival_code)| {
                LightFlight::new(seats, departure, arrival, arrival_code)
            })
            .collect())
    }
}

/// A recurrent leg: an effective window, times of day and weekday flags.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::flight_schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ScheduleLeg {
    pub id: i64,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub effective_date: NaiveDate,
    pub discontinued_date: NaiveDate,
    pub departure_time_of_day: NaiveTime,
    pub arrival_time_of_day: NaiveTime,
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
    pub total_seats: i32,
}

impl ScheduleLeg {
    fn operates_on_weekday(&self, day: NaiveDate) -> bool {
        match day.weekday().num_days_from_monday() {
            0 => self.monday,
            1 => self.tuesday,
            2 => self.wednesday,
            3 => self.thursday,
            4 => self.friday,
            5 => self.saturday,
            _ => self.sunday,
        }
    }
}

/// Expand a recurrent leg into the concrete flight departing on `day`.
///
/// Returns `None` when the leg is outside its effective window, the weekday
/// flag is not set, or the expansion would produce a non-positive duration.
/// An arrival time of day earlier than the departure rolls over to the next
/// calendar day.
pub fn expand_leg_on_day(leg: &ScheduleLeg, day: NaiveDate) -> Option<LightFlight> {
    if day < leg.effective_date || day > leg.discontinued_date {
        return None;
    }
    if !leg.operates_on_weekday(day) {
        return None;
    }

    let departure = day.and_time(leg.departure_time_of_day).and_utc();
    let arrival_day = if leg.arrival_time_of_day < leg.departure_time_of_day {
        day + Duration::days(1)
    } else {
        day
    };
    let arrival = arrival_day.and_time(leg.arrival_time_of_day).and_utc();
    if arrival <= departure {
        return None;
    }

    Some(LightFlight::new(
        leg.total_seats,
        departure,
        arrival,
        leg.arrival_airport.clone(),
    ))
}

/// Schedule adapter that expands recurrent legs on the fly.
pub struct RecurringSchedule {
    pool: PgPool,
}

impl RecurringSchedule {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ScheduleSource for RecurringSchedule {
    fn airports(&self) -> Result<Vec<AirportLocation>> {
        load_airport_locations(&self.pool)
    }

    fn flights_departing(&self, airport: &str, day: NaiveDate) -> Result<Vec<LightFlight>> {
        use crate::schema::flight_schedules::dsl::*;

        let mut conn = self.pool.get()?;
        let legs = flight_schedules
            .filter(
                departure_airport
                    .eq(airport)
                    .and(total_seats.gt(0))
                    .and(effective_date.le(day))
                    .and(discontinued_date.ge(day)),
            )
            .select(ScheduleLeg::as_select())
            .load::<ScheduleLeg>(&mut conn)?;

        let mut expanded: Vec<LightFlight> = legs
            .iter()
            .filter_map(|leg| expand_leg_on_day(leg, day))
            .collect();
        expanded.sort_by(|a, b| {
            a.departure_time
                .cmp(&b.departure_time)
                .then_with(|| a.arrival_airport.cmp(&b.arrival_airport))
        });
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekday_leg() -> ScheduleLeg {
        ScheduleLeg {
            id: 1,
            departure_airport: "BNA".to_string(),
            arrival_airport: "ATL".to_string(),
            effective_date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            discontinued_date: NaiveDate::from_ymd_opt(2016, 12, 31).unwrap(),
            departure_time_of_day: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            arrival_time_of_day: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            monday: true,
            tuesday: false,
            wednesday: true,
            thursday: false,
            friday: true,
            saturday: false,
            sunday: false,
            total_seats: 143,
        }
    }

    #[test]
    fn test_expansion_respects_weekday_flags() {
        let leg = weekday_leg();
        // 2016-02-01 was a Monday.
        let monday = NaiveDate::from_ymd_opt(2016, 2, 1).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        let flight = expand_leg_on_day(&leg, monday).expect("Monday is flagged");
        assert_eq!(flight.arrival_airport, "ATL");
        assert_eq!(flight.total_seats, 143);
        assert_eq!(
            flight.departure_time,
            monday.and_time(leg.departure_time_of_day).and_utc()
        );

        assert!(expand_leg_on_day(&leg, tuesday).is_none());
    }

    #[test]
    fn test_expansion_respects_effective_window() {
        let leg = weekday_leg();
        // A Monday before the effective date.
        let before = NaiveDate::from_ymd_opt(2015, 12, 28).unwrap();
        assert!(expand_leg_on_day(&leg, before).is_none());

        // A Monday after the discontinued date.
        let after = NaiveDate::from_ymd_opt(2017, 1, 2).unwrap();
        assert!(expand_leg_on_day(&leg, after).is_none());
    }

    #[test]
    fn test_overnight_arrival_rolls_to_next_day() {
        let mut leg = weekday_leg();
        leg.departure_time_of_day = NaiveTime::from_hms_opt(23, 15, 0).unwrap();
        leg.arrival_time_of_day = NaiveTime::from_hms_opt(1, 45, 0).unwrap();

        let monday = NaiveDate::from_ymd_opt(2016, 2, 1).unwrap();
        let flight = expand_leg_on_day(&leg, monday).unwrap();
        assert!(flight.arrival_time > flight.departure_time);
        assert_eq!(
            flight.arrival_time.date_naive(),
            monday.succ_opt().unwrap()
        );
    }

    #[test]
    fn test_degenerate_zero_duration_leg_is_skipped() {
        let mut leg = weekday_leg();
        leg.arrival_time_of_day = leg.departure_time_of_day;

        let monday = NaiveDate::from_ymd_opt(2016, 2, 1).unwrap();
        assert!(expand_leg_on_day(&leg, monday).is_none());
    }
}
