//! End-to-end tests of the flow calculator over an in-memory schedule.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use airflows::airports::AirportLocation;
use airflows::calculator::{
    AirportFlowCalculator, CalculatorOptions, LEG_PROBABILITY_DISTRIBUTION, MAX_LEGS,
    SimulationWindow,
};
use airflows::direct_flows::PassengerFlows;
use airflows::distances::DistanceMatrix;
use airflows::flights::LightFlight;
use airflows::schedule_repo::ScheduleSource;

/// Fixed flight schedule backing the calculator in tests.
struct StaticSchedule {
    airports: Vec<AirportLocation>,
    flights: HashMap<(String, NaiveDate), Vec<LightFlight>>,
}

impl StaticSchedule {
    fn new(airports: Vec<AirportLocation>) -> Self {
        Self {
            airports,
            flights: HashMap::new(),
        }
    }

    fn add_flight(&mut self, from: &str, to: &str, departure: DateTime<Utc>, arrival: DateTime<Utc>) {
        let flight = LightFlight::new(100, departure, arrival, to.to_string());
        self.flights
            .entry((from.to_string(), departure.date_naive()))
            .or_default()
            .push(flight);
    }

    /// One flight per day at the given hour over `days` consecutive days.
    fn add_daily_flights(
        &mut self,
        from: &str,
        to: &str,
        first_day: NaiveDate,
        days: u32,
        departure_hour: u32,
        duration_hours: i64,
    ) {
        for offset in 0..days {
            let day = first_day + Duration::days(i64::from(offset));
            let departure = day
                .and_hms_opt(departure_hour, 0, 0)
                .expect("valid departure hour")
                .and_utc();
            self.add_flight(from, to, departure, departure + Duration::hours(duration_hours));
        }
    }

    /// Round-the-clock service between every ordered pair of airports,
    /// departing every `interval_minutes`.
    fn add_mesh(
        &mut self,
        first_day: NaiveDate,
        days: u32,
        interval_minutes: u32,
        duration_minutes: i64,
    ) {
        let codes: Vec<String> = self.airports.iter().map(|a| a.code.clone()).collect();
        for from in &codes {
            for to in &codes {
                if from == to {
                    continue;
                }
                for offset in 0..days {
                    let day = first_day + Duration::days(i64::from(offset));
                    let mut minute = 0;
                    while minute < 24 * 60 {
                        let departure = day
                            .and_hms_opt(minute / 60, minute % 60, 0)
                            .expect("valid departure time")
                            .and_utc();
                        self.add_flight(
                            from,
                            to,
                            departure,
                            departure + Duration::minutes(duration_minutes),
                        );
                        minute += interval_minutes;
                    }
                }
            }
        }
    }
}

impl ScheduleSource for StaticSchedule {
    fn airports(&self) -> Result<Vec<AirportLocation>> {
        Ok(self.airports.clone())
    }

    fn flights_departing(&self, airport: &str, day: NaiveDate) -> Result<Vec<LightFlight>> {
        let mut flights = self
            .flights
            .get(&(airport.to_string(), day))
            .cloned()
            .unwrap_or_default();
        flights.sort_by(|a, b| {
            a.departure_time
                .cmp(&b.departure_time)
                .then_with(|| a.arrival_airport.cmp(&b.arrival_airport))
        });
        Ok(flights)
    }
}

fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date literal")
}

fn one_day_window() -> SimulationWindow {
    SimulationWindow::from_dates(day("2016-02-01"), day("2016-02-01"))
}

fn line_airports() -> Vec<AirportLocation> {
    vec![
        AirportLocation::new("XXX", 0.0, 0.0),
        AirportLocation::new("YYY", 5.0, 0.0),
        AirportLocation::new("ZZZ", 10.0, 0.0),
    ]
}

fn scheduled_calculator(
    schedule: StaticSchedule,
    options: CalculatorOptions,
) -> AirportFlowCalculator {
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    AirportFlowCalculator::new(source, None, options).expect("calculator builds")
}

#[test]
fn test_single_route_sends_every_passenger_to_its_end() {
    let mut schedule = StaticSchedule::new(line_airports());
    schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 3, 8, 2);
    let calculator = scheduled_calculator(schedule, CalculatorOptions::default());

    let flows = calculator
        .calculate("XXX", 1000, one_day_window(), Some(42), &CancellationToken::new())
        .unwrap();

    // YYY has no onward flights, so every productive journey ends there.
    assert_eq!(flows.len(), 1);
    let stats = &flows["YYY"];
    assert!((stats.terminal_flow - 1.0).abs() < 1e-9);
    assert!((stats.average_legs - 1.0).abs() < 1e-9);
    assert!(stats.average_distance_km > 0.0);
}

#[test]
fn test_two_leg_chain_splits_on_the_termination_distribution() {
    let mut schedule = StaticSchedule::new(line_airports());
    schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 4, 8, 2);
    schedule.add_daily_flights("YYY", "ZZZ", day("2016-02-01"), 4, 12, 2);
    let calculator = scheduled_calculator(schedule, CalculatorOptions::default());

    let flows = calculator
        .calculate("XXX", 2000, one_day_window(), Some(7), &CancellationToken::new())
        .unwrap();

    let yyy = flows["YYY"].terminal_flow;
    let zzz = flows["ZZZ"].terminal_flow;
    assert!((yyy + zzz - 1.0).abs() < 1e-9);
    // Passengers terminate at the first stop with the one-leg probability;
    // the rest continue and strand at the end of the line.
    assert!((yyy - LEG_PROBABILITY_DISTRIBUTION[1]).abs() < 0.03, "got {yyy}");
    assert!((zzz - (1.0 - LEG_PROBABILITY_DISTRIBUTION[1])).abs() < 0.03, "got {zzz}");
    assert!(!flows.contains_key("XXX"));
}

#[test]
fn test_scheduled_itinerary_lengths_follow_the_leg_distribution() {
    let airports: Vec<AirportLocation> = (0..6)
        .map(|i| AirportLocation::new(&format!("AP{i}"), f64::from(i) * 2.0, f64::from(i % 3)))
        .collect();
    let mut schedule = StaticSchedule::new(airports);
    schedule.add_mesh(day("2016-02-01"), 7, 15, 10);

    // Disable geographic pruning so termination probabilities are the only
    // force shaping itinerary lengths.
    let options = CalculatorOptions {
        check_layovers: false,
        ..Default::default()
    };
    let calculator = scheduled_calculator(schedule, options);

    let samples = 4000;
    let itineraries = calculator
        .sample_itineraries("AP0", samples, one_day_window(), Some(11), &CancellationToken::new())
        .unwrap();
    assert_eq!(itineraries.len(), samples);

    let mut leg_counts: HashMap<usize, usize> = HashMap::new();
    for itinerary in &itineraries {
        *leg_counts.entry(itinerary.len() - 1).or_default() += 1;
    }

    // Passengers whose arrival outruns the last departure of the day strand
    // where they are, so short journeys run slightly over the nominal
    // distribution.
    for legs in 1..=3usize {
        let observed = *leg_counts.get(&legs).unwrap_or(&0) as f64 / samples as f64;
        let expected = LEG_PROBABILITY_DISTRIBUTION[legs];
        assert!(
            (observed - expected).abs() <= 0.05,
            "{legs}-leg probability {observed} deviates from {expected}"
        );
    }
}

#[test]
fn test_aggregated_itinerary_lengths_match_the_leg_distribution() {
    // A complete, uniformly weighted flow graph has no schedule artifacts,
    // so itinerary lengths reproduce the termination distribution exactly.
    let codes: Vec<String> = (0..6).map(|i| format!("AP{i}")).collect();
    let mut flows: PassengerFlows = HashMap::new();
    for from in &codes {
        for to in &codes {
            if from != to {
                flows
                    .entry(from.clone())
                    .or_default()
                    .insert(to.clone(), 100.0);
            }
        }
    }

    let schedule = StaticSchedule::new(Vec::new());
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    let options = CalculatorOptions {
        use_schedules: false,
        check_layovers: false,
        legacy_aggregated_termination: false,
        ..Default::default()
    };
    let calculator = AirportFlowCalculator::new(source, Some(flows), options).unwrap();

    let samples = 5000;
    let itineraries = calculator
        .sample_itineraries("AP0", samples, one_day_window(), Some(13), &CancellationToken::new())
        .unwrap();
    assert_eq!(itineraries.len(), samples);

    let mut leg_counts: HashMap<usize, usize> = HashMap::new();
    for itinerary in &itineraries {
        *leg_counts.entry(itinerary.len() - 1).or_default() += 1;
    }

    for legs in 1..=4usize {
        let observed = *leg_counts.get(&legs).unwrap_or(&0) as f64 / samples as f64;
        let expected = LEG_PROBABILITY_DISTRIBUTION[legs];
        assert!(
            (observed - expected).abs() <= 0.03,
            "{legs}-leg probability {observed} deviates from {expected}"
        );
    }
}

#[test]
fn test_no_itinerary_exceeds_the_leg_bound() {
    let airports: Vec<AirportLocation> = (0..5)
        .map(|i| AirportLocation::new(&format!("AP{i}"), f64::from(i), 0.0))
        .collect();
    let mut schedule = StaticSchedule::new(airports);
    schedule.add_mesh(day("2016-02-01"), 7, 60, 30);

    let options = CalculatorOptions {
        check_layovers: false,
        ..Default::default()
    };
    let calculator = scheduled_calculator(schedule, options);

    let itineraries = calculator
        .sample_itineraries("AP0", 2000, one_day_window(), Some(5), &CancellationToken::new())
        .unwrap();
    for itinerary in &itineraries {
        assert!(itinerary.len() <= MAX_LEGS + 1);
        assert_eq!(itinerary[0], "AP0");
    }
}

#[test]
fn test_sampled_itineraries_respect_the_layover_filter() {
    // Airports spread over the Pacific rim, where detours are real.
    let airports = vec![
        AirportLocation::new("HNL", -157.9251, 21.3187),
        AirportLocation::new("ICN", 126.4505, 37.4602),
        AirportLocation::new("LAX", -118.4085, 33.9425),
        AirportLocation::new("NRT", 140.3929, 35.7647),
        AirportLocation::new("SEA", -122.3088, 47.4502),
        AirportLocation::new("TPE", 121.2330, 25.0797),
    ];
    let mut schedule = StaticSchedule::new(airports.clone());
    schedule.add_mesh(day("2016-02-01"), 5, 60, 30);
    let calculator = scheduled_calculator(schedule, CalculatorOptions::default());

    let itineraries = calculator
        .sample_itineraries("NRT", 1000, one_day_window(), Some(17), &CancellationToken::new())
        .unwrap();

    let matrix = DistanceMatrix::build(airports);
    for itinerary in itineraries.iter().filter(|itinerary| itinerary.len() >= 3) {
        assert!(
            matrix.check_logical_layovers(itinerary),
            "sampled an illogical itinerary: {itinerary:?}"
        );
    }
}

#[test]
fn test_fixed_seed_reproduces_the_aggregate() {
    let mut schedule = StaticSchedule::new(line_airports());
    schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 4, 8, 2);
    schedule.add_daily_flights("YYY", "ZZZ", day("2016-02-01"), 4, 12, 2);
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);

    let calculator =
        AirportFlowCalculator::new(Arc::clone(&source), None, CalculatorOptions::default())
            .unwrap();
    let first = calculator
        .calculate("XXX", 500, one_day_window(), Some(99), &CancellationToken::new())
        .unwrap();

    // A fresh calculator over the same source must reproduce the run.
    let calculator = AirportFlowCalculator::new(source, None, CalculatorOptions::default()).unwrap();
    let second = calculator
        .calculate("XXX", 500, one_day_window(), Some(99), &CancellationToken::new())
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_connection_weighting_prefers_short_layovers() {
    // From XXX, one early connection and one that leaves much later.
    let airports = vec![
        AirportLocation::new("XXX", 0.0, 0.0),
        AirportLocation::new("YYY", 5.0, 0.0),
        AirportLocation::new("ZZZ", 0.0, 5.0),
    ];
    let build = |weighted: bool| {
        let mut schedule = StaticSchedule::new(airports.clone());
        schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 3, 10, 2);
        schedule.add_daily_flights("XXX", "ZZZ", day("2016-02-01"), 3, 18, 2);
        let options = CalculatorOptions {
            weight_by_departure_time: weighted,
            ..Default::default()
        };
        scheduled_calculator(schedule, options)
    };

    let flow_to_early = |calculator: &AirportFlowCalculator| {
        calculator
            .calculate("XXX", 2000, one_day_window(), Some(3), &CancellationToken::new())
            .unwrap()["YYY"]
            .terminal_flow
    };

    let weighted = flow_to_early(&build(true));
    let unweighted = flow_to_early(&build(false));

    // Passengers who can still catch the 10:00 departure overwhelmingly do
    // so when connections are weighted by layover time.
    assert!(
        weighted > unweighted + 0.1,
        "weighted {weighted} vs unweighted {unweighted}"
    );
}

#[test]
fn test_isolated_origin_returns_empty_without_spinning() {
    let mut schedule = StaticSchedule::new(line_airports());
    // Flights exist elsewhere, but none leave ZZZ.
    schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 3, 8, 2);
    let calculator = scheduled_calculator(schedule, CalculatorOptions::default());

    let flows = calculator
        .calculate("ZZZ", 200, one_day_window(), Some(1), &CancellationToken::new())
        .unwrap();
    assert!(flows.is_empty());

    // An origin that is not in the airport table at all behaves the same.
    let flows = calculator
        .calculate("QQQ", 200, one_day_window(), Some(1), &CancellationToken::new())
        .unwrap();
    assert!(flows.is_empty());
}

#[test]
fn test_cancellation_aborts_the_run() {
    let mut schedule = StaticSchedule::new(line_airports());
    schedule.add_daily_flights("XXX", "YYY", day("2016-02-01"), 3, 8, 2);
    let calculator = scheduled_calculator(schedule, CalculatorOptions::default());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = calculator.calculate("XXX", 1000, one_day_window(), Some(4), &cancel);
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("cancelled"), "got {message}");
}

fn line_passenger_flows() -> PassengerFlows {
    HashMap::from([
        (
            "XXX".to_string(),
            HashMap::from([("YYY".to_string(), 600.0), ("ZZZ".to_string(), 400.0)]),
        ),
        (
            "YYY".to_string(),
            HashMap::from([("ZZZ".to_string(), 1000.0)]),
        ),
    ])
}

#[test]
fn test_aggregated_mode_conserves_flow() {
    let schedule = StaticSchedule::new(line_airports());
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    let options = CalculatorOptions {
        use_schedules: false,
        ..Default::default()
    };
    let calculator =
        AirportFlowCalculator::new(source, Some(line_passenger_flows()), options).unwrap();

    let flows = calculator
        .calculate("XXX", 2000, one_day_window(), Some(23), &CancellationToken::new())
        .unwrap();

    let total: f64 = flows.values().map(|stats| stats.terminal_flow).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(!flows.contains_key("XXX"));
    for terminal in flows.keys() {
        assert!(terminal == "YYY" || terminal == "ZZZ");
    }
}

#[test]
fn test_aggregated_mode_without_outgoing_flows_is_empty() {
    let schedule = StaticSchedule::new(line_airports());
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    let options = CalculatorOptions {
        use_schedules: false,
        ..Default::default()
    };
    let calculator =
        AirportFlowCalculator::new(source, Some(line_passenger_flows()), options).unwrap();

    let flows = calculator
        .calculate("ZZZ", 500, one_day_window(), Some(2), &CancellationToken::new())
        .unwrap();
    assert!(flows.is_empty());
}

#[test]
fn test_aggregated_mode_same_index_termination_variant() {
    let schedule = StaticSchedule::new(line_airports());
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    let options = CalculatorOptions {
        use_schedules: false,
        legacy_aggregated_termination: false,
        ..Default::default()
    };
    let calculator =
        AirportFlowCalculator::new(source, Some(line_passenger_flows()), options).unwrap();

    let flows = calculator
        .calculate("XXX", 2000, one_day_window(), Some(29), &CancellationToken::new())
        .unwrap();
    let total: f64 = flows.values().map(|stats| stats.terminal_flow).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn test_aggregated_mode_requires_flows() {
    let schedule = StaticSchedule::new(line_airports());
    let source: Arc<dyn ScheduleSource> = Arc::new(schedule);
    let options = CalculatorOptions {
        use_schedules: false,
        ..Default::default()
    };
    assert!(AirportFlowCalculator::new(source, None, options).is_err());
}
