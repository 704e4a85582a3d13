use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::direct_flows::PassengerFlows;
use crate::distances::DistanceMatrix;
use crate::flight_cache::{FLIGHT_CACHE_CAPACITY, FlightCache};
use crate::schedule_repo::ScheduleSource;

/// Probability that a journey consists of exactly `k` legs, indexed by `k`.
/// Assumed homogeneous across origin and time of travel.
pub const LEG_PROBABILITY_DISTRIBUTION: [f64; 11] = [
    0.0, 0.6772732, 0.2997706, 0.0211374, 0.0016254, 0.0001632, 0.0000215, 0.0000072, 0.0000012,
    0.0000002, 0.0000001,
];

/// Longest journey the sampler will produce.
pub const MAX_LEGS: usize = LEG_PROBABILITY_DISTRIBUTION.len() - 1;

pub const MEAN_LAYOVER_DELAY_HOURS: f64 = 2.0;

/// `LEG_PROBABILITY_DISTRIBUTION` gives the probability of ending a journey
/// at leg k seen from the start of the journey; this derives the probability
/// of ending at leg k given the passenger already reached it.
pub fn terminal_leg_probabilities() -> [f64; 11] {
    let mut conditional = [0.0; 11];
    let mut preceding = 0.0;
    for (leg, probability) in LEG_PROBABILITY_DISTRIBUTION.iter().enumerate() {
        conditional[leg] = probability / (1.0 - preceding);
        preceding += probability;
    }
    conditional
}

/// Expected seats consumed per passenger journey: the mean leg count.
pub fn seats_per_passenger() -> f64 {
    LEG_PROBABILITY_DISTRIBUTION
        .iter()
        .enumerate()
        .map(|(legs, probability)| legs as f64 * probability)
        .sum()
}

/// Poisson PMF over whole layover hours with the mean layover delay as the
/// rate. The fractional hour difference is truncated to an integer, so all
/// sub-hour layovers share one weight.
fn layover_pmf(hours: f64) -> f64 {
    let mut probability = (-MEAN_LAYOVER_DELAY_HOURS).exp();
    for i in 0..hours as u64 {
        probability *= MEAN_LAYOVER_DELAY_HOURS;
        probability /= (i + 1) as f64;
    }
    probability
}

/// The [t0, t1] range passengers arrive at the origin airport within.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SimulationWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.and_time(NaiveTime::MIN).and_utc(),
            end: end.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn period_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalculatorOptions {
    /// Weight candidate connections by how soon they depart after the
    /// passenger's arrival (Poisson over layover hours).
    pub weight_by_departure_time: bool,
    /// Sample over dated schedules; when false, sample over aggregated
    /// direct passenger flows with no time axis.
    pub use_schedules: bool,
    /// Prune geographically illogical layovers.
    pub check_layovers: bool,
    /// Aggregated-mode continuation historically used the termination
    /// probability of the previous leg index. Kept as the default so both
    /// modes agree with the established output; set to false for the
    /// same-index behaviour of scheduled mode.
    pub legacy_aggregated_termination: bool,
    /// Flight cache entry bound.
    pub flight_cache_capacity: usize,
}

impl Default for CalculatorOptions {
    fn default() -> Self {
        Self {
            weight_by_departure_time: true,
            use_schedules: true,
            check_layovers: true,
            legacy_aggregated_termination: true,
            flight_cache_capacity: FLIGHT_CACHE_CAPACITY,
        }
    }
}

/// Per-destination aggregate over one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DestinationStats {
    /// Fraction of simulated passengers whose journey ended here.
    pub terminal_flow: f64,
    pub average_legs: f64,
    pub average_distance_km: f64,
}

struct Hop {
    destination: String,
    weight: f64,
    arrival_time: Option<DateTime<Utc>>,
}

enum WalkOutcome {
    /// The passenger transfers through the hop at this index.
    Ongoing(usize),
    /// The passenger's journey ends at the hop at this index.
    Terminal(usize),
    /// Floating-point drift exhausted the walk; treat the hop at this index
    /// as terminal.
    Drift(usize),
    NoWeight,
}

/// One round of the termination walk over candidate hops.
///
/// Dividing by (1 - inflow_sofar) renormalises the remaining probability
/// mass after each rejected hop, so the marginal probability of selecting
/// hop i stays weight_i / total regardless of iteration order.
fn walk_termination(
    rng: &mut StdRng,
    hops: &[Hop],
    terminal_probability: f64,
    ongoing_probability: f64,
) -> WalkOutcome {
    let total: f64 = hops.iter().map(|hop| hop.weight).sum();
    if total <= 0.0 {
        return WalkOutcome::NoWeight;
    }

    let mut inflow_sofar = 0.0;
    for (index, hop) in hops.iter().enumerate() {
        let share = hop.weight / total;
        let terminal_share = share * terminal_probability / (1.0 - inflow_sofar);
        let ongoing_share = share * ongoing_probability / (1.0 - inflow_sofar);
        let u: f64 = rng.random();
        if u <= ongoing_share {
            return WalkOutcome::Ongoing(index);
        }
        if u > 1.0 - terminal_share {
            return WalkOutcome::Terminal(index);
        }
        inflow_sofar += share;
    }
    WalkOutcome::Drift(hops.len() - 1)
}

/// Monte Carlo estimator of passenger flow from an origin airport to every
/// reachable terminal airport.
///
/// All state except the flight cache is immutable after construction, so a
/// calculator can be shared across jobs behind an `Arc`; each call brings
/// its own RNG seeded per job.
pub struct AirportFlowCalculator {
    source: Arc<dyn ScheduleSource>,
    options: CalculatorOptions,
    direct_flows: Option<PassengerFlows>,
    distances: Option<DistanceMatrix>,
    cache: Mutex<FlightCache>,
    terminal_probabilities: [f64; 11],
}

impl AirportFlowCalculator {
    /// Build a calculator over the given schedule source.
    ///
    /// `direct_flows` is required for aggregated sampling; when present it
    /// also narrows the distance matrix to the airports that actually occur
    /// in the flows.
    pub fn new(
        source: Arc<dyn ScheduleSource>,
        direct_flows: Option<PassengerFlows>,
        options: CalculatorOptions,
    ) -> Result<Self> {
        if !options.use_schedules && direct_flows.is_none() {
            bail!("aggregated sampling requires direct passenger flows");
        }

        let distances = if options.check_layovers {
            let mut airports = source.airports()?;
            if let Some(flows) = &direct_flows {
                let mut active: std::collections::HashSet<&str> = std::collections::HashSet::new();
                for (origin, destinations) in flows {
                    active.insert(origin.as_str());
                    active.extend(destinations.keys().map(String::as_str));
                }
                airports.retain(|airport| active.contains(airport.code.as_str()));
            }
            let matrix = DistanceMatrix::build(airports);
            debug!("distance matrix built over {} airports", matrix.len());
            Some(matrix)
        } else {
            None
        };

        Ok(Self {
            source,
            cache: Mutex::new(FlightCache::new(options.flight_cache_capacity)),
            options,
            direct_flows,
            distances,
            terminal_probabilities: terminal_leg_probabilities(),
        })
    }

    /// Total expected direct passengers leaving `origin` in the flows this
    /// calculator was built over.
    pub fn direct_passengers_from(&self, origin: &str) -> f64 {
        self.direct_flows
            .as_ref()
            .map(|flows| crate::direct_flows::total_departing_passengers(flows, origin))
            .unwrap_or(0.0)
    }

    pub fn itinerary_distance_km(&self, itinerary: &[String]) -> f64 {
        self.distances
            .as_ref()
            .map(|matrix| matrix.itinerary_distance_km(itinerary))
            .unwrap_or(0.0)
    }

    fn extension_is_logical(&self, prefix: &[String], next: &str) -> bool {
        if !self.options.check_layovers {
            return true;
        }
        match &self.distances {
            Some(matrix) => matrix.check_extension(prefix, next),
            None => true,
        }
    }

    /// Sample a single itinerary starting at `origin`. The result always
    /// begins with the origin; a length of one means the passenger found no
    /// outgoing flight at all.
    pub fn sample_itinerary(
        &self,
        rng: &mut StdRng,
        origin: &str,
        window: SimulationWindow,
    ) -> Result<Vec<String>> {
        if self.options.use_schedules {
            self.sample_scheduled(rng, origin, window)
        } else {
            self.sample_aggregated(rng, origin)
        }
    }

    fn sample_scheduled(
        &self,
        rng: &mut StdRng,
        origin: &str,
        window: SimulationWindow,
    ) -> Result<Vec<String>> {
        let mut itinerary = vec![origin.to_string()];

        // The passenger arrives at the origin at a uniformly random instant
        // within the window, padded by a day so late starts still see the
        // last day's departures.
        let span_seconds = (window.end - window.start + Duration::days(1))
            .num_seconds()
            .max(0);
        let mut arrival_time = window.start + Duration::seconds(rng.random_range(0..=span_seconds));

        loop {
            if itinerary.len() - 1 >= MAX_LEGS {
                return Ok(itinerary);
            }

            let current = itinerary
                .last()
                .expect("itinerary always contains the origin")
                .clone();
            let flights = self
                .cache
                .lock()
                .map_err(|_| anyhow!("flight cache lock poisoned"))?
                .get_or_load(&current, arrival_time.date_naive(), self.source.as_ref())?;

            let mut hops = Vec::with_capacity(flights.len());
            for flight in flights.iter() {
                // The passenger must already be at the airport.
                if flight.departure_time <= arrival_time {
                    continue;
                }
                if !self.extension_is_logical(&itinerary, &flight.arrival_airport) {
                    continue;
                }
                let weight = if self.options.weight_by_departure_time {
                    let layover_hours =
                        (flight.departure_time - arrival_time).num_seconds() as f64 / 3600.0;
                    flight.passengers * layover_pmf(layover_hours)
                } else {
                    flight.passengers
                };
                if weight > 0.0 {
                    hops.push(Hop {
                        destination: flight.arrival_airport.clone(),
                        weight,
                        arrival_time: Some(flight.arrival_time),
                    });
                }
            }

            if hops.is_empty() {
                // No onward flight: the passenger leaves the airport.
                return Ok(itinerary);
            }

            let leg_index = itinerary.len();
            let terminal_probability = self.terminal_probabilities[leg_index];
            match walk_termination(rng, &hops, terminal_probability, 1.0 - terminal_probability) {
                WalkOutcome::Ongoing(index) => {
                    arrival_time = hops[index]
                        .arrival_time
                        .expect("scheduled hops carry an arrival instant");
                    itinerary.push(hops[index].destination.clone());
                }
                WalkOutcome::Terminal(index) | WalkOutcome::Drift(index) => {
                    itinerary.push(hops[index].destination.clone());
                    return Ok(itinerary);
                }
                WalkOutcome::NoWeight => return Ok(itinerary),
            }
        }
    }

    fn sample_aggregated(&self, rng: &mut StdRng, origin: &str) -> Result<Vec<String>> {
        let flows = self
            .direct_flows
            .as_ref()
            .expect("verified at construction");
        let mut itinerary = vec![origin.to_string()];

        loop {
            if itinerary.len() - 1 >= MAX_LEGS {
                return Ok(itinerary);
            }

            let current = itinerary
                .last()
                .expect("itinerary always contains the origin");
            let Some(destinations) = flows.get(current) else {
                return Ok(itinerary);
            };

            let mut hops: Vec<Hop> = destinations
                .iter()
                .filter(|(destination, _)| self.extension_is_logical(&itinerary, destination))
                .map(|(destination, &passengers)| Hop {
                    destination: destination.clone(),
                    weight: passengers,
                    arrival_time: None,
                })
                .collect();
            // Map iteration order is arbitrary; fix it for reproducibility.
            hops.sort_by(|a, b| a.destination.cmp(&b.destination));

            if hops.is_empty() {
                return Ok(itinerary);
            }

            let leg_index = itinerary.len();
            let terminal_probability = self.terminal_probabilities[leg_index];
            let ongoing_index = if self.options.legacy_aggregated_termination {
                leg_index - 1
            } else {
                leg_index
            };
            let ongoing_probability = 1.0 - self.terminal_probabilities[ongoing_index];

            match walk_termination(rng, &hops, terminal_probability, ongoing_probability) {
                WalkOutcome::Ongoing(index) => itinerary.push(hops[index].destination.clone()),
                WalkOutcome::Terminal(index) | WalkOutcome::Drift(index) => {
                    itinerary.push(hops[index].destination.clone());
                    return Ok(itinerary);
                }
                WalkOutcome::NoWeight => return Ok(itinerary),
            }
        }
    }

    /// Sample itineraries until `passengers` productive ones (two airports
    /// or more) are collected.
    ///
    /// Origins without outgoing flights only ever produce single-airport
    /// itineraries; after `passengers` consecutive unproductive samples the
    /// run gives up and returns what it has, which may be nothing.
    pub fn sample_itineraries(
        &self,
        origin: &str,
        passengers: usize,
        window: SimulationWindow,
        seed: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<String>>> {
        if !self.options.use_schedules {
            let flows = self
                .direct_flows
                .as_ref()
                .expect("verified at construction");
            if flows.get(origin).map_or(true, |d| d.is_empty()) {
                return Ok(Vec::new());
            }
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut itineraries = Vec::with_capacity(passengers);
        let mut consecutive_unproductive = 0usize;
        while itineraries.len() < passengers {
            if cancel.is_cancelled() {
                bail!("simulation cancelled");
            }
            let itinerary = self.sample_itinerary(&mut rng, origin, window)?;
            if itinerary.len() > 1 {
                consecutive_unproductive = 0;
                itineraries.push(itinerary);
            } else {
                consecutive_unproductive += 1;
                if consecutive_unproductive >= passengers {
                    warn!(
                        "giving up on {origin} after {consecutive_unproductive} consecutive \
                         unproductive samples"
                    );
                    break;
                }
            }
        }

        metrics::counter!("simulation.itineraries_sampled")
            .increment(itineraries.len() as u64);
        Ok(itineraries)
    }

    /// Simulate `passengers` journeys from `origin` and aggregate where
    /// they terminate.
    ///
    /// Terminal flows are fractions of the requested passenger count, so
    /// they sum to one when every sample was productive. Unknown origins
    /// and isolated airports come back as an empty map.
    pub fn calculate(
        &self,
        origin: &str,
        passengers: usize,
        window: SimulationWindow,
        seed: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, DestinationStats>> {
        let itineraries = self.sample_itineraries(origin, passengers, window, seed, cancel)?;

        let mut terminal_counts: HashMap<String, u64> = HashMap::new();
        let mut terminal_distances: HashMap<String, f64> = HashMap::new();
        let mut terminal_legs: HashMap<String, u64> = HashMap::new();
        for itinerary in &itineraries {
            let terminal = itinerary
                .last()
                .expect("sampled itineraries are non-empty")
                .clone();
            *terminal_counts.entry(terminal.clone()).or_default() += 1;
            *terminal_distances.entry(terminal.clone()).or_default() +=
                self.itinerary_distance_km(itinerary);
            *terminal_legs.entry(terminal).or_default() += (itinerary.len() - 1) as u64;
        }

        Ok(terminal_counts
            .into_iter()
            .map(|(terminal, count)| {
                let stats = DestinationStats {
                    terminal_flow: count as f64 / passengers as f64,
                    average_legs: terminal_legs[&terminal] as f64 / count as f64,
                    average_distance_km: terminal_distances[&terminal] / count as f64,
                };
                (terminal, stats)
            })
            .collect())
    }
}
