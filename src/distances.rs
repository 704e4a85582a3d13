use std::collections::HashMap;

use crate::airports::AirportLocation;

/// Calculate the great-circle distance between two points using the
/// Haversine formula. Returns distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6_371.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Symmetric pairwise great-circle distances between all known airports,
/// computed once per calculator, with the layover-pruning predicates that
/// ride on it.
///
/// Airports are sorted by code so the matrix layout is reproducible; codes
/// absent from the matrix have unknown coordinates and are conservatively
/// treated as logical everywhere.
pub struct DistanceMatrix {
    codes: Vec<String>,
    index: HashMap<String, usize>,
    distances: Vec<f64>,
    size: usize,
}

impl DistanceMatrix {
    pub fn build(mut airports: Vec<AirportLocation>) -> Self {
        airports.sort_by(|a, b| a.code.cmp(&b.code));
        airports.dedup_by(|a, b| a.code == b.code);

        let size = airports.len();
        let mut distances = vec![0.0; size * size];
        for (i, a) in airports.iter().enumerate() {
            for (j, b) in airports.iter().enumerate().skip(i + 1) {
                let distance = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
                distances[i * size + j] = distance;
                distances[j * size + i] = distance;
            }
        }

        let index = airports
            .iter()
            .enumerate()
            .map(|(idx, airport)| (airport.code.clone(), idx))
            .collect();
        let codes = airports.into_iter().map(|airport| airport.code).collect();

        Self {
            codes,
            index,
            distances,
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn index_of(&self, code: &str) -> Option<usize> {
        self.index.get(code).copied()
    }

    pub fn distance_km(&self, a: usize, b: usize) -> f64 {
        self.distances[a * self.size + b]
    }

    /// A layover at `intermediate` between `origin` and `destination` is
    /// logical when the intermediate lies within the circle of radius
    /// d(origin, destination) around either endpoint. A detour that both
    /// lengthens the trip and leaves the passenger farther from the
    /// destination than they started is illogical.
    pub fn is_logical(&self, origin: usize, destination: usize, intermediate: usize) -> bool {
        let od_distance = self.distance_km(origin, destination);
        self.distance_km(destination, intermediate) < od_distance
            || self.distance_km(origin, intermediate) < od_distance
    }

    /// Check an itinerary that is about to be extended with `next`.
    pub fn check_extension(&self, prefix: &[String], next: &str) -> bool {
        let origin = self.index_of(&prefix[0]);
        // Unknown destination coordinates cannot be checked.
        let Some(destination) = self.index_of(next) else {
            return true;
        };
        if origin == Some(destination) {
            return false;
        }

        let layovers: Vec<usize> = prefix[1..]
            .iter()
            .filter_map(|code| self.index_of(code))
            .collect();

        // Long itineraries must also be locally logical at the tail: the
        // last hop is judged against the airport it departed from.
        if layovers.len() > 2 {
            let tail_origin = layovers[layovers.len() - 2];
            let tail_layover = layovers[layovers.len() - 1];
            if !self.is_logical(tail_origin, destination, tail_layover) {
                return false;
            }
        }

        let Some(origin) = origin else {
            return true;
        };
        layovers
            .iter()
            .all(|&layover| self.is_logical(origin, destination, layover))
    }

    /// Check a complete itinerary: origin first, terminal airport last.
    pub fn check_logical_layovers(&self, itinerary: &[String]) -> bool {
        match itinerary.split_last() {
            Some((last, prefix)) if !prefix.is_empty() => self.check_extension(prefix, last),
            _ => true,
        }
    }

    /// Total great-circle distance over adjacent pairs with known
    /// coordinates. Airports missing from the matrix are skipped and the
    /// remaining sequence is summed pairwise.
    pub fn itinerary_distance_km(&self, itinerary: &[String]) -> f64 {
        let known: Vec<usize> = itinerary
            .iter()
            .filter_map(|code| self.index_of(code))
            .collect();
        known
            .windows(2)
            .map(|pair| self.distance_km(pair[0], pair[1]))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacific_airports() -> Vec<AirportLocation> {
        vec![
            AirportLocation::new("NRT", 140.3929, 35.7647),
            AirportLocation::new("TPE", 121.2330, 25.0797),
            AirportLocation::new("SEA", -122.3088, 47.4502),
            AirportLocation::new("HNL", -157.9251, 21.3187),
        ]
    }

    fn codes(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_haversine_known_distance() {
        // Amsterdam to Rotterdam is roughly 44 km.
        let distance = haversine_km(52.3086, 4.7639, 51.9561, 4.4397);
        assert!((distance - 44.0).abs() < 3.0, "got {distance}");
    }

    #[test]
    fn test_matrix_is_symmetric_with_zero_diagonal() {
        let matrix = DistanceMatrix::build(pacific_airports());
        for i in 0..matrix.len() {
            assert_eq!(matrix.distance_km(i, i), 0.0);
            for j in 0..matrix.len() {
                assert_eq!(matrix.distance_km(i, j), matrix.distance_km(j, i));
            }
        }
    }

    #[test]
    fn test_codes_are_sorted_and_indexed() {
        let matrix = DistanceMatrix::build(pacific_airports());
        assert_eq!(matrix.codes(), &codes(&["HNL", "NRT", "SEA", "TPE"]));
        assert_eq!(matrix.index_of("SEA"), Some(2));
        assert_eq!(matrix.index_of("XXX"), None);
    }

    #[test]
    fn test_tokyo_is_a_logical_stop_towards_seattle() {
        let matrix = DistanceMatrix::build(pacific_airports());
        let nrt = matrix.index_of("NRT").unwrap();
        let sea = matrix.index_of("SEA").unwrap();
        let tpe = matrix.index_of("TPE").unwrap();

        // Taipei is close to Tokyo, so it can be a stop on Tokyo-Seattle.
        assert!(matrix.is_logical(nrt, sea, tpe));
        // Seattle is a huge detour on Tokyo-Taipei.
        assert!(!matrix.is_logical(nrt, tpe, sea));
    }

    #[test]
    fn test_degenerate_is_logical_cases() {
        let matrix = DistanceMatrix::build(pacific_airports());
        let nrt = matrix.index_of("NRT").unwrap();
        let sea = matrix.index_of("SEA").unwrap();
        let hnl = matrix.index_of("HNL").unwrap();

        // Identical endpoints admit no layover at all.
        assert!(!matrix.is_logical(nrt, nrt, hnl));
        // An endpoint is always within its own radius.
        assert!(matrix.is_logical(nrt, sea, nrt));
    }

    #[test]
    fn test_circular_itinerary_is_rejected() {
        let matrix = DistanceMatrix::build(pacific_airports());
        assert!(!matrix.check_logical_layovers(&codes(&["NRT", "SEA", "NRT"])));
        assert!(!matrix.check_logical_layovers(&codes(&["NRT", "NRT"])));
    }

    #[test]
    fn test_unknown_coordinates_pass_the_check() {
        let matrix = DistanceMatrix::build(pacific_airports());
        // Unknown destination.
        assert!(matrix.check_logical_layovers(&codes(&["NRT", "TPE", "XXX"])));
        // Unknown origin with known, mutually consistent remainder.
        assert!(matrix.check_logical_layovers(&codes(&["XXX", "NRT", "SEA"])));
        // Unknown layovers are skipped.
        assert!(matrix.check_logical_layovers(&codes(&["NRT", "YYY", "SEA"])));
    }

    #[test]
    fn test_illogical_layover_is_rejected() {
        let matrix = DistanceMatrix::build(pacific_airports());
        // Seattle is not on the way from Tokyo to Taipei.
        assert!(!matrix.check_logical_layovers(&codes(&["NRT", "SEA", "TPE"])));
        // Taipei is a fine stop from Tokyo to Seattle.
        assert!(matrix.check_logical_layovers(&codes(&["NRT", "TPE", "SEA"])));
    }

    #[test]
    fn test_long_itinerary_tail_must_be_locally_logical() {
        // A line of airports along the equator plus one far outlier.
        let matrix = DistanceMatrix::build(vec![
            AirportLocation::new("AAA", 0.0, 0.0),
            AirportLocation::new("BBB", 5.0, 0.0),
            AirportLocation::new("CCC", 10.0, 0.0),
            AirportLocation::new("DDD", 15.0, 0.0),
            AirportLocation::new("EEE", 20.0, 0.0),
            AirportLocation::new("FAR", 5.0, 15.0),
        ]);

        // Walking straight down the line keeps every triple logical.
        assert!(matrix.check_logical_layovers(&codes(&["AAA", "BBB", "CCC", "DDD", "EEE"])));

        // FAR sits inside the big AAA-EEE circle, so it passes the global
        // check, but the final DDD-FAR-EEE triple is a detour and the tail
        // check rejects it.
        assert!(!matrix.check_logical_layovers(&codes(&["AAA", "BBB", "DDD", "FAR", "EEE"])));
    }

    #[test]
    fn test_logical_region_grows_with_endpoint_distance() {
        // The farther apart origin and destination are, the more airports
        // qualify as logical stops between them.
        let mut airports = vec![AirportLocation::new("ORG", 0.0, 0.0)];
        for i in 0..20 {
            airports.push(AirportLocation::new(
                &format!("A{i:02}"),
                f64::from(i),
                f64::from(i % 5),
            ));
        }
        let matrix = DistanceMatrix::build(airports);
        let org = matrix.index_of("ORG").unwrap();
        let near = matrix.index_of("A03").unwrap();
        let far = matrix.index_of("A19").unwrap();

        let count_for = |dest: usize| {
            (0..matrix.len())
                .filter(|&i| i != org && i != dest && matrix.is_logical(org, dest, i))
                .count()
        };
        assert!(count_for(far) > count_for(near));
    }

    #[test]
    fn test_itinerary_distance_skips_unknown_airports() {
        let matrix = DistanceMatrix::build(pacific_airports());
        let nrt = matrix.index_of("NRT").unwrap();
        let tpe = matrix.index_of("TPE").unwrap();
        let sea = matrix.index_of("SEA").unwrap();

        let expected = matrix.distance_km(nrt, tpe) + matrix.distance_km(tpe, sea);
        let with_unknown = matrix.itinerary_distance_km(&codes(&["NRT", "XXX", "TPE", "SEA"]));
        assert!((with_unknown - expected).abs() < 1e-9);

        assert_eq!(matrix.itinerary_distance_km(&codes(&["NRT"])), 0.0);
    }
}
