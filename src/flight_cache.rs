use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use lru::LruCache;

use crate::flights::LightFlight;
use crate::schedule_repo::ScheduleSource;

/// Upper bound on cached (airport, day) entries. Schedule queries dominate
/// simulation time, and a working set of one month of days across a few
/// thousand active airports fits in this budget.
pub const FLIGHT_CACHE_CAPACITY: usize = 30_000;

/// Bounded read-through memoisation of `flights_departing` results.
///
/// Entries are immutable once loaded; hits hand out the cached list by
/// reference count. Replacement is idempotent, so sharing a cache between
/// threads only needs external locking.
pub struct FlightCache {
    entries: LruCache<(String, NaiveDate), Arc<Vec<LightFlight>>>,
}

impl FlightCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is non-zero")),
            ),
        }
    }

    /// Return the flights leaving `airport` on `day`, consulting the store
    /// only on a miss.
    pub fn get_or_load(
        &mut self,
        airport: &str,
        day: NaiveDate,
        source: &dyn ScheduleSource,
    ) -> Result<Arc<Vec<LightFlight>>> {
        let key = (airport.to_string(), day);
        if let Some(flights) = self.entries.get(&key) {
            metrics::counter!("flight_cache.hits").increment(1);
            return Ok(Arc::clone(flights));
        }

        metrics::counter!("flight_cache.misses").increment(1);
        let flights = Arc::new(source.flights_departing(airport, day)?);
        self.entries.put(key, Arc::clone(&flights));
        metrics::gauge!("flight_cache.entries").set(self.entries.len() as f64);
        Ok(flights)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
