//! Arrival lifecycle.
//!
//! An arrival moves through `New → Upcoming → Due → Departed` as the clock
//! passes its estimated arrival (eta) and departure (etd) times, with a time
//! resolution that widens the `Due` window on both sides.
//!
//! [`Lifecycle::determine`] is generic over the clock's instant type so the
//! client can drive it with a pausable runtime clock.

use std::ops::{Add, Sub};
use std::time::Duration;

/// Where an arrival is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Just discovered, not yet determined.
    New,
    /// More than one resolution away.
    Upcoming,
    /// Within one resolution of arriving or still at the stop.
    Due,
    /// At the stop. Not produced by [`Lifecycle::determine`] until arrivals
    /// track the vehicle serving them.
    Arrived,
    /// Left the stop. Terminal.
    Departed,
}

impl Lifecycle {
    /// The state at `now`, and when to determine it again.
    ///
    /// Returns `None` as the refresh time once the arrival has departed.
    pub fn determine<T>(eta: T, etd: T, now: T, resolution: Duration) -> (Lifecycle, Option<T>)
    where
        T: Copy + Ord + Add<Duration, Output = T> + Sub<Duration, Output = T>,
    {
        if eta > now + resolution {
            (Lifecycle::Upcoming, Some(eta - resolution))
        } else if etd + resolution > now {
            (Lifecycle::Due, Some(etd + resolution))
        } else {
            (Lifecycle::Departed, None)
        }
    }

    /// Whether no further states follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Departed)
    }
}

/// A predicted stop of a route's vehicle at a station.
///
/// Ordered by eta first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arrival<T> {
    /// Estimated time of arrival.
    pub eta: T,
    /// Estimated time of departure.
    pub etd: T,
    /// Identifier of the route served.
    pub route: String,
    /// Direction sign, when known.
    pub heading: Option<String>,
}

impl<T> Arrival<T>
where
    T: Copy + Ord + Add<Duration, Output = T> + Sub<Duration, Output = T>,
{
    /// This arrival's lifecycle state at `now`.
    pub fn determine(&self, now: T, resolution: Duration) -> (Lifecycle, Option<T>) {
        Lifecycle::determine(self.eta, self.etd, now, resolution)
    }
}
