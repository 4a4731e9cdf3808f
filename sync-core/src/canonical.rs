//! Canonical route reduction.
//!
//! A physical route is usually published as a round trip: a stop-by-stop
//! itinerary that loops back on itself, with some stops visited only on
//! certain passes. [`reduce`] collapses that sequence into a deduplicated,
//! ordered loop where every stop is either [`CanonicalStop::Constant`]
//! (visited on every pass) or [`CanonicalStop::Conditional`].
//!
//! The scan runs in two phases:
//!
//! 1. **Building.** Unseen stations are appended as constant until one
//!    repeats, closing the loop. Stations ahead of the repeated station's
//!    first occurrence are a lead-in that is not part of the loop proper.
//! 2. **Verifying.** Each following station is compared with the one
//!    expected at the cursor (wrapping around the loop). A match advances
//!    the cursor. A station found elsewhere downgrades every stop the trip
//!    skipped to reach it. An unseen station is inserted as conditional at
//!    the cursor.
//!
//! Lead-in stations that the loop never returns to are downgraded at the end.
//! Downgrades only go from constant to conditional, and every input station
//! appears exactly once in the output.

/// A stop on a canonical itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalStop<S> {
    /// Visited on every pass.
    Constant(S),
    /// Visited on some passes only.
    Conditional(S),
}

impl<S> CanonicalStop<S> {
    /// The station at this stop.
    pub fn station(&self) -> &S {
        match self {
            CanonicalStop::Constant(s) | CanonicalStop::Conditional(s) => s,
        }
    }

    /// Consume the stop, returning its station.
    pub fn into_station(self) -> S {
        match self {
            CanonicalStop::Constant(s) | CanonicalStop::Conditional(s) => s,
        }
    }

    /// Whether every pass visits this stop.
    pub fn is_constant(&self) -> bool {
        matches!(self, CanonicalStop::Constant(_))
    }
}

struct Entry<S> {
    station: S,
    constant: bool,
    // Lead-in stop that the loop has not visited yet.
    unconfirmed: bool,
}

enum Phase {
    Building,
    Verifying { cursor: usize },
}

/// Reduce a raw, possibly looping itinerary to its canonical form.
pub fn reduce<S: PartialEq + Clone>(itinerary: &[S]) -> Vec<CanonicalStop<S>> {
    let mut entries: Vec<Entry<S>> = Vec::new();
    let mut phase = Phase::Building;

    for station in itinerary {
        let found = entries.iter().position(|e| e.station == *station);
        phase = match phase {
            Phase::Building => match found {
                Some(first) => {
                    for entry in &mut entries[..first] {
                        entry.unconfirmed = true;
                    }
                    Phase::Verifying { cursor: first + 1 }
                }
                None => {
                    entries.push(Entry {
                        station: station.clone(),
                        constant: true,
                        unconfirmed: false,
                    });
                    Phase::Building
                }
            },
            Phase::Verifying { cursor } => {
                let len = entries.len();
                let expected = cursor % len;
                match found {
                    Some(at) => {
                        let mut skipped = expected;
                        while skipped != at {
                            entries[skipped].constant = false;
                            skipped = (skipped + 1) % len;
                        }
                        entries[at].unconfirmed = false;
                        Phase::Verifying { cursor: at + 1 }
                    }
                    None => {
                        entries.insert(
                            cursor,
                            Entry {
                                station: station.clone(),
                                constant: false,
                                unconfirmed: false,
                            },
                        );
                        Phase::Verifying { cursor: cursor + 1 }
                    }
                }
            }
        };
    }

    entries
        .into_iter()
        .map(|e| {
            if e.constant && !e.unconfirmed {
                CanonicalStop::Constant(e.station)
            } else {
                CanonicalStop::Conditional(e.station)
            }
        })
        .collect()
}
