//! Arrival lifecycle driven by the runtime clock.
//!
//! [`lifecycle`] yields [`Lifecycle::New`] straight away, then sleeps until
//! each refresh point and yields the state determined there. The stream ends
//! after [`Lifecycle::Departed`].

use futures_util::stream::{self, Stream};
use std::time::Duration;
use sync_core::{Arrival, Lifecycle};
use tokio::time::Instant;
use tracing::trace;

enum Step {
    Start,
    At(Instant),
    Done,
}

/// Stream the states of `arrival` as time passes.
pub fn lifecycle(
    arrival: Arrival<Instant>,
    resolution: Duration,
) -> impl Stream<Item = Lifecycle> + Send + 'static {
    stream::unfold(Step::Start, move |step| {
        let arrival = arrival.clone();
        async move {
            match step {
                Step::Start => Some((Lifecycle::New, Step::At(Instant::now()))),
                Step::At(at) => {
                    tokio::time::sleep_until(at).await;
                    let (state, refresh) = arrival.determine(Instant::now(), resolution);
                    trace!(route = %arrival.route, ?state, "arrival determined");
                    let next = match refresh {
                        Some(at) => Step::At(at),
                        None => Step::Done,
                    };
                    Some((state, next))
                }
                Step::Done => None,
            }
        }
    })
}
