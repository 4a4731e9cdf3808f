//! Follow one route model.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_client::{ClientConfig, ModelRegistry, RouteState};
use sync_core::CanonicalStop;
use sync_types::Route;

use super::{close_session, open_session, LogDelegate};

/// Run the watch-route command.
pub async fn run(config: ClientConfig, short_name: &str, use_mock: bool) -> Result<()> {
    let session = open_session(config.connection, use_mock).await?;
    let registry = ModelRegistry::new(Arc::new(session.clone()), Arc::new(LogDelegate), &config.models);

    let route = registry
        .lease_route(&Route::new(short_name))
        .context("Failed to lease route")?;
    let mut state = route.watch();
    let mut canonical = route.watch_canonical();
    println!("Watching route {} (Ctrl-C to stop)...", short_name);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", summarize(&state.borrow_and_update()));
            }
            changed = canonical.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("itinerary: {}", render(&canonical.borrow_and_update()));
            }
        }
    }

    drop(route);
    drop(registry);
    close_session(session).await;
    Ok(())
}

fn summarize(state: &RouteState) -> String {
    format!(
        "{}: {} station(s), {} vehicle(s)",
        state.name.as_deref().unwrap_or("(unnamed)"),
        state.stations.len(),
        state.vehicles.len()
    )
}

/// Conditional stops are bracketed.
fn render(itinerary: &[CanonicalStop<String>]) -> String {
    itinerary
        .iter()
        .map(|stop| match stop {
            CanonicalStop::Constant(s) => s.clone(),
            CanonicalStop::Conditional(s) => format!("[{}]", s),
        })
        .collect::<Vec<_>>()
        .join(" → ")
}
