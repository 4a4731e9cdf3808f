//! List the agency's routes.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_client::{ClientConfig, ModelRegistry};

use super::{close_session, open_session, LogDelegate};

/// Run the routes command.
pub async fn run(config: ClientConfig, use_mock: bool) -> Result<()> {
    let session = open_session(config.connection, use_mock).await?;
    let registry = ModelRegistry::new(Arc::new(session.clone()), Arc::new(LogDelegate), &config.models);

    let routes = registry
        .load_agency_routes()
        .await
        .with_context(|| format!("Failed to load routes for {}", config.agency.name))?;

    println!("=== {} routes ===", config.agency.name);
    for route in &routes {
        let state = route.state();
        println!(
            "  {:<6} {}",
            route.identifier(),
            state.name.as_deref().unwrap_or("(unnamed)")
        );
    }
    println!("{} route(s)", routes.len());

    drop(routes);
    drop(registry);
    close_session(session).await;
    Ok(())
}
