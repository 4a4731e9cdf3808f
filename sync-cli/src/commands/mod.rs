//! CLI command implementations.

pub mod call;
pub mod routes;
pub mod tail;
pub mod watch_route;

use anyhow::{Context, Result};
use sync_client::{
    ConnectionConfig, EntityKey, MockTransport, ModelDelegate, ModelError, Session,
    WebSocketTransport,
};
use sync_types::TopicEvent;
use tracing::{info, warn};

/// Start a session and wait until it is established.
pub async fn open_session(config: ConnectionConfig, use_mock: bool) -> Result<Session> {
    let server = config.server.clone();
    let session = if use_mock {
        info!("using mock router");
        Session::start(config, MockTransport::new())
    } else {
        info!(%server, "connecting");
        Session::start(config, WebSocketTransport::new())
    };

    let handle = session
        .connected()
        .await
        .with_context(|| format!("Failed to connect to {}", server))?;
    info!(
        session = handle.session_id(),
        serialization = ?handle.serialization(),
        "session established"
    );
    Ok(session)
}

/// Close `session` and wait for the goodbye to go out.
pub async fn close_session(session: Session) {
    session.close();
    session.settled().await;
}

/// Logs what models hand back.
pub struct LogDelegate;

impl ModelDelegate for LogDelegate {
    fn on_event(&self, model: &EntityKey, event: &TopicEvent) {
        info!(%model, ?event, "unhandled event");
    }

    fn on_error(&self, model: &EntityKey, error: &ModelError) {
        warn!(%model, %error, "model error");
    }
}
