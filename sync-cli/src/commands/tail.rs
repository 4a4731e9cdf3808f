//! Print every event on a topic.

use anyhow::{Context, Result};
use sync_client::{ClientConfig, Connection};
use sync_types::Topic;

use super::{close_session, open_session};

/// Run the tail command.
pub async fn run(config: ClientConfig, topic: &str, use_mock: bool) -> Result<()> {
    let topic: Topic = topic.parse().context("Invalid topic")?;
    let session = open_session(config.connection, use_mock).await?;

    let mut events = session.subscribe(&topic);
    println!("Tailing {} (Ctrl-C to stop)...", topic);

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.next() => match event {
                Some(Ok(event)) => println!("{:?}", event),
                Some(Err(e)) => break Err(e).context("Subscription failed"),
                None => break Ok(()),
            },
        }
    };

    drop(events);
    close_session(session).await;
    result
}
