//! Call a procedure.

use anyhow::{Context, Result};
use serde_json::Value;
use sync_client::{ClientConfig, Connection};
use sync_types::{Args, Kwargs};

use super::{close_session, open_session};

/// Run the call command.
pub async fn run(config: ClientConfig, procedure: &str, args: &[String], use_mock: bool) -> Result<()> {
    let args = parse_args(args);
    let session = open_session(config.connection, use_mock).await?;

    let result = session
        .call(procedure, args, Kwargs::new())
        .await
        .with_context(|| format!("Call to {} failed", procedure));
    close_session(session).await;

    println!("{:?}", result?);
    Ok(())
}

/// JSON values where they parse, plain strings otherwise.
fn parse_args(raw: &[String]) -> Args {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}
