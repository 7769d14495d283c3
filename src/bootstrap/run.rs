use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tracing::{info, warn};

use cs_app::StageArbiter;
use cs_core::config::AppConfig;

use super::config::{apply_cli_overrides, load_config, resolve_participant};
use super::tracing::init_tracing_subscriber;
use super::wiring::{wire_libp2p, wire_loopback};
use crate::cli::{Cli, TransportKind};
use crate::console::{self, HELP};
use crate::observer::ConsoleObserver;

/// Load configuration, install logging, wire the chosen transport and drive the
/// local participant from stdin until `quit`, end of input or Ctrl-C.
pub async fn run_app(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path.clone())?,
        None => AppConfig::default(),
    };
    apply_cli_overrides(&mut config, &cli);
    init_tracing_subscriber(&config.logging)?;

    let participant = resolve_participant(&config)?;
    info!(
        persona = %participant.persona_id,
        role = %participant.role,
        course = %participant.course_id,
        critique = %participant.critique_id,
        transport = ?cli.transport,
        "joining critique"
    );
    let observer = Arc::new(ConsoleObserver::new(participant.clone()));

    println!("{HELP}");
    match cli.transport {
        TransportKind::Libp2p => {
            let arbiter = wire_libp2p(&config, participant, observer).await?;
            arbiter.start().await?;
            let outcome = drive_stdin(&arbiter).await;
            arbiter.teardown().await?;
            outcome
        }
        TransportKind::Loopback => {
            let loopback = wire_loopback(&config, participant, observer).await?;
            loopback.start().await?;
            let outcome = drive_stdin(&loopback.local).await;
            loopback.teardown().await?;
            outcome
        }
    }
}

async fn drive_stdin(arbiter: &StageArbiter) -> Result<()> {
    let input = BufReader::new(tokio::io::stdin());
    tokio::select! {
        outcome = console::drive(arbiter, input) => outcome,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("failed to listen for Ctrl-C: {e}");
            }
            info!("interrupted");
            Ok(())
        }
    }
}
