//! Line-oriented console driving one participant.

use std::ops::ControlFlow;
use std::str::FromStr;

use anyhow::{Context, Result};
use cs_app::StageArbiter;
use cs_core::{Participant, StageSnapshot};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

pub const HELP: &str = "commands: raise | drop | dropping | release | status | help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Raise,
    Drop,
    Dropping,
    Release,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("empty command")]
    Empty,

    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let word = line.trim().to_ascii_lowercase();
        match word.as_str() {
            "" => Err(ConsoleError::Empty),
            "raise" | "r" => Ok(ConsoleCommand::Raise),
            "drop" | "d" => Ok(ConsoleCommand::Drop),
            "dropping" => Ok(ConsoleCommand::Dropping),
            "release" => Ok(ConsoleCommand::Release),
            "status" | "s" => Ok(ConsoleCommand::Status),
            "help" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
            _ => Err(ConsoleError::Unknown(word)),
        }
    }
}

/// One-line rendering of a stage change for `participant`.
pub fn outlook_line(participant: &Participant, snapshot: &StageSnapshot) -> String {
    let outlook = snapshot.outlook(participant);
    let mut line = format!(
        "[{} {}] {}",
        participant.role, participant.persona_id, outlook
    );
    if let Some(turn) = outlook.next_turn() {
        line.push_str(&format!(" (raise for {})", turn.artifact_name(&participant.persona_id)));
    }
    line
}

/// Run one command against the arbiter.
pub async fn execute(arbiter: &StageArbiter, command: ConsoleCommand) -> Result<ControlFlow<()>> {
    match command {
        ConsoleCommand::Raise => {
            let persona = arbiter.participant().persona_id.clone();
            arbiter
                .raise_hand(move |chosen| {
                    if chosen {
                        println!("[{persona}] hand-raise granted");
                    } else {
                        println!("[{persona}] hand-raise denied");
                    }
                })
                .await?;
        }
        ConsoleCommand::Drop => arbiter.drop_hand().await?,
        ConsoleCommand::Dropping => arbiter.dropping_hand().await?,
        ConsoleCommand::Release => arbiter.release_stage().await?,
        ConsoleCommand::Status => {
            println!("{}", outlook_line(arbiter.participant(), &arbiter.snapshot()));
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Ok(ControlFlow::Break(())),
    }
    Ok(ControlFlow::Continue(()))
}

/// Read commands until `quit` or end of input.
pub async fn drive<R>(arbiter: &StageArbiter, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read console input")?
    {
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(ConsoleError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        debug!(?command, "console command");
        if execute(arbiter, command).await?.is_break() {
            info!("quit requested");
            break;
        }
    }
    Ok(())
}
