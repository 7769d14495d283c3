use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which transport carries the stage channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportKind {
    /// mDNS + gossipsub presence and request-response sessions on the LAN
    #[default]
    Libp2p,
    /// A moderator and the local participant over the in-memory air
    Loopback,
}

/// Join a critique session and drive one participant from stdin
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "critique-stage", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "ID")]
    pub persona: Option<String>,

    #[arg(long, value_name = "ID")]
    pub course: Option<String>,

    #[arg(long, value_name = "ID")]
    pub critique: Option<String>,

    /// Take the moderator role
    #[arg(long)]
    pub moderator: bool,

    #[arg(long, value_enum, default_value_t = TransportKind::Libp2p)]
    pub transport: TransportKind,
}
