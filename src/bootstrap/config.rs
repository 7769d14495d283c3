//! # Configuration Loader / 配置加载器
//!
//! 读取 TOML 配置文件并叠加命令行参数。文件只做数据加载;
//! 参与者身份的完整性在 [`resolve_participant`] 中检查。

use anyhow::{bail, Context};
use std::path::PathBuf;

use cs_core::config::AppConfig;
use cs_core::Participant;

use crate::cli::Cli;

/// Load configuration from a TOML file
/// 从 TOML 文件加载配置
///
/// # Errors / 错误
///
/// Returns error if:
/// - File cannot be read (I/O error)
/// - Content is not valid TOML (parse error)
/// - A key has the wrong type or is out of range
pub fn load_config(config_path: PathBuf) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let toml_value: toml::Value =
        toml::from_str(&content).context("Failed to parse config as TOML")?;
    AppConfig::from_toml(&toml_value)
        .with_context(|| format!("Invalid config file: {}", config_path.display()))
}

/// Command line flags win over the file.
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(persona) = &cli.persona {
        config.participant.persona_id = persona.clone();
    }
    if let Some(course) = &cli.course {
        config.participant.course_id = course.clone();
    }
    if let Some(critique) = &cli.critique {
        config.participant.critique_id = critique.clone();
    }
    if cli.moderator {
        config.participant.moderator = true;
    }
}

/// The local participant. Every identifier must be present and free of `:`,
/// the invitation token delimiter.
pub fn resolve_participant(config: &AppConfig) -> anyhow::Result<Participant> {
    let fields = [
        ("persona", &config.participant.persona_id),
        ("course", &config.participant.course_id),
        ("critique", &config.participant.critique_id),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            bail!("missing {name} id, set it in [participant] or pass --{name}");
        }
        if value.contains(':') {
            bail!("{name} id `{value}` must not contain ':'");
        }
    }
    Ok(config.participant.to_participant())
}
