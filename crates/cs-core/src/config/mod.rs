//! # Configuration DTOs / 配置数据
//!
//! TOML → DTO mapping for a participant process. Missing keys fall back to the
//! protocol defaults; keys that are present but malformed are errors.
//!
//! ```toml
//! [participant]
//! persona_id = "alice"
//! course_id = "101"
//! critique_id = "7"
//! moderator = false
//!
//! [stage]
//! service_base = "lscritique"
//! service_timeout_secs = 5
//! phantom_age_secs = 10
//! clock_trust = "skew_compensated"
//!
//! [network]
//! listen_port = 0
//! announce_interval_ms = 1000
//! presence_ttl_ms = 3000
//! idle_connection_timeout_secs = 60
//!
//! [logging]
//! level = "info"
//! directory = "/var/log/critique-stage"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::participant::{Participant, Role};
use crate::presence::{ClockTrust, DEFAULT_SERVICE_BASE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("`{section}.{key}` has the wrong type, expected {expected}")]
    WrongType {
        section: &'static str,
        key: &'static str,
        expected: &'static str,
    },

    #[error("`{section}.{key}` is out of range: {value}")]
    OutOfRange {
        section: &'static str,
        key: &'static str,
        value: i64,
    },

    #[error("unknown clock trust `{0}`, expected `local` or `skew_compensated`")]
    UnknownClockTrust(String),
}

/// Protocol tunables
///
/// 协议参数。`service_timeout` 同时是单次重启延迟与邀请超时,
/// 挂起授予与举手的上限为其两倍。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub service_base: String,
    pub service_timeout: Duration,
    pub phantom_age: Duration,
    pub clock_trust: ClockTrust,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            service_base: DEFAULT_SERVICE_BASE.to_string(),
            service_timeout: Duration::from_secs(5),
            phantom_age: Duration::from_secs(10),
            clock_trust: ClockTrust::default(),
        }
    }
}

/// Transport tunables for the libp2p adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// 0 picks an ephemeral port.
    pub listen_port: u16,
    /// How often an advertiser republishes its record.
    pub announce_interval: Duration,
    /// A browsed peer silent for this long is reported lost.
    pub presence_ttl: Duration,
    pub idle_connection_timeout: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            listen_port: 0,
            announce_interval: Duration::from_secs(1),
            presence_ttl: Duration::from_secs(3),
            idle_connection_timeout: Duration::from_secs(60),
        }
    }
}

/// Who this process is. Empty strings are kept as facts; the CLI fills them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub persona_id: String,
    pub course_id: String,
    pub critique_id: String,
    pub moderator: bool,
}

impl ParticipantConfig {
    pub fn role(&self) -> Role {
        if self.moderator {
            Role::Moderator
        } else {
            Role::Student
        }
    }

    pub fn to_participant(&self) -> Participant {
        Participant::new(
            self.persona_id.as_str(),
            self.role(),
            self.course_id.as_str(),
            self.critique_id.as_str(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: Option<String>,
    /// Directory for the daily rolling log file; console only when absent.
    pub directory: Option<PathBuf>,
}

/// Application configuration DTO
/// 应用配置 DTO
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub participant: ParticipantConfig,
    pub stage: StageSettings,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Create AppConfig from TOML value
    /// 从 TOML 值创建 AppConfig
    pub fn from_toml(toml_value: &toml::Value) -> anyhow::Result<Self> {
        let participant = ParticipantConfig {
            persona_id: string_or(toml_value, "participant", "persona_id", "")?,
            course_id: string_or(toml_value, "participant", "course_id", "")?,
            critique_id: string_or(toml_value, "participant", "critique_id", "")?,
            moderator: bool_or(toml_value, "participant", "moderator", false)?,
        };

        let stage_defaults = StageSettings::default();
        let clock_trust = match lookup(toml_value, "stage", "clock_trust") {
            None => stage_defaults.clock_trust,
            Some(value) => parse_clock_trust(value.as_str().ok_or(ConfigError::WrongType {
                section: "stage",
                key: "clock_trust",
                expected: "string",
            })?)?,
        };
        let stage = StageSettings {
            service_base: string_or(
                toml_value,
                "stage",
                "service_base",
                &stage_defaults.service_base,
            )?,
            service_timeout: secs_or(
                toml_value,
                "stage",
                "service_timeout_secs",
                stage_defaults.service_timeout,
            )?,
            phantom_age: secs_or(
                toml_value,
                "stage",
                "phantom_age_secs",
                stage_defaults.phantom_age,
            )?,
            clock_trust,
        };

        let network_defaults = NetworkSettings::default();
        let listen_port = match integer(toml_value, "network", "listen_port")? {
            None => network_defaults.listen_port,
            Some(value) => u16::try_from(value).map_err(|_| ConfigError::OutOfRange {
                section: "network",
                key: "listen_port",
                value,
            })?,
        };
        let network = NetworkSettings {
            listen_port,
            announce_interval: millis_or(
                toml_value,
                "network",
                "announce_interval_ms",
                network_defaults.announce_interval,
            )?,
            presence_ttl: millis_or(
                toml_value,
                "network",
                "presence_ttl_ms",
                network_defaults.presence_ttl,
            )?,
            idle_connection_timeout: secs_or(
                toml_value,
                "network",
                "idle_connection_timeout_secs",
                network_defaults.idle_connection_timeout,
            )?,
        };

        let logging = LoggingSettings {
            level: optional_string(toml_value, "logging", "level")?,
            directory: optional_string(toml_value, "logging", "directory")?.map(PathBuf::from),
        };

        Ok(Self {
            participant,
            stage,
            network,
            logging,
        })
    }
}

pub fn parse_clock_trust(raw: &str) -> Result<ClockTrust, ConfigError> {
    match raw.trim() {
        "local" => Ok(ClockTrust::Local),
        "skew_compensated" => Ok(ClockTrust::SkewCompensated),
        other => Err(ConfigError::UnknownClockTrust(other.to_string())),
    }
}

fn lookup<'a>(value: &'a toml::Value, section: &str, key: &str) -> Option<&'a toml::Value> {
    value.get(section).and_then(|s| s.get(key))
}

fn optional_string(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
) -> Result<Option<String>, ConfigError> {
    match lookup(value, section, key) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(ConfigError::WrongType {
                section,
                key,
                expected: "string",
            }),
    }
}

fn string_or(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    Ok(optional_string(value, section, key)?.unwrap_or_else(|| default.to_string()))
}

fn bool_or(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(value, section, key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or(ConfigError::WrongType {
            section,
            key,
            expected: "boolean",
        }),
    }
}

fn integer(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
) -> Result<Option<i64>, ConfigError> {
    match lookup(value, section, key) {
        None => Ok(None),
        Some(v) => v.as_integer().map(Some).ok_or(ConfigError::WrongType {
            section,
            key,
            expected: "integer",
        }),
    }
}

fn non_negative(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match integer(value, section, key)? {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| ConfigError::OutOfRange {
                section,
                key,
                value: v,
            }),
    }
}

fn secs_or(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(non_negative(value, section, key)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

fn millis_or(
    value: &toml::Value,
    section: &'static str,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(non_negative(value, section, key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Value;

    fn parse(toml_str: &str) -> anyhow::Result<AppConfig> {
        let toml_value: Value = toml::from_str(toml_str).unwrap();
        AppConfig::from_toml(&toml_value)
    }

    #[test]
    fn test_empty_file_yields_protocol_defaults() {
        let config = parse("").unwrap();

        assert_eq!(config.stage.service_base, "lscritique");
        assert_eq!(config.stage.service_timeout, Duration::from_secs(5));
        assert_eq!(config.stage.phantom_age, Duration::from_secs(10));
        assert_eq!(config.stage.clock_trust, ClockTrust::SkewCompensated);
        assert_eq!(config.network.announce_interval, Duration::from_secs(1));
        assert_eq!(config.network.presence_ttl, Duration::from_secs(3));
        // Empty identity is a fact, not an error
        assert_eq!(config.participant.persona_id, "");
        assert_eq!(config.participant.role(), Role::Student);
    }

    #[test]
    fn test_full_file_is_mapped() {
        let config = parse(
            r#"
            [participant]
            persona_id = "mod"
            course_id = "101"
            critique_id = "7"
            moderator = true

            [stage]
            service_base = "demo"
            service_timeout_secs = 2
            phantom_age_secs = 4
            clock_trust = "local"

            [network]
            listen_port = 4100
            announce_interval_ms = 250
            presence_ttl_ms = 900
            idle_connection_timeout_secs = 30

            [logging]
            level = "debug"
            directory = "/tmp/cs-logs"
        "#,
        )
        .unwrap();

        let participant = config.participant.to_participant();
        assert!(participant.is_moderator());
        assert_eq!(participant.persona_id.as_str(), "mod");
        assert_eq!(config.stage.service_base, "demo");
        assert_eq!(config.stage.service_timeout, Duration::from_secs(2));
        assert_eq!(config.stage.phantom_age, Duration::from_secs(4));
        assert_eq!(config.stage.clock_trust, ClockTrust::Local);
        assert_eq!(config.network.listen_port, 4100);
        assert_eq!(config.network.announce_interval, Duration::from_millis(250));
        assert_eq!(config.network.presence_ttl, Duration::from_millis(900));
        assert_eq!(
            config.network.idle_connection_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/cs-logs")));
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let err = parse(
            r#"
            [stage]
            service_timeout_secs = "five"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("stage.service_timeout_secs"));
    }

    #[test]
    fn test_negative_duration_is_out_of_range() {
        let err = parse(
            r#"
            [stage]
            phantom_age_secs = -1
        "#,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_port_out_of_range_is_rejected() {
        assert!(parse("[network]\nlisten_port = 99999\n").is_err());
    }

    #[test]
    fn test_unknown_clock_trust_is_rejected() {
        assert_eq!(
            parse_clock_trust("ntp"),
            Err(ConfigError::UnknownClockTrust("ntp".to_string()))
        );
        assert!(parse("[stage]\nclock_trust = \"ntp\"\n").is_err());
    }
}
