use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{CourseId, CritiqueId, PersonaId};
use crate::participant::{Participant, Role};
use crate::stage::StageState;

/// String-valued key/value map carried by a discovery broadcast.
pub type DiscoveryInfo = BTreeMap<String, String>;

pub const KEY_COURSE_ID: &str = "courseId";
pub const KEY_CRITIQUE_ID: &str = "critiqueId";
pub const KEY_PERSONA_ID: &str = "personaId";
pub const KEY_CRITIQUE_PERSONA_ID: &str = "critiquePersonaId";
pub const KEY_TIMESTAMP: &str = "timeStamp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("record belongs to course `{course_id}` critique `{critique_id}`")]
    OutOfScope {
        course_id: String,
        critique_id: String,
    },
}

/// Decoded presence broadcast
///
/// 发现广播负载。`persona_id` 只在主持人空闲的 "舞台开放" 广播中缺省;
/// `critique_for` 仅在当前持有者点评他人作品时出现。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub course_id: CourseId,
    pub critique_id: CritiqueId,
    pub persona_id: Option<PersonaId>,
    pub critique_for: Option<PersonaId>,
    pub timestamp: Option<i64>,
}

impl PresenceRecord {
    pub fn to_discovery_info(&self) -> DiscoveryInfo {
        let mut info = DiscoveryInfo::new();
        info.insert(KEY_COURSE_ID.to_string(), self.course_id.to_string());
        info.insert(KEY_CRITIQUE_ID.to_string(), self.critique_id.to_string());
        if let Some(persona) = &self.persona_id {
            info.insert(KEY_PERSONA_ID.to_string(), persona.to_string());
        }
        if let Some(critique_for) = &self.critique_for {
            info.insert(KEY_CRITIQUE_PERSONA_ID.to_string(), critique_for.to_string());
        }
        if let Some(timestamp) = self.timestamp {
            info.insert(KEY_TIMESTAMP.to_string(), timestamp.to_string());
        }
        info
    }

    /// Structural decode. Scope and role rules are checked by [`PresenceRecord::validate`].
    pub fn from_discovery_info(info: &DiscoveryInfo) -> Result<Self, PresenceError> {
        let course_id = info
            .get(KEY_COURSE_ID)
            .ok_or(PresenceError::MissingField(KEY_COURSE_ID))?;
        let critique_id = info
            .get(KEY_CRITIQUE_ID)
            .ok_or(PresenceError::MissingField(KEY_CRITIQUE_ID))?;
        let persona_id = optional_persona(info, KEY_PERSONA_ID)?;
        let critique_for = optional_persona(info, KEY_CRITIQUE_PERSONA_ID)?;
        let timestamp = match info.get(KEY_TIMESTAMP) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| PresenceError::InvalidTimestamp(raw.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            course_id: CourseId::new(course_id.as_str()),
            critique_id: CritiqueId::new(critique_id.as_str()),
            persona_id,
            critique_for,
            timestamp,
        })
    }

    /// Check that the record belongs to the observer's session and carries the
    /// fields the observer's role depends on.
    ///
    /// - 课程与评审标识必须完全一致
    /// - 主持人观察到的学生广播必须带 `personaId`
    /// - 学生观察到的主持人广播必须带时间戳
    pub fn validate(&self, observer: &Participant) -> Result<(), PresenceError> {
        if !observer.in_scope(self.course_id.as_str(), self.critique_id.as_str()) {
            return Err(PresenceError::OutOfScope {
                course_id: self.course_id.to_string(),
                critique_id: self.critique_id.to_string(),
            });
        }
        match observer.role {
            Role::Moderator if self.persona_id.is_none() => {
                Err(PresenceError::MissingField(KEY_PERSONA_ID))
            }
            Role::Student if self.timestamp.is_none() => {
                Err(PresenceError::MissingField(KEY_TIMESTAMP))
            }
            _ => Ok(()),
        }
    }

    pub fn is_valid_for(&self, observer: &Participant) -> bool {
        self.validate(observer).is_ok()
    }
}

fn optional_persona(
    info: &DiscoveryInfo,
    key: &'static str,
) -> Result<Option<PersonaId>, PresenceError> {
    match info.get(key) {
        Some(value) if value.is_empty() => Err(PresenceError::EmptyField(key)),
        Some(value) => Ok(Some(PersonaId::new(value.as_str()))),
        None => Ok(None),
    }
}

/// Build the record a participant advertises for the given stage state.
///
/// 主持人仅在有人持有舞台时写入 `personaId`,仅在点评进行中时写入
/// `critiquePersonaId`;学生总是写入自己的 `personaId`,从不写入点评对象。
pub fn encode(participant: &Participant, state: &StageState, now_secs: i64) -> PresenceRecord {
    let (persona_id, critique_for) = match participant.role {
        Role::Moderator => (state.presenting.clone(), state.critique_for.clone()),
        Role::Student => (Some(participant.persona_id.clone()), None),
    };

    PresenceRecord {
        course_id: participant.course_id.clone(),
        critique_id: participant.critique_id.clone(),
        persona_id,
        critique_for,
        timestamp: Some(now_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moderator() -> Participant {
        Participant::moderator("mod", "101", "7")
    }

    fn student() -> Participant {
        Participant::student("alice", "101", "7")
    }

    #[test]
    fn test_moderator_encodes_holder_and_critique_only_when_set() {
        let mut state = StageState::default();
        let idle = encode(&moderator(), &state, 1_000);
        assert_eq!(idle.persona_id, None);
        assert_eq!(idle.critique_for, None);
        assert_eq!(idle.timestamp, Some(1_000));

        state.presenting = Some(PersonaId::new("bob"));
        state.critique_for = Some(PersonaId::new("alice"));
        let busy = encode(&moderator(), &state, 1_001);
        assert_eq!(busy.persona_id, Some(PersonaId::new("bob")));
        assert_eq!(busy.critique_for, Some(PersonaId::new("alice")));
    }

    #[test]
    fn test_student_always_self_identifies_and_never_sends_critique() {
        let mut state = StageState::default();
        state.critique_for = Some(PersonaId::new("bob"));
        let record = encode(&student(), &state, 42);
        assert_eq!(record.persona_id, Some(PersonaId::new("alice")));
        assert_eq!(record.critique_for, None);
    }

    #[test]
    fn test_wire_keys() {
        let mut state = StageState::default();
        state.presenting = Some(PersonaId::new("bob"));
        state.critique_for = Some(PersonaId::new("carol"));
        let info = encode(&moderator(), &state, 1_700_000_000).to_discovery_info();

        assert_eq!(info.get("courseId").map(String::as_str), Some("101"));
        assert_eq!(info.get("critiqueId").map(String::as_str), Some("7"));
        assert_eq!(info.get("personaId").map(String::as_str), Some("bob"));
        assert_eq!(info.get("critiquePersonaId").map(String::as_str), Some("carol"));
        assert_eq!(info.get("timeStamp").map(String::as_str), Some("1700000000"));
    }

    #[test]
    fn test_decode_rejects_garbage_timestamp() {
        let mut info = encode(&student(), &StageState::default(), 5).to_discovery_info();
        info.insert(KEY_TIMESTAMP.to_string(), "soon".to_string());
        assert_eq!(
            PresenceRecord::from_discovery_info(&info),
            Err(PresenceError::InvalidTimestamp("soon".to_string()))
        );
    }

    #[test]
    fn test_decode_requires_scope_keys() {
        let mut info = DiscoveryInfo::new();
        info.insert(KEY_COURSE_ID.to_string(), "101".to_string());
        assert_eq!(
            PresenceRecord::from_discovery_info(&info),
            Err(PresenceError::MissingField(KEY_CRITIQUE_ID))
        );
    }

    #[test]
    fn test_validate_scope_mismatch() {
        let record = encode(
            &Participant::student("alice", "101", "8"),
            &StageState::default(),
            5,
        );
        assert!(matches!(
            record.validate(&moderator()),
            Err(PresenceError::OutOfScope { .. })
        ));
    }

    #[test]
    fn test_moderator_requires_persona_on_hand_broadcast() {
        let mut record = encode(&student(), &StageState::default(), 5);
        assert!(record.is_valid_for(&moderator()));

        record.persona_id = None;
        assert_eq!(
            record.validate(&moderator()),
            Err(PresenceError::MissingField(KEY_PERSONA_ID))
        );
    }

    #[test]
    fn test_timestamp_required_only_for_student_observer() {
        let mut record = encode(&moderator(), &StageState::default(), 5);
        record.timestamp = None;
        assert!(!record.is_valid_for(&student()));

        let mut hand = encode(&student(), &StageState::default(), 5);
        hand.timestamp = None;
        assert!(hand.is_valid_for(&moderator()));
    }
}
