//! Invitation context token `"{courseId}:{critiqueId}:{personaId}"`.

use thiserror::Error;

use crate::ids::{CourseId, CritiqueId, PersonaId};
use crate::participant::Participant;

const DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("invitation carries no context")]
    Missing,

    #[error("context is not valid UTF-8")]
    NotUtf8,

    #[error("expected 3 colon-delimited fields, got {0}")]
    FieldCount(usize),

    #[error("context field {0} is empty")]
    EmptyField(usize),

    #[error("context targets course `{course_id}` critique `{critique_id}`")]
    ScopeMismatch {
        course_id: String,
        critique_id: String,
    },
}

/// Inviter identity sent out-of-band with a session invitation
///
/// 邀请上下文:邀请方的课程、评审与人物标识。接受方据此确认邀请属于本次评审。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteContext {
    pub course_id: CourseId,
    pub critique_id: CritiqueId,
    pub persona_id: PersonaId,
}

impl InviteContext {
    pub fn for_participant(participant: &Participant) -> Self {
        Self {
            course_id: participant.course_id.clone(),
            critique_id: participant.critique_id.clone(),
            persona_id: participant.persona_id.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ContextError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ContextError::NotUtf8)?;
        let parts: Vec<&str> = text.split(DELIMITER).collect();
        if parts.len() != 3 {
            return Err(ContextError::FieldCount(parts.len()));
        }
        if let Some(index) = parts.iter().position(|part| part.is_empty()) {
            return Err(ContextError::EmptyField(index));
        }

        Ok(Self {
            course_id: CourseId::new(parts[0]),
            critique_id: CritiqueId::new(parts[1]),
            persona_id: PersonaId::new(parts[2]),
        })
    }

    /// Parse an optional payload and check it targets the local session scope.
    pub fn validate_for(
        payload: Option<&[u8]>,
        local: &Participant,
    ) -> Result<Self, ContextError> {
        let context = Self::parse(payload.ok_or(ContextError::Missing)?)?;
        if !local.in_scope(context.course_id.as_str(), context.critique_id.as_str()) {
            return Err(ContextError::ScopeMismatch {
                course_id: context.course_id.to_string(),
                critique_id: context.critique_id.to_string(),
            });
        }
        Ok(context)
    }
}

impl std::fmt::Display for InviteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.course_id, self.critique_id, self.persona_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> Participant {
        Participant::student("alice", "101", "7")
    }

    fn check(payload: &str) -> Result<InviteContext, ContextError> {
        InviteContext::validate_for(Some(payload.as_bytes()), &local())
    }

    #[test]
    fn test_encode_uses_colon_delimited_utf8() {
        let ctx = InviteContext::for_participant(&Participant::moderator("mod", "101", "7"));
        assert_eq!(ctx.encode(), b"101:7:mod".to_vec());
    }

    #[test]
    fn test_valid_context_is_accepted() {
        let ctx = check("101:7:mod").unwrap();
        assert_eq!(ctx.persona_id, PersonaId::new("mod"));
    }

    #[test]
    fn test_field_count_must_be_three() {
        assert_eq!(
            check("101:7"),
            Err(ContextError::FieldCount(2))
        );
        assert_eq!(
            check("101:7:mod:x"),
            Err(ContextError::FieldCount(4))
        );
    }

    #[test]
    fn test_empty_fields_are_rejected() {
        assert_eq!(
            check("101:7:"),
            Err(ContextError::EmptyField(2))
        );
        assert_eq!(
            check("::"),
            Err(ContextError::EmptyField(0))
        );
    }

    #[test]
    fn test_scope_must_match() {
        assert!(matches!(
            check("101:8:mod"),
            Err(ContextError::ScopeMismatch { .. })
        ));
        assert!(matches!(
            check("102:7:mod"),
            Err(ContextError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_and_non_utf8_payloads() {
        assert_eq!(
            InviteContext::validate_for(None, &local()),
            Err(ContextError::Missing)
        );
        assert_eq!(
            InviteContext::validate_for(Some(&[0xff, 0xfe, 0x3a][..]), &local()),
            Err(ContextError::NotUtf8)
        );
    }
}
