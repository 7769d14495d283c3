//! Participant identity for one device in one critique.

use serde::{Deserialize, Serialize};

use crate::ids::{CourseId, CritiqueId, PersonaId};

/// Role of a participant in the arbitration protocol
///
/// 参与者在仲裁协议中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The single arbitrating participant; grants and reclaims the stage.
    Moderator,
    /// A participant who has to ask the moderator for the stage.
    Student,
}

impl Role {
    pub fn is_moderator(&self) -> bool {
        matches!(self, Role::Moderator)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Moderator => write!(f, "moderator"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// Immutable identity of the local participant for the lifetime of an
/// arbitration session.
///
/// 本地参与者身份,在整个仲裁会话期间不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub persona_id: PersonaId,
    pub role: Role,
    pub course_id: CourseId,
    pub critique_id: CritiqueId,
}

impl Participant {
    pub fn new(
        persona_id: impl Into<PersonaId>,
        role: Role,
        course_id: impl Into<CourseId>,
        critique_id: impl Into<CritiqueId>,
    ) -> Self {
        Self {
            persona_id: persona_id.into(),
            role,
            course_id: course_id.into(),
            critique_id: critique_id.into(),
        }
    }

    pub fn moderator(
        persona_id: impl Into<PersonaId>,
        course_id: impl Into<CourseId>,
        critique_id: impl Into<CritiqueId>,
    ) -> Self {
        Self::new(persona_id, Role::Moderator, course_id, critique_id)
    }

    pub fn student(
        persona_id: impl Into<PersonaId>,
        course_id: impl Into<CourseId>,
        critique_id: impl Into<CritiqueId>,
    ) -> Self {
        Self::new(persona_id, Role::Student, course_id, critique_id)
    }

    pub fn is_moderator(&self) -> bool {
        self.role.is_moderator()
    }

    /// True if the given course/critique pair is this participant's session scope.
    pub fn in_scope(&self, course_id: &str, critique_id: &str) -> bool {
        self.course_id == course_id && self.critique_id == critique_id
    }

    pub fn is_me(&self, persona: &PersonaId) -> bool {
        &self.persona_id == persona
    }
}
