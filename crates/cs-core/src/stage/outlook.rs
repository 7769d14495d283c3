//! Consumer-facing classification of a stage snapshot.

use serde::{Deserialize, Serialize};

use super::state::StageSnapshot;
use crate::ids::PersonaId;
use crate::participant::Participant;

/// What the stage looks like from one participant's seat
///
/// 从某个参与者视角看到的舞台。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutlook {
    /// No trusted view of the stage yet.
    Unknown,
    /// Open for anyone to present their own work.
    Open,
    /// Open for a critique of `subject`'s work.
    OpenForCritique { subject: PersonaId },
    /// The local participant's work is up for critique, by `critic` once someone
    /// holds the stage.
    CritiqueOfMine { critic: Option<PersonaId> },
    /// The local hand is up, waiting for the moderator.
    Requesting,
    /// The moderator is confirming a candidate.
    Granting { candidate: PersonaId },
    Held {
        holder: PersonaId,
        critique_for: Option<PersonaId>,
    },
    /// The local participant holds the stage.
    OnStage { critique_for: Option<PersonaId> },
    Closed,
}

impl StageOutlook {
    pub fn can_raise_hand(&self) -> bool {
        matches!(self, StageOutlook::Open | StageOutlook::OpenForCritique { .. })
    }

    /// The turn a hand-raise in this outlook would lead to.
    pub fn next_turn(&self) -> Option<TurnKind> {
        match self {
            StageOutlook::Open => Some(TurnKind::Presentation),
            StageOutlook::OpenForCritique { subject } => Some(TurnKind::Critique {
                subject: subject.clone(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageOutlook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutlook::Unknown => write!(f, "looking for the stage"),
            StageOutlook::Open => write!(f, "stage open"),
            StageOutlook::OpenForCritique { subject } => {
                write!(f, "stage open for a critique of {subject}")
            }
            StageOutlook::CritiqueOfMine { critic: None } => {
                write!(f, "stage open for critiquing me")
            }
            StageOutlook::CritiqueOfMine {
                critic: Some(critic),
            } => write!(f, "{critic} critiques me"),
            StageOutlook::Requesting => write!(f, "hand raised"),
            StageOutlook::Granting { candidate } => write!(f, "granting stage to {candidate}"),
            StageOutlook::Held {
                holder,
                critique_for: None,
            } => write!(f, "{holder} presents"),
            StageOutlook::Held {
                holder,
                critique_for: Some(subject),
            } => write!(f, "{holder} critiques {subject}"),
            StageOutlook::OnStage { critique_for: None } => write!(f, "on stage, presenting"),
            StageOutlook::OnStage {
                critique_for: Some(subject),
            } => write!(f, "on stage, critiquing {subject}"),
            StageOutlook::Closed => write!(f, "closed"),
        }
    }
}

/// What a turn on stage is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnKind {
    Presentation,
    Critique { subject: PersonaId },
}

impl TurnKind {
    /// Recording name of a turn taken by `speaker`.
    pub fn artifact_name(&self, speaker: &PersonaId) -> String {
        match self {
            TurnKind::Presentation => format!("{speaker}_presents.m4a"),
            TurnKind::Critique { subject } => format!("{speaker}_critique-for_{subject}.m4a"),
        }
    }
}

impl StageSnapshot {
    pub fn outlook(&self, me: &Participant) -> StageOutlook {
        if self.closed {
            return StageOutlook::Closed;
        }
        if let Some(holder) = &self.holder {
            if me.is_me(holder) {
                return StageOutlook::OnStage {
                    critique_for: self.critique_for.clone(),
                };
            }
            if self.critique_for.as_ref().is_some_and(|subject| me.is_me(subject)) {
                return StageOutlook::CritiqueOfMine {
                    critic: Some(holder.clone()),
                };
            }
            return StageOutlook::Held {
                holder: holder.clone(),
                critique_for: self.critique_for.clone(),
            };
        }
        if let Some(candidate) = &self.candidate {
            return StageOutlook::Granting {
                candidate: candidate.clone(),
            };
        }
        if self.hand_raised {
            return StageOutlook::Requesting;
        }
        match (&self.critique_for, self.available) {
            (Some(subject), true) => StageOutlook::OpenForCritique {
                subject: subject.clone(),
            },
            (None, true) => StageOutlook::Open,
            (Some(subject), false) if me.is_me(subject) => {
                StageOutlook::CritiqueOfMine { critic: None }
            }
            _ => StageOutlook::Unknown,
        }
    }

    /// The turn the holder is taking, if anyone holds the stage.
    pub fn current_turn(&self) -> Option<TurnKind> {
        self.holder.as_ref()?;
        Some(match &self.critique_for {
            Some(subject) => TurnKind::Critique {
                subject: subject.clone(),
            },
            None => TurnKind::Presentation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Participant {
        Participant::student("alice", "101", "7")
    }

    fn snapshot(available: bool, holder: Option<&str>, critique_for: Option<&str>) -> StageSnapshot {
        StageSnapshot {
            available,
            holder: holder.map(PersonaId::new),
            critique_for: critique_for.map(PersonaId::new),
            ..StageSnapshot::default()
        }
    }

    #[test]
    fn test_open_variants() {
        assert_eq!(snapshot(true, None, None).outlook(&alice()), StageOutlook::Open);
        assert_eq!(
            snapshot(true, None, Some("bob")).outlook(&alice()),
            StageOutlook::OpenForCritique {
                subject: PersonaId::new("bob")
            }
        );
        assert!(snapshot(true, None, Some("bob"))
            .outlook(&alice())
            .can_raise_hand());
    }

    #[test]
    fn test_critique_of_mine_is_not_raisable() {
        let outlook = snapshot(false, None, Some("alice")).outlook(&alice());
        assert_eq!(outlook, StageOutlook::CritiqueOfMine { critic: None });
        assert!(!outlook.can_raise_hand());
    }

    #[test]
    fn test_named_critic_of_my_work_is_not_a_plain_hold() {
        let outlook = snapshot(false, Some("bob"), Some("alice")).outlook(&alice());
        assert_eq!(
            outlook,
            StageOutlook::CritiqueOfMine {
                critic: Some(PersonaId::new("bob"))
            }
        );
        assert!(!outlook.can_raise_hand());
        assert_eq!(outlook.to_string(), "bob critiques me");

        let carol = Participant::student("carol", "101", "7");
        assert_eq!(
            snapshot(false, Some("bob"), Some("alice")).outlook(&carol),
            StageOutlook::Held {
                holder: PersonaId::new("bob"),
                critique_for: Some(PersonaId::new("alice")),
            }
        );
    }

    #[test]
    fn test_holder_variants() {
        assert_eq!(
            snapshot(false, Some("alice"), None).outlook(&alice()),
            StageOutlook::OnStage { critique_for: None }
        );
        assert_eq!(
            snapshot(false, Some("bob"), Some("carol")).outlook(&alice()),
            StageOutlook::Held {
                holder: PersonaId::new("bob"),
                critique_for: Some(PersonaId::new("carol")),
            }
        );
        assert_eq!(snapshot(false, None, None).outlook(&alice()), StageOutlook::Unknown);
    }

    #[test]
    fn test_artifact_names() {
        let speaker = PersonaId::new("bob");
        assert_eq!(TurnKind::Presentation.artifact_name(&speaker), "bob_presents.m4a");
        assert_eq!(
            TurnKind::Critique {
                subject: PersonaId::new("alice")
            }
            .artifact_name(&speaker),
            "bob_critique-for_alice.m4a"
        );
    }

    #[test]
    fn test_current_turn_follows_critique_designation() {
        assert_eq!(snapshot(true, None, Some("bob")).current_turn(), None);
        assert_eq!(
            snapshot(false, Some("carol"), Some("bob")).current_turn(),
            Some(TurnKind::Critique {
                subject: PersonaId::new("bob")
            })
        );
    }
}
