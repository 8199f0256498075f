use serde::{Deserialize, Serialize};

/// Closed set of synthetic-user traits.
///
/// Traits drive starter/follow-up phrase selection; new conversational
/// behavior is added by extending the phrase configuration, not by
/// branching on personas in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaTrait {
    Curious,
    Skeptical,
    Frustrated,
    BudgetConscious,
    TechSavvy,
    Impatient,
}

impl std::fmt::Display for PersonaTrait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersonaTrait::Curious => write!(f, "curious"),
            PersonaTrait::Skeptical => write!(f, "skeptical"),
            PersonaTrait::Frustrated => write!(f, "frustrated"),
            PersonaTrait::BudgetConscious => write!(f, "budget_conscious"),
            PersonaTrait::TechSavvy => write!(f, "tech_savvy"),
            PersonaTrait::Impatient => write!(f, "impatient"),
        }
    }
}

impl std::str::FromStr for PersonaTrait {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "curious" => Ok(PersonaTrait::Curious),
            "skeptical" => Ok(PersonaTrait::Skeptical),
            "frustrated" => Ok(PersonaTrait::Frustrated),
            "budget_conscious" | "budget-conscious" => Ok(PersonaTrait::BudgetConscious),
            "tech_savvy" | "tech-savvy" => Ok(PersonaTrait::TechSavvy),
            "impatient" => Ok(PersonaTrait::Impatient),
            _ => Err(format!("Unknown persona trait: {}", s)),
        }
    }
}

/// A configured synthetic-user profile.
///
/// Immutable for the duration of a run; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Stable identifier, also keys starter-message selection
    pub id: String,
    pub name: String,
    pub traits: Vec<PersonaTrait>,
    /// Optional fragment appended to the system prompt for this persona
    pub system_fragment: Option<String>,
}

impl Persona {
    pub fn new(id: impl Into<String>, name: impl Into<String>, traits: Vec<PersonaTrait>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            traits,
            system_fragment: None,
        }
    }

    pub fn with_system_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.system_fragment = Some(fragment.into());
        self
    }

    /// The trait used for phrase selection. Personas with no traits fall
    /// back to `Curious`.
    pub fn primary_trait(&self) -> PersonaTrait {
        self.traits.first().copied().unwrap_or(PersonaTrait::Curious)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_trait_round_trip() {
        for t in [
            PersonaTrait::Curious,
            PersonaTrait::Skeptical,
            PersonaTrait::Frustrated,
            PersonaTrait::BudgetConscious,
            PersonaTrait::TechSavvy,
            PersonaTrait::Impatient,
        ] {
            assert_eq!(PersonaTrait::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn test_primary_trait_defaults_to_curious() {
        let persona = Persona::new("p1", "Empty", vec![]);
        assert_eq!(persona.primary_trait(), PersonaTrait::Curious);

        let persona = Persona::new("p2", "Grumpy", vec![PersonaTrait::Frustrated]);
        assert_eq!(persona.primary_trait(), PersonaTrait::Frustrated);
    }
}
