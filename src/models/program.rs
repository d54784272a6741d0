use serde::{Deserialize, Serialize};

/// A partner program. Defines the default reward rule applied to qualifying
/// events on links enrolled in the program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub reward_type: RewardType,
    /// Percentage rewards: whole percent (20 = 20%).
    /// Flat rewards: cents per qualifying event.
    pub reward_amount: i64,
    /// Which event type the program rewards.
    pub reward_event: RewardEventType,
    pub created_at: i64,
}

/// How a reward amount is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    Percentage,
    Flat,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Flat => "flat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }
}

impl std::fmt::Display for RewardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event types a program can reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardEventType {
    Lead,
    Sale,
}

impl RewardEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Sale => "sale",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lead" => Some(Self::Lead),
            "sale" => Some(Self::Sale),
            _ => None,
        }
    }
}

impl std::fmt::Display for RewardEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Links a partner to a program via a specific link.
/// Read-only to the webhook pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramEnrollment {
    pub id: String,
    pub program_id: String,
    pub partner_id: String,
    pub link_id: String,
    /// Where partner sale notifications go.
    pub partner_email: Option<String>,
    /// Partner-specific override of the program's reward amount, interpreted
    /// using the program's reward_type.
    pub commission_amount: Option<i64>,
    pub created_at: i64,
}

/// Data required to enroll a partner in a program.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEnrollment {
    pub program_id: String,
    pub partner_id: String,
    pub link_id: String,
    pub partner_email: Option<String>,
    pub commission_amount: Option<i64>,
}
