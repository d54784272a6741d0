//! Prefixed ID generation for linktally entities.
//!
//! All IDs use an `lt_` brand prefix to guarantee collision avoidance with
//! payment provider IDs (Stripe's `cus_`, `in_`, `pi_`, etc.).
//!
//! Format: `lt_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "lt_ws_",
    "lt_lnk_",
    "lt_cus_",
    "lt_prog_",
    "lt_enr_",
    "lt_cm_",
    "lt_wh_",
    "lt_evt_",
];

/// Validate that a string is a valid linktally prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
/// Validates format: `lt_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];

    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in linktally.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Workspace,
    Link,
    Customer,
    Program,
    Enrollment,
    Commission,
    Webhook,
    Event,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Workspace => "lt_ws",
            Self::Link => "lt_lnk",
            Self::Customer => "lt_cus",
            Self::Program => "lt_prog",
            Self::Enrollment => "lt_enr",
            Self::Commission => "lt_cm",
            Self::Webhook => "lt_wh",
            Self::Event => "lt_evt",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
