//! Reward determination and commission calculation.
//!
//! Pure functions - no I/O. The caller loads the enrollment and program rows;
//! this module decides whether the event earns a reward and how much.

use crate::error::{AppError, Result};
use crate::models::{Program, ProgramEnrollment, RewardEventType, RewardType};

/// A resolved reward rule for one partner + program + event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reward {
    pub reward_type: RewardType,
    /// Percentage rewards: whole percent. Flat rewards: cents.
    pub amount: i64,
}

/// Determine the reward for `event` under `enrollment`.
///
/// The enrollment's `commission_amount` overrides the program default when
/// present. Returns None when the program does not reward this event type
/// (e.g., a lead event when the program only rewards sales).
///
/// `program` is the row the enrollment references; a missing program is a
/// data-integrity fault, not a business outcome - it raises instead of
/// silently yielding zero.
pub fn determine_reward(
    program: Option<&Program>,
    enrollment: &ProgramEnrollment,
    event: RewardEventType,
) -> Result<Option<Reward>> {
    let program = program.ok_or_else(|| {
        AppError::DataIntegrity(format!(
            "enrollment {} references missing program {}",
            enrollment.id, enrollment.program_id
        ))
    })?;

    if program.reward_event != event {
        return Ok(None);
    }

    let amount = enrollment.commission_amount.unwrap_or(program.reward_amount);
    Ok(Some(Reward {
        reward_type: program.reward_type,
        amount,
    }))
}

/// Commission earnings in cents for a sale of `sale_amount` cents.
///
/// Percentage rewards truncate to whole cents - fractional cents are dropped,
/// never rounded up, keeping the commission ledger conservative relative to
/// payout obligations. Flat rewards are capped at the sale amount for the
/// same reason.
pub fn calculate_earnings(reward: &Reward, sale_amount: i64) -> i64 {
    match reward.reward_type {
        RewardType::Percentage => sale_amount * reward.amount / 100,
        RewardType::Flat => reward.amount.min(sale_amount),
    }
}

/// Earnings for a lead event (no sale amount involved): percentage rewards
/// have no base to apply to and earn nothing; flat rewards pay in full.
pub fn calculate_lead_earnings(reward: &Reward) -> i64 {
    match reward.reward_type {
        RewardType::Percentage => 0,
        RewardType::Flat => reward.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(reward_type: RewardType, amount: i64, event: RewardEventType) -> Program {
        Program {
            id: "prog_1".to_string(),
            workspace_id: "ws_1".to_string(),
            name: "Affiliates".to_string(),
            reward_type,
            reward_amount: amount,
            reward_event: event,
            created_at: 0,
        }
    }

    fn enrollment(commission_amount: Option<i64>) -> ProgramEnrollment {
        ProgramEnrollment {
            id: "enr_1".to_string(),
            program_id: "prog_1".to_string(),
            partner_id: "pn_1".to_string(),
            link_id: "lnk_1".to_string(),
            partner_email: None,
            commission_amount,
            created_at: 0,
        }
    }

    #[test]
    fn test_percentage_truncates_fractional_cents() {
        let reward = Reward {
            reward_type: RewardType::Percentage,
            amount: 20,
        };
        assert_eq!(calculate_earnings(&reward, 5000), 1000);
        // 3.33% of 999 = 33.2667 cents -> 33, never 34
        let odd = Reward {
            reward_type: RewardType::Percentage,
            amount: 3,
        };
        assert_eq!(calculate_earnings(&odd, 1111), 33);
    }

    #[test]
    fn test_percentage_of_zero_amount_is_zero() {
        let reward = Reward {
            reward_type: RewardType::Percentage,
            amount: 20,
        };
        assert_eq!(calculate_earnings(&reward, 0), 0);
    }

    #[test]
    fn test_flat_capped_at_sale_amount() {
        let reward = Reward {
            reward_type: RewardType::Flat,
            amount: 500,
        };
        assert_eq!(calculate_earnings(&reward, 5000), 500);
        // Boundary A = F
        assert_eq!(calculate_earnings(&reward, 500), 500);
        // Cap when the flat amount exceeds the sale
        assert_eq!(calculate_earnings(&reward, 300), 300);
        // Boundary A = 0
        assert_eq!(calculate_earnings(&reward, 0), 0);
    }

    #[test]
    fn test_enrollment_override_beats_program_default() {
        let p = program(RewardType::Percentage, 20, RewardEventType::Sale);
        let reward = determine_reward(Some(&p), &enrollment(Some(30)), RewardEventType::Sale)
            .unwrap()
            .unwrap();
        assert_eq!(reward.amount, 30);
        assert_eq!(calculate_earnings(&reward, 5000), 1500);
    }

    #[test]
    fn test_program_default_when_no_override() {
        let p = program(RewardType::Percentage, 20, RewardEventType::Sale);
        let reward = determine_reward(Some(&p), &enrollment(None), RewardEventType::Sale)
            .unwrap()
            .unwrap();
        assert_eq!(reward.amount, 20);
    }

    #[test]
    fn test_ineligible_event_type_yields_no_reward() {
        let p = program(RewardType::Percentage, 20, RewardEventType::Sale);
        let reward = determine_reward(Some(&p), &enrollment(None), RewardEventType::Lead).unwrap();
        assert!(reward.is_none());
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let result = determine_reward(None, &enrollment(None), RewardEventType::Sale);
        assert!(matches!(
            result,
            Err(crate::error::AppError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_lead_earnings() {
        let flat = Reward {
            reward_type: RewardType::Flat,
            amount: 200,
        };
        assert_eq!(calculate_lead_earnings(&flat), 200);
        let pct = Reward {
            reward_type: RewardType::Percentage,
            amount: 20,
        };
        assert_eq!(calculate_lead_earnings(&pct), 0);
    }
}
