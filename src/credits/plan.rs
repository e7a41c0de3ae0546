//! Billing plans and their monthly allowances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::VellumError;

/// Default free-tier monthly allowance.
pub const DEFAULT_FREE_MONTHLY_CREDITS: u32 = 30;

/// A user's billing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    /// Interpret a plan string read from the account store.
    ///
    /// Anything other than `"premium"` is treated as free.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "premium" => Self::Premium,
            _ => Self::Free,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = VellumError;

    /// Strict parse, for operator input.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(VellumError::InvalidInput(format!("unknown plan: {other}"))),
        }
    }
}

impl Serialize for Plan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Plan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_stored(&s))
    }
}

/// Monthly allowances per plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub free_monthly_credits: u32,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free_monthly_credits: DEFAULT_FREE_MONTHLY_CREDITS,
        }
    }
}

impl PlanLimits {
    pub fn new(free_monthly_credits: u32) -> Self {
        Self {
            free_monthly_credits,
        }
    }

    /// Monthly allowance for `plan`; `None` means unlimited.
    pub fn monthly_credits(&self, plan: Plan) -> Option<u32> {
        match plan {
            Plan::Free => Some(self.free_monthly_credits),
            Plan::Premium => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_unknown_plan_is_free() {
        assert_eq!(Plan::from_stored("enterprise"), Plan::Free);
        let plan: Plan = serde_json::from_str("\"trial\"").unwrap();
        assert_eq!(plan, Plan::Free);
    }

    #[test]
    fn strict_parse_rejects_unknown() {
        assert_eq!("premium".parse::<Plan>().unwrap(), Plan::Premium);
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn premium_is_unlimited() {
        let limits = PlanLimits::default();
        assert_eq!(limits.monthly_credits(Plan::Free), Some(30));
        assert_eq!(limits.monthly_credits(Plan::Premium), None);
    }
}
