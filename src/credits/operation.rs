//! The billable AI operation catalog.
//!
//! Every metered endpoint maps to one [`AiOperation`], which fixes its
//! credit cost, whether it is restricted to the premium plan, and the
//! default settings of its response cache.
//!
//! | operation | credits | premium-only |
//! |---|---|---|
//! | `improve-bullet` | 1 | |
//! | `suggest-skills` | 1 | |
//! | `generate-bullets` | 2 | |
//! | `generate-summary` | 2 | |
//! | `ats-analysis` | 3 | |
//! | `job-match` | 3 | |
//! | `interview-prep` | 3 | yes |
//! | `cover-letter` | 5 | |
//! | `tailor-resume` | 5 | yes |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::VellumError;
use crate::cache::CacheConfig;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// A billable AI operation.
///
/// Serializes as its kebab-case name (e.g. `"generate-summary"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AiOperation {
    ImproveBullet,
    SuggestSkills,
    GenerateBullets,
    GenerateSummary,
    AtsAnalysis,
    JobMatch,
    InterviewPrep,
    CoverLetter,
    TailorResume,
}

/// Operations only available on the premium plan, whatever the balance.
pub const PREMIUM_ONLY_OPERATIONS: &[AiOperation] =
    &[AiOperation::InterviewPrep, AiOperation::TailorResume];

impl AiOperation {
    /// Every operation, cheapest first.
    pub const ALL: [AiOperation; 9] = [
        Self::ImproveBullet,
        Self::SuggestSkills,
        Self::GenerateBullets,
        Self::GenerateSummary,
        Self::AtsAnalysis,
        Self::JobMatch,
        Self::InterviewPrep,
        Self::CoverLetter,
        Self::TailorResume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImproveBullet => "improve-bullet",
            Self::SuggestSkills => "suggest-skills",
            Self::GenerateBullets => "generate-bullets",
            Self::GenerateSummary => "generate-summary",
            Self::AtsAnalysis => "ats-analysis",
            Self::JobMatch => "job-match",
            Self::InterviewPrep => "interview-prep",
            Self::CoverLetter => "cover-letter",
            Self::TailorResume => "tailor-resume",
        }
    }

    /// Credits charged per uncached invocation.
    pub fn credit_cost(&self) -> u32 {
        match self {
            Self::ImproveBullet | Self::SuggestSkills => 1,
            Self::GenerateBullets | Self::GenerateSummary => 2,
            Self::AtsAnalysis | Self::JobMatch | Self::InterviewPrep => 3,
            Self::CoverLetter | Self::TailorResume => 5,
        }
    }

    pub fn is_premium_only(&self) -> bool {
        PREMIUM_ONLY_OPERATIONS.contains(self)
    }

    /// Default response-cache settings for this operation.
    ///
    /// Analysis results depend on the job posting as well as the resume
    /// and are kept for an hour; generated text for a day.
    pub fn default_cache_config(&self) -> CacheConfig {
        let (max_entries, ttl, cost_per_miss) = match self {
            Self::ImproveBullet => (500, DAY, 0.002),
            Self::SuggestSkills => (300, DAY, 0.002),
            Self::GenerateBullets => (500, DAY, 0.004),
            Self::GenerateSummary => (200, DAY, 0.004),
            Self::AtsAnalysis => (100, HOUR, 0.010),
            Self::JobMatch => (200, HOUR, 0.010),
            Self::InterviewPrep => (100, DAY, 0.010),
            Self::CoverLetter => (100, DAY, 0.020),
            Self::TailorResume => (100, DAY, 0.020),
        };
        CacheConfig::new()
            .max_entries(max_entries)
            .ttl(ttl)
            .cost_per_miss(cost_per_miss)
    }
}

/// Credit cost of an operation by name, or `None` if it is not billable.
pub fn credit_cost_of(name: &str) -> Option<u32> {
    name.parse::<AiOperation>().ok().map(|op| op.credit_cost())
}

impl fmt::Display for AiOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiOperation {
    type Err = VellumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| VellumError::UnknownOperation(s.to_string()))
    }
}

impl Serialize for AiOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AiOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
