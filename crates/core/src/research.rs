//! Research request vocabulary shared by the API and the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Length of the report the writing stage is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    Brief,
    Detailed,
    Comprehensive,
}

impl SummaryFormat {
    /// All accepted formats, in the order shown to callers.
    pub const ALL: [SummaryFormat; 3] = [Self::Brief, Self::Detailed, Self::Comprehensive];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Detailed => "detailed",
            Self::Comprehensive => "comprehensive",
        }
    }
}

impl Default for SummaryFormat {
    fn default() -> Self {
        Self::Detailed
    }
}

impl fmt::Display for SummaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SummaryFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(
                    "Invalid summary_format. Must be: brief, detailed, or comprehensive".into(),
                )
            })
    }
}

impl TryFrom<String> for SummaryFormat {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Validate a research query: it must contain at least one
/// non-whitespace character.
pub fn validate_query(query: &str) -> Result<(), CoreError> {
    if query.trim().is_empty() {
        return Err(CoreError::Validation("Query cannot be empty".into()));
    }
    Ok(())
}
