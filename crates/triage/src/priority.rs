//! Admission priority from severity and age risk.
//!
//! Lower value means more urgent.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::severity::SymptomLevel;

/// Patient age-risk category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "임산부", alias = "pregnant")]
    Pregnant,
    #[serde(rename = "영유아", alias = "infant")]
    Infant,
    #[serde(rename = "노년", alias = "노인", alias = "elderly")]
    Elderly,
    #[serde(rename = "청소년", alias = "adolescent")]
    Adolescent,
    #[serde(rename = "성인", alias = "adult")]
    Adult,
}

impl AgeRange {
    /// Multiplier applied to the inverted severity level.
    pub fn weight(self) -> u32 {
        match self {
            Self::Pregnant => 1,
            Self::Infant => 2,
            Self::Elderly => 3,
            Self::Adolescent => 4,
            Self::Adult => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pregnant => "임산부",
            Self::Infant => "영유아",
            Self::Elderly => "노년",
            Self::Adolescent => "청소년",
            Self::Adult => "성인",
        }
    }

    /// Lenient parse: unknown labels yield `None` instead of an error.
    pub fn parse_lenient(label: &str) -> Option<Self> {
        label.parse().ok()
    }
}

/// Serde helper for optional age-range fields.
///
/// Unknown labels become `None` with a warning instead of failing the whole
/// record; priority then falls back to the severity level alone.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<AgeRange>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(label) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let age_range = AgeRange::parse_lenient(&label);
    if age_range.is_none() {
        tracing::warn!(label = %label, "Unknown age range, using severity only");
    }
    Ok(age_range)
}

impl FromStr for AgeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "임산부" | "pregnant" => Ok(Self::Pregnant),
            "영유아" | "infant" => Ok(Self::Infant),
            "노년" | "노인" | "elderly" => Ok(Self::Elderly),
            "청소년" | "adolescent" => Ok(Self::Adolescent),
            "성인" | "adult" => Ok(Self::Adult),
            other => Err(format!("unknown age range: {other}")),
        }
    }
}

impl std::fmt::Display for AgeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(6 - level) × weight(age_range)`, or `6 - level` without an age range.
pub fn priority(level: SymptomLevel, age_range: Option<AgeRange>) -> u32 {
    let inverted = 6 - u32::from(level.get());
    match age_range {
        Some(age) => inverted * age.weight(),
        None => inverted,
    }
}
