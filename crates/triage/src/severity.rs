//! Symptom severity scoring.
//!
//! A report's symptoms are scored against an ordered list of symptom
//! categories and the total is bucketed into a 1-5 [`SymptomLevel`].
//! Symptoms missing from every category score zero; they are kept for
//! free-text mining later and never cause a failure.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize};

/// Extra points per mention; repeating a symptom reinforces it.
const REPEAT_WEIGHT: u32 = 2;

/// Clinical severity level, 1 (mild) to 5 (critical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SymptomLevel(u8);

impl SymptomLevel {
    pub const MIN: SymptomLevel = SymptomLevel(1);
    pub const MAX: SymptomLevel = SymptomLevel(5);

    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SymptomLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("symptom level must be 1-5, got {value}"))
    }
}

impl From<SymptomLevel> for u8 {
    fn from(level: SymptomLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for SymptomLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named table of symptom → base points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymptomCategory {
    name: String,
    points: HashMap<String, u32>,
}

impl SymptomCategory {
    pub fn new<I, S>(name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            points: entries.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self, symptom: &str) -> Option<u32> {
        self.points.get(symptom).copied()
    }

    pub fn contains(&self, symptom: &str) -> bool {
        self.points.contains_key(symptom)
    }
}

static DEFAULT_CATEGORIES: LazyLock<Vec<SymptomCategory>> = LazyLock::new(|| {
    vec![
        SymptomCategory::new(
            "emergency",
            [
                ("심정지", 40),
                ("호흡정지", 40),
                ("의식불명", 35),
                ("대량출혈", 30),
                ("쇼크", 30),
                ("경련", 25),
            ],
        ),
        SymptomCategory::new(
            "neurological",
            [
                ("두통", 5),
                ("어지러움", 5),
                ("마비", 20),
                ("언어장애", 15),
                ("의식저하", 20),
                ("시야장애", 10),
            ],
        ),
        SymptomCategory::new(
            "respiratory",
            [
                ("호흡곤란", 20),
                ("기침", 3),
                ("객혈", 15),
                ("천명", 10),
                ("청색증", 20),
            ],
        ),
        SymptomCategory::new(
            "circulatory",
            [
                ("흉통", 10),
                ("두근거림", 5),
                ("실신", 15),
                ("저혈압", 15),
                ("부종", 3),
            ],
        ),
        SymptomCategory::new(
            "injury",
            [
                ("골절", 10),
                ("화상", 10),
                ("열상", 5),
                ("두부외상", 20),
                ("탈구", 8),
                ("출혈", 10),
            ],
        ),
        SymptomCategory::new(
            "other",
            [
                ("발열", 3),
                ("복통", 5),
                ("구토", 3),
                ("설사", 2),
                ("체중감소", 1),
                ("발진", 2),
            ],
        ),
    ]
});

/// Built-in category table, in lookup order.
pub fn default_categories() -> &'static [SymptomCategory] {
    &DEFAULT_CATEGORIES
}

/// Split a comma-joined symptom string into trimmed, non-empty entries.
pub fn parse_symptoms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serde helper accepting either a JSON list or a comma-joined string.
pub fn deserialize_symptoms<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Symptoms {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<Symptoms>::deserialize(deserializer)? {
        Some(Symptoms::List(list)) => list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Symptoms::Joined(raw)) => parse_symptoms(&raw),
        None => Vec::new(),
    })
}

/// Maps a total score to its level: `>80→5, >60→4, >40→3, >20→2, else 1`.
pub fn level_for_score(score: u32) -> SymptomLevel {
    let level = match score {
        s if s > 80 => 5,
        s if s > 60 => 4,
        s if s > 40 => 3,
        s if s > 20 => 2,
        _ => 1,
    };
    SymptomLevel(level)
}

/// Scores symptom lists against a category table.
///
/// Uses the built-in table unless one is injected with
/// [`SeverityScorer::with_categories`]; injecting never alters the defaults.
#[derive(Debug, Clone, Default)]
pub struct SeverityScorer {
    categories: Option<Vec<SymptomCategory>>,
}

impl SeverityScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(categories: Vec<SymptomCategory>) -> Self {
        Self {
            categories: Some(categories),
        }
    }

    pub fn categories(&self) -> &[SymptomCategory] {
        self.categories.as_deref().unwrap_or_else(|| default_categories())
    }

    /// Index of the first category containing `symptom`, if any.
    pub fn category_index(&self, symptom: &str) -> Option<usize> {
        self.categories().iter().position(|c| c.contains(symptom))
    }

    fn base_points(&self, symptom: &str) -> u32 {
        self.category_index(symptom)
            .and_then(|i| self.categories()[i].points(symptom))
            .unwrap_or(0)
    }

    /// Raw urgency score.
    ///
    /// Each distinct symptom contributes `base + 2 × mentions`, so
    /// `["흉통", "흉통", "두통"]` scores `(10 + 4) + (5 + 2) = 21`.
    pub fn score<S: AsRef<str>>(&self, symptoms: &[S]) -> u32 {
        let mut counts: Vec<(&str, u32)> = Vec::new();
        for symptom in symptoms {
            let symptom = symptom.as_ref();
            match counts.iter_mut().find(|(s, _)| *s == symptom) {
                Some((_, n)) => *n += 1,
                None => counts.push((symptom, 1)),
            }
        }

        counts
            .into_iter()
            .map(|(symptom, n)| self.base_points(symptom) + REPEAT_WEIGHT * n)
            .sum()
    }

    pub fn level<S: AsRef<str>>(&self, symptoms: &[S]) -> SymptomLevel {
        let score = self.score(symptoms);
        let level = level_for_score(score);
        tracing::trace!(score, %level, "Scored symptoms");
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_categories() -> Vec<SymptomCategory> {
        vec![
            SymptomCategory::new("circulatory", [("흉통", 10)]),
            SymptomCategory::new("neurological", [("두통", 5)]),
        ]
    }

    #[test]
    fn repeated_symptom_reinforces_score() {
        let scorer = SeverityScorer::with_categories(test_categories());
        let score = scorer.score(&["흉통", "흉통", "두통"]);
        assert_eq!(score, 21);
        assert_eq!(scorer.level(&["흉통", "흉통", "두통"]).get(), 2);
    }

    #[test]
    fn level_threshold_boundaries() {
        assert_eq!(level_for_score(0).get(), 1);
        assert_eq!(level_for_score(20).get(), 1);
        assert_eq!(level_for_score(21).get(), 2);
        assert_eq!(level_for_score(40).get(), 2);
        assert_eq!(level_for_score(41).get(), 3);
        assert_eq!(level_for_score(60).get(), 3);
        assert_eq!(level_for_score(61).get(), 4);
        assert_eq!(level_for_score(80).get(), 4);
        assert_eq!(level_for_score(81).get(), 5);
    }

    #[test]
    fn score_exactly_twenty_is_level_one() {
        // 10 + 2 + 6 + 2 = 20
        let scorer = SeverityScorer::with_categories(vec![SymptomCategory::new(
            "test",
            [("a", 10), ("b", 6)],
        )]);
        assert_eq!(scorer.score(&["a", "b"]), 20);
        assert_eq!(scorer.level(&["a", "b"]).get(), 1);
    }

    #[test]
    fn unknown_symptom_scores_only_mentions() {
        let scorer = SeverityScorer::with_categories(test_categories());
        assert_eq!(scorer.category_index("이명"), None);
        assert_eq!(scorer.score(&["이명"]), 2);
    }

    #[test]
    fn first_matching_category_wins() {
        let scorer = SeverityScorer::with_categories(vec![
            SymptomCategory::new("first", [("x", 7)]),
            SymptomCategory::new("second", [("x", 30)]),
        ]);
        assert_eq!(scorer.category_index("x"), Some(0));
        assert_eq!(scorer.score(&["x"]), 9);
    }

    #[test]
    fn override_does_not_touch_defaults() {
        let _scorer = SeverityScorer::with_categories(test_categories());
        let defaults = SeverityScorer::new();
        assert_eq!(defaults.categories().len(), 6);
        assert_eq!(defaults.categories()[3].points("흉통"), Some(10));
        assert_eq!(defaults.categories()[1].points("두통"), Some(5));
    }

    #[test]
    fn empty_report_is_level_one() {
        let scorer = SeverityScorer::new();
        let none: [&str; 0] = [];
        assert_eq!(scorer.score(&none), 0);
        assert_eq!(scorer.level(&none), SymptomLevel::MIN);
    }

    #[test]
    fn critical_symptoms_reach_level_five() {
        let scorer = SeverityScorer::new();
        // (40+2) + (30+2) + (20+2) = 96
        assert_eq!(scorer.level(&["심정지", "대량출혈", "호흡곤란"]), SymptomLevel::MAX);
    }

    #[test]
    fn parse_symptoms_trims_and_drops_empty() {
        assert_eq!(
            parse_symptoms(" 흉통, 두통,,발열 "),
            vec!["흉통".to_string(), "두통".to_string(), "발열".to_string()]
        );
    }

    #[test]
    fn symptoms_deserialize_from_list_or_joined_string() {
        #[derive(Deserialize)]
        struct Entry {
            #[serde(default, deserialize_with = "deserialize_symptoms")]
            symptoms: Vec<String>,
        }

        let joined: Entry = serde_json::from_str(r#"{"symptoms":"흉통,흉통, 두통"}"#).unwrap();
        let list: Entry = serde_json::from_str(r#"{"symptoms":["흉통","흉통","두통"]}"#).unwrap();
        assert_eq!(joined.symptoms, list.symptoms);
        assert_eq!(SeverityScorer::new().score(&joined.symptoms), 21);

        let missing: Entry = serde_json::from_str("{}").unwrap();
        assert!(missing.symptoms.is_empty());
    }

    #[test]
    fn symptom_level_rejects_out_of_range() {
        assert!(SymptomLevel::new(0).is_none());
        assert!(SymptomLevel::new(6).is_none());
        assert_eq!(SymptomLevel::new(3).map(SymptomLevel::get), Some(3));
        assert!(serde_json::from_str::<SymptomLevel>("9").is_err());
        assert_eq!(
            serde_json::from_str::<SymptomLevel>("4").unwrap(),
            SymptomLevel::new(4).unwrap()
        );
    }
}
