//! Knowledge base reference data and read access.
//!
//! Symptoms, diseases and diagnostic rules are curated outside the engine.
//! The engine only reads them, through a [`KnowledgeSource`] wrapped by the
//! caching [`KnowledgeRepository`].

mod cache;
mod repository;

pub use cache::{SymptomCache, TtlCache, DEFAULT_SYMPTOM_CACHE_TTL, SYMPTOM_CACHE_KEY};
pub use repository::KnowledgeRepository;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// Broad medical category of a symptom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymptomCategory {
    #[default]
    General,
    Respiratory,
    Digestive,
    Neurological,
}

impl SymptomCategory {
    /// Storage label for the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            SymptomCategory::General => "GENERAL",
            SymptomCategory::Respiratory => "RESPIRATORY",
            SymptomCategory::Digestive => "DIGESTIVE",
            SymptomCategory::Neurological => "NEUROLOGICAL",
        }
    }
}

impl std::fmt::Display for SymptomCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymptomCategory::General => write!(f, "General"),
            SymptomCategory::Respiratory => write!(f, "Respiratory"),
            SymptomCategory::Digestive => write!(f, "Digestive"),
            SymptomCategory::Neurological => write!(f, "Neurological"),
        }
    }
}

impl std::str::FromStr for SymptomCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GENERAL" => Ok(SymptomCategory::General),
            "RESPIRATORY" => Ok(SymptomCategory::Respiratory),
            "DIGESTIVE" => Ok(SymptomCategory::Digestive),
            "NEUROLOGICAL" => Ok(SymptomCategory::Neurological),
            _ => Err(format!("Unknown symptom category: {}", s)),
        }
    }
}

/// Clinical urgency of a disease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl UrgencyLevel {
    /// Storage label for the urgency level.
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "LOW",
            UrgencyLevel::Medium => "MEDIUM",
            UrgencyLevel::High => "HIGH",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrgencyLevel::Low => write!(f, "Low"),
            UrgencyLevel::Medium => write!(f, "Medium"),
            UrgencyLevel::High => write!(f, "High"),
        }
    }
}

impl std::str::FromStr for UrgencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(UrgencyLevel::Low),
            "MEDIUM" => Ok(UrgencyLevel::Medium),
            "HIGH" => Ok(UrgencyLevel::High),
            _ => Err(format!("Unknown urgency level: {}", s)),
        }
    }
}

/// A medical symptom that can be reported by a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symptom {
    /// Stable symptom identifier.
    pub id: i64,
    /// Unique human-readable name.
    pub name: String,
    /// Medical category.
    pub category: SymptomCategory,
    /// Relative severity weight (higher = more severe).
    pub severity_weight: u32,
}

/// A disease the engine can conclude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disease {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub treatments: String,
    pub urgency_level: UrgencyLevel,
}

/// Id and name of a symptom, as referenced by rules and case snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymptomRef {
    pub id: i64,
    pub name: String,
}

/// Id and name of the disease a rule concludes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseRef {
    pub id: i64,
    pub name: String,
}

/// An IF-THEN diagnostic rule: if the patient reports `required_symptoms`,
/// infer `disease` with `confidence_factor` percent certainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    /// Never empty once loaded from a [`KnowledgeSource`].
    pub required_symptoms: Vec<SymptomRef>,
    pub disease: DiseaseRef,
    /// Certainty percentage, 0-100.
    pub confidence_factor: u8,
    pub explanation_template: ExplanationTemplate,
}

impl Rule {
    /// Ids of the symptoms this rule requires.
    pub fn required_ids(&self) -> HashSet<i64> {
        self.required_symptoms.iter().map(|s| s.id).collect()
    }

    /// Confidence factor as a ratio in [0, 1].
    pub fn confidence_ratio(&self) -> f64 {
        f64::from(self.confidence_factor.min(100)) / 100.0
    }
}

/// Explanation text with `{symptoms}` and `{disease}` substitution points.
///
/// Templates are checked when constructed, so rendering never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExplanationTemplate(String);

impl ExplanationTemplate {
    /// Placeholder replaced by the matched symptom names.
    pub const SYMPTOMS: &'static str = "symptoms";
    /// Placeholder replaced by the concluded disease name.
    pub const DISEASE: &'static str = "disease";

    /// Validate and wrap a raw template.
    ///
    /// Braces must pair up and enclose one of the two known placeholder
    /// names. `{{` and `}}` are literal braces.
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(format!("Unclosed placeholder in template: {}", raw))
                            }
                            Some(ch) => name.push(ch),
                        }
                    }
                    if name != Self::SYMPTOMS && name != Self::DISEASE {
                        return Err(format!(
                            "Unknown placeholder '{{{}}}' in template, expected {{symptoms}} or {{disease}}",
                            name
                        ));
                    }
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                }
                '}' => return Err(format!("Unmatched '}}' in template: {}", raw)),
                _ => {}
            }
        }
        Ok(Self(raw))
    }

    /// Substitute the matched symptoms and disease name.
    pub fn render(&self, symptoms: &str, disease: &str) -> String {
        let mut out = String::with_capacity(self.0.len() + symptoms.len() + disease.len());
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let name: String = chars.by_ref().take_while(|ch| *ch != '}').collect();
                    if name == Self::SYMPTOMS {
                        out.push_str(symptoms);
                    } else {
                        out.push_str(disease);
                    }
                }
                '}' => {
                    chars.next();
                    out.push('}');
                }
                _ => out.push(c),
            }
        }
        out
    }

    /// The raw template text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExplanationTemplate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ExplanationTemplate> for String {
    fn from(template: ExplanationTemplate) -> Self {
        template.0
    }
}

/// Read access to curated knowledge base entities.
///
/// Implementations resolve each rule's required symptoms and target disease
/// together with the rule itself, so callers never issue per-rule lookups.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// All symptoms ordered by category, then name.
    async fn list_symptoms(&self) -> StorageResult<Vec<Symptom>>;
    /// The subset of `ids` that exist, with names.
    async fn find_symptoms(&self, ids: &[i64]) -> StorageResult<Vec<SymptomRef>>;
    /// Every rule, ordered by name then id.
    async fn list_rules(&self) -> StorageResult<Vec<Rule>>;
    /// Rules concluding the given disease, ordered by name then id.
    async fn rules_for_disease(&self, disease_id: i64) -> StorageResult<Vec<Rule>>;
    /// A single rule by id.
    async fn get_rule(&self, rule_id: i64) -> StorageResult<Option<Rule>>;
    /// A single disease by id.
    async fn get_disease(&self, disease_id: i64) -> StorageResult<Option<Disease>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_renders_both_placeholders() {
        let template = ExplanationTemplate::parse(
            "Patient presents with {symptoms}, which are characteristic symptoms of {disease}.",
        )
        .unwrap();
        assert_eq!(
            template.render("Fever, Cough", "Influenza"),
            "Patient presents with Fever, Cough, which are characteristic symptoms of Influenza."
        );
    }

    #[test]
    fn test_template_repeated_and_escaped_braces() {
        let template = ExplanationTemplate::parse("{disease}: {{{symptoms}}} ({disease})").unwrap();
        assert_eq!(template.render("Fever", "Flu"), "Flu: {Fever} (Flu)");
    }

    #[test]
    fn test_template_rejects_unknown_placeholder() {
        let err = ExplanationTemplate::parse("Consistent with {diagnosis}").unwrap_err();
        assert!(err.contains("Unknown placeholder"));
    }

    #[test]
    fn test_template_rejects_unbalanced_braces() {
        assert!(ExplanationTemplate::parse("Signs of {disease").is_err());
        assert!(ExplanationTemplate::parse("Signs of disease}").is_err());
    }

    #[test]
    fn test_template_without_placeholders_is_accepted() {
        let template = ExplanationTemplate::parse("Refer to a specialist.").unwrap();
        assert_eq!(template.render("Fever", "Flu"), "Refer to a specialist.");
    }

    #[test]
    fn test_template_deserialization_validates() {
        let ok: Result<ExplanationTemplate, _> = serde_json::from_str("\"{symptoms} -> {disease}\"");
        assert!(ok.is_ok());

        let bad: Result<ExplanationTemplate, _> = serde_json::from_str("\"{nope}\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_rule_confidence_ratio() {
        let rule = Rule {
            id: 1,
            name: "FluRule".to_string(),
            required_symptoms: vec![
                SymptomRef { id: 1, name: "Fever".to_string() },
                SymptomRef { id: 2, name: "Cough".to_string() },
            ],
            disease: DiseaseRef { id: 1, name: "Influenza".to_string() },
            confidence_factor: 75,
            explanation_template: ExplanationTemplate::parse("{symptoms}").unwrap(),
        };
        assert!((rule.confidence_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(rule.required_ids(), HashSet::from([1, 2]));
    }

    #[test]
    fn test_category_round_trip_labels() {
        assert_eq!("respiratory".parse::<SymptomCategory>().unwrap(), SymptomCategory::Respiratory);
        assert_eq!(SymptomCategory::Neurological.as_str(), "NEUROLOGICAL");
        assert_eq!(SymptomCategory::Digestive.to_string(), "Digestive");
        assert!("CARDIAC".parse::<SymptomCategory>().is_err());
    }

    #[test]
    fn test_urgency_labels() {
        assert_eq!("HIGH".parse::<UrgencyLevel>().unwrap(), UrgencyLevel::High);
        assert_eq!(UrgencyLevel::default(), UrgencyLevel::Medium);
        assert_eq!(UrgencyLevel::Low.as_str(), "LOW");
    }
}
