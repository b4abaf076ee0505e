//! Inference strategies.
//!
//! This module provides the two chaining algorithms behind a common
//! [`InferenceStrategy`] trait:
//! - [`ForwardChainingStrategy`]: data-driven sweep over every rule
//! - [`BackwardChainingStrategy`]: goal-driven check of one disease
//!
//! Explanations are rendered by [`explain::render`], which picks the
//! report layout from the result's strategy tag.

mod backward;
pub mod explain;
mod forward;

pub use backward::BackwardChainingStrategy;
pub use forward::ForwardChainingStrategy;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::knowledge::KnowledgeRepository;

/// Inference strategy tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    /// Data-driven: fan out from reported symptoms to every supported disease.
    ForwardChaining,
    /// Goal-driven: verify one hypothesised disease.
    BackwardChaining,
}

impl StrategyKind {
    /// Storage tag for the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ForwardChaining => "FORWARD_CHAINING",
            StrategyKind::BackwardChaining => "BACKWARD_CHAINING",
        }
    }

    /// Human-readable strategy name.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::ForwardChaining => "Forward Chaining",
            StrategyKind::BackwardChaining => "Backward Chaining",
        }
    }

    /// Construct the strategy this tag names.
    pub fn build(self, repository: KnowledgeRepository) -> Arc<dyn InferenceStrategy> {
        match self {
            StrategyKind::ForwardChaining => Arc::new(ForwardChainingStrategy::new(repository)),
            StrategyKind::BackwardChaining => Arc::new(BackwardChainingStrategy::new(repository)),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "forward_chaining" | "forward" => Ok(StrategyKind::ForwardChaining),
            "backward_chaining" | "backward" => Ok(StrategyKind::BackwardChaining),
            _ => Err(format!("Unknown inference strategy: {}", s)),
        }
    }
}

/// Strategy-specific inference options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceOptions {
    /// Disease to verify. Required by backward chaining, ignored otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_disease_id: Option<i64>,
}

impl InferenceOptions {
    /// Options targeting a single disease.
    pub fn for_target(disease_id: i64) -> Self {
        Self {
            target_disease_id: Some(disease_id),
        }
    }
}

/// A rule that fired during inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredRule {
    pub rule_id: i64,
    pub rule_name: String,
    pub disease_id: i64,
    pub disease_name: String,
    pub matched_symptoms: Vec<String>,
    /// Fraction of required symptoms present, rounded to 4 places.
    pub match_ratio: f64,
    pub confidence_factor: u8,
    /// `match_ratio * confidence_factor / 100`, rounded to 4 places.
    pub final_confidence: f64,
    pub explanation: String,
}

/// A disease supported by at least one fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDisease {
    pub disease_id: i64,
    pub disease_name: String,
    /// Highest final confidence among the disease's fired rules.
    pub final_confidence: f64,
    pub matching_rules: Vec<FiredRule>,
}

/// Backward chaining verdict for one rule of the target disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: i64,
    pub rule_name: String,
    pub confidence_factor: u8,
    pub required_symptoms: Vec<String>,
    pub matched_symptoms: Vec<String>,
    pub missing_symptoms: Vec<String>,
    pub satisfaction_score: f64,
    pub is_fully_satisfied: bool,
}

/// Backward chaining outcome for the target disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvaluation {
    pub target_disease_id: i64,
    pub target_disease_name: String,
    pub rules_evaluated: Vec<RuleEvaluation>,
    pub best_satisfaction_score: f64,
    /// Union of every rule's missing symptoms, in first-seen order.
    pub overall_missing_symptoms: Vec<String>,
}

/// Output of a single inference run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub strategy: StrategyKind,
    /// Ranked by confidence, highest first. Empty for backward chaining.
    pub diseases: Vec<RankedDisease>,
    pub rules_fired: Vec<FiredRule>,
    pub total_rules_evaluated: usize,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<GoalEvaluation>,
    /// Set once the result has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<i64>,
}

/// Contract every inference algorithm fulfils.
#[async_trait]
pub trait InferenceStrategy: Send + Sync {
    /// Tag identifying the algorithm.
    fn kind(&self) -> StrategyKind;

    /// Run the algorithm against the knowledge base.
    async fn execute_inference(
        &self,
        symptom_ids: &[i64],
        options: &InferenceOptions,
    ) -> EngineResult<InferenceResult>;

    /// Render a human-readable report of `result`.
    ///
    /// The layout follows `result.strategy`, not `self`, so any strategy
    /// can explain a result produced by another.
    fn explain(&self, result: &InferenceResult) -> String {
        explain::render(result)
    }
}

/// Round to 4 decimal places for reporting.
pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
