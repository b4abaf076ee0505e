use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{
    round4, FiredRule, GoalEvaluation, InferenceOptions, InferenceResult, InferenceStrategy,
    RuleEvaluation, StrategyKind,
};
use crate::error::{EngineError, EngineResult};
use crate::knowledge::{KnowledgeRepository, Rule};

/// Backward chaining: verify whether one hypothesised disease is supported
/// by the patient's symptoms.
///
/// Every rule concluding the target disease is evaluated and reported,
/// whether or not it fires.
pub struct BackwardChainingStrategy {
    repository: KnowledgeRepository,
}

impl BackwardChainingStrategy {
    /// Create a backward chaining strategy reading from `repository`.
    pub fn new(repository: KnowledgeRepository) -> Self {
        Self { repository }
    }

    fn evaluate_rule(rule: &Rule, reported: &HashSet<i64>) -> (RuleEvaluation, f64) {
        let required = rule.required_ids();
        let matched_count = required.intersection(reported).count();
        let satisfaction = if required.is_empty() {
            0.0
        } else {
            matched_count as f64 / required.len() as f64
        };

        let (matched, missing): (Vec<_>, Vec<_>) = rule
            .required_symptoms
            .iter()
            .partition(|s| reported.contains(&s.id));

        let evaluation = RuleEvaluation {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            confidence_factor: rule.confidence_factor,
            required_symptoms: rule.required_symptoms.iter().map(|s| s.name.clone()).collect(),
            matched_symptoms: matched.iter().map(|s| s.name.clone()).collect(),
            is_fully_satisfied: missing.is_empty(),
            missing_symptoms: missing.iter().map(|s| s.name.clone()).collect(),
            satisfaction_score: round4(satisfaction),
        };
        (evaluation, satisfaction)
    }
}

#[async_trait]
impl InferenceStrategy for BackwardChainingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BackwardChaining
    }

    async fn execute_inference(
        &self,
        symptom_ids: &[i64],
        options: &InferenceOptions,
    ) -> EngineResult<InferenceResult> {
        let target_disease_id = options.target_disease_id.ok_or_else(|| {
            EngineError::invalid_input("target_disease_id", "required for backward chaining")
        })?;

        let start = Instant::now();
        let reported: HashSet<i64> = symptom_ids.iter().copied().collect();

        let rules = self
            .repository
            .get_rules_for_disease(target_disease_id)
            .await
            .map_err(|e| {
                error!(error = %e, target_disease_id, "Database error during backward chaining");
                EngineError::failure("Database error during backward chaining inference", e)
            })?;

        let Some(first) = rules.first() else {
            warn!(target_disease_id, "Target disease has no diagnostic rules");
            return Err(EngineError::NoMatchingRule {
                symptom_ids: symptom_ids.to_vec(),
                target_disease_id: Some(target_disease_id),
            });
        };
        let target_disease_name = first.disease.name.clone();

        let mut rules_evaluated = Vec::with_capacity(rules.len());
        let mut rules_fired = Vec::new();
        let mut overall_missing: Vec<String> = Vec::new();
        let mut seen_missing: HashSet<i64> = HashSet::new();
        let mut best_score = 0.0_f64;

        for rule in &rules {
            let (evaluation, satisfaction) = Self::evaluate_rule(rule, &reported);

            if satisfaction > 0.0 {
                rules_fired.push(FiredRule {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    disease_id: rule.disease.id,
                    disease_name: rule.disease.name.clone(),
                    matched_symptoms: evaluation.matched_symptoms.clone(),
                    match_ratio: evaluation.satisfaction_score,
                    confidence_factor: rule.confidence_factor,
                    final_confidence: round4(satisfaction * rule.confidence_ratio()),
                    explanation: rule
                        .explanation_template
                        .render(&evaluation.matched_symptoms.join(", "), &target_disease_name),
                });
            }

            for symptom in rule
                .required_symptoms
                .iter()
                .filter(|s| !reported.contains(&s.id))
            {
                if seen_missing.insert(symptom.id) {
                    overall_missing.push(symptom.name.clone());
                }
            }

            if satisfaction > best_score {
                best_score = satisfaction;
            }
            rules_evaluated.push(evaluation);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            target_disease_id,
            best_score,
            rules_evaluated = rules_evaluated.len(),
            rules_fired = rules_fired.len(),
            elapsed_ms,
            "Backward chaining complete"
        );

        Ok(InferenceResult {
            strategy: StrategyKind::BackwardChaining,
            diseases: Vec::new(),
            rules_fired,
            total_rules_evaluated: rules_evaluated.len(),
            execution_time_ms: elapsed_ms,
            goal: Some(GoalEvaluation {
                target_disease_id,
                target_disease_name,
                rules_evaluated,
                best_satisfaction_score: round4(best_score),
                overall_missing_symptoms: overall_missing,
            }),
            case_id: None,
        })
    }
}
