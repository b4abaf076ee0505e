use std::collections::{HashMap, HashSet};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{
    round4, FiredRule, InferenceOptions, InferenceResult, InferenceStrategy, RankedDisease,
    StrategyKind,
};
use crate::error::{EngineError, EngineResult};
use crate::knowledge::{DiseaseRef, KnowledgeRepository, Rule};

/// Forward chaining: fire every rule that shares at least one symptom with
/// the patient's report.
///
/// Each rule scores `match_ratio * confidence_factor / 100`. A disease is
/// reported with the highest score among its fired rules, and diseases are
/// ranked by that score with ties kept in first-encounter order.
pub struct ForwardChainingStrategy {
    repository: KnowledgeRepository,
}

/// Running per-disease aggregate while rules are evaluated.
struct DiseaseTally {
    disease: DiseaseRef,
    best_confidence: f64,
    rules: Vec<FiredRule>,
}

impl ForwardChainingStrategy {
    /// Create a forward chaining strategy reading from `repository`.
    pub fn new(repository: KnowledgeRepository) -> Self {
        Self { repository }
    }

    /// Score a single rule against the reported symptoms.
    ///
    /// Returns the fired-rule record and the unrounded confidence, or `None`
    /// when the rule shares no symptom with the report.
    fn evaluate_rule(rule: &Rule, reported: &HashSet<i64>) -> Option<(FiredRule, f64)> {
        let required = rule.required_ids();
        let matched_count = required.intersection(reported).count();
        if matched_count == 0 {
            return None;
        }

        let matched_names: Vec<String> = rule
            .required_symptoms
            .iter()
            .filter(|s| reported.contains(&s.id))
            .map(|s| s.name.clone())
            .collect();

        let match_ratio = matched_count as f64 / required.len() as f64;
        let final_confidence = match_ratio * rule.confidence_ratio();

        let record = FiredRule {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            disease_id: rule.disease.id,
            disease_name: rule.disease.name.clone(),
            explanation: rule
                .explanation_template
                .render(&matched_names.join(", "), &rule.disease.name),
            matched_symptoms: matched_names,
            match_ratio: round4(match_ratio),
            confidence_factor: rule.confidence_factor,
            final_confidence: round4(final_confidence),
        };
        Some((record, final_confidence))
    }
}

#[async_trait]
impl InferenceStrategy for ForwardChainingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ForwardChaining
    }

    async fn execute_inference(
        &self,
        symptom_ids: &[i64],
        _options: &InferenceOptions,
    ) -> EngineResult<InferenceResult> {
        let start = Instant::now();
        let reported: HashSet<i64> = symptom_ids.iter().copied().collect();

        let rules = self.repository.list_all_rules().await.map_err(|e| {
            error!(error = %e, "Database error during forward chaining");
            EngineError::failure("Database error during forward chaining inference", e)
        })?;

        let mut rules_fired: Vec<FiredRule> = Vec::new();
        let mut tallies: Vec<DiseaseTally> = Vec::new();
        let mut tally_index: HashMap<i64, usize> = HashMap::new();

        for rule in &rules {
            let Some((record, confidence)) = Self::evaluate_rule(rule, &reported) else {
                continue;
            };
            debug!(
                rule_id = rule.id,
                disease = %rule.disease.name,
                confidence = record.final_confidence,
                "Rule fired"
            );

            match tally_index.get(&rule.disease.id) {
                Some(&idx) => {
                    let tally = &mut tallies[idx];
                    if confidence > tally.best_confidence {
                        tally.best_confidence = confidence;
                    }
                    tally.rules.push(record.clone());
                }
                None => {
                    tally_index.insert(rule.disease.id, tallies.len());
                    tallies.push(DiseaseTally {
                        disease: rule.disease.clone(),
                        best_confidence: confidence,
                        rules: vec![record.clone()],
                    });
                }
            }
            rules_fired.push(record);
        }

        if rules_fired.is_empty() {
            warn!(symptom_ids = ?symptom_ids, "No rules fired for symptoms");
            return Err(EngineError::NoMatchingRule {
                symptom_ids: symptom_ids.to_vec(),
                target_disease_id: None,
            });
        }

        // sort_by is stable, so equal scores keep first-encounter order
        tallies.sort_by(|a, b| b.best_confidence.total_cmp(&a.best_confidence));

        let diseases: Vec<RankedDisease> = tallies
            .into_iter()
            .map(|tally| RankedDisease {
                disease_id: tally.disease.id,
                disease_name: tally.disease.name,
                final_confidence: round4(tally.best_confidence),
                matching_rules: tally.rules,
            })
            .collect();

        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            rules_evaluated = rules.len(),
            rules_fired = rules_fired.len(),
            diseases = diseases.len(),
            elapsed_ms,
            "Forward chaining complete"
        );

        Ok(InferenceResult {
            strategy: StrategyKind::ForwardChaining,
            diseases,
            rules_fired,
            total_rules_evaluated: rules.len(),
            execution_time_ms: elapsed_ms,
            goal: None,
            case_id: None,
        })
    }
}
