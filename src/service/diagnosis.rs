use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult, MissingEntity, StorageError};
use crate::inference::{
    InferenceOptions, InferenceResult, InferenceStrategy, RankedDisease, StrategyKind,
};
use crate::knowledge::KnowledgeRepository;
use crate::storage::{CaseStore, InferenceTrace, NewCase, NewTrace, PatientCase};

/// Longest accepted patient identifier, in characters.
pub const MAX_PATIENT_ID_LEN: usize = 100;

/// Orchestrates validation, inference, persistence and explanation.
///
/// The active strategy can be swapped at runtime. Each call clones the
/// strategy handle when it starts, so a swap only affects later calls.
pub struct DiagnosisService {
    repository: KnowledgeRepository,
    store: Arc<dyn CaseStore>,
    strategy: RwLock<Arc<dyn InferenceStrategy>>,
}

impl DiagnosisService {
    /// Create a service with an explicit strategy.
    pub fn new(
        repository: KnowledgeRepository,
        store: Arc<dyn CaseStore>,
        strategy: Arc<dyn InferenceStrategy>,
    ) -> Self {
        Self {
            repository,
            store,
            strategy: RwLock::new(strategy),
        }
    }

    /// Create a service running the built-in strategy named by `kind`.
    pub fn from_kind(
        repository: KnowledgeRepository,
        store: Arc<dyn CaseStore>,
        kind: StrategyKind,
    ) -> Self {
        let strategy = kind.build(repository.clone());
        Self::new(repository, store, strategy)
    }

    /// Knowledge base access used by this service.
    pub fn repository(&self) -> &KnowledgeRepository {
        &self.repository
    }

    /// Replace the strategy used by subsequent calls.
    pub fn set_strategy(&self, strategy: Arc<dyn InferenceStrategy>) {
        let kind = strategy.kind();
        *self
            .strategy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = strategy;
        info!(strategy = %kind, "Inference strategy changed");
    }

    /// Tag of the currently active strategy.
    pub fn strategy_kind(&self) -> StrategyKind {
        self.active_strategy().kind()
    }

    fn active_strategy(&self) -> Arc<dyn InferenceStrategy> {
        Arc::clone(&self.strategy.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run a diagnosis for a patient and persist it.
    ///
    /// Symptom ids are validated before any inference runs. On success the
    /// case and its trace are stored together and the returned result
    /// carries the new case id. Failed inference stores nothing.
    pub async fn diagnose(
        &self,
        symptom_ids: &[i64],
        patient_id: &str,
        options: &InferenceOptions,
    ) -> EngineResult<InferenceResult> {
        validate_patient_id(patient_id)?;

        let (all_exist, missing_ids) = self
            .repository
            .validate_symptom_ids(symptom_ids)
            .await
            .map_err(storage_failure("Failed to validate symptom ids"))?;
        if !all_exist {
            return Err(EngineError::InvalidSymptom { missing_ids });
        }

        let strategy = self.active_strategy();
        debug!(
            strategy = %strategy.kind(),
            symptom_count = symptom_ids.len(),
            patient_id,
            "Running inference"
        );

        let mut result = strategy.execute_inference(symptom_ids, options).await?;

        let snapshot = self
            .repository
            .resolve_symptoms(symptom_ids)
            .await
            .map_err(storage_failure("Failed to resolve reported symptoms"))?;

        let case = NewCase::from_result(patient_id, snapshot, &result);
        let trace = NewTrace::from_result(&result);
        let (case_id, trace_id) = self
            .store
            .save_diagnosis(&case, &trace)
            .await
            .map_err(storage_failure("Failed to persist diagnosis"))?;

        result.case_id = Some(case_id);

        info!(
            case_id,
            trace_id,
            strategy = %result.strategy,
            diseases = result.diseases.len(),
            rules_fired = result.rules_fired.len(),
            elapsed_ms = result.execution_time_ms,
            "Diagnosis completed"
        );

        Ok(result)
    }

    /// Render the explanation of a stored case from its latest trace.
    ///
    /// The report body follows the strategy that produced the trace, whichever
    /// strategy is active now.
    pub async fn get_explanation(&self, case_id: i64) -> EngineResult<String> {
        let case = self.get_case(case_id).await?;

        let trace = self
            .store
            .get_latest_trace(case_id)
            .await
            .map_err(storage_failure("Failed to load inference trace"))?
            .ok_or(EngineError::NotFound {
                entity: MissingEntity::Trace,
                id: case_id,
            })?;

        let result = reconstruct_result(&case, &trace);
        let body = self.active_strategy().explain(&result);

        Ok(format!(
            "patient: {}\nsession: {}\nstrategy: {}\n\n{}",
            case.patient_identifier,
            case.session_date.format("%Y-%m-%d %H:%M"),
            trace.strategy.label(),
            body
        ))
    }

    /// Load a stored case.
    pub async fn get_case(&self, case_id: i64) -> EngineResult<PatientCase> {
        self.store
            .get_case(case_id)
            .await
            .map_err(storage_failure("Failed to load case"))?
            .ok_or(EngineError::NotFound {
                entity: MissingEntity::Case,
                id: case_id,
            })
    }

    /// Replace the clinician notes on a stored case.
    pub async fn annotate_case(&self, case_id: i64, notes: &str) -> EngineResult<()> {
        match self.store.update_case_notes(case_id, notes).await {
            Ok(()) => {
                info!(case_id, "Case notes updated");
                Ok(())
            }
            Err(StorageError::CaseNotFound { .. }) => Err(EngineError::NotFound {
                entity: MissingEntity::Case,
                id: case_id,
            }),
            Err(e) => Err(storage_failure("Failed to update case notes")(e)),
        }
    }
}

fn validate_patient_id(patient_id: &str) -> EngineResult<()> {
    if patient_id.trim().is_empty() {
        warn!("Rejected empty patient identifier");
        return Err(EngineError::invalid_input(
            "patient_id",
            "Patient identifier cannot be empty",
        ));
    }
    let len = patient_id.chars().count();
    if len > MAX_PATIENT_ID_LEN {
        warn!(len, "Rejected overlong patient identifier");
        return Err(EngineError::invalid_input(
            "patient_id",
            format!(
                "Patient identifier must be at most {} characters, got {}",
                MAX_PATIENT_ID_LEN, len
            ),
        ));
    }
    Ok(())
}

fn storage_failure(context: &'static str) -> impl FnOnce(StorageError) -> EngineError {
    move |e| {
        error!(error = %e, context, "Storage failure");
        EngineError::failure(context, e)
    }
}

/// Rebuild a result from what was persisted for a case.
///
/// Only fired rules are stored, so the evaluated count equals the fired
/// count. Per-disease rule lists are regrouped from the fired rules.
fn reconstruct_result(case: &PatientCase, trace: &InferenceTrace) -> InferenceResult {
    let diseases = case
        .inferred_results
        .iter()
        .map(|inferred| RankedDisease {
            disease_id: inferred.disease_id,
            disease_name: inferred.disease_name.clone(),
            final_confidence: inferred.confidence,
            matching_rules: trace
                .rules_fired
                .iter()
                .filter(|r| r.disease_id == inferred.disease_id)
                .cloned()
                .collect(),
        })
        .collect();

    InferenceResult {
        strategy: trace.strategy,
        diseases,
        rules_fired: trace.rules_fired.clone(),
        total_rules_evaluated: trace.rules_fired.len(),
        execution_time_ms: trace.execution_time_ms,
        goal: trace.goal.clone(),
        case_id: Some(case.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StorageResult};
    use crate::inference::testing::*;
    use crate::inference::FiredRule;
    use crate::knowledge::SymptomRef;
    use crate::storage::{AppliedRule, InferredDisease};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        pub Store {}

        #[async_trait]
        impl CaseStore for Store {
            async fn create_case(&self, case: &NewCase) -> StorageResult<i64>;
            async fn create_trace(&self, case_id: i64, trace: &NewTrace) -> StorageResult<i64>;
            async fn get_case(&self, case_id: i64) -> StorageResult<Option<PatientCase>>;
            async fn get_latest_trace(&self, case_id: i64) -> StorageResult<Option<InferenceTrace>>;
            async fn update_case_notes(&self, case_id: i64, notes: &str) -> StorageResult<()>;
            async fn save_diagnosis(&self, case: &NewCase, trace: &NewTrace) -> StorageResult<(i64, i64)>;
        }
    }

    fn flu_repository() -> KnowledgeRepository {
        FixtureSource::with_symptoms()
            .rule(1, "FluRule", INFLUENZA, &[FEVER, COUGH, FATIGUE], 75)
            .into_repository()
    }

    fn service(store: MockStore, kind: StrategyKind) -> DiagnosisService {
        DiagnosisService::from_kind(flu_repository(), Arc::new(store), kind)
    }

    fn stored_case() -> PatientCase {
        PatientCase {
            id: 12,
            patient_identifier: "PT-001".to_string(),
            session_date: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 31).unwrap(),
            reported_symptoms: vec![SymptomRef {
                id: FEVER,
                name: "Fever".to_string(),
            }],
            inferred_results: vec![InferredDisease {
                disease_id: INFLUENZA,
                disease_name: "Influenza".to_string(),
                confidence: 0.25,
            }],
            applied_rules: vec![AppliedRule {
                rule_id: 1,
                explanation: "Fever suggests Influenza.".to_string(),
            }],
            notes: String::new(),
        }
    }

    fn stored_trace() -> InferenceTrace {
        InferenceTrace {
            id: 3,
            case_id: 12,
            executed_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 31).unwrap(),
            strategy: StrategyKind::ForwardChaining,
            rules_fired: vec![FiredRule {
                rule_id: 1,
                rule_name: "FluRule".to_string(),
                disease_id: INFLUENZA,
                disease_name: "Influenza".to_string(),
                matched_symptoms: vec!["Fever".to_string()],
                match_ratio: 0.3333,
                confidence_factor: 75,
                final_confidence: 0.25,
                explanation: "Fever suggests Influenza.".to_string(),
            }],
            confidence_scores: BTreeMap::from([("Influenza".to_string(), 0.25)]),
            execution_time_ms: 4,
            goal: None,
        }
    }

    #[tokio::test]
    async fn test_diagnose_persists_once_and_attaches_case_id() {
        let mut store = MockStore::new();
        store
            .expect_save_diagnosis()
            .times(1)
            .withf(|case, trace| {
                case.patient_identifier == "PT-001"
                    && case.reported_symptoms.len() == 3
                    && case.inferred_results.len() == 1
                    && trace.strategy == StrategyKind::ForwardChaining
                    && trace.confidence_scores.get("Influenza") == Some(&0.75)
            })
            .returning(|_, _| Ok((42, 7)));
        store.expect_create_case().never();

        let result = service(store, StrategyKind::ForwardChaining)
            .diagnose(&[FEVER, COUGH, FATIGUE], "PT-001", &InferenceOptions::default())
            .await
            .unwrap();

        assert_eq!(result.case_id, Some(42));
        assert_eq!(result.diseases[0].disease_name, "Influenza");
    }

    #[tokio::test]
    async fn test_unknown_symptom_rejected_before_inference() {
        let mut store = MockStore::new();
        store.expect_save_diagnosis().never();

        let err = service(store, StrategyKind::ForwardChaining)
            .diagnose(&[FEVER, 9999], "PT-001", &InferenceOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidSymptom);
        match err {
            EngineError::InvalidSymptom { missing_ids } => assert_eq!(missing_ids, vec![9999]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_inference_persists_nothing() {
        let mut store = MockStore::new();
        store.expect_save_diagnosis().never();

        let err = service(store, StrategyKind::ForwardChaining)
            .diagnose(&[NAUSEA], "PT-001", &InferenceOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NoMatchingRule);
    }

    #[tokio::test]
    async fn test_persistence_failure_becomes_engine_failure() {
        let mut store = MockStore::new();
        store.expect_save_diagnosis().returning(|_, _| {
            Err(StorageError::Query {
                message: "disk I/O error".to_string(),
            })
        });

        let err = service(store, StrategyKind::ForwardChaining)
            .diagnose(&[FEVER], "PT-001", &InferenceOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EngineFailure);
        assert!(err.to_string().contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_patient_id_is_validated() {
        let svc = service(MockStore::new(), StrategyKind::ForwardChaining);

        let err = svc
            .diagnose(&[FEVER], "   ", &InferenceOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let long_id = "P".repeat(MAX_PATIENT_ID_LEN + 1);
        let err = svc
            .diagnose(&[FEVER], &long_id, &InferenceOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_options_pass_through_to_backward_strategy() {
        let mut store = MockStore::new();
        store
            .expect_save_diagnosis()
            .withf(|case, trace| case.inferred_results.is_empty() && trace.goal.is_some())
            .returning(|_, _| Ok((5, 5)));

        let result = service(store, StrategyKind::BackwardChaining)
            .diagnose(&[FEVER, COUGH], "PT-002", &InferenceOptions::for_target(INFLUENZA))
            .await
            .unwrap();

        let goal = result.goal.unwrap();
        assert_eq!(goal.best_satisfaction_score, 0.6667);
        assert_eq!(result.case_id, Some(5));
    }

    #[tokio::test]
    async fn test_set_strategy_affects_later_calls() {
        let svc = service(MockStore::new(), StrategyKind::ForwardChaining);
        assert_eq!(svc.strategy_kind(), StrategyKind::ForwardChaining);

        svc.set_strategy(StrategyKind::BackwardChaining.build(flu_repository()));
        assert_eq!(svc.strategy_kind(), StrategyKind::BackwardChaining);

        // backward chaining now demands a target
        let err = svc
            .diagnose(&[FEVER], "PT-001", &InferenceOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_explanation_header_and_body() {
        let mut store = MockStore::new();
        store
            .expect_get_case()
            .returning(|_| Ok(Some(stored_case())));
        store
            .expect_get_latest_trace()
            .returning(|_| Ok(Some(stored_trace())));

        let text = service(store, StrategyKind::BackwardChaining)
            .get_explanation(12)
            .await
            .unwrap();

        assert!(text.starts_with(
            "patient: PT-001\nsession: 2024-03-05 14:07\nstrategy: Forward Chaining\n\n"
        ));
        assert!(text.contains("=== forward chaining diagnosis report ==="));
        assert!(text.contains("total rules evaluated: 1"));
        assert!(text.contains("1. Influenza (confidence: 25.0%)"));
    }

    #[tokio::test]
    async fn test_explanation_for_missing_case() {
        let mut store = MockStore::new();
        store.expect_get_case().returning(|_| Ok(None));
        store.expect_get_latest_trace().never();

        let err = service(store, StrategyKind::ForwardChaining)
            .get_explanation(404)
            .await
            .unwrap_err();

        match err {
            EngineError::NotFound { entity, id } => {
                assert_eq!(entity, MissingEntity::Case);
                assert_eq!(id, 404);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_explanation_for_case_without_trace() {
        let mut store = MockStore::new();
        store
            .expect_get_case()
            .returning(|_| Ok(Some(stored_case())));
        store.expect_get_latest_trace().returning(|_| Ok(None));

        let err = service(store, StrategyKind::ForwardChaining)
            .get_explanation(12)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Inference trace for case 12"));
    }

    #[tokio::test]
    async fn test_annotate_case_maps_missing_case() {
        let mut store = MockStore::new();
        store
            .expect_update_case_notes()
            .withf(|case_id, notes| *case_id == 12 && notes == "Follow up in a week")
            .returning(|_, _| Ok(()));
        store
            .expect_update_case_notes()
            .returning(|case_id, _| Err(StorageError::CaseNotFound { case_id }));

        let svc = service(store, StrategyKind::ForwardChaining);
        assert_ok!(svc.annotate_case(12, "Follow up in a week").await);

        let err = assert_err!(svc.annotate_case(99, "n/a").await);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_reconstruct_regroups_rules_by_disease() {
        let result = reconstruct_result(&stored_case(), &stored_trace());

        assert_eq!(result.case_id, Some(12));
        assert_eq!(result.total_rules_evaluated, 1);
        assert_eq!(result.diseases.len(), 1);
        assert_eq!(result.diseases[0].matching_rules.len(), 1);
        assert_eq!(result.diseases[0].final_confidence, 0.25);
    }
}
