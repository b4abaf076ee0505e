//! Storage layer for knowledge base reads and diagnostic session persistence.
//!
//! This module provides the [`CaseStore`] persistence contract used by the
//! diagnosis service, and a SQLite-backed implementation that serves both
//! [`CaseStore`] and [`KnowledgeSource`](crate::knowledge::KnowledgeSource).

mod sqlite;

pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::inference::{FiredRule, GoalEvaluation, InferenceResult, StrategyKind};
use crate::knowledge::{SymptomCategory, SymptomRef, UrgencyLevel};

/// A disease as recorded in a case's inferred results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredDisease {
    pub disease_id: i64,
    pub disease_name: String,
    pub confidence: f64,
}

/// A fired rule as recorded in a case's applied-rules trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRule {
    pub rule_id: i64,
    pub explanation: String,
}

/// A case to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCase {
    pub patient_identifier: String,
    /// Reported symptoms with the names they had at diagnosis time.
    pub reported_symptoms: Vec<SymptomRef>,
    pub inferred_results: Vec<InferredDisease>,
    pub applied_rules: Vec<AppliedRule>,
}

impl NewCase {
    /// Collapse an inference result into a case snapshot.
    pub fn from_result(
        patient_identifier: impl Into<String>,
        reported_symptoms: Vec<SymptomRef>,
        result: &InferenceResult,
    ) -> Self {
        Self {
            patient_identifier: patient_identifier.into(),
            reported_symptoms,
            inferred_results: result
                .diseases
                .iter()
                .map(|d| InferredDisease {
                    disease_id: d.disease_id,
                    disease_name: d.disease_name.clone(),
                    confidence: d.final_confidence,
                })
                .collect(),
            applied_rules: result
                .rules_fired
                .iter()
                .map(|r| AppliedRule {
                    rule_id: r.rule_id,
                    explanation: r.explanation.clone(),
                })
                .collect(),
        }
    }
}

/// A persisted diagnostic session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientCase {
    pub id: i64,
    pub patient_identifier: String,
    pub session_date: DateTime<Utc>,
    pub reported_symptoms: Vec<SymptomRef>,
    /// Ranked by confidence, highest first.
    pub inferred_results: Vec<InferredDisease>,
    pub applied_rules: Vec<AppliedRule>,
    /// Clinician notes added after review; empty until then.
    pub notes: String,
}

/// An inference trace to be persisted alongside a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrace {
    pub strategy: StrategyKind,
    pub rules_fired: Vec<FiredRule>,
    /// Disease name to reported confidence.
    pub confidence_scores: BTreeMap<String, f64>,
    pub execution_time_ms: u64,
    pub goal: Option<GoalEvaluation>,
}

impl NewTrace {
    /// Capture the audit trail of an inference result.
    pub fn from_result(result: &InferenceResult) -> Self {
        Self {
            strategy: result.strategy,
            rules_fired: result.rules_fired.clone(),
            confidence_scores: result
                .diseases
                .iter()
                .map(|d| (d.disease_name.clone(), d.final_confidence))
                .collect(),
            execution_time_ms: result.execution_time_ms,
            goal: result.goal.clone(),
        }
    }
}

/// A persisted inference trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceTrace {
    pub id: i64,
    pub case_id: i64,
    pub executed_at: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub rules_fired: Vec<FiredRule>,
    pub confidence_scores: BTreeMap<String, f64>,
    pub execution_time_ms: u64,
    pub goal: Option<GoalEvaluation>,
}

/// A symptom to add to the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSymptom {
    pub name: String,
    pub category: SymptomCategory,
    pub severity_weight: u32,
}

impl NewSymptom {
    /// Create a general symptom with severity weight 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: SymptomCategory::General,
            severity_weight: 1,
        }
    }

    /// Set the category
    pub fn with_category(mut self, category: SymptomCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the severity weight (minimum 1)
    pub fn with_severity(mut self, weight: u32) -> Self {
        self.severity_weight = weight.max(1);
        self
    }
}

/// A disease to add to the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDisease {
    pub name: String,
    pub description: String,
    pub treatments: String,
    pub urgency_level: UrgencyLevel,
}

impl NewDisease {
    /// Create a medium-urgency disease with empty description and treatments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            treatments: String::new(),
            urgency_level: UrgencyLevel::Medium,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the treatments
    pub fn with_treatments(mut self, treatments: impl Into<String>) -> Self {
        self.treatments = treatments.into();
        self
    }

    /// Set the urgency level
    pub fn with_urgency(mut self, urgency: UrgencyLevel) -> Self {
        self.urgency_level = urgency;
        self
    }
}

/// A diagnostic rule to add to the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub name: String,
    pub disease_id: i64,
    pub symptom_ids: Vec<i64>,
    pub confidence_factor: i64,
    pub explanation_template: String,
}

/// Persistence sink for diagnostic sessions.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Insert a case and return its id.
    async fn create_case(&self, case: &NewCase) -> StorageResult<i64>;
    /// Insert a trace for `case_id` and return its id.
    async fn create_trace(&self, case_id: i64, trace: &NewTrace) -> StorageResult<i64>;
    /// Get a case by id.
    async fn get_case(&self, case_id: i64) -> StorageResult<Option<PatientCase>>;
    /// Get the most recent trace of a case.
    async fn get_latest_trace(&self, case_id: i64) -> StorageResult<Option<InferenceTrace>>;
    /// Replace the clinician notes of a case.
    async fn update_case_notes(&self, case_id: i64, notes: &str) -> StorageResult<()>;

    /// Persist a case and its trace as one unit, returning `(case_id, trace_id)`.
    ///
    /// The default writes them one after the other; stores that support
    /// transactions override it so a case never exists without its trace.
    async fn save_diagnosis(&self, case: &NewCase, trace: &NewTrace) -> StorageResult<(i64, i64)> {
        let case_id = self.create_case(case).await?;
        let trace_id = self.create_trace(case_id, trace).await?;
        Ok((case_id, trace_id))
    }
}
