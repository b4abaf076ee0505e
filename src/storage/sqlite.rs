use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, warn};

use super::{
    CaseStore, InferenceTrace, NewCase, NewDisease, NewRule, NewSymptom, NewTrace, PatientCase,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::inference::StrategyKind;
use crate::knowledge::{
    Disease, DiseaseRef, ExplanationTemplate, KnowledgeSource, Rule, Symptom, SymptomRef,
};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage for both the knowledge base and diagnostic cases
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database with the schema applied
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        // Every connection to :memory: opens a separate database, so the pool
        // holds exactly one connection and never recycles it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add a symptom to the knowledge base and return its id.
    pub async fn insert_symptom(&self, symptom: &NewSymptom) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO symptoms (name, category, severity_weight)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&symptom.name)
        .bind(symptom.category.as_str())
        .bind(i64::from(symptom.severity_weight.max(1)))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Add a disease to the knowledge base and return its id.
    pub async fn insert_disease(&self, disease: &NewDisease) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO diseases (name, description, treatments, urgency_level)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&disease.name)
        .bind(&disease.description)
        .bind(&disease.treatments)
        .bind(disease.urgency_level.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Add a diagnostic rule and its required symptoms, returning the rule id.
    ///
    /// Rejects rules without symptoms, confidence factors outside 0-100 and
    /// templates with unknown placeholders. Repeated symptom ids are stored
    /// once, at their first position.
    pub async fn insert_rule(&self, rule: &NewRule) -> StorageResult<i64> {
        let mut symptom_ids: Vec<i64> = Vec::with_capacity(rule.symptom_ids.len());
        for id in &rule.symptom_ids {
            if !symptom_ids.contains(id) {
                symptom_ids.push(*id);
            }
        }

        if symptom_ids.is_empty() {
            return Err(StorageError::InvalidEntry {
                message: format!("Rule '{}' must require at least one symptom", rule.name),
            });
        }
        if !(0..=100).contains(&rule.confidence_factor) {
            return Err(StorageError::InvalidEntry {
                message: format!(
                    "Rule '{}' confidence factor must be between 0 and 100, got {}",
                    rule.name, rule.confidence_factor
                ),
            });
        }
        ExplanationTemplate::parse(rule.explanation_template.as_str())
            .map_err(|message| StorageError::InvalidEntry { message })?;

        let mut tx = self.pool.begin().await?;

        let rule_id = sqlx::query(
            r#"
            INSERT INTO rules (name, disease_id, confidence_factor, explanation_template)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&rule.name)
        .bind(rule.disease_id)
        .bind(rule.confidence_factor)
        .bind(&rule.explanation_template)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, symptom_id) in symptom_ids.iter().enumerate() {
            sqlx::query("INSERT INTO rule_symptoms (rule_id, symptom_id, position) VALUES (?, ?, ?)")
                .bind(rule_id)
                .bind(symptom_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(rule_id, rule = %rule.name, "Rule added to knowledge base");
        Ok(rule_id)
    }

    /// Load rules matching the optional filters, each with its required
    /// symptoms and target disease resolved.
    ///
    /// Rules that would break inference invariants are skipped with a
    /// warning instead of failing the whole load.
    async fn load_rules(
        &self,
        disease_id: Option<i64>,
        rule_id: Option<i64>,
    ) -> StorageResult<Vec<Rule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.name, r.disease_id, d.name AS disease_name,
                   r.confidence_factor, r.explanation_template
            FROM rules r
            JOIN diseases d ON d.id = r.disease_id
            WHERE (? IS NULL OR r.disease_id = ?)
              AND (? IS NULL OR r.id = ?)
            ORDER BY r.name, r.id
            "#,
        )
        .bind(disease_id)
        .bind(disease_id)
        .bind(rule_id)
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let links: Vec<RuleSymptomRow> = sqlx::query_as(
            r#"
            SELECT rs.rule_id, s.id AS symptom_id, s.name AS symptom_name
            FROM rule_symptoms rs
            JOIN symptoms s ON s.id = rs.symptom_id
            JOIN rules r ON r.id = rs.rule_id
            WHERE (? IS NULL OR r.disease_id = ?)
              AND (? IS NULL OR r.id = ?)
            ORDER BY rs.rule_id, rs.position
            "#,
        )
        .bind(disease_id)
        .bind(disease_id)
        .bind(rule_id)
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;

        let mut symptoms_by_rule: HashMap<i64, Vec<SymptomRef>> = HashMap::new();
        for link in links {
            symptoms_by_rule
                .entry(link.rule_id)
                .or_default()
                .push(SymptomRef {
                    id: link.symptom_id,
                    name: link.symptom_name,
                });
        }

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let symptoms = symptoms_by_rule.remove(&row.id).unwrap_or_default();
                row.into_rule(symptoms)
            })
            .collect())
    }
}

#[async_trait]
impl KnowledgeSource for SqliteStorage {
    async fn list_symptoms(&self) -> StorageResult<Vec<Symptom>> {
        let rows: Vec<SymptomRow> = sqlx::query_as(
            r#"
            SELECT id, name, category, severity_weight
            FROM symptoms
            ORDER BY category, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Symptom::try_from).collect()
    }

    async fn find_symptoms(&self, ids: &[i64]) -> StorageResult<Vec<SymptomRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, name FROM symptoms WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows: Vec<SymptomRefRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_rules(&self) -> StorageResult<Vec<Rule>> {
        self.load_rules(None, None).await
    }

    async fn rules_for_disease(&self, disease_id: i64) -> StorageResult<Vec<Rule>> {
        self.load_rules(Some(disease_id), None).await
    }

    async fn get_rule(&self, rule_id: i64) -> StorageResult<Option<Rule>> {
        Ok(self.load_rules(None, Some(rule_id)).await?.into_iter().next())
    }

    async fn get_disease(&self, disease_id: i64) -> StorageResult<Option<Disease>> {
        let row: Option<DiseaseRow> = sqlx::query_as(
            r#"
            SELECT id, name, description, treatments, urgency_level
            FROM diseases
            WHERE id = ?
            "#,
        )
        .bind(disease_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Disease::try_from).transpose()
    }
}

#[async_trait]
impl CaseStore for SqliteStorage {
    async fn create_case(&self, case: &NewCase) -> StorageResult<i64> {
        insert_case(&self.pool, case).await
    }

    async fn create_trace(&self, case_id: i64, trace: &NewTrace) -> StorageResult<i64> {
        insert_trace(&self.pool, case_id, trace).await
    }

    async fn get_case(&self, case_id: i64) -> StorageResult<Option<PatientCase>> {
        let row: Option<CaseRow> = sqlx::query_as(
            r#"
            SELECT id, patient_identifier, session_date, reported_symptoms,
                   inferred_results, applied_rules, notes
            FROM cases
            WHERE id = ?
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PatientCase::try_from).transpose()
    }

    async fn get_latest_trace(&self, case_id: i64) -> StorageResult<Option<InferenceTrace>> {
        let row: Option<TraceRow> = sqlx::query_as(
            r#"
            SELECT id, case_id, executed_at, strategy, rules_fired,
                   confidence_scores, execution_time_ms, goal
            FROM inference_traces
            WHERE case_id = ?
            ORDER BY executed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InferenceTrace::try_from).transpose()
    }

    async fn update_case_notes(&self, case_id: i64, notes: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE cases SET notes = ? WHERE id = ?")
            .bind(notes)
            .bind(case_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::CaseNotFound { case_id });
        }

        Ok(())
    }

    async fn save_diagnosis(&self, case: &NewCase, trace: &NewTrace) -> StorageResult<(i64, i64)> {
        let mut tx = self.pool.begin().await?;

        let case_id = insert_case(&mut *tx, case).await?;
        let trace_id = insert_trace(&mut *tx, case_id, trace).await?;

        tx.commit().await?;
        Ok((case_id, trace_id))
    }
}

async fn insert_case<'c, E>(executor: E, case: &NewCase) -> StorageResult<i64>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let reported_symptoms = serde_json::to_string(&case.reported_symptoms)?;
    let inferred_results = serde_json::to_string(&case.inferred_results)?;
    let applied_rules = serde_json::to_string(&case.applied_rules)?;

    let result = sqlx::query(
        r#"
        INSERT INTO cases (patient_identifier, session_date, reported_symptoms,
                           inferred_results, applied_rules, notes)
        VALUES (?, ?, ?, ?, ?, '')
        "#,
    )
    .bind(&case.patient_identifier)
    .bind(timestamp(Utc::now()))
    .bind(reported_symptoms)
    .bind(inferred_results)
    .bind(applied_rules)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn insert_trace<'c, E>(executor: E, case_id: i64, trace: &NewTrace) -> StorageResult<i64>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let rules_fired = serde_json::to_string(&trace.rules_fired)?;
    let confidence_scores = serde_json::to_string(&trace.confidence_scores)?;
    let goal = trace.goal.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO inference_traces (case_id, executed_at, strategy, rules_fired,
                                      confidence_scores, execution_time_ms, goal)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(case_id)
    .bind(timestamp(Utc::now()))
    .bind(trace.strategy.as_str())
    .bind(rules_fired)
    .bind(confidence_scores)
    .bind(i64::try_from(trace.execution_time_ms).unwrap_or(i64::MAX))
    .bind(goal)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Microsecond precision keeps lexical order equal to time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid timestamp '{}': {}", value, e),
        })
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SymptomRow {
    id: i64,
    name: String,
    category: String,
    severity_weight: i64,
}

impl TryFrom<SymptomRow> for Symptom {
    type Error = StorageError;

    fn try_from(row: SymptomRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            category: row
                .category
                .parse()
                .map_err(|message| StorageError::InvalidEntry { message })?,
            name: row.name,
            severity_weight: u32::try_from(row.severity_weight).unwrap_or(1).max(1),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SymptomRefRow {
    id: i64,
    name: String,
}

impl From<SymptomRefRow> for SymptomRef {
    fn from(row: SymptomRefRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DiseaseRow {
    id: i64,
    name: String,
    description: String,
    treatments: String,
    urgency_level: String,
}

impl TryFrom<DiseaseRow> for Disease {
    type Error = StorageError;

    fn try_from(row: DiseaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            treatments: row.treatments,
            urgency_level: row
                .urgency_level
                .parse()
                .map_err(|message| StorageError::InvalidEntry { message })?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    name: String,
    disease_id: i64,
    disease_name: String,
    confidence_factor: i64,
    explanation_template: String,
}

impl RuleRow {
    fn into_rule(self, required_symptoms: Vec<SymptomRef>) -> Option<Rule> {
        if required_symptoms.is_empty() {
            warn!(rule_id = self.id, rule = %self.name, "Skipping rule with no required symptoms");
            return None;
        }

        let Some(confidence_factor) = u8::try_from(self.confidence_factor)
            .ok()
            .filter(|cf| *cf <= 100)
        else {
            warn!(
                rule_id = self.id,
                confidence_factor = self.confidence_factor,
                "Skipping rule with out-of-range confidence factor"
            );
            return None;
        };

        let explanation_template = match ExplanationTemplate::parse(self.explanation_template) {
            Ok(template) => template,
            Err(e) => {
                warn!(rule_id = self.id, error = %e, "Skipping rule with malformed explanation template");
                return None;
            }
        };

        Some(Rule {
            id: self.id,
            name: self.name,
            required_symptoms,
            disease: DiseaseRef {
                id: self.disease_id,
                name: self.disease_name,
            },
            confidence_factor,
            explanation_template,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleSymptomRow {
    rule_id: i64,
    symptom_id: i64,
    symptom_name: String,
}

#[derive(sqlx::FromRow)]
struct CaseRow {
    id: i64,
    patient_identifier: String,
    session_date: String,
    reported_symptoms: String,
    inferred_results: String,
    applied_rules: String,
    notes: String,
}

impl TryFrom<CaseRow> for PatientCase {
    type Error = StorageError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            patient_identifier: row.patient_identifier,
            session_date: parse_timestamp(&row.session_date)?,
            reported_symptoms: serde_json::from_str(&row.reported_symptoms)?,
            inferred_results: serde_json::from_str(&row.inferred_results)?,
            applied_rules: serde_json::from_str(&row.applied_rules)?,
            notes: row.notes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TraceRow {
    id: i64,
    case_id: i64,
    executed_at: String,
    strategy: String,
    rules_fired: String,
    confidence_scores: String,
    execution_time_ms: i64,
    goal: Option<String>,
}

impl TryFrom<TraceRow> for InferenceTrace {
    type Error = StorageError;

    fn try_from(row: TraceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            case_id: row.case_id,
            executed_at: parse_timestamp(&row.executed_at)?,
            strategy: StrategyKind::from_str(&row.strategy)
                .map_err(|message| StorageError::Query { message })?,
            rules_fired: serde_json::from_str(&row.rules_fired)?,
            confidence_scores: serde_json::from_str(&row.confidence_scores)?,
            execution_time_ms: u64::try_from(row.execution_time_ms).unwrap_or(0),
            goal: row
                .goal
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}
