//! CLI commands for running diagnoses against the configured database.
//!
//! A thin operational driver over [`DiagnosisService`]: every command maps
//! to one service call and renders its outcome as plain text.

use clap::Subcommand;

use crate::error::EngineError;
use crate::inference::{InferenceOptions, InferenceResult, StrategyKind};
use crate::knowledge::Symptom;
use crate::service::DiagnosisService;

/// Diagnosis CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Diagnose a patient from reported symptom ids and store the case
    Diagnose {
        /// Patient identifier (at most 100 characters)
        #[arg(long)]
        patient: String,

        /// Comma-separated symptom ids, e.g. 1,2,3
        #[arg(long, value_delimiter = ',', required = true)]
        symptoms: Vec<i64>,

        /// Strategy for this run: forward_chaining or backward_chaining
        #[arg(long)]
        strategy: Option<StrategyKind>,

        /// Disease to verify (required for backward chaining)
        #[arg(long)]
        target: Option<i64>,
    },

    /// Show the explanation report of a stored case
    Explain {
        /// Case id returned by a previous diagnosis
        case_id: i64,
    },

    /// List every symptom in the knowledge base
    Symptoms,

    /// Replace the clinician notes on a stored case
    Notes {
        /// Case id to annotate
        case_id: i64,

        /// Notes text
        notes: String,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

impl From<EngineError> for CliResult {
    fn from(err: EngineError) -> Self {
        CliResult::error(format!("[{}] {}", err.kind(), err))
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, service: &DiagnosisService) -> CliResult {
    match command {
        Commands::Diagnose {
            patient,
            symptoms,
            strategy,
            target,
        } => execute_diagnose(service, &patient, &symptoms, strategy, target).await,
        Commands::Explain { case_id } => match service.get_explanation(case_id).await {
            Ok(text) => CliResult::success(text),
            Err(e) => e.into(),
        },
        Commands::Symptoms => execute_symptoms(service).await,
        Commands::Notes { case_id, notes } => match service.annotate_case(case_id, &notes).await {
            Ok(()) => CliResult::success(format!("Notes saved for case {}", case_id)),
            Err(e) => e.into(),
        },
    }
}

async fn execute_diagnose(
    service: &DiagnosisService,
    patient: &str,
    symptoms: &[i64],
    strategy: Option<StrategyKind>,
    target: Option<i64>,
) -> CliResult {
    if let Some(kind) = strategy {
        service.set_strategy(kind.build(service.repository().clone()));
    }

    let options = InferenceOptions {
        target_disease_id: target,
    };

    match service.diagnose(symptoms, patient, &options).await {
        Ok(result) => CliResult::success(format_summary(&result)),
        Err(e) => e.into(),
    }
}

async fn execute_symptoms(service: &DiagnosisService) -> CliResult {
    match service.repository().list_all_symptoms().await {
        Ok(symptoms) => {
            let mut output = format!("Symptoms: {}\n", symptoms.len());
            for symptom in symptoms.iter() {
                output.push_str(&format_symptom_line(symptom));
                output.push('\n');
            }
            CliResult::success(output)
        }
        Err(e) => CliResult::error(format!("Failed to load symptoms: {}", e)),
    }
}

fn format_symptom_line(symptom: &Symptom) -> String {
    format!(
        "  [{}] {} ({}, severity {})",
        symptom.id, symptom.name, symptom.category, symptom.severity_weight
    )
}

fn format_summary(result: &InferenceResult) -> String {
    let mut output = match result.case_id {
        Some(case_id) => format!("Case {} ({})\n", case_id, result.strategy.label()),
        None => format!("{}\n", result.strategy.label()),
    };

    if let Some(goal) = &result.goal {
        output.push_str(&format!(
            "  {}: best satisfaction {:.1}%\n",
            goal.target_disease_name,
            goal.best_satisfaction_score * 100.0
        ));
        if !goal.overall_missing_symptoms.is_empty() {
            output.push_str(&format!(
                "  investigate: {}\n",
                goal.overall_missing_symptoms.join(", ")
            ));
        }
    } else {
        for (idx, disease) in result.diseases.iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} {:.1}%\n",
                idx + 1,
                disease.disease_name,
                disease.final_confidence * 100.0
            ));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{GoalEvaluation, RankedDisease};
    use crate::knowledge::SymptomCategory;

    #[test]
    fn test_cli_result_success() {
        let result = CliResult::success("test message");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.message, "test message");
    }

    #[test]
    fn test_cli_result_from_engine_error() {
        let result: CliResult = EngineError::InvalidSymptom {
            missing_ids: vec![9999],
        }
        .into();
        assert_eq!(result.exit_code, 1);
        assert_eq!(
            result.message,
            "[invalid_symptom] The following symptom IDs do not exist: [9999]"
        );
    }

    #[test]
    fn test_format_symptom_line() {
        let symptom = Symptom {
            id: 2,
            name: "Cough".to_string(),
            category: SymptomCategory::Respiratory,
            severity_weight: 3,
        };
        assert_eq!(format_symptom_line(&symptom), "  [2] Cough (Respiratory, severity 3)");
    }

    #[test]
    fn test_format_summary_forward() {
        let result = InferenceResult {
            strategy: StrategyKind::ForwardChaining,
            diseases: vec![RankedDisease {
                disease_id: 1,
                disease_name: "Influenza".to_string(),
                final_confidence: 0.75,
                matching_rules: Vec::new(),
            }],
            rules_fired: Vec::new(),
            total_rules_evaluated: 1,
            execution_time_ms: 0,
            goal: None,
            case_id: Some(8),
        };
        assert_eq!(
            format_summary(&result),
            "Case 8 (Forward Chaining)\n  1. Influenza 75.0%\n"
        );
    }

    #[test]
    fn test_format_summary_backward() {
        let result = InferenceResult {
            strategy: StrategyKind::BackwardChaining,
            diseases: Vec::new(),
            rules_fired: Vec::new(),
            total_rules_evaluated: 1,
            execution_time_ms: 0,
            goal: Some(GoalEvaluation {
                target_disease_id: 1,
                target_disease_name: "Influenza".to_string(),
                rules_evaluated: Vec::new(),
                best_satisfaction_score: 0.6667,
                overall_missing_symptoms: vec!["Fatigue".to_string()],
            }),
            case_id: Some(9),
        };
        assert_eq!(
            format_summary(&result),
            "Case 9 (Backward Chaining)\n  Influenza: best satisfaction 66.7%\n  investigate: Fatigue\n"
        );
    }
}
