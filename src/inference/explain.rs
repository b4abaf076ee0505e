//! Human-readable inference reports.
//!
//! Formatting is a pure function of an [`InferenceResult`]: identical input
//! always yields byte-identical text. Percentages use one decimal place.

use std::fmt::Write;

use super::{InferenceResult, StrategyKind};

/// Render `result` using the layout for its strategy tag.
pub fn render(result: &InferenceResult) -> String {
    match result.strategy {
        StrategyKind::ForwardChaining => forward_report(result),
        StrategyKind::BackwardChaining => backward_report(result),
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Ranked diseases with the rules that support each one.
pub fn forward_report(result: &InferenceResult) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "=== forward chaining diagnosis report ===");
    let _ = writeln!(out, "strategy: {}", result.strategy);
    let _ = writeln!(out, "total rules evaluated: {}", result.total_rules_evaluated);
    let _ = writeln!(out, "rules fired: {}", result.rules_fired.len());
    let _ = writeln!(out, "execution time: {}ms", result.execution_time_ms);
    let _ = writeln!(out);
    let _ = write!(out, "--- ranked diseases ---");

    for (idx, disease) in result.diseases.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {} (confidence: {})",
            idx + 1,
            disease.disease_name,
            percent(disease.final_confidence)
        );
        for rule in &disease.matching_rules {
            let _ = write!(out, "\n   - rule: {}", rule.rule_name);
            let _ = write!(
                out,
                "\n     matched symptoms: {}",
                rule.matched_symptoms.join(", ")
            );
            let _ = write!(out, "\n     explanation: {}", rule.explanation);
        }
    }

    out
}

/// Verification report for a single target disease.
pub fn backward_report(result: &InferenceResult) -> String {
    let goal = result.goal.as_ref();
    let mut out = String::new();

    let _ = writeln!(out, "=== backward chaining verification report ===");
    let _ = writeln!(
        out,
        "target disease: {}",
        goal.map_or("N/A", |g| g.target_disease_name.as_str())
    );
    let _ = writeln!(
        out,
        "best satisfaction score: {}",
        percent(goal.map_or(0.0, |g| g.best_satisfaction_score))
    );
    let _ = writeln!(out, "execution time: {}ms", result.execution_time_ms);
    let _ = writeln!(out);

    match goal.map(|g| g.overall_missing_symptoms.as_slice()) {
        Some(missing) if !missing.is_empty() => {
            let _ = writeln!(out, "missing symptoms to investigate: {}", missing.join(", "));
        }
        _ => {
            let _ = writeln!(out, "all required symptoms are present for every rule");
        }
    }

    let _ = writeln!(out);
    let _ = write!(out, "--- rules evaluated ---");

    for rule in goal.map(|g| g.rules_evaluated.as_slice()).unwrap_or_default() {
        let status = if rule.is_fully_satisfied {
            "SATISFIED"
        } else {
            "PARTIAL"
        };
        let _ = write!(
            out,
            "\n- {} [{}] (score: {})",
            rule.rule_name,
            status,
            percent(rule.satisfaction_score)
        );
        if !rule.missing_symptoms.is_empty() {
            let _ = write!(out, "\n  missing: {}", rule.missing_symptoms.join(", "));
        }
    }

    out
}
