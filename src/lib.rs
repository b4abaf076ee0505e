//! # MediDiagnose
//!
//! A rule-based diagnostic inference engine. Given the symptoms a patient
//! reports, it ranks plausible diseases using an explicit, auditable rule
//! base rather than a trained model.
//!
//! ## Features
//!
//! - **Forward Chaining**: Fire every rule that overlaps the reported symptoms and rank the diseases they conclude
//! - **Backward Chaining**: Verify one hypothesised disease and list the symptoms still to investigate
//! - **Case Persistence**: Store each diagnosis with a full inference trace in SQLite
//! - **Explanations**: Rebuild a deterministic, human-readable report for any stored case
//! - **Symptom Cache**: Serve the symptom catalogue from a TTL cache
//!
//! ## Architecture
//!
//! ```text
//! Caller → DiagnosisService → InferenceStrategy (forward | backward)
//!                ↓                     ↓
//!           CaseStore          KnowledgeRepository → KnowledgeSource
//!                ↘                                   ↙
//!                       SQLite (cases, knowledge)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use medidiagnose::{Config, DiagnosisService, InferenceOptions, KnowledgeRepository, SqliteStorage};
//! use medidiagnose::knowledge::SymptomCache;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let cache = Arc::new(SymptomCache::new(config.engine.symptom_cache_ttl));
//!     let repository = KnowledgeRepository::new(storage.clone(), cache);
//!     let service = DiagnosisService::from_kind(repository, storage, config.engine.default_strategy);
//!
//!     let result = service.diagnose(&[1, 2, 3], "PT-001", &InferenceOptions::default()).await?;
//!     if let Some(case_id) = result.case_id {
//!         println!("{}", service.get_explanation(case_id).await?);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// CLI subcommands driving the diagnosis service.
pub mod cli;
/// Configuration management for the engine and its binary.
pub mod config;
/// Error types and result aliases for the engine.
pub mod error;
/// Forward and backward chaining strategies and explanation rendering.
pub mod inference;
/// Knowledge base entities, read access and the symptom cache.
pub mod knowledge;
/// Diagnosis orchestration service.
pub mod service;
/// SQLite storage layer for the knowledge base and diagnostic cases.
pub mod storage;

pub use config::Config;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use inference::{InferenceOptions, InferenceResult, InferenceStrategy, StrategyKind};
pub use knowledge::KnowledgeRepository;
pub use service::DiagnosisService;
pub use storage::{CaseStore, SqliteStorage};
