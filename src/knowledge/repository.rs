use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Disease, KnowledgeSource, Rule, Symptom, SymptomCache, SymptomRef, SYMPTOM_CACHE_KEY};
use crate::error::StorageResult;

/// Centralised, read-optimised access to the knowledge base.
///
/// Strategies and the diagnosis service never query storage for knowledge
/// base entities directly; they go through this repository.
#[derive(Clone)]
pub struct KnowledgeRepository {
    source: Arc<dyn KnowledgeSource>,
    cache: Arc<SymptomCache>,
}

impl KnowledgeRepository {
    /// Create a repository over `source` using the given symptom cache.
    pub fn new(source: Arc<dyn KnowledgeSource>, cache: Arc<SymptomCache>) -> Self {
        Self { source, cache }
    }

    /// Create a repository with a fresh cache using the default TTL.
    pub fn with_default_cache(source: Arc<dyn KnowledgeSource>) -> Self {
        Self::new(source, Arc::new(SymptomCache::default()))
    }

    /// All symptoms, ordered by category then name, served from the cache
    /// while fresh.
    pub async fn list_all_symptoms(&self) -> StorageResult<Arc<Vec<Symptom>>> {
        if let Some(cached) = self.cache.get(SYMPTOM_CACHE_KEY) {
            debug!(count = cached.len(), "Serving symptoms from cache");
            return Ok(cached);
        }

        let symptoms = Arc::new(self.source.list_symptoms().await?);
        self.cache.insert(SYMPTOM_CACHE_KEY, Arc::clone(&symptoms));
        debug!(
            count = symptoms.len(),
            ttl_secs = self.cache.ttl().as_secs(),
            "Symptoms loaded from storage and cached"
        );
        Ok(symptoms)
    }

    /// Every rule with its required symptoms resolved.
    pub async fn list_all_rules(&self) -> StorageResult<Vec<Rule>> {
        self.source.list_rules().await
    }

    /// Rules concluding `disease_id`, with required symptoms resolved.
    pub async fn get_rules_for_disease(&self, disease_id: i64) -> StorageResult<Vec<Rule>> {
        self.source.rules_for_disease(disease_id).await
    }

    /// A single rule, or `None` if it does not exist.
    pub async fn get_rule_by_id(&self, rule_id: i64) -> StorageResult<Option<Rule>> {
        let rule = self.source.get_rule(rule_id).await?;
        if rule.is_none() {
            warn!(rule_id, "Rule not found");
        }
        Ok(rule)
    }

    /// A single disease, or `None` if it does not exist.
    pub async fn get_disease(&self, disease_id: i64) -> StorageResult<Option<Disease>> {
        self.source.get_disease(disease_id).await
    }

    /// Check that every id names an existing symptom.
    ///
    /// Returns `(all_exist, missing_ids)`; missing ids keep the caller's
    /// order.
    pub async fn validate_symptom_ids(&self, ids: &[i64]) -> StorageResult<(bool, Vec<i64>)> {
        if ids.is_empty() {
            return Ok((true, Vec::new()));
        }

        let existing: HashSet<i64> = self
            .source
            .find_symptoms(ids)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !existing.contains(id))
            .collect();

        if !missing.is_empty() {
            warn!(missing_ids = ?missing, "Symptom ids not found in knowledge base");
        }

        Ok((missing.is_empty(), missing))
    }

    /// Current id/name pairs for `ids`, read from storage rather than the
    /// cache so a case snapshot records the names in effect right now.
    pub async fn resolve_symptoms(&self, ids: &[i64]) -> StorageResult<Vec<SymptomRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.source.find_symptoms(ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{SymptomCategory, TtlCache};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory source that counts symptom list loads.
    struct CountingSource {
        symptoms: Vec<Symptom>,
        loads: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Self {
            let symptoms = [(1, "Fever"), (2, "Cough"), (3, "Fatigue")]
                .into_iter()
                .map(|(id, name)| Symptom {
                    id,
                    name: name.to_string(),
                    category: SymptomCategory::General,
                    severity_weight: 1,
                })
                .collect();
            Self {
                symptoms,
                loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KnowledgeSource for CountingSource {
        async fn list_symptoms(&self) -> StorageResult<Vec<Symptom>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.symptoms.clone())
        }

        async fn find_symptoms(&self, ids: &[i64]) -> StorageResult<Vec<SymptomRef>> {
            Ok(self
                .symptoms
                .iter()
                .filter(|s| ids.contains(&s.id))
                .map(|s| SymptomRef {
                    id: s.id,
                    name: s.name.clone(),
                })
                .collect())
        }

        async fn list_rules(&self) -> StorageResult<Vec<Rule>> {
            Ok(Vec::new())
        }

        async fn rules_for_disease(&self, _disease_id: i64) -> StorageResult<Vec<Rule>> {
            Ok(Vec::new())
        }

        async fn get_rule(&self, _rule_id: i64) -> StorageResult<Option<Rule>> {
            Ok(None)
        }

        async fn get_disease(&self, _disease_id: i64) -> StorageResult<Option<Disease>> {
            Ok(None)
        }
    }

    fn repository_with_ttl(ttl: Duration) -> (KnowledgeRepository, Arc<CountingSource>) {
        let source = Arc::new(CountingSource::new());
        let repo = KnowledgeRepository::new(source.clone(), Arc::new(TtlCache::new(ttl)));
        (repo, source)
    }

    #[tokio::test]
    async fn test_list_all_symptoms_hits_cache_within_ttl() {
        let (repo, source) = repository_with_ttl(Duration::from_secs(300));

        let first = repo.list_all_symptoms().await.unwrap();
        let second = repo.list_all_symptoms().await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_list_all_symptoms_reloads_after_expiry() {
        let (repo, source) = repository_with_ttl(Duration::ZERO);

        repo.list_all_symptoms().await.unwrap();
        repo.list_all_symptoms().await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validate_empty_list() {
        let (repo, _) = repository_with_ttl(Duration::from_secs(300));
        assert_eq!(repo.validate_symptom_ids(&[]).await.unwrap(), (true, vec![]));
    }

    #[tokio::test]
    async fn test_validate_all_present() {
        let (repo, _) = repository_with_ttl(Duration::from_secs(300));
        assert_eq!(
            repo.validate_symptom_ids(&[3, 1, 2]).await.unwrap(),
            (true, vec![])
        );
    }

    #[tokio::test]
    async fn test_validate_missing_keeps_caller_order() {
        let (repo, _) = repository_with_ttl(Duration::from_secs(300));
        assert_eq!(
            repo.validate_symptom_ids(&[9999, 1, 42, 7]).await.unwrap(),
            (false, vec![9999, 42, 7])
        );
    }

    #[tokio::test]
    async fn test_get_rule_by_id_missing() {
        let (repo, _) = repository_with_ttl(Duration::from_secs(300));
        assert!(repo.get_rule_by_id(5).await.unwrap().is_none());
    }
}
