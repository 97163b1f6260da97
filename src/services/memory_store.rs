//! Versioned long-term memory with triplet conflict detection.
//!
//! The store keeps every record in memory, indexed by id and by
//! `(subject, predicate)`, and mirrors writes to a [`MemoryRepository`].
//! The index sits behind a single async `RwLock`: `write` and `invalidate`
//! both hold the write lock for their whole duration, so a write racing an
//! invalidation is ordered by lock acquisition and conflict checks see every
//! invalidation that finished before them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConflictPolicy, Fact, FactKind, MemoryConflict, MemoryQuery, MemoryRecord, MemoryStats, Provenance,
    QueryResult, SourceKind, WriteOutcome,
};
use crate::domain::ports::{InMemoryMemoryRepository, MemoryRepository};

#[derive(Debug, Default)]
struct MemoryIndex {
    records: Vec<MemoryRecord>,
    by_id: HashMap<Uuid, usize>,
    by_key: HashMap<(String, String), Vec<usize>>,
}

impl MemoryIndex {
    fn insert(&mut self, record: MemoryRecord) {
        let position = self.records.len();
        self.by_id.insert(record.record_id, position);
        for triplet in &record.fact.triplets {
            self.by_key
                .entry((triplet.subject.clone(), triplet.predicate.clone()))
                .or_default()
                .push(position);
        }
        self.records.push(record);
    }

    fn get(&self, record_id: Uuid) -> Option<&MemoryRecord> {
        self.by_id.get(&record_id).map(|&i| &self.records[i])
    }

    fn get_mut(&mut self, record_id: Uuid) -> Option<&mut MemoryRecord> {
        self.by_id.get(&record_id).map(|&i| &mut self.records[i])
    }

    fn conflicts_for(&self, fact: &Fact) -> Vec<MemoryConflict> {
        let candidates: BTreeSet<usize> = fact
            .triplets
            .iter()
            .filter_map(|t| self.by_key.get(&(t.subject.clone(), t.predicate.clone())))
            .flatten()
            .copied()
            .collect();
        candidates
            .into_iter()
            .flat_map(|i| self.records[i].conflicts_with(fact))
            .collect()
    }
}

/// The memory store of one brain.
pub struct MemoryStore {
    repository: Arc<dyn MemoryRepository>,
    index: RwLock<MemoryIndex>,
}

impl MemoryStore {
    /// Load every record from the repository and build the index.
    pub async fn open(repository: Arc<dyn MemoryRepository>) -> DomainResult<Self> {
        let mut index = MemoryIndex::default();
        for record in repository.load_all().await? {
            index.insert(record);
        }
        debug!(records = index.records.len(), "memory store opened");
        Ok(Self {
            repository,
            index: RwLock::new(index),
        })
    }

    /// A store backed by a volatile repository.
    pub fn in_memory() -> Self {
        Self {
            repository: Arc::new(InMemoryMemoryRepository::new()),
            index: RwLock::new(MemoryIndex::default()),
        }
    }

    /// Append one record per fact.
    ///
    /// With [`ConflictPolicy::Skip`] a fact contradicting a currently valid
    /// record is not written; with `Flag` it is written anyway; with
    /// `Supersede` it is written and the records it contradicts are closed.
    /// Conflicts are reported in every case.
    pub async fn write(
        &self,
        facts: Vec<Fact>,
        run_id: Option<Uuid>,
        node_id: Option<&str>,
        policy: ConflictPolicy,
    ) -> DomainResult<WriteOutcome> {
        let mut index = self.index.write().await;
        let mut outcome = WriteOutcome::default();

        for fact in facts {
            let conflicts = index.conflicts_for(&fact);
            if !conflicts.is_empty() {
                for conflict in &conflicts {
                    warn!(node_id = ?node_id, conflict = %conflict, policy = ?policy, "memory conflict");
                }
                if policy == ConflictPolicy::Skip {
                    outcome.conflicts.extend(conflicts);
                    continue;
                }
            }

            let mut record = MemoryRecord::new(fact, run_id, node_id.map(str::to_string));
            let stale: BTreeSet<Uuid> = if policy == ConflictPolicy::Supersede {
                conflicts.iter().map(|c| c.existing_record).collect()
            } else {
                BTreeSet::new()
            };
            record.supersedes = stale.first().copied();

            // The replacement is durable before anything it supersedes is closed.
            self.repository.append(&record).await?;
            outcome.written.push(record.record_id);
            index.insert(record);

            let now = Utc::now();
            for record_id in stale {
                self.repository.close_validity(record_id, now).await?;
                if let Some(existing) = index.get_mut(record_id) {
                    existing.valid_to = Some(now);
                }
                outcome.superseded.push(record_id);
            }
            outcome.conflicts.extend(conflicts);
        }

        debug!(
            written = outcome.written.len(),
            conflicts = outcome.conflicts.len(),
            superseded = outcome.superseded.len(),
            "memory write"
        );
        Ok(outcome)
    }

    /// Conflicts a fact would raise right now, without writing it.
    pub async fn check_conflicts(&self, fact: &Fact) -> Vec<MemoryConflict> {
        self.index.read().await.conflicts_for(fact)
    }

    /// Filter valid records, best first: highest confidence, then newest.
    pub async fn query(&self, query: &MemoryQuery) -> QueryResult {
        let index = self.index.read().await;
        let at = query.as_of.unwrap_or_else(Utc::now);
        let mut matches: Vec<&MemoryRecord> = index
            .records
            .iter()
            .filter(|r| r.is_valid_at(at) && query.matches(r))
            .collect();
        matches.sort_by(|a, b| {
            b.fact
                .confidence
                .total_cmp(&a.fact.confidence)
                .then_with(|| b.valid_from.cmp(&a.valid_from))
        });
        let total_matches = matches.len();
        QueryResult {
            records: matches.into_iter().take(query.limit).cloned().collect(),
            total_matches,
        }
    }

    /// Close a record's validity window as of now. The fact is untouched.
    ///
    /// Returns `false` if the record was already closed.
    ///
    /// # Errors
    /// Returns [`DomainError::RecordNotFound`] for an unknown id.
    pub async fn invalidate(&self, record_id: Uuid) -> DomainResult<bool> {
        let mut index = self.index.write().await;
        let record = index.get(record_id).ok_or(DomainError::RecordNotFound(record_id))?;
        if !record.is_valid() {
            debug!(%record_id, "record already invalidated");
            return Ok(false);
        }

        let now = Utc::now();
        self.repository.close_validity(record_id, now).await?;
        if let Some(record) = index.get_mut(record_id) {
            record.valid_to = Some(now);
        }
        info!(%record_id, "memory record invalidated");
        Ok(true)
    }

    pub async fn get(&self, record_id: Uuid) -> Option<MemoryRecord> {
        self.index.read().await.get(record_id).cloned()
    }

    /// Records valid at `as_of` (default now).
    pub async fn all_valid(&self, as_of: Option<DateTime<Utc>>) -> Vec<MemoryRecord> {
        let at = as_of.unwrap_or_else(Utc::now);
        self.index
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.is_valid_at(at))
            .cloned()
            .collect()
    }

    /// Valid lessons, newest first.
    pub async fn lessons(&self, limit: usize) -> Vec<MemoryRecord> {
        let mut lessons: Vec<MemoryRecord> = self
            .index
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.is_valid() && r.fact.kind == FactKind::Lesson)
            .cloned()
            .collect();
        lessons.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));
        lessons.truncate(limit);
        lessons
    }

    /// Store a lesson learned from a run.
    pub async fn write_lesson(
        &self,
        text: impl Into<String>,
        run_id: Option<Uuid>,
        node_id: &str,
        confidence: f64,
        tags: &[&str],
    ) -> DomainResult<Option<Uuid>> {
        let mut provenance = Provenance::new("learning_engine", SourceKind::Learning);
        provenance.confidence = confidence;
        provenance.run_id = run_id;
        provenance.node_id = Some(node_id.to_string());

        let mut fact = Fact::new(text)
            .with_kind(FactKind::Lesson)
            .with_confidence(confidence)
            .with_provenance(provenance);
        fact.tags = if tags.is_empty() {
            vec!["lesson".to_string(), "auto-generated".to_string()]
        } else {
            tags.iter().map(ToString::to_string).collect()
        };

        let outcome = self.write(vec![fact], run_id, Some(node_id), ConflictPolicy::Flag).await?;
        Ok(outcome.written.first().copied())
    }

    pub async fn stats(&self) -> MemoryStats {
        MemoryStats::from_records(&self.index.read().await.records)
    }
}
