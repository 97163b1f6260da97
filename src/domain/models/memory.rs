//! Long-term memory domain model.
//!
//! Facts are wrapped in append-only [`MemoryRecord`]s carrying a validity
//! window. A record is never edited after it is written except to close that
//! window. Facts may carry subject-predicate-object [`Triplet`]s; two
//! currently valid triplets with the same subject and predicate but different
//! objects are a [`MemoryConflict`].

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Category of a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    #[default]
    Fact,
    Decision,
    Observation,
    Lesson,
}

impl FactKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Decision => "decision",
            Self::Observation => "observation",
            Self::Lesson => "lesson",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fact" => Some(Self::Fact),
            "decision" => Some(Self::Decision),
            "observation" => Some(Self::Observation),
            "lesson" => Some(Self::Lesson),
            _ => None,
        }
    }
}

/// Who produced a piece of knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tool,
    Llm,
    User,
    Learning,
    #[default]
    Unknown,
}

fn default_confidence() -> f64 {
    1.0
}

/// Where a fact came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Provenance {
    pub fn new(source: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source: source.into(),
            kind,
            confidence: default_confidence(),
            timestamp: Some(Utc::now()),
            run_id: None,
            node_id: None,
            note: None,
        }
    }

    pub fn with_origin(mut self, run_id: Uuid, node_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id);
        self.node_id = Some(node_id.into());
        self
    }
}

/// A subject-predicate-object relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triplet {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Same subject and predicate, different object.
    pub fn contradicts(&self, other: &Self) -> bool {
        self.subject == other.subject && self.predicate == other.predicate && self.object != other.object
    }
}

fn new_fact_id() -> String {
    Uuid::new_v4().to_string()
}

/// A unit of knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(default = "new_fact_id")]
    pub fact_id: String,
    pub text: String,
    /// In [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub kind: FactKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triplets: Vec<Triplet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Fact {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            fact_id: new_fact_id(),
            text: text.into(),
            confidence: default_confidence(),
            kind: FactKind::Fact,
            provenance: Vec::new(),
            triplets: Vec::new(),
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub const fn with_kind(mut self, kind: FactKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_triplet(mut self, subject: impl Into<String>, predicate: impl Into<String>, object: impl Into<String>) -> Self {
        self.triplets.push(Triplet::new(subject, predicate, object));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance.push(provenance);
        self
    }

    /// Interpret a fact declared in step output: either a bare string or an
    /// object with at least a `text` field.
    pub fn from_declared(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(Self::new(text.clone())),
            Value::Object(_) => serde_json::from_value::<Self>(value.clone())
                .ok()
                .map(|fact| {
                    let confidence = fact.confidence.clamp(0.0, 1.0);
                    Self { confidence, ..fact }
                }),
            _ => None,
        }
    }
}

/// A versioned, append-only wrapper around a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub record_id: Uuid,
    pub fact: Fact,
    pub valid_from: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
}

impl MemoryRecord {
    pub fn new(fact: Fact, run_id: Option<Uuid>, node_id: Option<String>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            fact,
            valid_from: Utc::now(),
            valid_to: None,
            run_id,
            node_id,
            supersedes: None,
        }
    }

    /// Valid in `[valid_from, valid_to)`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_to.map_or(true, |end| at < end)
    }

    pub fn is_valid(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Conflicts a new fact would raise against this record.
    pub fn conflicts_with(&self, fact: &Fact) -> Vec<MemoryConflict> {
        if !self.is_valid() {
            return Vec::new();
        }
        fact.triplets
            .iter()
            .flat_map(|incoming| {
                self.fact
                    .triplets
                    .iter()
                    .filter(move |existing| existing.contradicts(incoming))
                    .map(move |existing| MemoryConflict {
                        subject: incoming.subject.clone(),
                        predicate: incoming.predicate.clone(),
                        existing_object: existing.object.clone(),
                        new_object: incoming.object.clone(),
                        existing_record: self.record_id,
                    })
            })
            .collect()
    }
}

fn default_query_limit() -> usize {
    10
}

/// Filter over currently valid records. Empty lists do not filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_search: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub predicates: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<FactKind>,
    /// Matches when the fact carries any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_query_limit")]
    pub limit: usize,
    /// Evaluate validity at a past instant instead of now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            text_search: None,
            subjects: Vec::new(),
            predicates: Vec::new(),
            objects: Vec::new(),
            kinds: Vec::new(),
            tags: Vec::new(),
            min_confidence: 0.0,
            limit: default_query_limit(),
            as_of: None,
        }
    }
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text_search = (!text.is_empty()).then_some(text);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    pub fn with_kind(mut self, kind: FactKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub const fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub const fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.as_of = Some(at);
        self
    }

    /// Whether a record passes every filter except validity.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        let fact = &record.fact;
        if fact.confidence < self.min_confidence {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&fact.kind) {
            return false;
        }
        if !self.tags.is_empty() && !fact.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if !self.subjects.is_empty() && !fact.triplets.iter().any(|t| self.subjects.contains(&t.subject)) {
            return false;
        }
        if !self.predicates.is_empty() && !fact.triplets.iter().any(|t| self.predicates.contains(&t.predicate)) {
            return false;
        }
        if !self.objects.is_empty() && !fact.triplets.iter().any(|t| self.objects.contains(&t.object)) {
            return false;
        }
        if let Some(text) = &self.text_search {
            if !fact.text.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Records matching a query, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub records: Vec<MemoryRecord>,
    /// Matches before the limit was applied.
    pub total_matches: usize,
}

impl QueryResult {
    /// Compact bullet list for prompt injection.
    pub fn to_summary(&self) -> String {
        if self.records.is_empty() {
            return "No relevant memories found.".to_string();
        }
        self.records
            .iter()
            .map(|record| {
                let fact = &record.fact;
                if fact.confidence < 1.0 {
                    format!("- {} [{:.0}%]", fact.text, fact.confidence * 100.0)
                } else {
                    format!("- {}", fact.text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A triplet that contradicts a currently valid record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConflict {
    pub subject: String,
    pub predicate: String,
    pub existing_object: String,
    pub new_object: String,
    pub existing_record: Uuid,
}

impl std::fmt::Display for MemoryConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Conflict: ({}, {}): existing='{}' vs new='{}'",
            self.subject, self.predicate, self.existing_object, self.new_object
        )
    }
}

/// What a write does with a fact that conflicts with existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Do not write the conflicting fact.
    #[default]
    Skip,
    /// Write it anyway and report the conflicts.
    Flag,
    /// Write it and close the validity of the records it contradicts.
    Supersede,
}

/// Result of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub written: Vec<Uuid>,
    pub conflicts: Vec<MemoryConflict>,
    /// Records whose validity was closed by a superseding write.
    #[serde(default)]
    pub superseded: Vec<Uuid>,
}

impl WriteOutcome {
    pub fn conflict_messages(&self) -> Vec<String> {
        self.conflicts.iter().map(ToString::to_string).collect()
    }
}

/// Store-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_records: usize,
    pub valid_records: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub unique_subjects: usize,
}

impl MemoryStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MemoryRecord>) -> Self {
        let mut stats = Self::default();
        let mut subjects = HashSet::new();
        for record in records {
            stats.total_records += 1;
            if !record.is_valid() {
                continue;
            }
            stats.valid_records += 1;
            *stats.by_kind.entry(record.fact.kind.as_str().to_string()).or_insert(0) += 1;
            subjects.extend(record.fact.triplets.iter().map(|t| t.subject.as_str()));
        }
        stats.unique_subjects = subjects.len();
        stats
    }
}
