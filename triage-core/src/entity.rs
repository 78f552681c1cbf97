//! The typed, URN-addressable entity model at the heart of the RCA graph.
//!
//! An [`Entity`] is an immutable, scored value identified by its URN. Every
//! transform returns a new value; nothing here is mutated in place. The
//! `related` list records provenance edges ("this event is a candidate
//! because of this time window") and is never used for reachability.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::urn;

/// Role of a time range within one RCA invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// The anomalous window under investigation.
    Anomaly,
    /// The reference window the anomaly is compared against.
    Baseline,
    /// The wider display/search window.
    Analysis,
}

impl RangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeKind::Anomaly => "anomaly",
            RangeKind::Baseline => "baseline",
            RangeKind::Analysis => "analysis",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a dimension entity came in with the query or was produced by
/// an analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Provided,
    Generated,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Provided => "provided",
            Provenance::Generated => "generated",
        }
    }
}

/// Coarse entity variant, used for context filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    TimeRange,
    Metric,
    Dimension,
    Event,
    Dataset,
}

/// Variant payload of an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    TimeRange {
        kind: RangeKind,
        start: i64,
        end: i64,
    },
    Metric {
        id: i64,
        /// Dimension filters, sorted by key then value, values lower-cased.
        /// A leading `!` on a value marks a negation filter.
        filters: Vec<(String, String)>,
    },
    Dimension {
        name: String,
        value: String,
        provenance: Provenance,
    },
    Event {
        source: String,
        id: i64,
        start: i64,
        end: i64,
        dimensions: BTreeMap<String, Vec<String>>,
    },
    Dataset {
        name: String,
    },
}

impl EntityKind {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityKind::TimeRange { .. } => EntityType::TimeRange,
            EntityKind::Metric { .. } => EntityType::Metric,
            EntityKind::Dimension { .. } => EntityType::Dimension,
            EntityKind::Event { .. } => EntityType::Event,
            EntityKind::Dataset { .. } => EntityType::Dataset,
        }
    }
}

/// An immutable, scored, URN-addressable value in the RCA graph.
#[derive(Debug, Clone)]
pub struct Entity {
    kind: EntityKind,
    score: f64,
    related: Vec<Arc<Entity>>,
}

impl Entity {
    pub fn new(kind: EntityKind, score: f64) -> Self {
        Self {
            kind,
            score: score.max(0.0),
            related: Vec::new(),
        }
    }

    pub fn time_range(kind: RangeKind, start: i64, end: i64, score: f64) -> Self {
        Self::new(EntityKind::TimeRange { kind, start, end }, score)
    }

    pub fn metric(score: f64, id: i64) -> Self {
        Self::new(
            EntityKind::Metric {
                id,
                filters: Vec::new(),
            },
            score,
        )
    }

    pub fn dimension(score: f64, name: &str, value: &str, provenance: Provenance) -> Self {
        Self::new(
            EntityKind::Dimension {
                name: name.to_string(),
                value: value.to_lowercase(),
                provenance,
            },
            score,
        )
    }

    pub fn event(
        score: f64,
        source: &str,
        id: i64,
        start: i64,
        end: i64,
        dimensions: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self::new(
            EntityKind::Event {
                source: source.to_string(),
                id,
                start,
                end,
                dimensions,
            },
            score,
        )
    }

    pub fn dataset(score: f64, name: &str) -> Self {
        Self::new(
            EntityKind::Dataset {
                name: name.to_string(),
            },
            score,
        )
    }

    /// Canonical URN of this entity; identity key for dedup.
    pub fn urn(&self) -> String {
        urn::format(&self.kind)
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn entity_type(&self) -> EntityType {
        self.kind.entity_type()
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn related(&self) -> &[Arc<Entity>] {
        &self.related
    }

    /// Returns a copy with a different score. Scores are clamped to be
    /// non-negative.
    pub fn with_score(&self, score: f64) -> Self {
        Self {
            kind: self.kind.clone(),
            score: score.max(0.0),
            related: self.related.clone(),
        }
    }

    /// Returns a copy with `related` appended to the provenance edges.
    pub fn with_related(&self, related: Vec<Arc<Entity>>) -> Self {
        let mut out = self.clone();
        out.related.extend(related);
        out
    }

    /// Returns a metric copy with the given filter set, canonicalized
    /// (sorted by key then value, values lower-cased, duplicates removed).
    ///
    /// Panics in debug builds when called on a non-metric entity; callers
    /// always hold a `Metric` here.
    pub fn with_filters(&self, filters: &[(String, String)]) -> Self {
        let id = match &self.kind {
            EntityKind::Metric { id, .. } => *id,
            other => {
                debug_assert!(false, "with_filters on {:?}", other.entity_type());
                return self.clone();
            }
        };
        let mut out = self.clone();
        out.kind = EntityKind::Metric {
            id,
            filters: canonical_filters(filters),
        };
        out
    }

    /// Returns a metric copy with all filters dropped.
    pub fn without_filters(&self) -> Self {
        self.with_filters(&[])
    }

    /// Metric filter accessor; empty for non-metric entities.
    pub fn filters(&self) -> &[(String, String)] {
        match &self.kind {
            EntityKind::Metric { filters, .. } => filters,
            _ => &[],
        }
    }

    /// Metric id accessor.
    pub fn metric_id(&self) -> Option<i64> {
        match &self.kind {
            EntityKind::Metric { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn time_bounds(&self) -> Option<(i64, i64)> {
        match &self.kind {
            EntityKind::TimeRange { start, end, .. } => Some((*start, *end)),
            EntityKind::Event { start, end, .. } => Some((*start, *end)),
            _ => None,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.score, self.urn())
    }
}

/// Canonicalizes a filter list: lower-cases values, sorts by key then
/// value, removes duplicates. Identical logical filters always produce
/// the same URN.
pub fn canonical_filters(filters: &[(String, String)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = filters
        .iter()
        .map(|(k, v)| (k.clone(), v.to_lowercase()))
        .collect();
    out.sort();
    out.dedup();
    out
}
