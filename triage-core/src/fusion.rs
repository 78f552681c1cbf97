//! Score-fusion, deduplication, and ranking utilities shared by every
//! stage.
//!
//! Scores are stage-local and only comparable after explicit
//! normalization; every function here returns new values and never
//! mutates its input.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::Entity;
use crate::urn;

/// Sorts by score descending (stable on ties by encounter order) and
/// truncates to the first `k`. A negative `k` returns all entities.
pub fn top_k(entities: &[Entity], k: i64) -> Vec<Entity> {
    let mut out: Vec<Entity> = entities.to_vec();
    out.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));
    if k >= 0 {
        out.truncate(k as usize);
    }
    out
}

/// Rescales scores linearly into `[0, 1]` using the observed min/max.
/// When all scores are equal every score becomes `1.0`; empty input
/// yields empty output.
pub fn normalize_scores(entities: &[Entity]) -> Vec<Entity> {
    if entities.is_empty() {
        return Vec::new();
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for e in entities {
        min = min.min(e.score());
        max = max.max(e.score());
    }

    let range = max - min;
    entities
        .iter()
        .map(|e| {
            if range <= f64::EPSILON {
                e.with_score(1.0)
            } else {
                e.with_score((e.score() - min) / range)
            }
        })
        .collect()
}

/// Normalizes then truncates to the top `k`; the common tail of ranking
/// stages.
pub fn top_k_normalized(entities: &[Entity], k: i64) -> Vec<Entity> {
    top_k(&normalize_scores(entities), k)
}

/// Returns copies of `entities` with `related` appended to each entity's
/// provenance edges.
pub fn add_related(entities: Vec<Entity>, related: &[Arc<Entity>]) -> Vec<Entity> {
    entities
        .into_iter()
        .map(|e| e.with_related(related.to_vec()))
        .collect()
}

/// URN-keyed, insertion-ordered entity set with max-score merge-on-insert.
///
/// Inserting a URN that already exists keeps whichever entity has the
/// higher score; ties keep the existing one. The iteration order is the
/// first-encounter order of each URN, which keeps downstream ranking
/// deterministic regardless of upstream completion order.
#[derive(Debug, Default)]
pub struct MaxScoreSet {
    order: Vec<String>,
    entities: HashMap<String, Entity>,
}

impl MaxScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity, keeping the max-score instance per URN.
    /// Returns true when the set changed.
    pub fn insert(&mut self, entity: Entity) -> bool {
        let urn = entity.urn();
        match self.entities.get(&urn) {
            Some(existing) if existing.score() >= entity.score() => false,
            Some(_) => {
                self.entities.insert(urn, entity);
                true
            }
            None => {
                self.order.push(urn.clone());
                self.entities.insert(urn, entity);
                true
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = Entity>>(&mut self, entities: I) {
        for e in entities {
            self.insert(e);
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, urn: &str) -> bool {
        self.entities.contains_key(urn)
    }

    pub fn get(&self, urn: &str) -> Option<&Entity> {
        self.entities.get(urn)
    }

    /// Ordered view, first-encounter order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|urn| self.entities.get(urn))
    }

    pub fn into_vec(mut self) -> Vec<Entity> {
        self.order
            .iter()
            .filter_map(|urn| self.entities.remove(urn))
            .collect()
    }
}

impl FromIterator<Entity> for MaxScoreSet {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Groups entities by their `namespace:type:` URN prefix and keeps the
/// first `k` per group, preserving the incoming (typically score-sorted)
/// order.
pub fn group_top_k_per_type(entities: &[Entity], k: usize) -> Vec<(String, Vec<Entity>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Entity>> = HashMap::new();
    for e in entities {
        let prefix = urn::type_prefix(&e.urn());
        let group = groups.entry(prefix.clone()).or_insert_with(|| {
            order.push(prefix.clone());
            Vec::new()
        });
        if group.len() < k {
            group.push(e.clone());
        }
    }
    order
        .into_iter()
        .map(|prefix| {
            let group = groups.remove(&prefix).unwrap_or_default();
            (prefix, group)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, Provenance};

    fn metrics(scores: &[f64]) -> Vec<Entity> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| Entity::metric(*s, i as i64))
            .collect()
    }

    #[test]
    fn test_top_k_negative_returns_all_sorted() {
        let input = metrics(&[2.0, 6.0, 4.0]);
        let out = top_k(&input, -1);
        let scores: Vec<f64> = out.iter().map(Entity::score).collect();
        assert_eq!(scores, vec![6.0, 4.0, 2.0]);
        // input untouched
        assert_eq!(input[0].score(), 2.0);
    }

    #[test]
    fn test_top_k_truncates() {
        let out = top_k(&metrics(&[2.0, 6.0, 4.0]), 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].score(), 6.0);
        assert_eq!(out[1].score(), 4.0);

        assert_eq!(top_k(&metrics(&[1.0]), 5).len(), 1);
        assert!(top_k(&[], 3).is_empty());
    }

    #[test]
    fn test_top_k_stable_on_ties() {
        let a = Entity::metric(1.0, 1);
        let b = Entity::metric(1.0, 2);
        let out = top_k(&[a.clone(), b.clone()], -1);
        assert_eq!(out[0].urn(), a.urn());
        assert_eq!(out[1].urn(), b.urn());
    }

    #[test]
    fn test_normalize_scores() {
        let out = normalize_scores(&metrics(&[2.0, 4.0, 6.0]));
        let scores: Vec<f64> = out.iter().map(Entity::score).collect();
        assert_eq!(scores, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_normalize_all_equal_becomes_one() {
        let out = normalize_scores(&metrics(&[3.0, 3.0]));
        assert!(out.iter().all(|e| e.score() == 1.0));
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_max_score_set_keeps_higher_score_both_orders() {
        let low = Entity::dataset(0.3, "pageviews");
        let high = Entity::dataset(0.9, "pageviews");

        let mut set = MaxScoreSet::new();
        set.insert(low.clone());
        set.insert(high.clone());
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&low.urn()).unwrap().score(), 0.9);

        let mut set = MaxScoreSet::new();
        set.insert(high);
        assert!(!set.insert(low.clone()));
        assert_eq!(set.get(&low.urn()).unwrap().score(), 0.9);
    }

    #[test]
    fn test_max_score_set_tie_keeps_existing() {
        let first = Entity::dataset(0.5, "pageviews");
        let second = first.with_related(vec![std::sync::Arc::new(Entity::metric(1.0, 1))]);
        let mut set = MaxScoreSet::new();
        set.insert(first);
        assert!(!set.insert(second));
        assert!(set.get("triage:dataset:pageviews").unwrap().related().is_empty());
    }

    #[test]
    fn test_max_score_set_case_folded_dedup() {
        let mut set = MaxScoreSet::new();
        set.insert(Entity::dimension(0.2, "country", "US", Provenance::Provided));
        set.insert(Entity::dimension(0.7, "country", "us", Provenance::Provided));
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().score(), 0.7);
    }

    #[test]
    fn test_add_related_records_provenance() {
        let window = std::sync::Arc::new(Entity::time_range(
            crate::entity::RangeKind::Anomaly,
            0,
            100,
            1.0,
        ));
        let out = add_related(metrics(&[1.0, 2.0]), &[window.clone()]);
        assert!(out.iter().all(|e| e.related().len() == 1));
    }

    #[test]
    fn test_group_top_k_per_type() {
        let mut entities = metrics(&[3.0, 2.0]);
        entities.push(Entity::dataset(1.0, "pageviews"));
        let grouped = group_top_k_per_type(&entities, 1);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "triage:metric:");
        assert_eq!(grouped[0].1.len(), 1);
        assert_eq!(grouped[1].0, "triage:dataset:");
    }
}
