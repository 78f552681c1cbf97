//! Pure scoring strategies mapping a candidate time window to a relevance
//! score against a reference window and a lookback horizon.
//!
//! Every strategy is a stateless function: deterministic and
//! independently testable. Time-based strategies treat the candidate's
//! start time as its anchor; a candidate starting at or after the
//! reference window's end is truncated to zero.

use std::collections::{BTreeMap, HashMap};

use crate::entity::{Entity, EntityKind};
use crate::error::ConfigError;

/// Strategy selector, parsed from stage configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyType {
    Linear,
    Triangular,
    Quadratic,
    Hyperbola,
    Dimension,
    Compound,
}

impl StrategyType {
    /// Parses a configuration string; unknown names fail at init.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "linear" => Ok(StrategyType::Linear),
            "triangular" => Ok(StrategyType::Triangular),
            "quadratic" => Ok(StrategyType::Quadratic),
            "hyperbola" => Ok(StrategyType::Hyperbola),
            "dimension" => Ok(StrategyType::Dimension),
            "compound" => Ok(StrategyType::Compound),
            _ => Err(ConfigError::UnknownStrategy {
                name: name.to_string(),
            }),
        }
    }
}

impl Default for StrategyType {
    fn default() -> Self {
        StrategyType::Compound
    }
}

/// Reference frame for time-based scoring: the window under analysis and
/// the lookback horizon before it.
#[derive(Debug, Clone, Copy)]
pub struct TimeFrame {
    pub lookback: i64,
    pub start: i64,
    pub end: i64,
}

impl TimeFrame {
    pub fn new(lookback: i64, start: i64, end: i64) -> Self {
        Self { lookback, start, end }
    }
}

/// Time decay score of a candidate `[start, end)` under `frame`.
///
/// All bounded variants are zero outside `[lookback, end)`; the hyperbola
/// decays asymptotically into the past but is still truncated for
/// candidates starting at or after the window end.
pub fn time_score(strategy: StrategyType, frame: TimeFrame, candidate_start: i64) -> f64 {
    if candidate_start >= frame.end {
        return 0.0;
    }
    let horizon = (frame.start - frame.lookback).max(1) as f64;
    match strategy {
        StrategyType::Linear => {
            if candidate_start >= frame.start {
                1.0
            } else {
                let d = (frame.start - candidate_start) as f64;
                (1.0 - d / horizon).max(0.0)
            }
        }
        StrategyType::Triangular => triangular(frame, candidate_start, horizon),
        StrategyType::Quadratic => {
            let t = triangular(frame, candidate_start, horizon);
            t * t
        }
        StrategyType::Hyperbola => {
            let scale = (frame.end - frame.start).max(1) as f64;
            let d = (frame.start - candidate_start).max(0) as f64;
            1.0 / (1.0 + d / scale)
        }
        // dimension and compound are not pure time strategies
        StrategyType::Dimension | StrategyType::Compound => 0.0,
    }
}

fn triangular(frame: TimeFrame, candidate_start: i64, horizon: f64) -> f64 {
    if candidate_start >= frame.start {
        // falling flank inside the window
        let len = (frame.end - frame.start).max(1) as f64;
        let d = (candidate_start - frame.start) as f64;
        (1.0 - d / len).max(0.0)
    } else {
        // rising flank from the lookback boundary to the window start
        let d = (frame.start - candidate_start) as f64;
        (1.0 - d / horizon).max(0.0)
    }
}

/// Max relevance, across the candidate's own dimension values, of any
/// matching previously-scored dimension entity; zero when none match.
///
/// `lookup` maps lower-cased dimension values to scored Dimension
/// entities for one dimension name.
pub fn dimension_score(
    candidate_dimensions: &BTreeMap<String, Vec<String>>,
    dimension: &str,
    lookup: &HashMap<String, Entity>,
) -> f64 {
    let mut max = 0.0f64;
    if let Some(values) = candidate_dimensions.get(dimension) {
        for value in values {
            if let Some(entity) = lookup.get(&value.to_lowercase()) {
                max = max.max(entity.score());
            }
        }
    }
    max
}

/// Compound score: time dominates, dimension corroboration adds up to two
/// bonus points. A zero time score gates the whole thing to zero.
pub fn compound_score(time: f64, dimension: f64) -> f64 {
    if time <= 0.0 {
        return 0.0;
    }
    let has_dimension = if dimension > 0.0 { 1.0 } else { 0.0 };
    time + has_dimension + dimension.min(1.0)
}

/// A fully-wired scorer for event-like candidates, combining the
/// configured strategy with a dimension-match lookup.
pub struct EventScorer {
    strategy: StrategyType,
    frame: TimeFrame,
    dimension: String,
    lookup: HashMap<String, Entity>,
}

impl EventScorer {
    /// Builds a scorer for one reference frame. `lookup` holds
    /// previously-scored Dimension entities keyed by lower-cased value,
    /// restricted to `dimension`.
    pub fn new(
        strategy: StrategyType,
        frame: TimeFrame,
        dimension: &str,
        scored_dimensions: &[Entity],
    ) -> Self {
        let mut lookup = HashMap::new();
        for e in scored_dimensions {
            if let EntityKind::Dimension { name, value, .. } = e.kind() {
                if name == dimension {
                    lookup.insert(value.clone(), e.clone());
                }
            }
        }
        Self {
            strategy,
            frame,
            dimension: dimension.to_string(),
            lookup,
        }
    }

    /// Scores a candidate by start time and its own dimension map.
    pub fn score(&self, candidate_start: i64, dimensions: &BTreeMap<String, Vec<String>>) -> f64 {
        match self.strategy {
            StrategyType::Dimension => dimension_score(dimensions, &self.dimension, &self.lookup),
            StrategyType::Compound => {
                let time = time_score(StrategyType::Hyperbola, self.frame, candidate_start);
                let dim = dimension_score(dimensions, &self.dimension, &self.lookup);
                compound_score(time, dim)
            }
            time_only => time_score(time_only, self.frame, candidate_start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Provenance;

    const FRAME: TimeFrame = TimeFrame {
        lookback: 0,
        start: 1000,
        end: 2000,
    };

    #[test]
    fn test_parse_strategy() {
        assert_eq!(StrategyType::parse("COMPOUND").unwrap(), StrategyType::Compound);
        assert_eq!(StrategyType::parse("linear").unwrap(), StrategyType::Linear);
        assert!(StrategyType::parse("parabolic").is_err());
    }

    #[test]
    fn test_linear_decay_contract() {
        assert_eq!(time_score(StrategyType::Linear, FRAME, 1000), 1.0);
        let near = time_score(StrategyType::Linear, FRAME, 900);
        let far = time_score(StrategyType::Linear, FRAME, 200);
        assert!(near > far);
        assert!(far > 0.0);
        // zero at the lookback boundary and outside the window
        assert_eq!(time_score(StrategyType::Linear, FRAME, 0), 0.0);
        assert_eq!(time_score(StrategyType::Linear, FRAME, 2000), 0.0);
    }

    #[test]
    fn test_triangular_unimodal() {
        let peak = time_score(StrategyType::Triangular, FRAME, 1000);
        let before = time_score(StrategyType::Triangular, FRAME, 500);
        let after = time_score(StrategyType::Triangular, FRAME, 1500);
        assert_eq!(peak, 1.0);
        assert!(before < peak && before > 0.0);
        assert!(after < peak && after > 0.0);
        assert_eq!(time_score(StrategyType::Triangular, FRAME, 0), 0.0);
    }

    #[test]
    fn test_quadratic_falls_faster_than_triangular() {
        let tri = time_score(StrategyType::Triangular, FRAME, 500);
        let quad = time_score(StrategyType::Quadratic, FRAME, 500);
        assert!(quad < tri);
        assert!(quad > 0.0);
    }

    #[test]
    fn test_hyperbola_long_tail_never_zero_in_past() {
        let near = time_score(StrategyType::Hyperbola, FRAME, 900);
        let far = time_score(StrategyType::Hyperbola, FRAME, -100_000);
        assert!(near > far);
        assert!(far > 0.0);
        // still truncated for candidates after the window
        assert_eq!(time_score(StrategyType::Hyperbola, FRAME, 2000), 0.0);
    }

    #[test]
    fn test_compound_zero_time_gates_dimension() {
        assert_eq!(compound_score(0.0, 0.9), 0.0);
    }

    #[test]
    fn test_compound_dimension_bonus() {
        let without = compound_score(0.8, 0.0);
        let with = compound_score(0.8, 0.6);
        assert_eq!(without, 0.8);
        assert_eq!(with, 0.8 + 1.0 + 0.6);
        assert!(with > without);
    }

    #[test]
    fn test_event_scorer_compound_matching_dimension_scores_higher() {
        let scored = vec![Entity::dimension(0.7, "country", "us", Provenance::Generated)];
        let scorer = EventScorer::new(StrategyType::Compound, FRAME, "country", &scored);

        let mut matching = BTreeMap::new();
        matching.insert("country".to_string(), vec!["US".to_string()]);
        let mut other = BTreeMap::new();
        other.insert("country".to_string(), vec!["de".to_string()]);

        let with_match = scorer.score(1100, &matching);
        let without_match = scorer.score(1100, &other);
        assert!(with_match > without_match);

        // zero time overlap stays zero regardless of the match
        assert_eq!(scorer.score(3000, &matching), 0.0);
    }

    #[test]
    fn test_dimension_strategy_no_match_is_zero() {
        let scorer = EventScorer::new(StrategyType::Dimension, FRAME, "country", &[]);
        let mut dims = BTreeMap::new();
        dims.insert("country".to_string(), vec!["us".to_string()]);
        assert_eq!(scorer.score(1100, &dims), 0.0);
    }
}
