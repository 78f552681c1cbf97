//! Deterministic, bidirectional URN codec for entities.
//!
//! URN grammar: `triage:<type>:<segments>`. Each entity variant owns its
//! slice of the codec; [`parse`] dispatches on the type segment and
//! [`format`] is the left inverse of [`parse`] for key attributes.
//!
//! Metric filters encode as `key=value` tail segments sorted
//! lexicographically, values lower-cased, so identical logical filters
//! always produce the same URN.

use std::collections::BTreeMap;

use crate::entity::{Entity, EntityKind, Provenance, RangeKind, canonical_filters};
use crate::error::UrnError;

/// URN namespace prefix for all Triage entities.
pub const NAMESPACE: &str = "triage";

pub const TYPE_TIMERANGE: &str = "timerange";
pub const TYPE_METRIC: &str = "metric";
pub const TYPE_DIMENSION: &str = "dimension";
pub const TYPE_EVENT: &str = "event";
pub const TYPE_DATASET: &str = "dataset";

/// Renders the canonical URN for an entity kind.
pub fn format(kind: &EntityKind) -> String {
    match kind {
        EntityKind::TimeRange { kind, start, end } => {
            format!("{NAMESPACE}:{TYPE_TIMERANGE}:{kind}:{start}:{end}")
        }
        EntityKind::Metric { id, filters } => {
            let mut urn = format!("{NAMESPACE}:{TYPE_METRIC}:{id}");
            for (key, value) in filters {
                urn.push_str(&format!(":{key}={value}"));
            }
            urn
        }
        EntityKind::Dimension {
            name,
            value,
            provenance,
        } => {
            format!(
                "{NAMESPACE}:{TYPE_DIMENSION}:{name}:{value}:{}",
                provenance.as_str()
            )
        }
        EntityKind::Event { source, id, .. } => {
            format!("{NAMESPACE}:{TYPE_EVENT}:{source}:{id}")
        }
        EntityKind::Dataset { name } => format!("{NAMESPACE}:{TYPE_DATASET}:{name}"),
    }
}

/// Returns the `namespace:type:` prefix of a URN, used for per-type
/// grouping of results.
pub fn type_prefix(urn: &str) -> String {
    let mut parts = urn.splitn(3, ':');
    let ns = parts.next().unwrap_or_default();
    let ty = parts.next().unwrap_or_default();
    format!("{ns}:{ty}:")
}

/// Returns true when `urn` addresses the given entity type.
pub fn is_type(urn: &str, ty: &str) -> bool {
    urn.starts_with(&format!("{NAMESPACE}:{ty}:"))
}

/// Parses a URN into an entity with the given score.
///
/// Fails with [`UrnError::Malformed`] on an unrecognized prefix or wrong
/// segment shape. Attributes not carried by the URN (event payload) come
/// back empty; the URN preserves the key attributes only.
pub fn parse(urn: &str, score: f64) -> Result<Entity, UrnError> {
    let parts: Vec<&str> = urn.split(':').collect();
    if parts.len() < 3 || parts[0] != NAMESPACE {
        return Err(UrnError::malformed(urn, "expected 'triage:<type>:...'"));
    }

    let kind = match parts[1] {
        TYPE_TIMERANGE => parse_timerange(urn, &parts[2..])?,
        TYPE_METRIC => parse_metric(urn, &parts[2..])?,
        TYPE_DIMENSION => parse_dimension(urn, &parts[2..])?,
        TYPE_EVENT => parse_event(urn, &parts[2..])?,
        TYPE_DATASET => parse_dataset(urn, &parts[2..])?,
        other => {
            return Err(UrnError::malformed(
                urn,
                format!("unrecognized type segment '{other}'"),
            ));
        }
    };

    Ok(Entity::new(kind, score))
}

fn parse_timerange(urn: &str, segments: &[&str]) -> Result<EntityKind, UrnError> {
    let [kind, start, end] = segments else {
        return Err(UrnError::malformed(urn, "expected <kind>:<start>:<end>"));
    };
    let kind = match *kind {
        "anomaly" => RangeKind::Anomaly,
        "baseline" => RangeKind::Baseline,
        "analysis" => RangeKind::Analysis,
        other => {
            return Err(UrnError::malformed(
                urn,
                format!("unknown time range kind '{other}'"),
            ));
        }
    };
    Ok(EntityKind::TimeRange {
        kind,
        start: parse_i64(urn, start)?,
        end: parse_i64(urn, end)?,
    })
}

fn parse_metric(urn: &str, segments: &[&str]) -> Result<EntityKind, UrnError> {
    let [id, tail @ ..] = segments else {
        return Err(UrnError::malformed(urn, "expected <id>[:<key>=<value>...]"));
    };
    let mut filters = Vec::new();
    for segment in tail {
        let Some((key, value)) = segment.split_once('=') else {
            return Err(UrnError::malformed(
                urn,
                format!("filter segment '{segment}' is not 'key=value'"),
            ));
        };
        filters.push((key.to_string(), value.to_string()));
    }
    Ok(EntityKind::Metric {
        id: parse_i64(urn, id)?,
        filters: canonical_filters(&filters),
    })
}

fn parse_dimension(urn: &str, segments: &[&str]) -> Result<EntityKind, UrnError> {
    let [name, value, provenance] = segments else {
        return Err(UrnError::malformed(
            urn,
            "expected <name>:<value>:<provenance>",
        ));
    };
    let provenance = match *provenance {
        "provided" => Provenance::Provided,
        "generated" => Provenance::Generated,
        other => {
            return Err(UrnError::malformed(
                urn,
                format!("unknown provenance '{other}'"),
            ));
        }
    };
    Ok(EntityKind::Dimension {
        name: name.to_string(),
        value: value.to_lowercase(),
        provenance,
    })
}

fn parse_event(urn: &str, segments: &[&str]) -> Result<EntityKind, UrnError> {
    let [source, id] = segments else {
        return Err(UrnError::malformed(urn, "expected <source>:<id>"));
    };
    Ok(EntityKind::Event {
        source: source.to_string(),
        id: parse_i64(urn, id)?,
        start: 0,
        end: 0,
        dimensions: BTreeMap::new(),
    })
}

fn parse_dataset(urn: &str, segments: &[&str]) -> Result<EntityKind, UrnError> {
    let [name] = segments else {
        return Err(UrnError::malformed(urn, "expected <name>"));
    };
    Ok(EntityKind::Dataset {
        name: name.to_string(),
    })
}

fn parse_i64(urn: &str, segment: &str) -> Result<i64, UrnError> {
    segment
        .parse::<i64>()
        .map_err(|_| UrnError::malformed(urn, format!("'{segment}' is not an integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_round_trip_timerange() {
        let e = Entity::time_range(RangeKind::Baseline, 1000, 2000, 0.8);
        let parsed = parse(&e.urn(), 0.8).unwrap();
        assert_eq!(parsed.kind(), e.kind());
        assert_eq!(parsed.urn(), "triage:timerange:baseline:1000:2000");
    }

    #[test]
    fn test_round_trip_metric_with_filters() {
        let e = Entity::metric(1.0, 42).with_filters(&[
            ("env".into(), "Prod".into()),
            ("country".into(), "US".into()),
        ]);
        assert_eq!(e.urn(), "triage:metric:42:country=us:env=prod");
        let parsed = parse(&e.urn(), 1.0).unwrap();
        assert_eq!(parsed.kind(), e.kind());
    }

    #[test]
    fn test_round_trip_dimension() {
        let e = Entity::dimension(0.5, "country", "FR", Provenance::Generated);
        assert_eq!(e.urn(), "triage:dimension:country:fr:generated");
        let parsed = parse(&e.urn(), 0.5).unwrap();
        assert_eq!(parsed.kind(), e.kind());
    }

    #[test]
    fn test_round_trip_event_key_attributes() {
        let e = Entity::event(1.0, "holiday", 7, 100, 200, BTreeMap::new());
        assert_eq!(e.urn(), "triage:event:holiday:7");
        let parsed = parse(&e.urn(), 1.0).unwrap();
        // payload attributes are not part of the URN
        match parsed.kind() {
            EntityKind::Event { source, id, .. } => {
                assert_eq!(source, "holiday");
                assert_eq!(*id, 7);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_round_trip_dataset() {
        let e = Entity::dataset(1.0, "pageviews");
        let parsed = parse(&e.urn(), 1.0).unwrap();
        assert_eq!(parsed.kind(), e.kind());
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!(parse("other:metric:1", 1.0).is_err());
        assert!(parse("triage:widget:1", 1.0).is_err());
        assert!(parse("triage:metric", 1.0).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_segment_shape() {
        assert!(parse("triage:timerange:anomaly:abc:2", 1.0).is_err());
        assert!(parse("triage:metric:1:noequals", 1.0).is_err());
        assert!(parse("triage:dimension:country:us:banana", 1.0).is_err());
    }

    #[test]
    fn test_case_insensitive_filters_same_urn() {
        let a = Entity::metric(1.0, 1).with_filters(&[("country".into(), "US".into())]);
        let b = Entity::metric(1.0, 1).with_filters(&[("country".into(), "us".into())]);
        assert_eq!(a.urn(), b.urn());
    }

    #[test]
    fn test_type_prefix() {
        assert_eq!(type_prefix("triage:metric:1:a=b"), "triage:metric:");
        assert!(is_type("triage:dataset:pageviews", TYPE_DATASET));
        assert!(!is_type("triage:dataset:pageviews", TYPE_METRIC));
    }
}
