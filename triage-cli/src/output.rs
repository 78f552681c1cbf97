//! Result rendering: score-sorted linear view plus per-type groups.

use chrono::DateTime;

use triage_core::{Entity, EntityType, group_top_k_per_type};

fn type_label(ty: EntityType) -> &'static str {
    match ty {
        EntityType::TimeRange => "timerange",
        EntityType::Metric => "metric",
        EntityType::Dimension => "dimension",
        EntityType::Event => "event",
        EntityType::Dataset => "dataset",
    }
}

fn timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// One result line: `0.873 [dimension] triage:dimension:country:fr:generated`,
/// with human-readable bounds appended for time-carrying entities.
pub fn format_entity(entity: &Entity) -> String {
    let mut line = format!(
        "{:.3} [{}] {}",
        entity.score(),
        type_label(entity.entity_type()),
        entity.urn()
    );
    if let Some((start, end)) = entity.time_bounds() {
        line.push_str(&format!(" ({} .. {})", timestamp(start), timestamp(end)));
    }
    line
}

/// Renders the linear ranking followed by top-k per URN type.
pub fn render(results: &[Entity], group_k: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Results ({}) ===\n", results.len()));
    for entity in results {
        out.push_str(&format_entity(entity));
        out.push('\n');
    }

    out.push_str("\n=== Top per type ===\n");
    for (prefix, group) in group_top_k_per_type(results, group_k) {
        out.push_str(&format!("{prefix}\n"));
        for entity in group {
            out.push_str(&format!("  {}\n", format_entity(&entity)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use triage_core::{Provenance, RangeKind};

    #[test]
    fn test_format_entity() {
        let dim = Entity::dimension(0.8734, "country", "fr", Provenance::Generated);
        assert_eq!(
            format_entity(&dim),
            "0.873 [dimension] triage:dimension:country:fr:generated"
        );
    }

    #[test]
    fn test_format_time_range_appends_bounds() {
        let window = Entity::time_range(RangeKind::Anomaly, 0, 3_600_000, 1.0);
        let line = format_entity(&window);
        assert!(line.starts_with("1.000 [timerange] triage:timerange:anomaly:0:3600000 ("));
        assert!(line.contains("1970-01-01T01:00:00"));
    }

    #[test]
    fn test_render_groups_per_type() {
        let results = vec![
            Entity::dimension(0.9, "country", "fr", Provenance::Generated),
            Entity::metric(0.5, 1),
        ];
        let rendered = render(&results, 3);
        assert!(rendered.contains("=== Results (2) ==="));
        assert!(rendered.contains("triage:dimension:"));
        assert!(rendered.contains("triage:metric:"));
        // grouped section repeats each entity as an indented line
        assert!(rendered.contains("  0.900 [dimension] triage:dimension:country:fr:generated"));
    }
}
