//! YAML fixture loader: builds in-memory collaborators from a single
//! data file.
//!
//! ```yaml
//! metrics:
//!   - { id: 1, name: pageviews, dataset: web }
//! datasets:
//!   - { name: web, dimensions: [country, env] }
//! points:
//!   - metric_id: 1
//!     rows:
//!       - { time: 100, value: 80.0, dimensions: { country: US } }
//! events: []
//! anomalies: []
//! mappings: []
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use triage_core::{
    AnomalyRecord, Collaborators, DataPoint, DatasetMeta, EntityMapping, EventRecord,
    InMemoryMetadata, InMemoryRelations, InMemorySource, MetricMeta,
};

#[derive(Debug, Deserialize)]
struct MetricPoints {
    metric_id: i64,
    rows: Vec<DataPoint>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    metrics: Vec<MetricMeta>,
    #[serde(default)]
    datasets: Vec<DatasetMeta>,
    #[serde(default)]
    events: Vec<EventRecord>,
    #[serde(default)]
    anomalies: Vec<AnomalyRecord>,
    #[serde(default)]
    mappings: Vec<EntityMapping>,
    #[serde(default)]
    points: Vec<MetricPoints>,
}

impl Fixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing fixture file {}", path.display()))
    }

    pub fn into_collaborators(self) -> Collaborators {
        let mut source = InMemorySource::new();
        for points in self.points {
            source = source.with_points(points.metric_id, points.rows);
        }
        let metadata = InMemoryMetadata::new()
            .with_metrics(self.metrics)
            .with_datasets(self.datasets)
            .with_events(self.events)
            .with_anomalies(self.anomalies);
        Collaborators {
            source: Arc::new(source),
            metadata: Arc::new(metadata),
            relations: Arc::new(InMemoryRelations::new().with_mappings(self.mappings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
metrics:
  - { id: 1, name: pageviews, dataset: web }
datasets:
  - { name: web, dimensions: [country] }
points:
  - metric_id: 1
    rows:
      - { time: 100, value: 80.0, dimensions: { country: US } }
"#;

    #[test]
    fn test_load_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let fixture = Fixture::from_file(&path).unwrap();
        assert_eq!(fixture.metrics.len(), 1);
        assert_eq!(fixture.points[0].rows[0].value, 80.0);
        let _ = fixture.into_collaborators();
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Fixture::from_file(Path::new("/nonexistent/data.yaml")).is_err());
    }
}
