//! Collaborator contracts consumed by the stage library, plus in-memory
//! implementations used by tests and the CLI fixture mode.
//!
//! The traits abstract over the real aggregate/metadata backends for
//! testability; the in-memory implementations compute aggregates and
//! breakdowns from raw fixture rows, honoring the same filter semantics
//! (values for one key are OR'd, `!`-prefixed values are exclusions).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SourceError;

/// A half-open `[start, end)` time window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: i64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Metric metadata record.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricMeta {
    pub id: i64,
    pub name: String,
    pub dataset: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Dataset metadata record.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    #[serde(default = "default_true")]
    pub additive: bool,
    pub dimensions: Vec<String>,
    #[serde(default = "default_granularity")]
    pub granularity_ms: i64,
}

/// Calendar event record (holidays, deployments, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub source: String,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Vec<String>>,
}

/// A previously detected anomaly on a metric.
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyRecord {
    pub id: i64,
    pub metric_id: i64,
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Children of merged anomalies are skipped during retrieval.
    #[serde(default)]
    pub child: bool,
}

/// A saved relationship edge between two URNs.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityMapping {
    pub from_urn: String,
    pub to_urn: String,
    #[serde(default = "default_score")]
    pub score: f64,
    pub mapping_type: String,
}

fn default_true() -> bool {
    true
}

fn default_granularity() -> i64 {
    3_600_000
}

fn default_score() -> f64 {
    1.0
}

/// Aggregate/time-series data source.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    /// Total aggregate of a metric over a window under the given filters.
    async fn aggregate(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
    ) -> Result<f64, SourceError>;

    /// Per-value aggregate of one dimension, descending by value share,
    /// truncated to `limit` rows when `limit > 0`.
    async fn breakdown(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
        dimension: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, SourceError>;

    /// Time series bucketed to `granularity_ms`.
    async fn series(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
        granularity_ms: i64,
    ) -> Result<Vec<(i64, f64)>, SourceError>;
}

/// Metadata lookups for metrics, datasets, events, and anomalies.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn metric(&self, id: i64) -> Result<Option<MetricMeta>, SourceError>;

    async fn metric_by_name(
        &self,
        dataset: &str,
        name: &str,
    ) -> Result<Option<MetricMeta>, SourceError>;

    async fn metrics_of_dataset(&self, dataset: &str) -> Result<Vec<MetricMeta>, SourceError>;

    async fn dataset(&self, name: &str) -> Result<Option<DatasetMeta>, SourceError>;

    async fn events(
        &self,
        source: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<EventRecord>, SourceError>;

    async fn anomalies(
        &self,
        metric_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<AnomalyRecord>, SourceError>;
}

/// Saved URN-to-URN relationship store (legacy mapping stage only).
#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn from_urn(&self, urn: &str) -> Result<Vec<EntityMapping>, SourceError>;

    async fn by_type(&self, mapping_type: &str) -> Result<Vec<EntityMapping>, SourceError>;
}

/// One raw observation of a metric at a point in time, carrying its
/// dimension coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPoint {
    pub time: i64,
    pub value: f64,
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

/// Returns true when a data point's coordinates satisfy a filter list:
/// positive values for one key are OR'd, `!`-prefixed values exclude.
/// Matching is case-insensitive on values.
pub fn matches_filters(dimensions: &BTreeMap<String, String>, filters: &[(String, String)]) -> bool {
    let mut includes: HashMap<&str, Vec<&str>> = HashMap::new();
    for (key, value) in filters {
        if let Some(excluded) = value.strip_prefix('!') {
            let actual = dimensions.get(key).map(String::as_str).unwrap_or("");
            if actual.eq_ignore_ascii_case(excluded) {
                return false;
            }
        } else {
            includes.entry(key.as_str()).or_default().push(value.as_str());
        }
    }
    for (key, values) in includes {
        let actual = dimensions.get(key).map(String::as_str).unwrap_or("");
        if !values.iter().any(|v| actual.eq_ignore_ascii_case(v)) {
            return false;
        }
    }
    true
}

/// In-memory aggregate source computing over raw fixture rows.
#[derive(Debug, Default)]
pub struct InMemorySource {
    points: HashMap<i64, Vec<DataPoint>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_points(mut self, metric_id: i64, points: Vec<DataPoint>) -> Self {
        self.points.entry(metric_id).or_default().extend(points);
        self
    }

    fn rows(&self, metric_id: i64) -> Result<&[DataPoint], SourceError> {
        self.points
            .get(&metric_id)
            .map(Vec::as_slice)
            .ok_or_else(|| SourceError::Fetch {
                message: format!("no data for metric id {metric_id}"),
            })
    }
}

#[async_trait]
impl AggregateSource for InMemorySource {
    async fn aggregate(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
    ) -> Result<f64, SourceError> {
        Ok(self
            .rows(metric_id)?
            .iter()
            .filter(|p| window.contains(p.time) && matches_filters(&p.dimensions, filters))
            .map(|p| p.value)
            .sum())
    }

    async fn breakdown(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
        dimension: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, SourceError> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for p in self
            .rows(metric_id)?
            .iter()
            .filter(|p| window.contains(p.time) && matches_filters(&p.dimensions, filters))
        {
            let value = p
                .dimensions
                .get(dimension)
                .map(|v| v.to_lowercase())
                .unwrap_or_default();
            *totals.entry(value).or_insert(0.0) += p.value;
        }
        let mut rows: Vec<(String, f64)> = totals.into_iter().collect();
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if limit > 0 {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn series(
        &self,
        metric_id: i64,
        window: Window,
        filters: &[(String, String)],
        granularity_ms: i64,
    ) -> Result<Vec<(i64, f64)>, SourceError> {
        let granularity = granularity_ms.max(1);
        let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
        for p in self
            .rows(metric_id)?
            .iter()
            .filter(|p| window.contains(p.time) && matches_filters(&p.dimensions, filters))
        {
            let bucket = p.time - p.time.rem_euclid(granularity);
            *buckets.entry(bucket).or_insert(0.0) += p.value;
        }
        Ok(buckets.into_iter().collect())
    }
}

/// In-memory metadata store.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    metrics: Vec<MetricMeta>,
    datasets: Vec<DatasetMeta>,
    events: Vec<EventRecord>,
    anomalies: Vec<AnomalyRecord>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricMeta>) -> Self {
        self.metrics.extend(metrics);
        self
    }

    pub fn with_datasets(mut self, datasets: Vec<DatasetMeta>) -> Self {
        self.datasets.extend(datasets);
        self
    }

    pub fn with_events(mut self, events: Vec<EventRecord>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn with_anomalies(mut self, anomalies: Vec<AnomalyRecord>) -> Self {
        self.anomalies.extend(anomalies);
        self
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadata {
    async fn metric(&self, id: i64) -> Result<Option<MetricMeta>, SourceError> {
        Ok(self.metrics.iter().find(|m| m.id == id).cloned())
    }

    async fn metric_by_name(
        &self,
        dataset: &str,
        name: &str,
    ) -> Result<Option<MetricMeta>, SourceError> {
        Ok(self
            .metrics
            .iter()
            .find(|m| m.dataset == dataset && m.name == name)
            .cloned())
    }

    async fn metrics_of_dataset(&self, dataset: &str) -> Result<Vec<MetricMeta>, SourceError> {
        Ok(self
            .metrics
            .iter()
            .filter(|m| m.dataset == dataset)
            .cloned()
            .collect())
    }

    async fn dataset(&self, name: &str) -> Result<Option<DatasetMeta>, SourceError> {
        Ok(self.datasets.iter().find(|d| d.name == name).cloned())
    }

    async fn events(
        &self,
        source: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<EventRecord>, SourceError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.source == source && e.start >= start && e.end < end)
            .cloned()
            .collect())
    }

    async fn anomalies(
        &self,
        metric_id: i64,
        start: i64,
        end: i64,
    ) -> Result<Vec<AnomalyRecord>, SourceError> {
        Ok(self
            .anomalies
            .iter()
            .filter(|a| a.metric_id == metric_id && a.start < end && a.end > start)
            .cloned()
            .collect())
    }
}

/// In-memory relationship store.
#[derive(Debug, Default)]
pub struct InMemoryRelations {
    mappings: Vec<EntityMapping>,
}

impl InMemoryRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings(mut self, mappings: Vec<EntityMapping>) -> Self {
        self.mappings.extend(mappings);
        self
    }
}

#[async_trait]
impl RelationStore for InMemoryRelations {
    async fn from_urn(&self, urn: &str) -> Result<Vec<EntityMapping>, SourceError> {
        Ok(self
            .mappings
            .iter()
            .filter(|m| m.from_urn == urn)
            .cloned()
            .collect())
    }

    async fn by_type(&self, mapping_type: &str) -> Result<Vec<EntityMapping>, SourceError> {
        Ok(self
            .mappings
            .iter()
            .filter(|m| m.mapping_type == mapping_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time: i64, value: f64, dims: &[(&str, &str)]) -> DataPoint {
        DataPoint {
            time,
            value,
            dimensions: dims
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn source() -> InMemorySource {
        InMemorySource::new().with_points(
            1,
            vec![
                point(10, 80.0, &[("country", "US"), ("env", "prod")]),
                point(10, 20.0, &[("country", "FR"), ("env", "prod")]),
                point(110, 50.0, &[("country", "US"), ("env", "prod")]),
                point(110, 50.0, &[("country", "FR"), ("env", "prod")]),
            ],
        )
    }

    #[tokio::test]
    async fn test_aggregate_sums_window() {
        let s = source();
        let total = s.aggregate(1, Window::new(0, 100), &[]).await.unwrap();
        assert_eq!(total, 100.0);
    }

    #[tokio::test]
    async fn test_aggregate_negation_filter() {
        let s = source();
        let filters = vec![("country".to_string(), "!fr".to_string())];
        let total = s.aggregate(1, Window::new(0, 200), &filters).await.unwrap();
        assert_eq!(total, 130.0);
    }

    #[tokio::test]
    async fn test_breakdown_groups_and_sorts() {
        let s = source();
        let rows = s
            .breakdown(1, Window::new(0, 100), &[], "country", 0)
            .await
            .unwrap();
        assert_eq!(rows, vec![("us".to_string(), 80.0), ("fr".to_string(), 20.0)]);
    }

    #[tokio::test]
    async fn test_unknown_metric_is_fetch_error() {
        let s = source();
        assert!(s.aggregate(99, Window::new(0, 100), &[]).await.is_err());
    }

    #[test]
    fn test_matches_filters_or_within_key() {
        let dims: BTreeMap<String, String> =
            [("country".to_string(), "US".to_string())].into_iter().collect();
        let filters = vec![
            ("country".to_string(), "us".to_string()),
            ("country".to_string(), "fr".to_string()),
        ];
        assert!(matches_filters(&dims, &filters));
        assert!(!matches_filters(&dims, &[("country".to_string(), "de".to_string())]));
    }
}
