//! The service facade: holds named frameworks built from configuration
//! and runs them against seed entity sets.

use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dag::registry::StageRegistry;
use crate::dag::{Framework, FrameworkResult};
use crate::entity::{Entity, EntityKind, RangeKind};
use crate::error::{ConfigError, Result, StageError};
use crate::fusion::MaxScoreSet;
use crate::pipeline::Collaborators;
use crate::urn;

pub struct RcaEngine {
    frameworks: HashMap<String, Framework>,
}

impl RcaEngine {
    /// Builds every configured framework up front; any structural error
    /// fails engine construction.
    pub fn from_config(
        config: &EngineConfig,
        registry: &StageRegistry,
        collaborators: &Collaborators,
    ) -> std::result::Result<Self, ConfigError> {
        let mut frameworks = HashMap::new();
        for (name, descriptors) in &config.frameworks {
            let mut stages = Vec::with_capacity(descriptors.len());
            for descriptor in descriptors {
                stages.push(registry.build(
                    &descriptor.kind,
                    descriptor.stage_config(),
                    collaborators,
                )?);
            }
            frameworks.insert(
                name.clone(),
                Framework::new(name, stages, config.parallelism)?,
            );
        }
        Ok(Self { frameworks })
    }

    /// Configured framework names, sorted.
    pub fn framework_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.frameworks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn framework(&self, name: &str) -> std::result::Result<&Framework, ConfigError> {
        self.frameworks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFramework {
                name: name.to_string(),
            })
    }

    /// Runs a framework over validated seeds. The derived-range and
    /// analysis stages need the anomalous window, so an Anomaly
    /// TimeRange seed is required here; use [`Self::run_urns`] for raw
    /// invocations.
    pub async fn run(&self, framework: &str, seeds: Vec<Entity>) -> Result<FrameworkResult> {
        let has_anomaly_range = seeds.iter().any(|e| {
            matches!(
                e.kind(),
                EntityKind::TimeRange {
                    kind: RangeKind::Anomaly,
                    ..
                }
            )
        });
        if !has_anomaly_range {
            return Err(StageError::MissingTimeRange {
                kind: RangeKind::Anomaly.as_str().to_string(),
            }
            .into());
        }

        let invocation = Uuid::new_v4();
        info!(%invocation, framework, seeds = seeds.len(), "running framework");
        let result = self.framework(framework)?.run(seeds).await?;
        info!(%invocation, framework, results = result.results.len(), "framework finished");
        Ok(result)
    }

    /// Runs a framework over raw URN seeds, all carrying the given
    /// score, with no seed validation.
    pub async fn run_urns(
        &self,
        framework: &str,
        urns: &[String],
        score: f64,
    ) -> Result<FrameworkResult> {
        let mut seeds = Vec::with_capacity(urns.len());
        for u in urns {
            seeds.push(urn::parse(u, score)?);
        }
        let invocation = Uuid::new_v4();
        info!(%invocation, framework, seeds = seeds.len(), "running framework from URNs");
        Ok(self.framework(framework)?.run(seeds).await?)
    }
}

/// Flattens results plus their `related` provenance edges up to `depth`
/// hops, URN-deduped with max-score merge.
pub fn expand_related(entities: &[Entity], depth: usize) -> Vec<Entity> {
    let mut set = MaxScoreSet::new();
    let mut frontier: Vec<Entity> = entities.to_vec();
    for _ in 0..=depth {
        let mut next = Vec::new();
        for entity in frontier.drain(..) {
            for related in entity.related() {
                next.push(related.as_ref().clone());
            }
            set.insert(entity);
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    set.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{
        DataPoint, DatasetMeta, InMemoryMetadata, InMemoryRelations, InMemorySource, MetricMeta,
    };
    use std::sync::Arc;

    const CONFIG: &str = r#"
parallelism: 2
frameworks:
  metric_rca:
    - output: baseline
      kind: time_range
      inputs: [input]
      properties:
        kind: baseline
        offset_ms: 1000
    - output: dimensions
      kind: metric_dimensions
      inputs: [input]
    - output: contribution
      kind: contribution
      inputs: [input, baseline]
      properties:
        k: 1
"#;

    fn collaborators() -> Collaborators {
        let source = InMemorySource::new().with_points(
            1,
            vec![
                DataPoint {
                    time: 100,
                    value: 80.0,
                    dimensions: [("country".to_string(), "US".to_string())].into_iter().collect(),
                },
                DataPoint {
                    time: 100,
                    value: 20.0,
                    dimensions: [("country".to_string(), "FR".to_string())].into_iter().collect(),
                },
                DataPoint {
                    time: 1100,
                    value: 50.0,
                    dimensions: [("country".to_string(), "US".to_string())].into_iter().collect(),
                },
                DataPoint {
                    time: 1100,
                    value: 50.0,
                    dimensions: [("country".to_string(), "FR".to_string())].into_iter().collect(),
                },
            ],
        );
        let metadata = InMemoryMetadata::new()
            .with_metrics(vec![MetricMeta {
                id: 1,
                name: "pageviews".to_string(),
                dataset: "web".to_string(),
                active: true,
            }])
            .with_datasets(vec![DatasetMeta {
                name: "web".to_string(),
                additive: true,
                dimensions: vec!["country".to_string()],
                granularity_ms: 3_600_000,
            }]);
        Collaborators {
            source: Arc::new(source),
            metadata: Arc::new(metadata),
            relations: Arc::new(InMemoryRelations::new()),
        }
    }

    fn engine() -> RcaEngine {
        let config = EngineConfig::from_yaml(CONFIG).unwrap();
        RcaEngine::from_config(&config, &StageRegistry::with_builtins(), &collaborators()).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_attribution() {
        let seeds = vec![
            Entity::time_range(RangeKind::Anomaly, 1000, 2000, 1.0),
            Entity::metric(1.0, 1),
        ];
        let result = engine().run("metric_rca", seeds).await.unwrap();

        let urns: Vec<String> = result.results.iter().map(|e| e.urn()).collect();
        assert!(urns.contains(&"triage:dimension:country:fr:generated".to_string()));
    }

    #[tokio::test]
    async fn test_run_requires_anomaly_seed() {
        let err = engine()
            .run("metric_rca", vec![Entity::metric(1.0, 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::TriageError::Stage(StageError::MissingTimeRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_urns_skips_validation() {
        let urns = vec![
            "triage:timerange:anomaly:1000:2000".to_string(),
            "triage:metric:1".to_string(),
        ];
        let result = engine().run_urns("metric_rca", &urns, 1.0).await.unwrap();
        assert!(!result.results.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_framework() {
        let seeds = vec![Entity::time_range(RangeKind::Anomaly, 0, 1, 1.0)];
        assert!(engine().run("nope", seeds).await.is_err());
    }

    #[test]
    fn test_expand_related_bounded() {
        let window = Arc::new(Entity::time_range(RangeKind::Anomaly, 0, 100, 1.0));
        let metric = Arc::new(Entity::metric(1.0, 1).with_related(vec![Arc::clone(&window)]));
        let dim = Entity::dimension(0.5, "country", "fr", crate::entity::Provenance::Generated)
            .with_related(vec![Arc::clone(&metric)]);

        let depth_zero = expand_related(std::slice::from_ref(&dim), 0);
        assert_eq!(depth_zero.len(), 1);

        let depth_one = expand_related(std::slice::from_ref(&dim), 1);
        assert_eq!(depth_one.len(), 2);

        let depth_two = expand_related(&[dim], 2);
        assert_eq!(depth_two.len(), 3);
    }
}
