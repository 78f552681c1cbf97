//! The built-in stage library.
//!
//! Each stage is constructed by a factory registered under its kind
//! string; frameworks compose stages purely through configuration.

pub mod analysis;
pub mod anomalies;
pub mod breakdown;
pub mod contribution;
pub mod datasets;
pub mod dimensions;
pub mod events;
pub mod generic;
pub mod mapping;
pub mod timerange;

use std::sync::Arc;

use crate::dag::registry::StageRegistry;
use crate::pipeline::Pipeline;

impl StageRegistry {
    /// A registry with every built-in stage kind registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "time_range",
            Box::new(|cfg, _| Ok(Arc::new(timerange::TimeRangeStage::new(cfg)?) as Arc<dyn Pipeline>)),
        );
        registry.register(
            "metric_dimensions",
            Box::new(|cfg, _| {
                Ok(Arc::new(dimensions::MetricDimensionsStage::new(cfg)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "metric_dataset",
            Box::new(|cfg, c| {
                Ok(Arc::new(datasets::MetricDatasetStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "dataset_metrics",
            Box::new(|cfg, c| {
                Ok(Arc::new(datasets::DatasetMetricsStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "metric_mapping",
            Box::new(|cfg, c| {
                Ok(Arc::new(mapping::MetricMappingStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "events",
            Box::new(|cfg, c| Ok(Arc::new(events::EventsStage::new(cfg, c)?) as Arc<dyn Pipeline>)),
        );
        registry.register(
            "anomaly_events",
            Box::new(|cfg, c| {
                Ok(Arc::new(anomalies::AnomalyEventsStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "metric_analysis",
            Box::new(|cfg, c| {
                Ok(Arc::new(analysis::MetricAnalysisStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "contribution",
            Box::new(|cfg, c| {
                Ok(Arc::new(contribution::ContributionStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "breakdown",
            Box::new(|cfg, c| {
                Ok(Arc::new(breakdown::BreakdownStage::new(cfg, c)?) as Arc<dyn Pipeline>)
            }),
        );
        registry.register(
            "top_k",
            Box::new(|cfg, _| Ok(Arc::new(generic::TopKStage::new(cfg)?) as Arc<dyn Pipeline>)),
        );
        registry.register(
            "normalize",
            Box::new(|cfg, _| Ok(Arc::new(generic::NormalizeStage::new(cfg)?) as Arc<dyn Pipeline>)),
        );
        registry.register(
            "passthrough",
            Box::new(|cfg, _| {
                Ok(Arc::new(generic::PassthroughStage::new(cfg)?) as Arc<dyn Pipeline>)
            }),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = StageRegistry::with_builtins();
        for kind in [
            "time_range",
            "metric_dimensions",
            "metric_dataset",
            "dataset_metrics",
            "metric_mapping",
            "events",
            "anomaly_events",
            "metric_analysis",
            "contribution",
            "breakdown",
            "top_k",
            "normalize",
            "passthrough",
        ] {
            assert!(registry.contains(kind), "missing builtin '{kind}'");
        }
    }
}
