//! Collection of sampled answers and their scores for prompt optimization.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Map;
use time::OffsetDateTime;

use crate::{
	RagService, Result,
	metrics::{MetricKind, MetricResult},
	telemetry::Trace,
};
use medrag_providers::opik::DatasetItem;

/// Quality bar for metrics without a dedicated one.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

const STATS_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetStats {
	pub total_items: usize,
	pub metrics: BTreeMap<String, MetricStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
	pub count: usize,
	pub average: f64,
	pub highest: f64,
	pub lowest: f64,
	pub threshold: f64,
	pub items_above_threshold: usize,
}

pub fn threshold(metric: &str) -> f64 {
	match MetricKind::parse(metric) {
		Some(MetricKind::Usefulness) => 0.8,
		Some(MetricKind::AnswerRelevance) => 0.9,
		Some(MetricKind::Hallucination) => 0.1,
		Some(MetricKind::Moderation) => 0.7,
		Some(MetricKind::Contains) | None => DEFAULT_THRESHOLD,
	}
}

/// Hallucination passes at or below its threshold; every other metric at or above.
pub fn meets_threshold(metric: &str, score: f64) -> bool {
	let bar = threshold(metric);

	if MetricKind::parse(metric).is_some_and(MetricKind::lower_is_better) {
		score <= bar
	} else {
		score >= bar
	}
}

pub fn dataset_stats(items: &[DatasetItem]) -> DatasetStats {
	let mut scores: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

	for item in items {
		for (name, value) in &item.metrics {
			scores.entry(name.as_str()).or_default().push(*value);
		}
	}

	let metrics = scores
		.into_iter()
		.map(|(name, values)| {
			let stats = MetricStats {
				count: values.len(),
				average: values.iter().sum::<f64>() / values.len() as f64,
				highest: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
				lowest: values.iter().copied().fold(f64::INFINITY, f64::min),
				threshold: threshold(name),
				items_above_threshold: values
					.iter()
					.filter(|value| meets_threshold(name, **value))
					.count(),
			};

			(name.to_string(), stats)
		})
		.collect();

	DatasetStats { total_items: items.len(), metrics }
}

impl RagService {
	/// Stores one scored answer in the optimization dataset. Delivery failures are logged and
	/// dropped.
	pub(crate) async fn collect_for_optimization(
		&self,
		trace: &Trace,
		question: &str,
		answer: &str,
		metrics: &[MetricResult],
	) {
		let dataset = &self.cfg.observability.optimization_dataset;
		let passing: Vec<&str> = metrics
			.iter()
			.filter(|metric| meets_threshold(metric.name, metric.value))
			.map(|metric| metric.name)
			.collect();

		if !passing.is_empty() {
			tracing::info!(metrics = ?passing, "High-quality metrics found.");
		}

		let mut metadata = Map::new();

		metadata.insert("dataset_name".to_string(), dataset.as_str().into());
		metadata.insert("trace_id".to_string(), trace.id().to_string().into());

		let item = DatasetItem {
			input: question.to_string(),
			output: answer.to_string(),
			metrics: metrics.iter().map(|metric| (metric.name.to_string(), metric.value)).collect(),
			timestamp: OffsetDateTime::now_utc(),
			metadata,
		};

		if let Err(err) =
			self.telemetry.record_dataset_items(dataset, std::slice::from_ref(&item)).await
		{
			tracing::warn!(error = %err, dataset = %dataset, "Optimization dataset insert failed.");
		}
	}

	/// Per-metric statistics over the optimization dataset. Empty when tracking is disabled.
	pub async fn optimization_stats(&self) -> Result<DatasetStats> {
		let obs = &self.cfg.observability;

		if !obs.tracking_enabled {
			return Ok(DatasetStats::default());
		}

		let items = self.telemetry.dataset_items(&obs.optimization_dataset, STATS_PAGE_SIZE).await?;

		Ok(dataset_stats(&items))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn item(metrics: &[(&str, f64)]) -> DatasetItem {
		DatasetItem {
			input: "How many patients?".to_string(),
			output: "One.".to_string(),
			metrics: metrics.iter().map(|(name, value)| (name.to_string(), *value)).collect(),
			timestamp: OffsetDateTime::UNIX_EPOCH,
			metadata: Map::new(),
		}
	}

	#[test]
	fn hallucination_threshold_is_an_upper_bound() {
		assert!(meets_threshold("hallucination", 0.05));
		assert!(!meets_threshold("hallucination", 0.6));
		assert!(meets_threshold("answer_relevance", 0.95));
		assert!(!meets_threshold("answer_relevance", 0.85));
		assert!(meets_threshold("custom", DEFAULT_THRESHOLD));
	}

	#[test]
	fn stats_summarize_each_metric() {
		let stats = dataset_stats(&[
			item(&[("usefulness", 0.9), ("hallucination", 0.0)]),
			item(&[("usefulness", 0.5), ("hallucination", 0.4)]),
			item(&[("moderation", 1.0)]),
		]);
		let usefulness = &stats.metrics["usefulness"];
		let hallucination = &stats.metrics["hallucination"];

		assert_eq!(stats.total_items, 3);
		assert_eq!(usefulness.count, 2);
		assert!((usefulness.average - 0.7).abs() < 1e-12);
		assert_eq!(usefulness.highest, 0.9);
		assert_eq!(usefulness.lowest, 0.5);
		assert_eq!(usefulness.items_above_threshold, 1);
		assert_eq!(hallucination.items_above_threshold, 1);
		assert_eq!(stats.metrics["moderation"].count, 1);
	}

	#[test]
	fn empty_dataset_has_no_metrics() {
		assert_eq!(dataset_stats(&[]), DatasetStats::default());
	}
}
