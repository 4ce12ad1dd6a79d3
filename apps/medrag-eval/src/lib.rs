use std::{
	fs,
	path::{Path, PathBuf},
	time::Instant,
};

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medrag_service::{DatasetStats, QueryRequest, RagService};

const NUMBER_WORDS: [(&str, &str); 11] = [
	("zero", "0"),
	("one", "1"),
	("two", "2"),
	("three", "3"),
	("four", "4"),
	("five", "5"),
	("six", "6"),
	("seven", "7"),
	("eight", "8"),
	("nine", "9"),
	("ten", "10"),
];

#[derive(Debug, Parser)]
#[command(
	version = medrag_cli::VERSION,
	rename_all = "kebab",
	styles = medrag_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	/// Evaluate only the first N questions.
	#[arg(long, value_name = "N")]
	pub limit: Option<usize>,
	/// Write the JSON report here instead of stdout.
	#[arg(long, short = 'o', value_name = "FILE")]
	pub output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct EvalDataset {
	pub name: Option<String>,
	pub cases: Vec<EvalCase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
	pub question: String,
	pub expected_values: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EvalReport {
	pub dataset: String,
	pub summary: EvalSummary,
	pub cases: Vec<CaseReport>,
	/// Optimization dataset statistics, present when tracking is enabled.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub optimization: Option<DatasetStats>,
}

#[derive(Debug, Serialize)]
pub struct EvalSummary {
	pub total: usize,
	pub passed: usize,
	pub pass_rate: f64,
	pub latency_ms_p50: f64,
	pub latency_ms_p95: f64,
}

#[derive(Debug, Serialize)]
pub struct CaseReport {
	pub question: String,
	pub expected_values: Vec<String>,
	pub missing_values: Vec<String>,
	pub passed: bool,
	pub response: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub trace_id: Option<Uuid>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub latency_ms: f64,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = medrag_config::load(&args.config)?;

	medrag_cli::init_tracing(&config.service.log_level);

	let dataset = load_dataset(&args.dataset)?;
	let service = RagService::new(config)?;
	let cases = match args.limit {
		Some(limit) => &dataset.cases[..limit.min(dataset.cases.len())],
		None => dataset.cases.as_slice(),
	};
	let mut reports = Vec::with_capacity(cases.len());

	for (idx, case) in cases.iter().enumerate() {
		let report = eval_case(&service, case).await;

		tracing::info!(
			case = idx + 1,
			total = cases.len(),
			passed = report.passed,
			"Evaluated question."
		);

		reports.push(report);
	}

	let optimization = optimization_stats(&service).await;
	let report = EvalReport {
		dataset: dataset.name.unwrap_or_else(|| args.dataset.display().to_string()),
		summary: summarize(&reports),
		cases: reports,
		optimization,
	};
	let json = serde_json::to_string_pretty(&report)?;

	match args.output {
		Some(path) => {
			fs::write(&path, json)?;

			tracing::info!(path = %path.display(), pass_rate = report.summary.pass_rate, "Report written.");
		},
		None => println!("{json}"),
	}

	Ok(())
}

pub fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;
	let dataset = serde_json::from_str(&raw)?;

	Ok(dataset)
}

/// Spellings accepted for an expected value. Numbers zero to ten match both digits and words.
pub fn number_variants(expected: &str) -> Vec<String> {
	let lower = expected.trim().to_lowercase();
	let paired = NUMBER_WORDS.iter().find_map(|(word, digits)| {
		if lower == *digits {
			Some(word.to_string())
		} else if lower == *word {
			Some(digits.to_string())
		} else {
			None
		}
	});

	match paired {
		Some(other) => vec![lower, other],
		None => vec![lower],
	}
}

/// Expected values with no variant present as a whole word in the lowercased answer.
pub fn missing_values(answer: &str, expected: &[String]) -> Vec<String> {
	let answer = answer.to_lowercase();

	expected
		.iter()
		.filter(|value| !number_variants(value).iter().any(|variant| mentions(&answer, variant)))
		.cloned()
		.collect()
}

/// `variant` appears in `text` with no letter or digit directly on either side.
fn mentions(text: &str, variant: &str) -> bool {
	let pattern = format!(r"(?:^|[^\p{{L}}\p{{N}}]){}(?:$|[^\p{{L}}\p{{N}}])", regex::escape(variant));

	match Regex::new(&pattern) {
		Ok(re) => re.is_match(text),
		Err(err) => {
			tracing::warn!(error = %err, variant, "Invalid match pattern. Using substring match.");

			text.contains(variant)
		},
	}
}

async fn optimization_stats(service: &RagService) -> Option<DatasetStats> {
	if !service.cfg.observability.tracking_enabled {
		return None;
	}

	match service.optimization_stats().await {
		Ok(stats) => Some(stats),
		Err(err) => {
			tracing::warn!(error = %err, "Optimization dataset statistics unavailable.");

			None
		},
	}
}

async fn eval_case(service: &RagService, case: &EvalCase) -> CaseReport {
	let started = Instant::now();
	let result = service.answer_query(QueryRequest { query: case.question.clone() }).await;
	let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

	match result {
		Ok(response) => {
			let missing = missing_values(&response.response, &case.expected_values);

			CaseReport {
				question: case.question.clone(),
				expected_values: case.expected_values.clone(),
				passed: missing.is_empty(),
				missing_values: missing,
				response: Some(response.response),
				trace_id: response.trace_id,
				error: None,
				latency_ms,
			}
		},
		Err(err) => {
			tracing::warn!(error = %err, question = %case.question, "Question failed.");

			CaseReport {
				question: case.question.clone(),
				expected_values: case.expected_values.clone(),
				missing_values: case.expected_values.clone(),
				passed: false,
				response: None,
				trace_id: None,
				error: Some(err.to_string()),
				latency_ms,
			}
		},
	}
}

fn summarize(reports: &[CaseReport]) -> EvalSummary {
	let total = reports.len();
	let passed = reports.iter().filter(|report| report.passed).count();
	let mut latencies: Vec<f64> = reports.iter().map(|report| report.latency_ms).collect();

	latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

	EvalSummary {
		total,
		passed,
		pass_rate: if total == 0 { 0.0 } else { passed as f64 / total as f64 },
		latency_ms_p50: percentile(&latencies, 0.50),
		latency_ms_p95: percentile(&latencies, 0.95),
	}
}

fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let clamped = percentile.clamp(0.0, 1.0);
	let pos = clamped * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;

		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}
