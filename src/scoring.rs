use serde::Serialize;

const SUCCESS_RATE_WEIGHT: f64 = 35.0;
const ERROR_RATE_WEIGHT: f64 = 10.0;
const LATENCY_WEIGHT: f64 = 50.0;
const QPS_WEIGHT: f64 = 5.0;

/// Latency above this many milliseconds scores 0.
const LATENCY_RANGE_MAX: f64 = 1000.0;
/// Latency below this many milliseconds scores 95, not 100, to absorb
/// measurement noise near zero.
const LATENCY_RANGE_MIN: f64 = 0.1;
/// QPS at or above this value scores the full 100 points.
const MAX_QPS: f64 = 100.0;

/// Aggregate metrics consumed by the scoring function.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput {
	pub total_requests: u64,
	pub total_success: u64,
	pub total_errors: u64,
	pub total_io_errors: u64,
	pub queries_per_second: f64,
	pub mean_ms: i64,
	pub std_ms: i64,
	pub p50_ms: i64,
	pub p95_ms: i64,
}

/// Composite quality score and its per-dimension breakdown, each in [0,100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreResult {
	pub total: f64,
	#[serde(rename = "successRate")]
	pub success_rate: f64,
	#[serde(rename = "errorRate")]
	pub error_rate: f64,
	pub latency: f64,
	pub qps: f64,
}

/// Compute the composite score from aggregate benchmark metrics.
///
/// Deterministic: identical inputs always produce identical output. A run
/// with no successful response scores zero on every dimension.
pub fn calculate_score(metrics: ScoreInput) -> ScoreResult {
	if metrics.total_success == 0 {
		return ScoreResult::default();
	}

	let total = metrics.total_requests as f64;
	let success_rate_score = metrics.total_success as f64 / total * 100.0;

	let error_rate = (metrics.total_errors + metrics.total_io_errors) as f64 / total;
	let error_rate_score = (100.0 * (1.0 - error_rate)).clamp(0.0, 100.0);

	// Blend mean and median (integer average of already-rounded ms values)
	// so one long tail cannot dominate the latency dimension.
	let mean_ms = ((metrics.mean_ms + metrics.p50_ms) / 2) as f64;
	let mut latency_score = if mean_ms < LATENCY_RANGE_MIN {
		95.0
	} else if mean_ms > LATENCY_RANGE_MAX {
		0.0
	} else {
		let linear = 100.0 * (1.0 - (mean_ms - LATENCY_RANGE_MIN) / (LATENCY_RANGE_MAX - LATENCY_RANGE_MIN));
		let linear = linear.clamp(0.0, 100.0);
		let std_penalty = metrics.std_ms as f64 / mean_ms * 5.0;
		(linear - std_penalty).max(0.0)
	};
	if metrics.p95_ms as f64 > LATENCY_RANGE_MAX {
		latency_score *= 0.7;
	}

	let qps_score =
		(100.0 * (1.0 + metrics.queries_per_second).ln() / (1.0 + MAX_QPS).ln()).min(100.0);

	let total_score = (success_rate_score * SUCCESS_RATE_WEIGHT
		+ error_rate_score * ERROR_RATE_WEIGHT
		+ latency_score * LATENCY_WEIGHT
		+ qps_score * QPS_WEIGHT)
		/ 100.0;

	ScoreResult {
		total: total_score,
		success_rate: success_rate_score,
		error_rate: error_rate_score,
		latency: latency_score,
		qps: qps_score,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn perfect_input() -> ScoreInput {
		ScoreInput {
			total_requests: 1000,
			total_success: 1000,
			total_errors: 0,
			total_io_errors: 0,
			queries_per_second: 100.0,
			mean_ms: 0,
			std_ms: 0,
			p50_ms: 0,
			p95_ms: 0,
		}
	}

	#[test]
	fn test_no_success_scores_zero() {
		let input = ScoreInput {
			total_requests: 100,
			total_success: 0,
			..ScoreInput::default()
		};
		assert_eq!(calculate_score(input), ScoreResult::default());
	}

	#[test]
	fn test_perfect_run_scores_at_least_95() {
		let score = calculate_score(perfect_input());
		assert_eq!(score.success_rate, 100.0);
		assert_eq!(score.error_rate, 100.0);
		assert_eq!(score.latency, 95.0);
		assert_eq!(score.qps, 100.0);
		assert!(score.total >= 95.0, "total = {}", score.total);
	}

	#[test]
	fn test_deterministic() {
		let input = ScoreInput {
			total_requests: 500,
			total_success: 480,
			total_errors: 10,
			total_io_errors: 10,
			queries_per_second: 42.5,
			mean_ms: 23,
			std_ms: 8,
			p50_ms: 19,
			p95_ms: 50,
		};
		let a = calculate_score(input);
		let b = calculate_score(input);
		assert_eq!(a.total.to_bits(), b.total.to_bits());
		assert_eq!(a.latency.to_bits(), b.latency.to_bits());
	}

	#[test]
	fn test_latency_above_range_scores_zero() {
		let input = ScoreInput {
			mean_ms: 1500,
			p50_ms: 1500,
			..perfect_input()
		};
		let score = calculate_score(input);
		assert_eq!(score.latency, 0.0);
	}

	#[test]
	fn test_high_p95_dampens_latency_score() {
		let base = ScoreInput {
			mean_ms: 100,
			p50_ms: 100,
			..perfect_input()
		};
		let dampened = ScoreInput {
			p95_ms: 1500,
			..base
		};
		let a = calculate_score(base);
		let b = calculate_score(dampened);
		assert!((b.latency - a.latency * 0.7).abs() < 1e-9);
	}

	#[test]
	fn test_std_penalty_floors_at_zero() {
		let input = ScoreInput {
			mean_ms: 900,
			p50_ms: 900,
			std_ms: 100_000,
			..perfect_input()
		};
		let score = calculate_score(input);
		assert_eq!(score.latency, 0.0);
	}

	#[test]
	fn test_qps_log_curve() {
		let slow = calculate_score(ScoreInput {
			queries_per_second: 1.0,
			..perfect_input()
		});
		let fast = calculate_score(ScoreInput {
			queries_per_second: 50.0,
			..perfect_input()
		});
		assert!(slow.qps < fast.qps);
		assert!(fast.qps < 100.0);
		let expected = 100.0 * 51.0_f64.ln() / 101.0_f64.ln();
		assert!((fast.qps - expected).abs() < 1e-9);
	}

	#[test]
	fn test_error_rate_scales() {
		let input = ScoreInput {
			total_requests: 100,
			total_success: 80,
			total_errors: 15,
			total_io_errors: 5,
			..perfect_input()
		};
		let score = calculate_score(input);
		assert_eq!(score.success_rate, 80.0);
		assert_eq!(score.error_rate, 80.0);
	}

	#[test]
	fn test_components_bounded() {
		let input = ScoreInput {
			total_requests: 10,
			total_success: 1,
			total_errors: 9,
			total_io_errors: 0,
			queries_per_second: 100_000.0,
			mean_ms: 5000,
			std_ms: 5000,
			p50_ms: 5000,
			p95_ms: 9000,
		};
		let score = calculate_score(input);
		for v in [
			score.total,
			score.success_rate,
			score.error_rate,
			score.latency,
			score.qps,
		] {
			assert!((0.0..=100.0).contains(&v), "out of range: {v}");
		}
	}
}
