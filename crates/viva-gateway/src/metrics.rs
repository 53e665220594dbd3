//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use viva_agent::SessionReport;

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a new media-stream connection.
pub fn record_session_start() {
    metrics::gauge!("interview_sessions_active").increment(1.0);
}

/// Record a finished interview and its outcome.
pub fn record_session_end(report: &SessionReport) {
    metrics::gauge!("interview_sessions_active").decrement(1.0);

    let reason = [("reason", report.reason.as_str().to_string())];
    metrics::counter!("interview_sessions_total", &reason).increment(1);
    metrics::histogram!("interview_session_duration_seconds")
        .record(report.duration.as_secs_f64());

    let verdict = [("verdict", report.evaluation.verdict.as_str().to_string())];
    metrics::counter!("interview_evaluations_total", &verdict).increment(1);

    metrics::counter!("interview_turns_total").increment(report.turns);
    metrics::counter!("interview_degraded_turns_total").increment(report.degraded_turns);
    metrics::counter!("audio_decode_errors_total").increment(report.decode_errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use viva_core::types::{CloseReason, EvaluationResult};

    #[test]
    fn test_record_session_does_not_panic() {
        // The metrics facade falls back to a no-op recorder
        record_session_start();
        record_session_end(&SessionReport {
            id: "s1".into(),
            reason: CloseReason::EndSignal,
            duration: Duration::from_secs(90),
            utterances: 3,
            turns: 3,
            degraded_turns: 1,
            decode_errors: 0,
            evaluation: EvaluationResult::error("No candidate speech was transcribed."),
            transcript: Vec::new(),
        });
    }
}
