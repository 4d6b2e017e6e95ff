//! Turning job logs into the JSON answered to clients.

use serde::Serialize;
use serde_json::Value;

/// Marker the test runner's JSON report starts with.
const RESULT_MARKER: &str = r#"{"status":"#;

/// A result produced by the orchestrator itself, when the test runner
/// didn't give one.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
    Error,
}

impl RunReport {
    pub fn new(status: RunStatus, message: impl Into<String>) -> RunReport {
        RunReport {
            status,
            message: message.into(),
            raw_output: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> RunReport {
        self.raw_output = Some(output.into());
        self
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Build the response for a job that ended with `success` and `logs`.
///
/// Output the runner prints after its JSON report is deliberately ignored
/// and does not turn the result into an error.
pub fn interpret_job_logs(success: bool, logs: &str) -> Value {
    if !success {
        return RunReport::new(RunStatus::Fail, "Test execution failed")
            .with_output(logs)
            .into_value();
    }

    let start = match logs.find(RESULT_MARKER) {
        Some(start) => start,
        None => {
            return RunReport::new(
                RunStatus::Pass,
                "Tests passed but no structured output found",
            )
            .with_output(logs)
            .into_value()
        }
    };

    // Only the first JSON value counts, anything logged after it is ignored
    let mut values = serde_json::Deserializer::from_str(&logs[start..]).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            tracing::error!("Failed to parse test results: {}", e);
            RunReport::new(
                RunStatus::Error,
                format!("Error parsing test results: {}", e),
            )
            .with_output(logs)
            .into_value()
        }
        None => RunReport::new(RunStatus::Error, "Error parsing test results: no value")
            .with_output(logs)
            .into_value(),
    }
}
