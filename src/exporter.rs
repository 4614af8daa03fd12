// Exporter
// Renders aggregated counts as gauge samples in the Prometheus text
// exposition format. A fresh registry per call: no process-wide metric state.

use prometheus::{IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::aggregator::Aggregates;

/// Media type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub const METRIC_NAME: &str = "api_transactions";
pub const METRIC_HELP: &str = "Number of API transactions per API and status over the trailing window";
pub const LABEL_NAMES: [&str; 2] = ["api", "status"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid metric definition: {0}")]
    InvalidMetric(#[from] prometheus::Error),

    #[error("count {count} for {api}/{status} does not fit a gauge sample")]
    ValueOutOfRange { api: String, status: String, count: u64 },
}

/// Render `samples` as one labeled gauge sample per key.
///
/// Label values are escaped by the encoder; samples come out sorted by label
/// values so the output is byte-stable for a given mapping.
pub fn render(
    metric_name: &str,
    help: &str,
    label_names: [&str; 2],
    samples: &Aggregates,
) -> Result<String, ExportError> {
    let registry = Registry::new();
    let gauge = IntGaugeVec::new(Opts::new(metric_name, help), &label_names)?;
    registry.register(Box::new(gauge.clone()))?;

    for (key, count) in samples.iter() {
        let value = i64::try_from(*count).map_err(|_| ExportError::ValueOutOfRange {
            api: key.api.clone(),
            status: key.status.clone(),
            count: *count,
        })?;
        gauge.with_label_values(&key.label_values()).set(value);
    }

    // The registry prunes families without samples; keep the header anyway
    if samples.is_empty() {
        return Ok(header(metric_name, help));
    }

    let families = registry.gather();
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&families, &mut buffer)?;
    Ok(buffer)
}

/// [`render`] with the `api_transactions` metric definition
pub fn render_api_transactions(samples: &Aggregates) -> Result<String, ExportError> {
    render(METRIC_NAME, METRIC_HELP, LABEL_NAMES, samples)
}

fn header(metric_name: &str, help: &str) -> String {
    format!(
        "# HELP {} {}\n# TYPE {} gauge\n",
        metric_name,
        escape_help(help),
        metric_name
    )
}

// HELP text escapes backslash and newline only; quotes stay literal
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
