// Metrics and observability module
// This file renders collection cycle reports into the Prometheus text format
// and holds the exporter's own upstream latency and failure counters
//
// Numan Thabit 2025 Nov

use crate::aggregator::{FetchOutcome, FetchReport};
use crate::errors::ExporterError;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec, HistogramVec,
    IntCounterVec, Opts, Registry, TextEncoder,
};

pub const NAMESPACE: &str = "package_downloads";

/// Content type of the rendered exposition text.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

pub static UPSTREAM_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "downloads_exporter_upstream_request_seconds",
        "latency for upstream download-count API calls",
        &["source"]
    )
    .unwrap()
});

pub static FETCH_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "downloads_exporter_fetch_errors_total",
        "failed fetches by fetcher and failure kind",
        &["name", "kind"]
    )
    .unwrap()
});

/// Render one collection cycle plus the process-wide self metrics.
///
/// A fresh registry is built per call so fetchers that failed this cycle
/// contribute only `up = 0`.
pub fn render(label_names: &[String], reports: &[FetchReport]) -> Result<String, ExporterError> {
    let registry = Registry::new();

    let up = GaugeVec::new(
        Opts::new("up", "Was the last downloads count fetch successful.").namespace(NAMESPACE),
        &["name"],
    )?;

    let mut count_labels = vec!["name"];
    count_labels.extend(label_names.iter().map(String::as_str));
    let count = IntCounterVec::new(
        Opts::new("count", "How many times item was downloaded.").namespace(NAMESPACE),
        &count_labels,
    )?;

    let scrape_duration = GaugeVec::new(
        Opts::new(
            "scrape_duration_seconds",
            "How many seconds it took to fetch downloads count.",
        )
        .namespace(NAMESPACE),
        &["name"],
    )?;

    registry.register(Box::new(up.clone()))?;
    registry.register(Box::new(count.clone()))?;
    registry.register(Box::new(scrape_duration.clone()))?;

    for report in reports {
        let name = report.name.as_str();
        match &report.outcome {
            FetchOutcome::Success { samples, elapsed } => {
                up.get_metric_with_label_values(&[name])?.set(1.0);
                // millisecond resolution
                scrape_duration
                    .get_metric_with_label_values(&[name])?
                    .set(elapsed.as_millis() as f64 / 1000.0);

                for sample in samples {
                    let mut values = vec![name.to_string()];
                    values.extend(sample.label_values(label_names));
                    let values: Vec<&str> = values.iter().map(String::as_str).collect();
                    count
                        .get_metric_with_label_values(&values)?
                        .inc_by(sample.count);
                }
            }
            FetchOutcome::Failure(_) => {
                up.get_metric_with_label_values(&[name])?.set(0.0);
            }
        }
    }

    let mut families = registry.gather();
    families.extend(prometheus::gather());

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ExporterError::Decode(format!("metrics text: {e}")))
}
