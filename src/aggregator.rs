// Collection cycle aggregator
// This file builds the configured fetchers and drives one concurrent
// collection cycle across them with a per-fetcher timeout
//
// Numan Thabit 2025 Nov

use crate::config::Config;
use crate::counter::LabelKeyedCounter;
use crate::errors::ExporterError;
use crate::fetchers::{
    registry, releases, AccessLogTailFetcher, FetchSample, Fetcher, LabelExtractor,
    RegistryPullFetcher, ReleaseAssetFetcher,
};
use crate::metrics::FETCH_ERRORS;
use crate::transport::JsonHttp;
use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of one fetcher within a collection cycle.
#[derive(Debug)]
pub struct FetchReport {
    pub name: String,
    pub outcome: FetchOutcome,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        samples: Vec<FetchSample>,
        /// Time from the start of the cycle until this fetcher finished
        elapsed: Duration,
    },
    Failure(ExporterError),
}

impl FetchReport {
    pub fn is_up(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success { .. })
    }

    pub fn samples(&self) -> &[FetchSample] {
        match &self.outcome {
            FetchOutcome::Success { samples, .. } => samples,
            FetchOutcome::Failure(_) => &[],
        }
    }
}

struct FetcherSlot {
    name: String,
    fetcher: Mutex<Fetcher>,
}

pub struct Aggregator {
    labels: Vec<String>,
    fetchers: Vec<Arc<FetcherSlot>>,
    fetch_timeout: Duration,
}

impl Aggregator {
    pub fn new(labels: Vec<String>, fetchers: Vec<Fetcher>, fetch_timeout: Duration) -> Self {
        let fetchers = fetchers
            .into_iter()
            .map(|fetcher| {
                Arc::new(FetcherSlot {
                    name: fetcher.name().to_string(),
                    fetcher: Mutex::new(fetcher),
                })
            })
            .collect();
        Self {
            labels,
            fetchers,
            fetch_timeout,
        }
    }

    /// Validate `cfg` and build every fetcher it declares.
    pub fn from_config(cfg: &Config, fetch_timeout: Duration) -> Result<Self, ExporterError> {
        cfg.validate_labels()?;
        let http = JsonHttp::new(fetch_timeout)?;
        let mut fetchers: Vec<Fetcher> = Vec::new();

        for c in &cfg.fetchers.dockerhub_pulls {
            require(&c.name, "docker hub name")?;
            require(&c.owner, "docker hub owner")?;
            require(&c.repo, "docker hub repo")?;

            fetchers.push(
                RegistryPullFetcher::new(
                    &c.name,
                    &c.owner,
                    &c.repo,
                    api_url(c.api_url.as_ref(), registry::DEFAULT_API_URL)?,
                    http.clone(),
                )
                .into(),
            );
        }

        for c in &cfg.fetchers.github_releases {
            require(&c.name, "github releases name")?;
            require(&c.owner, "github releases owner")?;
            require(&c.repo, "github releases repo")?;

            let assets_filter = match c.assets_regexp.as_deref() {
                Some(pattern) if !pattern.is_empty() => {
                    Some(compile(pattern, &format!("{} assets_regexp", c.name))?)
                }
                _ => None,
            };
            let labels = LabelExtractor::compile(&c.name, c.labels.iter())?;
            warn_undeclared(&c.name, &labels, &cfg.labels);

            fetchers.push(
                ReleaseAssetFetcher::new(
                    &c.name,
                    &c.owner,
                    &c.repo,
                    api_url(c.api_url.as_ref(), releases::DEFAULT_API_URL)?,
                    assets_filter,
                    labels,
                    LabelKeyedCounter::new(cfg.labels.clone()),
                    http.clone(),
                )
                .into(),
            );
        }

        for c in &cfg.fetchers.nginx_access_log {
            require(&c.name, "nginx access log name")?;
            if c.access_log_path.as_os_str().is_empty() {
                return Err(ExporterError::Config(
                    "nginx access log path cannot be empty".to_string(),
                ));
            }
            require(&c.access_log_regexp, "nginx access log regexp")?;

            let line_pattern = compile(&c.access_log_regexp, &format!("{} access_log_regexp", c.name))?;
            let labels = LabelExtractor::compile(&c.name, c.labels.iter())?;
            warn_undeclared(&c.name, &labels, &cfg.labels);

            fetchers.push(
                AccessLogTailFetcher::new(
                    &c.name,
                    &c.access_log_path,
                    line_pattern,
                    labels,
                    LabelKeyedCounter::new(cfg.labels.clone()),
                )
                .into(),
            );
        }

        if fetchers.is_empty() {
            return Err(ExporterError::Config("no fetchers configured".to_string()));
        }

        let mut names = HashSet::new();
        for fetcher in &fetchers {
            if !names.insert(fetcher.name()) {
                return Err(ExporterError::Config(format!(
                    "duplicate fetcher name: {}",
                    fetcher.name()
                )));
            }
            info!(name = %fetcher.name(), kind = fetcher.kind(), "fetcher configured");
        }

        Ok(Self::new(cfg.labels.clone(), fetchers, fetch_timeout))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn fetcher_names(&self) -> impl Iterator<Item = &str> {
        self.fetchers.iter().map(|slot| slot.name.as_str())
    }

    /// Run every fetcher concurrently and wait for all of them.
    ///
    /// Reports come back in configuration order. A failed, timed out or
    /// panicked fetcher yields a `Failure` without affecting the others.
    pub async fn collect(&self) -> Vec<FetchReport> {
        let scrape_start = Instant::now();
        let timeout = self.fetch_timeout;

        let handles: Vec<_> = self
            .fetchers
            .iter()
            .map(|slot| {
                let slot = Arc::clone(slot);
                tokio::spawn(async move {
                    let fetched = tokio::time::timeout(timeout, async {
                        let mut fetcher = slot.fetcher.lock().await;
                        fetcher.fetch_count().await
                    })
                    .await;

                    match fetched {
                        Ok(Ok(samples)) => FetchOutcome::Success {
                            samples,
                            elapsed: scrape_start.elapsed(),
                        },
                        Ok(Err(err)) => FetchOutcome::Failure(err),
                        Err(_) => FetchOutcome::Failure(ExporterError::Timeout(timeout)),
                    }
                })
            })
            .collect();

        let joined = join_all(handles).await;

        self.fetchers
            .iter()
            .zip(joined)
            .map(|(slot, joined)| {
                let outcome = joined
                    .unwrap_or_else(|e| FetchOutcome::Failure(ExporterError::Task(e.to_string())));
                let report = FetchReport {
                    name: slot.name.clone(),
                    outcome,
                };
                log_report(&report);
                report
            })
            .collect()
    }
}

fn log_report(report: &FetchReport) {
    match &report.outcome {
        FetchOutcome::Success { samples, elapsed } => {
            for sample in samples {
                debug!(
                    name = %report.name,
                    labels = ?sample.labels,
                    count = sample.count,
                    scrape_duration = ?elapsed,
                    "fetched new metric"
                );
            }
        }
        FetchOutcome::Failure(err) => {
            FETCH_ERRORS
                .with_label_values(&[report.name.as_str(), err.kind()])
                .inc();
            warn!(
                name = %report.name,
                kind = err.kind(),
                error = %err,
                "failed to fetch metric"
            );
        }
    }
}

fn require(value: &str, what: &str) -> Result<(), ExporterError> {
    if value.is_empty() {
        return Err(ExporterError::Config(format!("{what} cannot be empty")));
    }
    Ok(())
}

fn compile(pattern: &str, field: &str) -> Result<Regex, ExporterError> {
    Regex::new(pattern).map_err(|source| ExporterError::Pattern {
        field: field.to_string(),
        source,
    })
}

fn api_url(configured: Option<&Url>, default: &str) -> Result<Url, ExporterError> {
    match configured {
        Some(url) => Ok(url.clone()),
        None => Url::parse(default).map_err(|e| ExporterError::Config(format!("{default}: {e}"))),
    }
}

fn warn_undeclared(fetcher: &str, labels: &LabelExtractor, declared: &[String]) {
    for label in labels.label_names() {
        if !declared.iter().any(|d| d == label) {
            warn!(
                name = %fetcher,
                label = %label,
                "label pattern is not in the declared labels and will not be exported"
            );
        }
    }
}
