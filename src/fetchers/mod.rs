// Fetchers module
// This file defines the closed set of download-count sources polled by the
// aggregator and the label extraction shared between them
//
// Numan Thabit 2025 Nov

pub mod access_log;
pub mod registry;
pub mod releases;

pub use access_log::AccessLogTailFetcher;
pub use registry::RegistryPullFetcher;
pub use releases::ReleaseAssetFetcher;

use crate::counter::{CounterEntry, LabelSet, UNKNOWN_LABEL_VALUE};
use crate::errors::ExporterError;
use regex::Regex;

/// One labeled count produced by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSample {
    pub count: u64,
    pub labels: LabelSet,
}

impl FetchSample {
    pub fn unlabeled(count: u64) -> Self {
        Self {
            count,
            labels: LabelSet::new(),
        }
    }

    /// Values for `label_names` in order, `unknown` where absent.
    pub fn label_values(&self, label_names: &[String]) -> Vec<String> {
        label_names
            .iter()
            .map(|name| {
                self.labels
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_LABEL_VALUE.to_string())
            })
            .collect()
    }
}

impl From<&CounterEntry> for FetchSample {
    fn from(entry: &CounterEntry) -> Self {
        Self {
            count: entry.count,
            labels: entry.labels.clone(),
        }
    }
}

/// Named patterns whose first capture group becomes a label value.
#[derive(Debug, Clone, Default)]
pub struct LabelExtractor {
    patterns: Vec<(String, Regex)>,
}

impl LabelExtractor {
    pub fn new(patterns: Vec<(String, Regex)>) -> Self {
        Self { patterns }
    }

    /// Compile `label name -> pattern` pairs; every pattern needs a capture group.
    pub fn compile<'a>(
        owner: &str,
        patterns: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, ExporterError> {
        let mut compiled = Vec::new();
        for (label, pattern) in patterns {
            let field = format!("{owner} label {label}");
            let regex = Regex::new(pattern).map_err(|source| ExporterError::Pattern {
                field: field.clone(),
                source,
            })?;
            if regex.captures_len() < 2 {
                return Err(ExporterError::Config(format!(
                    "{field} pattern has no capture group"
                )));
            }
            compiled.push((label.clone(), regex));
        }
        compiled.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self::new(compiled))
    }

    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(name, _)| name.as_str())
    }

    /// Labels found in `text`; a label whose pattern does not match is omitted.
    pub fn extract(&self, text: &str) -> LabelSet {
        self.patterns
            .iter()
            .filter_map(|(name, regex)| {
                regex
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect()
    }
}

/// A download-count source. Each variant owns its state for the process lifetime.
#[derive(Debug)]
pub enum Fetcher {
    RegistryPulls(RegistryPullFetcher),
    ReleaseAssets(ReleaseAssetFetcher),
    AccessLog(AccessLogTailFetcher),
}

impl Fetcher {
    pub fn name(&self) -> &str {
        match self {
            Self::RegistryPulls(f) => f.name(),
            Self::ReleaseAssets(f) => f.name(),
            Self::AccessLog(f) => f.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegistryPulls(_) => "dockerhub_pulls",
            Self::ReleaseAssets(_) => "github_releases",
            Self::AccessLog(_) => "nginx_access_log",
        }
    }

    /// Fetch the current samples. Callers bound this with a timeout; dropping
    /// the future aborts in-flight I/O.
    pub async fn fetch_count(&mut self) -> Result<Vec<FetchSample>, ExporterError> {
        match self {
            Self::RegistryPulls(f) => f.fetch_count().await,
            Self::ReleaseAssets(f) => f.fetch_count().await,
            Self::AccessLog(f) => f.fetch_count().await,
        }
    }
}

impl From<RegistryPullFetcher> for Fetcher {
    fn from(f: RegistryPullFetcher) -> Self {
        Self::RegistryPulls(f)
    }
}

impl From<ReleaseAssetFetcher> for Fetcher {
    fn from(f: ReleaseAssetFetcher) -> Self {
        Self::ReleaseAssets(f)
    }
}

impl From<AccessLogTailFetcher> for Fetcher {
    fn from(f: AccessLogTailFetcher) -> Self {
        Self::AccessLog(f)
    }
}
