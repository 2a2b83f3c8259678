// Release asset download fetcher
// This file queries a GitHub style releases listing and reports the download
// count of every matching asset, labeled by patterns applied to the asset name
//
// Numan Thabit 2025 Nov

use super::{FetchSample, LabelExtractor};
use crate::counter::LabelKeyedCounter;
use crate::errors::ExporterError;
use crate::transport::JsonHttp;
use regex::Regex;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ReleaseResp {
    #[serde(default)]
    assets: Vec<AssetResp>,
}

#[derive(Debug, Deserialize)]
struct AssetResp {
    name: String,
    download_count: u64,
}

#[derive(Debug)]
pub struct ReleaseAssetFetcher {
    name: String,
    owner: String,
    repo: String,
    api_url: Url,
    assets_filter: Option<Regex>,
    labels: LabelExtractor,
    counter: LabelKeyedCounter,
    http: JsonHttp,
}

impl ReleaseAssetFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_url: Url,
        assets_filter: Option<Regex>,
        labels: LabelExtractor,
        counter: LabelKeyedCounter,
        http: JsonHttp,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            repo: repo.into(),
            api_url,
            assets_filter,
            labels,
            counter,
            http,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.api_url.as_str().trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    /// Set each matching asset's count from the listing.
    ///
    /// Label combinations that disappear upstream keep their last value.
    pub async fn fetch_count(&mut self) -> Result<Vec<FetchSample>, ExporterError> {
        let releases: Vec<ReleaseResp> = self.http.get_json(&self.endpoint(), "github").await?;

        for asset in releases.iter().flat_map(|r| r.assets.iter()) {
            let selected = self
                .assets_filter
                .as_ref()
                .map_or(true, |filter| filter.is_match(&asset.name));
            if selected {
                let labels = self.labels.extract(&asset.name);
                self.counter.set(labels, asset.download_count);
            }
        }

        Ok(self.counter.results().iter().map(FetchSample::from).collect())
    }
}
