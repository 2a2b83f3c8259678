// Container registry pull-count fetcher
// This file queries a Docker Hub style repository endpoint and reports its
// total pull count as a single unlabeled sample
//
// Numan Thabit 2025 Nov

use super::FetchSample;
use crate::errors::ExporterError;
use crate::transport::JsonHttp;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://hub.docker.com";

#[derive(Debug, Deserialize)]
struct RepositoryResp {
    pull_count: u64,
}

#[derive(Debug)]
pub struct RegistryPullFetcher {
    name: String,
    owner: String,
    repo: String,
    api_url: Url,
    http: JsonHttp,
}

impl RegistryPullFetcher {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_url: Url,
        http: JsonHttp,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            repo: repo.into(),
            api_url,
            http,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v2/namespaces/{}/repositories/{}",
            self.api_url.as_str().trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    pub async fn fetch_count(&mut self) -> Result<Vec<FetchSample>, ExporterError> {
        let resp: RepositoryResp = self
            .http
            .get_json(&self.endpoint(), "dockerhub")
            .await?;
        Ok(vec![FetchSample::unlabeled(resp.pull_count)])
    }
}
