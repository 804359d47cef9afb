//! HTTP client for communicating with progressd.

use anyhow::{anyhow, Context, Result};
use progress_shared::api::{AchievementEntry, ProgressRequest};
use progress_shared::challenges::ChallengeInstance;
use progress_shared::{
    ActivityOutcome, ActivityReport, AwardOutcome, AwardRequest, ClaimOutcome, HealthResponse,
    LedgerSummary, ProgressionSnapshot, SyncReport, XpTransaction,
};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default daemon URL when neither `--url` nor `$PROGRESSD_URL` is set
pub const DEFAULT_URL: &str = "http://127.0.0.1:7870";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for communicating with progressd
pub struct ProgressClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProgressClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and decode the JSON body, turning HTTP errors into messages
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            anyhow!(
                "Cannot reach progressd at {}: {}\n\n\
                 Is the daemon running? Start it with:\n\
                 progressd\n\n\
                 Or point progressctl elsewhere with --url or ${}.",
                self.base_url,
                e,
                progress_shared::URL_ENV
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => anyhow!("Not found: {}", body),
                StatusCode::BAD_REQUEST => anyhow!("Rejected: {}", body),
                StatusCode::NOT_IMPLEMENTED => anyhow!("{}", body),
                _ => anyhow!("progressd returned {}: {}", status, body),
            });
        }

        response
            .json::<T>()
            .await
            .context("Failed to decode progressd response")
    }

    /// Get daemon health
    pub async fn health(&self) -> Result<HealthResponse> {
        self.send(self.http.get(self.url("/v1/health"))).await
    }

    pub async fn open_session(&self, user: &str) -> Result<ProgressionSnapshot> {
        self.send(self.http.post(self.url(&format!("/v1/sessions/{}", user))))
            .await
    }

    /// Report an activity; the daemon derives every award from it
    pub async fn report(&self, report: &ActivityReport) -> Result<ActivityOutcome> {
        self.send(self.http.post(self.url("/v1/activity")).json(report))
            .await
    }

    pub async fn award(&self, user: &str, request: &AwardRequest) -> Result<AwardOutcome> {
        let url = self.url(&format!("/v1/users/{}/awards", user));
        self.send(self.http.post(url).json(request)).await
    }

    pub async fn snapshot(&self, user: &str) -> Result<ProgressionSnapshot> {
        self.send(self.http.get(self.url(&format!("/v1/users/{}/snapshot", user))))
            .await
    }

    pub async fn transactions(&self, user: &str, limit: usize) -> Result<Vec<XpTransaction>> {
        let url = self.url(&format!("/v1/users/{}/transactions", user));
        self.send(self.http.get(url).query(&[("limit", limit)]))
            .await
    }

    pub async fn summary(&self, user: &str) -> Result<LedgerSummary> {
        self.send(self.http.get(self.url(&format!("/v1/users/{}/summary", user))))
            .await
    }

    pub async fn challenges(&self, user: &str) -> Result<Vec<ChallengeInstance>> {
        self.send(self.http.get(self.url(&format!("/v1/users/{}/challenges", user))))
            .await
    }

    pub async fn refresh_challenges(&self, user: &str) -> Result<Vec<ChallengeInstance>> {
        let url = self.url(&format!("/v1/users/{}/challenges/refresh", user));
        self.send(self.http.post(url)).await
    }

    pub async fn progress_challenge(
        &self,
        user: &str,
        id: &str,
        delta: i64,
    ) -> Result<ChallengeInstance> {
        let url = self.url(&format!("/v1/users/{}/challenges/{}/progress", user, id));
        self.send(self.http.post(url).json(&ProgressRequest { delta }))
            .await
    }

    pub async fn claim_challenge(&self, user: &str, id: &str) -> Result<ClaimOutcome> {
        let url = self.url(&format!("/v1/users/{}/challenges/{}/claim", user, id));
        self.send(self.http.post(url)).await
    }

    pub async fn achievements(&self, user: &str) -> Result<Vec<AchievementEntry>> {
        self.send(self.http.get(self.url(&format!("/v1/users/{}/achievements", user))))
            .await
    }

    pub async fn claim_achievement(&self, user: &str, id: &str) -> Result<ClaimOutcome> {
        let url = self.url(&format!("/v1/users/{}/achievements/{}/claim", user, id));
        self.send(self.http.post(url)).await
    }

    /// Force a push/fetch/reconcile pass for one user
    pub async fn sync(&self, user: &str) -> Result<SyncReport> {
        self.send(self.http.post(self.url(&format!("/v1/users/{}/sync", user))))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = ProgressClient::new("http://localhost:7870/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:7870");
        assert_eq!(client.url("/v1/health"), "http://localhost:7870/v1/health");
    }
}
