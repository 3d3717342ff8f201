//! HTTP adapter for the hosted sports data provider.
//!
//! The provider exposes a batched fixtures endpoint; one request covers a
//! whole sweep chunk. Validation happens per entry so a single broken record
//! never poisons the rest of the batch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use services_common::FixtureId;

use crate::error::{CollectorError, CollectorResult};
use crate::feed::{FeedSnapshot, FeedStatus, ResultsFeed};

/// Goal counts above this are treated as provider corruption.
const MAX_PLAUSIBLE_GOALS: i64 = 200;

/// Connection settings for the provider API.
#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    /// Base URL, e.g. `https://feed.example.com`.
    pub base_url: String,
    /// Value sent in the `X-Api-Key` header.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Results feed backed by the provider's REST API.
pub struct HttpResultsFeed {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpResultsFeed {
    /// Build a feed client. Fails only if the TLS backend cannot initialise.
    pub fn new(config: HttpFeedConfig) -> CollectorResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl ResultsFeed for HttpResultsFeed {
    async fn fetch_updates(&self, ids: &[FixtureId]) -> CollectorResult<Vec<FeedSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids
            .iter()
            .map(|id| id.as_u64().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(format!("{}/v1/fixtures", self.base_url))
            .query(&[("ids", joined.as_str())])
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::FeedStatus {
                status: status.as_u16(),
            });
        }
        let envelope: FeedEnvelope =
            response
                .json()
                .await
                .map_err(|err| CollectorError::FeedPayload {
                    reason: err.to_string(),
                })?;

        let mut snapshots = Vec::with_capacity(envelope.fixtures.len());
        for value in envelope.fixtures {
            let entry: FeedFixtureEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(%err, "dropping undecodable feed entry");
                    continue;
                }
            };
            match snapshot_from_entry(entry) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => warn!(%err, "dropping malformed feed entry"),
            }
        }
        Ok(snapshots)
    }
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    #[serde(default)]
    fixtures: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FeedFixtureEntry {
    id: u64,
    status: String,
    #[serde(default)]
    goals: Option<FeedGoals>,
    #[serde(default)]
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FeedGoals {
    home: Option<i64>,
    away: Option<i64>,
}

/// Provider short codes reduced to collector phases.
fn parse_status(code: &str) -> Option<FeedStatus> {
    match code {
        "TBD" | "NS" => Some(FeedStatus::Scheduled),
        "1H" | "HT" | "2H" | "ET" | "BT" | "P" | "INT" | "LIVE" => Some(FeedStatus::Live),
        "FT" | "AET" | "PEN" => Some(FeedStatus::Finished),
        "PST" => Some(FeedStatus::Postponed),
        "CANC" | "ABD" => Some(FeedStatus::Cancelled),
        _ => None,
    }
}

fn validated_goals(raw: Option<i64>, fixture_id: FixtureId, field: &'static str) -> CollectorResult<u16> {
    let value = raw.ok_or(CollectorError::MalformedEntry { fixture_id, field })?;
    if !(0..=MAX_PLAUSIBLE_GOALS).contains(&value) {
        return Err(CollectorError::MalformedEntry { fixture_id, field });
    }
    u16::try_from(value).map_err(|_| CollectorError::MalformedEntry { fixture_id, field })
}

fn snapshot_from_entry(entry: FeedFixtureEntry) -> CollectorResult<FeedSnapshot> {
    let fixture_id = FixtureId::new(entry.id);
    let status = parse_status(&entry.status).ok_or(CollectorError::MalformedEntry {
        fixture_id,
        field: "status",
    })?;

    // Only final scores are ever stored; in-play goals are ignored.
    let score = if status == FeedStatus::Finished {
        let goals = entry.goals.ok_or(CollectorError::MalformedEntry {
            fixture_id,
            field: "goals",
        })?;
        let home = validated_goals(goals.home, fixture_id, "goals.home")?;
        let away = validated_goals(goals.away, fixture_id, "goals.away")?;
        Some((home, away))
    } else {
        None
    };

    Ok(FeedSnapshot {
        fixture_id,
        status,
        score,
        finished_at: entry.finished_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn feed_for(server: &MockServer) -> HttpResultsFeed {
        HttpResultsFeed::new(HttpFeedConfig {
            base_url: server.uri(),
            api_key: "k-test".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_and_validates_a_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/fixtures"))
            .and(query_param("ids", "7,8"))
            .and(header("X-Api-Key", "k-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fixtures": [
                    {"id": 7, "status": "FT", "goals": {"home": 2, "away": 1},
                     "finished_at": "2025-06-01T14:00:00Z"},
                    {"id": 8, "status": "NS"}
                ]
            })))
            .mount(&server)
            .await;

        let feed = feed_for(&server);
        let got = feed
            .fetch_updates(&[FixtureId::new(7), FixtureId::new(8)])
            .await
            .unwrap();

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].fixture_id, FixtureId::new(7));
        assert_eq!(got[0].status, FeedStatus::Finished);
        assert_eq!(got[0].score, Some((2, 1)));
        assert!(got[0].finished_at.is_some());
        assert_eq!(got[1].status, FeedStatus::Scheduled);
        assert_eq!(got[1].score, None);
    }

    #[tokio::test]
    async fn drops_entries_that_fail_validation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/fixtures"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fixtures": [
                    {"id": 1, "status": "FT", "goals": {"home": null, "away": 1}},
                    {"id": 2, "status": "FT", "goals": {"home": 3, "away": -1}},
                    {"id": 3, "status": "FT"},
                    {"id": 4, "status": "HALFTIME_MAYBE"},
                    {"id": "not-a-number", "status": "FT"},
                    {"id": 5, "status": "2H"}
                ]
            })))
            .mount(&server)
            .await;

        let feed = feed_for(&server);
        let ids: Vec<FixtureId> = (1..=5).map(FixtureId::new).collect();
        let got = feed.fetch_updates(&ids).await.unwrap();

        assert_eq!(got.len(), 1);
        assert_eq!(got[0].fixture_id, FixtureId::new(5));
        assert_eq!(got[0].status, FeedStatus::Live);
    }

    #[tokio::test]
    async fn surfaces_provider_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/fixtures"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = feed_for(&server);
        let err = feed.fetch_updates(&[FixtureId::new(1)]).await.unwrap_err();
        assert!(matches!(err, CollectorError::FeedStatus { status: 503 }));
    }

    #[tokio::test]
    async fn empty_request_skips_the_network() {
        // No mock mounted: any request would 404 and error.
        let server = MockServer::start().await;
        let feed = feed_for(&server);
        let got = feed.fetch_updates(&[]).await.unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn postponed_and_cancelled_codes_reduce_to_cancelled() {
        assert_eq!(parse_status("PST"), Some(FeedStatus::Postponed));
        assert_eq!(parse_status("CANC"), Some(FeedStatus::Cancelled));
        assert_eq!(parse_status("ABD"), Some(FeedStatus::Cancelled));
        assert_eq!(parse_status("FT"), Some(FeedStatus::Finished));
        assert_eq!(parse_status(""), None);
    }
}
