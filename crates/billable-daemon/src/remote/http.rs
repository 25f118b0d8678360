//! REST client for the remote system of record

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use billable_core::models::{
    NewTimeEntry, RemoteConfig, SessionSnapshot, TimeEntry, TimeEntryFilter, TimerSnapshot,
    WorkSession, WorkSessionFilter,
};

use super::{RemoteError, RemoteStore, Result};

#[derive(Debug, Deserialize)]
struct CreatedBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(alias = "existingEntryId", alias = "existingSessionId", alias = "existing_id")]
    existing_id: String,
}

#[derive(Debug, Serialize)]
struct NewWorkSession {
    start_time: DateTime<Utc>,
}

pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| RemoteError::Unavailable("Remote URL not configured".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.api_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body))
    }
}

/// Map a non-success response to a [`RemoteError`].
fn error_for_status(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::CONFLICT => match serde_json::from_str::<ConflictBody>(body) {
            Ok(conflict) => RemoteError::Conflict {
                existing_id: conflict.existing_id,
            },
            Err(_) => RemoteError::Api {
                status: status.as_u16(),
                message: body.to_string(),
            },
        },
        StatusCode::NOT_FOUND => RemoteError::NotFound(body.to_string()),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            RemoteError::Unavailable(format!("{} {}", status.as_u16(), body))
        }
        _ => RemoteError::Api {
            status: status.as_u16(),
            message: body.to_string(),
        },
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<String> {
        let response = self
            .send(self.request(Method::POST, "time-entries").json(entry))
            .await?;
        let created: CreatedBody = response.json().await?;
        Ok(created.id)
    }

    async fn update_time_entry(&self, entry_id: &str, snapshot: &TimerSnapshot) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("time-entries/{}", entry_id))
                .json(snapshot),
        )
        .await?;
        Ok(())
    }

    async fn delete_time_entry(&self, entry_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("time-entries/{}", entry_id)))
            .await?;
        Ok(())
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>> {
        let response = self
            .send(self.request(Method::GET, "time-entries").query(filter))
            .await?;
        Ok(response.json().await?)
    }

    async fn create_work_session(&self, start_time: DateTime<Utc>) -> Result<String> {
        let response = self
            .send(
                self.request(Method::POST, "work-sessions")
                    .json(&NewWorkSession { start_time }),
            )
            .await?;
        let created: CreatedBody = response.json().await?;
        Ok(created.id)
    }

    async fn update_work_session(
        &self,
        session_id: &str,
        snapshot: &SessionSnapshot,
    ) -> Result<()> {
        self.send(
            self.request(Method::PATCH, &format!("work-sessions/{}", session_id))
                .json(snapshot),
        )
        .await?;
        Ok(())
    }

    async fn list_work_sessions(&self, filter: &WorkSessionFilter) -> Result<Vec<WorkSession>> {
        let response = self
            .send(self.request(Method::GET, "work-sessions").query(filter))
            .await?;
        Ok(response.json().await?)
    }
}
