//! Slack Web API client used for the RTM handshake, directory lookups, and
//! posting replies.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::slack_helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};
use crate::{SlackApiError, SlackUser};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, Default, Deserialize)]
/// Status fields shared by every Web API response.
pub struct SlackResponseStatus {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlackResponseStatus {
    fn into_result(self, operation: &str) -> Result<(), SlackApiError> {
        if self.ok {
            return Ok(());
        }
        Err(SlackApiError::NotOk {
            operation: operation.to_string(),
            error: self.error.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RtmSelf {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
/// `rtm.connect` response. A not-ok status is returned as data so the
/// session can classify it as a handshake rejection.
pub struct RtmHandshake {
    #[serde(flatten)]
    pub status: SlackResponseStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "self", default)]
    pub self_identity: Option<RtmSelf>,
}

#[derive(Debug, Deserialize)]
struct SlackAuthTestResponse {
    #[serde(flatten)]
    status: SlackResponseStatus,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackUserInfoResponse {
    #[serde(flatten)]
    status: SlackResponseStatus,
    #[serde(default)]
    user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackUsersListResponse {
    #[serde(flatten)]
    status: SlackResponseStatus,
    #[serde(default)]
    members: Vec<SlackUser>,
}

#[derive(Debug, Deserialize)]
struct SlackChatMessageResponse {
    #[serde(flatten)]
    status: SlackResponseStatus,
}

#[async_trait]
/// Directory and gateway operations the session and handlers depend on.
pub trait SlackWebApi: Send + Sync {
    async fn rtm_connect(&self) -> Result<RtmHandshake, SlackApiError>;
    /// Non-deleted members of the team.
    async fn users_list(&self) -> Result<Vec<SlackUser>, SlackApiError>;
    async fn user_info(&self, user_id: &str) -> Result<SlackUser, SlackApiError>;
    async fn whoami(&self) -> Result<SlackUser, SlackApiError>;
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackApiError>;
}

#[derive(Debug, Clone)]
pub struct SlackApiClientConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(config: SlackApiClientConfig) -> Result<Self, SlackApiError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("karmabot"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(SlackApiError::Build)?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.trim().to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn auth_test_user_id(&self) -> Result<String, SlackApiError> {
        let response: SlackAuthTestResponse = self
            .request_json("auth.test", || {
                self.http
                    .post(self.endpoint("auth.test"))
                    .bearer_auth(&self.token)
            })
            .await?;
        response.status.into_result("auth.test")?;
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| SlackApiError::MissingField {
                operation: "auth.test".to_string(),
                field: "user_id".to_string(),
            })
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T, SlackApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-karmabot-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|source| SlackApiError::Decode {
                                operation: operation.to_string(),
                                source,
                            });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tracing::debug!(
                            operation,
                            attempt,
                            status = status.as_u16(),
                            "retrying slack api request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    return Err(SlackApiError::HttpStatus {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tracing::debug!(operation, attempt, %error, "retrying slack api request");
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(SlackApiError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl SlackWebApi for SlackApiClient {
    async fn rtm_connect(&self) -> Result<RtmHandshake, SlackApiError> {
        self.request_json("rtm.connect", || {
            self.http
                .post(self.endpoint("rtm.connect"))
                .bearer_auth(&self.token)
        })
        .await
    }

    async fn users_list(&self) -> Result<Vec<SlackUser>, SlackApiError> {
        let response: SlackUsersListResponse = self
            .request_json("users.list", || {
                self.http
                    .get(self.endpoint("users.list"))
                    .bearer_auth(&self.token)
            })
            .await?;
        response.status.into_result("users.list")?;
        Ok(response
            .members
            .into_iter()
            .filter(|user| !user.deleted)
            .collect())
    }

    async fn user_info(&self, user_id: &str) -> Result<SlackUser, SlackApiError> {
        let response: SlackUserInfoResponse = self
            .request_json("users.info", || {
                self.http
                    .get(self.endpoint("users.info"))
                    .bearer_auth(&self.token)
                    .query(&[("user", user_id)])
            })
            .await?;
        response.status.into_result("users.info")?;
        response.user.ok_or_else(|| SlackApiError::MissingField {
            operation: "users.info".to_string(),
            field: "user".to_string(),
        })
    }

    async fn whoami(&self) -> Result<SlackUser, SlackApiError> {
        let user_id = self.auth_test_user_id().await?;
        self.user_info(&user_id).await
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<(), SlackApiError> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(self.endpoint("chat.postMessage"))
                    .bearer_auth(&self.token)
                    .json(&payload)
            })
            .await?;
        response.status.into_result("chat.postMessage")
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{SlackApiClient, SlackApiClientConfig, SlackWebApi};
    use crate::SlackApiError;

    fn test_client(base_url: String) -> SlackApiClient {
        SlackApiClient::new(SlackApiClientConfig {
            api_base: base_url,
            token: "xoxb-test".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn integration_post_message_retries_rate_limits() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("x-karmabot-retry-attempt", "0");
            then.status(429).header("retry-after", "0").body("slow down");
        });
        let second = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("x-karmabot-retry-attempt", "1")
                .header("authorization", "Bearer xoxb-test");
            then.status(200)
                .json_body(json!({"ok": true, "channel": "C1", "ts": "1.2"}));
        });

        test_client(server.base_url())
            .post_message("C1", "Thank you <@U1>!")
            .await
            .expect("post eventually succeeds");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn functional_users_list_filters_deleted_members() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.list");
            then.status(200).json_body(json!({
                "ok": true,
                "members": [
                    {"id": "U00000001", "name": "alice", "deleted": false},
                    {"id": "U00000002", "name": "bob", "deleted": true},
                    {"id": "U00000003", "name": "carol"}
                ]
            }));
        });

        let users = test_client(server.base_url())
            .users_list()
            .await
            .expect("users");
        let names = users.iter().map(|user| user.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn functional_whoami_resolves_auth_test_user_through_users_info() {
        let server = MockServer::start();
        let auth = server.mock(|when, then| {
            when.method(POST).path("/auth.test");
            then.status(200)
                .json_body(json!({"ok": true, "user_id": "UBOT00001"}));
        });
        let info = server.mock(|when, then| {
            when.method(GET)
                .path("/users.info")
                .query_param("user", "UBOT00001");
            then.status(200).json_body(json!({
                "ok": true,
                "user": {"id": "UBOT00001", "name": "karmabot", "is_bot": true}
            }));
        });

        let me = test_client(server.base_url()).whoami().await.expect("whoami");
        assert_eq!(me.id, "UBOT00001");
        assert_eq!(me.name, "karmabot");
        assert!(me.is_bot);
        auth.assert_calls(1);
        info.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_rtm_connect_returns_not_ok_status_as_data() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/rtm.connect");
            then.status(200)
                .json_body(json!({"ok": false, "error": "invalid_auth"}));
        });

        let handshake = test_client(server.base_url())
            .rtm_connect()
            .await
            .expect("decoded");
        assert!(!handshake.status.ok);
        assert_eq!(handshake.status.error.as_deref(), Some("invalid_auth"));
        assert!(handshake.url.is_none());
    }

    #[tokio::test]
    async fn regression_not_ok_users_list_is_an_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.list");
            then.status(200)
                .json_body(json!({"ok": false, "error": "missing_scope"}));
        });

        let error = test_client(server.base_url())
            .users_list()
            .await
            .expect_err("not ok");
        assert!(matches!(error, SlackApiError::NotOk { ref error, .. } if error == "missing_scope"));
    }

    #[tokio::test]
    async fn regression_non_retryable_status_fails_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(400).body("bad request");
        });

        let error = test_client(server.base_url())
            .post_message("C1", "hi")
            .await
            .expect_err("must fail");
        assert!(matches!(error, SlackApiError::HttpStatus { status: 400, .. }));
        assert_eq!(mock.calls(), 1);
    }
}
