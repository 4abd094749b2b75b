use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::PrpConfig;
use crate::prp::error::{PrpError, PrpResult};
use crate::prp::types::{EmployeeRecord, Envelope, PrpDepartment, PrpEmployee, TokenRequest};

const TOKEN_PATH: &str = "/api/authentication/external";
const SECURE_PATH: &str = "/api/secure/external";
const DEPARTMENTS_KEY: &str = "departments";

struct BearerToken {
    value: String,
    expires_at: Instant,
}

impl BearerToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub base_url: String,
    pub department_count: usize,
    pub employee_count: Option<usize>,
    pub elapsed_ms: u128,
}

/// Authenticated client for the Parliament Resource Portal external API.
pub struct PrpClient {
    http: Client,
    config: PrpConfig,
    token: Mutex<Option<BearerToken>>,
    departments: Cache<&'static str, Arc<Vec<PrpDepartment>>>,
}

impl PrpClient {
    pub fn new(config: PrpConfig) -> PrpResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| PrpError::Config(format!("failed to build HTTP client: {e}")))?;

        if !config.verify_ssl {
            warn!(base_url = %config.base_url, "PRP certificate verification is disabled");
        }

        let departments = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.department_cache_ttl)
            .build();

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
            departments,
        })
    }

    pub fn config(&self) -> &PrpConfig {
        &self.config
    }

    /// Exchange the configured credentials for a bearer token and cache it.
    #[instrument(name = "prp_authenticate", skip(self), fields(base_url = %self.config.base_url))]
    pub async fn authenticate(&self) -> PrpResult<String> {
        let url = format!("{}{}", self.config.base_url, TOKEN_PATH);
        let body = TokenRequest {
            username: &self.config.username,
            password: &self.config.password,
        };

        let response = self
            .send_with_retry("token", || {
                self.http
                    .post(&url)
                    .query(&[("action", "token")])
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PrpError::Authentication(format!(
                "credentials rejected (HTTP {status})"
            )));
        }
        if !status.is_success() {
            return Err(PrpError::Connection(format!(
                "token request failed with HTTP {status}"
            )));
        }

        let text = response.text().await?;
        let envelope = parse_envelope("token", &text)?;
        if envelope.response_code != 200 {
            return Err(PrpError::Authentication(format!(
                "token request rejected (responseCode {})",
                envelope.response_code
            )));
        }

        let token = match envelope.payload {
            Some(Value::String(token)) if !token.trim().is_empty() => token,
            _ => {
                return Err(PrpError::Authentication(
                    "token response carried no bearer token".to_string(),
                ));
            }
        };

        *self.token.lock().await = Some(BearerToken {
            value: token.clone(),
            expires_at: Instant::now() + self.config.token_ttl,
        });

        info!("PRP authentication succeeded");
        Ok(token)
    }

    pub async fn clear_token(&self) {
        self.token.lock().await.take();
    }

    /// Authenticated GET against the secure endpoint.
    ///
    /// A 401 clears the cached token and the call is retried once with a
    /// fresh one; a second 401 is reported as an authentication error.
    #[instrument(name = "prp_request", skip(self, params))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> PrpResult<T> {
        let url = format!("{}{}", self.config.base_url, SECURE_PATH);
        let mut reauthenticated = false;

        loop {
            let token = self.bearer_token().await?;
            let response = self
                .send_with_retry(action, || {
                    self.http
                        .get(&url)
                        .query(&[("action", action)])
                        .query(params)
                        .bearer_auth(&token)
                })
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                self.clear_token().await;
                if reauthenticated {
                    return Err(PrpError::Authentication(format!(
                        "{action} rejected a freshly issued token"
                    )));
                }
                warn!(action, "PRP token rejected, re-authenticating");
                reauthenticated = true;
                continue;
            }
            if !status.is_success() {
                return Err(PrpError::Connection(format!(
                    "{action} failed with HTTP {status}"
                )));
            }

            let text = response.text().await?;
            let envelope = parse_envelope(action, &text)?;
            if envelope.response_code != 200 {
                return Err(PrpError::Validation(format!(
                    "{action} returned responseCode {}",
                    envelope.response_code
                )));
            }

            let payload = envelope.payload.unwrap_or(Value::Null);
            return serde_json::from_value(payload).map_err(|e| {
                PrpError::Validation(format!("{action} returned an unexpected payload: {e}"))
            });
        }
    }

    /// All departments, served from the TTL cache when fresh.
    pub async fn departments(&self) -> PrpResult<Arc<Vec<PrpDepartment>>> {
        if let Some(cached) = self.departments.get(&DEPARTMENTS_KEY).await {
            debug!(count = cached.len(), "Departments served from cache");
            return Ok(cached);
        }

        let fetched: Option<Vec<PrpDepartment>> = self.request("departments", &[]).await?;
        let fetched = Arc::new(fetched.unwrap_or_default());
        self.departments
            .insert(DEPARTMENTS_KEY, fetched.clone())
            .await;

        info!(count = fetched.len(), "Fetched PRP departments");
        Ok(fetched)
    }

    pub async fn department(&self, id: u64) -> PrpResult<Option<PrpDepartment>> {
        let departments = self.departments().await?;
        Ok(departments.iter().find(|d| d.id == id).cloned())
    }

    pub async fn invalidate_departments(&self) {
        self.departments.invalidate(&DEPARTMENTS_KEY).await;
    }

    /// Employees of one department. The listing itself must be an array;
    /// each row is read on its own and unreadable rows come back as `Err`.
    pub async fn employees(&self, department_id: u64) -> PrpResult<Vec<EmployeeRecord>> {
        let rows: Option<Vec<Value>> = self
            .request(
                "employee_details",
                &[("departmentId", department_id.to_string())],
            )
            .await?;
        let employees: Vec<EmployeeRecord> = rows
            .unwrap_or_default()
            .into_iter()
            .map(PrpEmployee::from_value)
            .collect();

        let rejected = employees.iter().filter(|e| e.is_err()).count();
        if rejected > 0 {
            warn!(department_id, rejected, "Some PRP employee rows could not be read");
        }
        debug!(department_id, count = employees.len(), "Fetched PRP employees");
        Ok(employees)
    }

    /// Fresh authentication plus a department listing, for diagnostics.
    pub async fn test_connection(&self, department_id: Option<u64>) -> PrpResult<ConnectionReport> {
        let started = Instant::now();

        self.clear_token().await;
        self.invalidate_departments().await;
        self.authenticate().await?;

        let department_count = self.departments().await?.len();
        let employee_count = match department_id {
            Some(id) => Some(self.employees(id).await?.len()),
            None => None,
        };

        Ok(ConnectionReport {
            base_url: self.config.base_url.clone(),
            department_count,
            employee_count,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    async fn bearer_token(&self) -> PrpResult<String> {
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.value.clone());
            }
        }
        self.authenticate().await
    }

    /// Sends the request, retrying connection failures and 5xx/429 responses
    /// with exponential backoff.
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> PrpResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = build().send().await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            if !retryable || attempt >= self.config.max_retries {
                return match outcome {
                    Ok(response) if retryable => Err(PrpError::Connection(format!(
                        "{operation} failed with HTTP {} after {} attempts",
                        response.status(),
                        attempt + 1
                    ))),
                    Ok(response) => Ok(response),
                    Err(e) => Err(e.into()),
                };
            }

            let delay = self.backoff(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying PRP request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_backoff
            .saturating_mul(1u32 << attempt.min(16))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn parse_envelope(action: &str, body: &str) -> PrpResult<Envelope<Value>> {
    serde_json::from_str(body)
        .map_err(|e| PrpError::Validation(format!("{action} returned malformed JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prp::error::ErrorKind;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(server: &MockServer) -> PrpConfig {
        let mut config = PrpConfig::for_base_url(server.base_url());
        config.max_retries = 2;
        config.retry_backoff = Duration::from_millis(1);
        config
    }

    fn mock_token<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
        server.mock(|when, then| {
            when.method(POST)
                .path(TOKEN_PATH)
                .query_param("action", "token")
                .json_body(json!({"username": "pims", "password": "pims"}));
            then.status(200)
                .json_body(json!({"responseCode": 200, "payload": token}));
        })
    }

    #[tokio::test]
    async fn token_is_cached_between_requests() {
        let server = MockServer::start();
        let auth = mock_token(&server, "tok-1");
        let employees = server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .query_param("action", "employee_details")
                .query_param("departmentId", "1")
                .header("authorization", "Bearer tok-1");
            then.status(200).json_body(json!({
                "responseCode": 200,
                "payload": [{"userId": "110", "nameEng": "Jane Doe", "status": "active"}]
            }));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        assert_eq!(client.employees(1).await.unwrap().len(), 1);
        assert_eq!(client.employees(1).await.unwrap().len(), 1);

        auth.assert_calls(1);
        employees.assert_calls(2);
    }

    #[tokio::test]
    async fn departments_are_cached() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        let departments = server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .query_param("action", "departments");
            then.status(200).json_body(json!({
                "responseCode": 200,
                "payload": [{"id": 1, "nameEng": "IT Wing", "nameBng": null, "isWing": true}]
            }));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        client.departments().await.unwrap();
        let it = client.department(1).await.unwrap().unwrap();

        assert_eq!(it.name_eng, "IT Wing");
        assert!(client.department(2).await.unwrap().is_none());
        departments.assert_calls(1);
    }

    #[tokio::test]
    async fn unauthorized_triggers_single_reauthentication() {
        let server = MockServer::start();
        let auth = mock_token(&server, "fresh-token");
        let stale = server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .header("authorization", "Bearer stale-token");
            then.status(401);
        });
        let fresh = server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .query_param("action", "employee_details")
                .header("authorization", "Bearer fresh-token");
            then.status(200).json_body(json!({
                "responseCode": 200,
                "payload": [{"userId": 7, "nameEng": "Rahim"}]
            }));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        *client.token.lock().await = Some(BearerToken {
            value: "stale-token".to_string(),
            expires_at: Instant::now() + Duration::from_secs(60),
        });

        let employees = client.employees(3).await.unwrap();

        assert_eq!(employees[0].as_ref().unwrap().user_id, "7");
        stale.assert_calls(1);
        auth.assert_calls(1);
        fresh.assert_calls(1);
    }

    #[tokio::test]
    async fn repeated_unauthorized_is_authentication_error() {
        let server = MockServer::start();
        let auth = mock_token(&server, "tok-1");
        server.mock(|when, then| {
            when.method(GET).path(SECURE_PATH);
            then.status(401);
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let err = client.employees(1).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        auth.assert_calls(2);
    }

    #[tokio::test]
    async fn rejected_credentials_are_authentication_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(TOKEN_PATH);
            then.status(200)
                .json_body(json!({"responseCode": 401, "payload": null}));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let err = client.authenticate().await.unwrap_err();

        assert!(matches!(err, PrpError::Authentication(_)), "got {err}");
    }

    #[tokio::test]
    async fn malformed_json_is_validation_error() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .query_param("action", "departments");
            then.status(200)
                .header("content-type", "application/json")
                .body("<html>maintenance</html>");
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let err = client.departments().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_ne!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn unexpected_payload_shape_is_validation_error() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        server.mock(|when, then| {
            when.method(GET).path(SECURE_PATH);
            then.status(200)
                .json_body(json!({"responseCode": 200, "payload": {"not": "a list"}}));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let err = client.employees(1).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        let failing = server.mock(|when, then| {
            when.method(GET)
                .path(SECURE_PATH)
                .query_param("action", "departments");
            then.status(503);
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let err = client.departments().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        failing.assert_calls(3);
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        let mut config = PrpConfig::for_base_url("http://127.0.0.1:1");
        config.max_retries = 0;
        config.timeout = Duration::from_secs(2);

        let client = PrpClient::new(config).unwrap();
        let err = client.authenticate().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn malformed_row_does_not_reject_the_listing() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        server.mock(|when, then| {
            when.method(GET).path(SECURE_PATH);
            then.status(200).json_body(json!({
                "responseCode": 200,
                "payload": [
                    {"userId": "1", "nameEng": "Karim", "departmentId": "N/A"},
                    {"userId": "2", "nameEng": "Salma", "departmentId": 1}
                ]
            }));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        let employees = client.employees(1).await.unwrap();

        assert_eq!(employees.len(), 2);
        assert_eq!(employees[0].as_ref().unwrap_err().user_id, "1");
        assert_eq!(employees[1].as_ref().unwrap().name_eng, "Salma");
    }

    #[tokio::test]
    async fn null_payload_means_no_employees() {
        let server = MockServer::start();
        mock_token(&server, "tok-1");
        server.mock(|when, then| {
            when.method(GET).path(SECURE_PATH);
            then.status(200)
                .json_body(json!({"responseCode": 200, "payload": null}));
        });

        let client = PrpClient::new(test_config(&server)).unwrap();
        assert!(client.employees(9).await.unwrap().is_empty());
    }
}
