//! FAEN API integration: OAuth2 password-grant login and date-range queries.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::data::SourceApi;
use crate::data::query::date_range_query;
use crate::domain::{DateRange, SourceCategory};
use crate::error::{AppError, AuthError, EXIT_USAGE, FetchError, SourceApiError, truncate_body};

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Bearer token obtained at login. Written once, read by every request.
#[derive(Clone)]
pub struct Session {
    token_type: String,
    access_token: String,
}

impl Session {
    pub fn new(token_type: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
        }
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Short, log-safe prefix of the token.
    pub fn preview(&self) -> String {
        let head: String = self.access_token.chars().take(8).collect();
        format!("{head}...")
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token_type", &self.token_type)
            .field("access_token", &self.preview())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
}

/// `GET /users/me/` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

pub struct FaenClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    session: Option<Session>,
}

impl FaenClient {
    pub fn new(base_url: &str, credentials: Credentials, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::new(EXIT_USAGE, format!("Failed to build FAEN HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            session: None,
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Exchange username/password for a bearer token and cache it.
    pub fn authenticate(&mut self) -> Result<&Session, AuthError> {
        info!(username = %self.credentials.username, "authenticating against FAEN");

        let resp = self
            .client
            .post(self.url("token"))
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
                ("grant_type", "password"),
            ])
            .send()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let token: TokenResponse = resp
            .json()
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Malformed("missing access_token".to_string()))?;

        let session = Session::new(
            token.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            access_token,
        );
        info!(token_type = session.token_type(), token = %session.preview(), "authenticated");
        Ok(self.session.insert(session))
    }

    pub fn current_user(&self) -> Result<UserInfo, SourceApiError> {
        let endpoint = "GET /users/me/";
        let session = self.require_session(endpoint)?;
        let resp = self
            .client
            .get(self.url("users/me/"))
            .header(AUTHORIZATION, session.authorization())
            .send()
            .map_err(|e| SourceApiError::transport(endpoint, e))?;
        let resp = check_status(endpoint, resp)?;
        let status = resp.status().as_u16();
        resp.json()
            .map_err(|e| SourceApiError::invalid_payload(endpoint, status, e))
    }

    pub fn fetch_consumption(&mut self, range: &DateRange, limit: usize) -> Result<Vec<Value>, FetchError> {
        self.fetch_category(SourceCategory::Consumption, range, limit)
    }

    pub fn fetch_generation(&mut self, range: &DateRange, limit: usize) -> Result<Vec<Value>, FetchError> {
        self.fetch_category(SourceCategory::Generation, range, limit)
    }

    pub fn fetch_weather(&mut self, range: &DateRange, limit: usize) -> Result<Vec<Value>, FetchError> {
        self.fetch_category(SourceCategory::Weather, range, limit)
    }

    /// Query one endpoint over `[range.start, range.end)`.
    ///
    /// Logs in first when no session is cached. A 401 triggers exactly one
    /// fresh login followed by one repeat of the query.
    pub fn fetch_category(
        &mut self,
        category: SourceCategory,
        range: &DateRange,
        limit: usize,
    ) -> Result<Vec<Value>, FetchError> {
        let endpoint = endpoint_label(category);
        if self.session.is_none() {
            self.authenticate()?;
        }

        match self.query(category, range, limit) {
            Err(err) if err.is_unauthorized() => {
                warn!(endpoint, "token rejected, re-authenticating once");
                self.authenticate()?;
                Ok(self.query(category, range, limit)?)
            }
            other => Ok(other?),
        }
    }

    fn query(&self, category: SourceCategory, range: &DateRange, limit: usize) -> Result<Vec<Value>, SourceApiError> {
        let endpoint = endpoint_label(category);
        let session = self.require_session(endpoint)?;
        let filter = date_range_query(category, range);
        debug!(endpoint, %range, limit, query = %filter, "querying FAEN");

        let request = match category {
            SourceCategory::Consumption => self.client.post(self.url("consumption/query")).json(&json!({
                "query": filter,
                "limit": limit,
                "eumed": false,
                "sort": category.sort_key(),
            })),
            SourceCategory::Generation => self
                .client
                .get(self.url("generation/"))
                .query(&url_params(&filter, limit, category)),
            SourceCategory::Weather => self
                .client
                .get(self.url("weather/"))
                .query(&url_params(&filter, limit, category)),
        };

        let resp = request
            .header(AUTHORIZATION, session.authorization())
            .send()
            .map_err(|e| SourceApiError::transport(endpoint, e))?;
        let resp = check_status(endpoint, resp)?;
        let status = resp.status().as_u16();

        let body: Value = resp
            .json()
            .map_err(|e| SourceApiError::invalid_payload(endpoint, status, e))?;
        let records = into_records(body)
            .ok_or_else(|| SourceApiError::invalid_payload(endpoint, status, "expected a JSON array of records"))?;

        info!(category = category.label(), count = records.len(), "retrieved FAEN records");
        Ok(records)
    }

    fn require_session(&self, endpoint: &str) -> Result<&Session, SourceApiError> {
        self.session.as_ref().ok_or_else(|| SourceApiError {
            endpoint: endpoint.to_string(),
            status: Some(401),
            body: "not authenticated".to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl SourceApi for FaenClient {
    fn login(&mut self) -> Result<(), AuthError> {
        self.authenticate()?;
        match self.current_user() {
            Ok(user) => info!(
                username = user.username.as_deref().unwrap_or("unknown"),
                email = user.email.as_deref().unwrap_or("not provided"),
                disabled = user.disabled,
                "FAEN user"
            ),
            Err(err) => warn!(%err, "could not read FAEN user information"),
        }
        Ok(())
    }

    fn fetch_records(
        &mut self,
        category: SourceCategory,
        range: &DateRange,
        limit: usize,
    ) -> Result<Vec<Value>, FetchError> {
        self.fetch_category(category, range, limit)
    }
}

fn endpoint_label(category: SourceCategory) -> &'static str {
    match category {
        SourceCategory::Consumption => "POST /consumption/query",
        SourceCategory::Generation => "GET /generation/",
        SourceCategory::Weather => "GET /weather/",
    }
}

fn url_params(filter: &Value, limit: usize, category: SourceCategory) -> [(&'static str, String); 3] {
    [
        ("query", filter.to_string()),
        ("limit", limit.to_string()),
        ("sort", category.sort_key().to_string()),
    ]
}

fn check_status(endpoint: &str, resp: Response) -> Result<Response, SourceApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(SourceApiError::http(endpoint, status.as_u16(), &body))
}

/// The API answers with a list; a single object is treated as one record.
fn into_records(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        obj @ Value::Object(_) => Some(vec![obj]),
        _ => None,
    }
}
