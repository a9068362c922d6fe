// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Hosting service REST API client.
//!
//! Updot talks to the GitHub REST API for three things: checking whether the
//! dotfiles repository already exists, creating it when it does not, and
//! registering the user's SSH public key.
//!
//! # Authentication
//!
//! Requests that change account state are authenticated either with a token
//! from the `GITHUB_TOKEN` environment variable, or with basic
//! authentication using credentials the user is prompted for. Accounts with
//! two-factor authentication answer the first basic authentication attempt
//! with a one-time password challenge. In that case the user is asked for
//! the code and the request is retried once. A request rejected for bad
//! credentials is also retried once with freshly prompted credentials.

use crate::prompt::{ask_secret, ask_text, PromptError};

use reqwest::{header::HeaderMap, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Header carrying one-time password challenges and answers.
pub const OTP_HEADER: &str = "X-GitHub-OTP";

/// Default timeout for connectivity check.
pub const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(1);

const USER_AGENT: &str = concat!("updot/", env!("CARGO_PKG_VERSION"));

/// Check for a working internet connection.
///
/// Any HTTP response counts as connected, only transport failures do not.
///
/// # Errors
///
/// - Return [`HostingError::Offline`] if `url` cannot be reached in time.
#[instrument(level = "debug")]
pub async fn check_connectivity(url: &str, timeout: Duration) -> Result<()> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?;

    client
        .head(url)
        .send()
        .await
        .map_err(|err| HostingError::Offline {
            source: err,
            url: url.to_string(),
        })?;

    Ok(())
}

/// Credentials for authenticated requests.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// User name with password or personal access token.
    Basic { username: String, password: String },

    /// Bearer token.
    Token(String),
}

impl Credentials {
    /// Resolve credentials for a user.
    ///
    /// Uses `GITHUB_TOKEN` when set, otherwise prompts for a password.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError::Prompt`] if user cannot be prompted.
    pub fn resolve(username: &str) -> Result<Self> {
        if let Some(token) = env::var("GITHUB_TOKEN").ok().filter(|token| !token.is_empty()) {
            debug!("using token from GITHUB_TOKEN");
            return Ok(Self::Token(token));
        }

        Self::prompt(username)
    }

    /// Prompt user for password of a known user name.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError::Prompt`] if user cannot be prompted.
    pub fn prompt(username: &str) -> Result<Self> {
        info!("GitHub password required");
        let password = ask_secret(&format!("password or access token for {username}"))?;
        Ok(Self::Basic {
            username: username.to_string(),
            password,
        })
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
            Self::Token(token) => request.bearer_auth(token),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => fmt
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Token(_) => fmt.debug_tuple("Token").finish_non_exhaustive(),
        }
    }
}

/// Why an authenticated request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChallenge {
    /// Two-factor authentication code required.
    OneTimePassword,

    /// Credentials were not accepted.
    BadCredentials,

    /// Refused for reasons credentials cannot fix.
    Rejected,
}

impl AuthChallenge {
    /// Classify a failed response.
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        if status != StatusCode::UNAUTHORIZED {
            return Self::Rejected;
        }

        let otp_required = headers
            .get(OTP_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().starts_with("required"));

        if otp_required {
            Self::OneTimePassword
        } else {
            Self::BadCredentials
        }
    }
}

/// Body of repository creation request.
#[derive(Debug, Serialize)]
pub struct NewRepository<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

/// Body of SSH key registration request.
#[derive(Debug, Serialize)]
pub struct NewSshKey<'a> {
    pub title: &'a str,
    pub key: &'a str,
}

/// Error message returned by the API.
#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// Client for hosting service REST API.
#[derive(Debug, Clone)]
pub struct HostingClient {
    client: Client,
    api_url: String,
}

impl HostingClient {
    /// Construct new client against API base URL.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError::Http`] if HTTP client cannot be built.
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Check if user already owns a repository with given name.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError::Http`] if request cannot be sent.
    /// - Return [`HostingError::Api`] if API answers with anything but found
    ///   or not found.
    #[instrument(skip(self), level = "debug")]
    pub async fn repository_exists(&self, user: &str, repository: &str) -> Result<bool> {
        let url = format!("{}/repos/{user}/{repository}", self.api_url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(api_error(status, response.text().await.unwrap_or_default())),
        }
    }

    /// Create a repository owned by the authenticated user.
    ///
    /// Yields `false` when the repository already exists, which is not treated
    /// as an error.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError`] if request fails after one retry.
    #[instrument(skip(self, credentials), level = "debug")]
    pub async fn create_repository(
        &self,
        credentials: Credentials,
        name: &str,
        description: &str,
    ) -> Result<bool> {
        info!("creating GitHub repository {name}...");
        let body = NewRepository { name, description };
        match self.post_authenticated("/user/repos", &body, credentials).await {
            Ok(()) => Ok(true),
            Err(HostingError::Api { status, .. }) if status == StatusCode::UNPROCESSABLE_ENTITY => {
                warn!("repository {name} already exists");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Register SSH public key with the authenticated user's account.
    ///
    /// # Errors
    ///
    /// - Return [`HostingError`] if request fails after one retry.
    #[instrument(skip(self, credentials, key), level = "debug")]
    pub async fn add_ssh_key(&self, credentials: Credentials, title: &str, key: &str) -> Result<()> {
        info!("adding key to GitHub...");
        let body = NewSshKey { title, key };
        self.post_authenticated("/user/keys", &body, credentials).await
    }

    async fn post_authenticated<B>(&self, path: &str, body: &B, credentials: Credentials) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.api_url);
        let mut credentials = credentials;
        let mut otp: Option<String> = None;
        let mut retried = false;

        loop {
            let mut request = credentials.apply(self.client.post(&url).json(body));
            if let Some(code) = &otp {
                request = request.header(OTP_HEADER, code);
            }

            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                debug!("POST {path} answered {status}");
                return Ok(());
            }

            let challenge = AuthChallenge::from_response(status, response.headers());
            let text = response.text().await.unwrap_or_default();
            if retried {
                return Err(api_error(status, text));
            }
            retried = true;

            match challenge {
                AuthChallenge::Rejected => return Err(api_error(status, text)),
                AuthChallenge::OneTimePassword => {
                    info!("two-factor authentication required");
                    otp = Some(ask_text("authentication code")?);
                }
                AuthChallenge::BadCredentials => {
                    warn!("bad credentials");
                    let username = match &credentials {
                        Credentials::Basic { username, .. } => username.clone(),
                        Credentials::Token(_) => ask_text("GitHub username")?,
                    };
                    credentials = Credentials::prompt(&username)?;
                }
            }
        }
    }
}

fn api_error(status: StatusCode, text: String) -> HostingError {
    let message = serde_json::from_str::<ApiMessage>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    HostingError::Api { status, message }
}

/// Hosting service error types.
#[derive(Debug, thiserror::Error)]
pub enum HostingError {
    /// No connection could be made.
    #[error("no internet connection detected, could not reach {url}")]
    Offline {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// API answers with an error.
    #[error("GitHub API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    /// User prompt fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// HTTP transport fails.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Friendly result alias :3
pub type Result<T, E = HostingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn otp_challenge_is_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(OTP_HEADER, HeaderValue::from_static("required; app"));

        assert_eq!(
            AuthChallenge::from_response(StatusCode::UNAUTHORIZED, &headers),
            AuthChallenge::OneTimePassword
        );
    }

    #[test]
    fn unauthorized_without_otp_is_bad_credentials() {
        assert_eq!(
            AuthChallenge::from_response(StatusCode::UNAUTHORIZED, &HeaderMap::new()),
            AuthChallenge::BadCredentials
        );
    }

    #[test]
    fn other_failures_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(OTP_HEADER, HeaderValue::from_static("required; sms"));

        assert_eq!(
            AuthChallenge::from_response(StatusCode::FORBIDDEN, &headers),
            AuthChallenge::Rejected
        );
    }

    #[test]
    fn repository_payload() -> anyhow::Result<()> {
        let body = NewRepository {
            name: "dotfiles",
            description: "My dotfiles repository",
        };

        assert_eq!(
            serde_json::to_value(&body)?,
            json!({"name": "dotfiles", "description": "My dotfiles repository"})
        );

        Ok(())
    }

    #[test]
    fn api_error_prefers_json_message() {
        let error = api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message": "Validation Failed"}"#.into(),
        );
        assert_eq!(
            error.to_string(),
            "GitHub API error (422 Unprocessable Entity): Validation Failed"
        );

        let error = api_error(StatusCode::BAD_GATEWAY, "upstream down".into());
        assert_eq!(
            error.to_string(),
            "GitHub API error (502 Bad Gateway): upstream down"
        );
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::Basic {
            username: "octocat".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
        assert!(!format!("{:?}", Credentials::Token("ghp_secret".into())).contains("ghp_secret"));
    }

    #[tokio::test]
    async fn client_trims_trailing_slash() -> anyhow::Result<()> {
        let client = HostingClient::new("https://api.example.com/")?;
        assert_eq!(client.api_url, "https://api.example.com");

        Ok(())
    }
}
