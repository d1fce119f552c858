use anyhow::{Error, format_err};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use stack_string::StackString;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use url::Url;

use crate::{datetimetype::sentinel_datetime, handle_response};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
pub const USERINFO_EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";
pub const USERINFO_PROFILE_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.profile";

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_DELTA: TimeDuration = TimeDuration::seconds(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub auth_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
}

impl GoogleEndpoints {
    /// # Errors
    /// Returns error if any of the urls fail to parse
    pub fn new(auth_url: &str, token_url: &str, userinfo_url: &str) -> Result<Self, Error> {
        Ok(Self {
            auth_url: auth_url.parse()?,
            token_url: token_url.parse()?,
            userinfo_url: userinfo_url.parse()?,
        })
    }
}

/// OAuth2 token as held by the client and persisted with each user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: StackString,
    pub token_type: StackString,
    pub refresh_token: StackString,
    pub expiry: OffsetDateTime,
}

impl Token {
    pub fn new(access_token: &str, refresh_token: &str, expiry: OffsetDateTime) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".into(),
            refresh_token: refresh_token.into(),
            expiry,
        }
    }

    /// A zero expiry means the token never expires.
    pub fn is_expired(&self) -> bool {
        self.expiry != sentinel_datetime()
            && self.expiry - EXPIRY_DELTA <= OffsetDateTime::now_utc()
    }

    pub fn authorization(&self) -> StackString {
        let token_type = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        let access_token = &self.access_token;
        stack_string::format_sstr!("{token_type} {access_token}")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: StackString,
    token_type: Option<StackString>,
    refresh_token: Option<StackString>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh_token: Option<&str>) -> Token {
        let expiry = match self.expires_in {
            Some(secs) if secs > 0 => OffsetDateTime::now_utc()
                .checked_add(TimeDuration::seconds(secs))
                .unwrap_or_else(sentinel_datetime),
            _ => sentinel_datetime(),
        };
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh_token.map(Into::into))
            .unwrap_or_default();
        Token {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
            refresh_token,
            expiry,
        }
    }
}

/// Profile returned by the userinfo endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: StackString,
    pub email: StackString,
    pub verified_email: Option<bool>,
    pub name: Option<StackString>,
    pub given_name: Option<StackString>,
    pub family_name: Option<StackString>,
    pub link: Option<StackString>,
    pub picture: Option<StackString>,
    pub locale: Option<StackString>,
    pub hd: Option<StackString>,
}

/// Authorization code flow against google's OAuth2 endpoints.
#[derive(Clone, Debug)]
pub struct GoogleOAuth {
    client_id: StackString,
    client_secret: StackString,
    redirect_url: StackString,
    scopes: Vec<StackString>,
    endpoints: GoogleEndpoints,
    client: Client,
}

impl GoogleOAuth {
    /// # Errors
    /// Returns error if the http client cannot be built
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_url: &str,
        endpoints: GoogleEndpoints,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_url: redirect_url.into(),
            scopes: vec![
                CALENDAR_SCOPE.into(),
                USERINFO_EMAIL_SCOPE.into(),
                USERINFO_PROFILE_SCOPE.into(),
            ],
            endpoints,
            client,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn scopes(&self) -> &[StackString] {
        &self.scopes
    }

    /// Url to send the user to, requesting offline access so google issues a
    /// refresh token.
    pub fn auth_code_url(&self, state: &str) -> Url {
        let scope = self
            .scopes
            .iter()
            .map(StackString::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let mut url = self.endpoints.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("access_type", "offline")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &scope)
            .append_pair("state", state);
        url
    }

    /// # Errors
    /// Returns error if the token endpoint rejects the code or the response
    /// cannot be decoded
    pub async fn exchange(&self, code: &str) -> Result<Token, Error> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(self.endpoints.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let token: TokenResponse = handle_response(response, "token exchange").await?;
        info!("exchanged authorization code for token");
        Ok(token.into_token(None))
    }

    /// # Errors
    /// Returns error if the refresh request fails
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token, Error> {
        if refresh_token.is_empty() {
            return Err(format_err!("No refresh token"));
        }
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(self.endpoints.token_url.clone())
            .form(&params)
            .send()
            .await?;
        let token: TokenResponse = handle_response(response, "token refresh").await?;
        info!("refreshed access token");
        Ok(token.into_token(Some(refresh_token)))
    }

    /// Returns `token` unchanged unless it has expired and can be refreshed.
    ///
    /// # Errors
    /// Returns error if a needed refresh fails
    pub async fn valid_token(&self, token: Token) -> Result<Token, Error> {
        if token.is_expired() && !token.refresh_token.is_empty() {
            debug!("token expired at {}, refreshing", token.expiry);
            self.refresh(&token.refresh_token).await
        } else {
            Ok(token)
        }
    }

    /// # Errors
    /// Returns error on transport failure, non-success status, or a body
    /// that does not decode as a profile
    pub async fn user_info(&self, token: &Token) -> Result<UserInfo, Error> {
        let response = self
            .client
            .get(self.endpoints.userinfo_url.clone())
            .header(reqwest::header::AUTHORIZATION, token.authorization().as_str())
            .send()
            .await?;
        handle_response(response, "userinfo").await
    }
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self::new(GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL)
            .unwrap_or_else(|_| unreachable!("static google urls parse"))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Error;
    use std::{collections::HashMap, time::Duration};
    use time::{Duration as TimeDuration, OffsetDateTime};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, method, path},
    };

    use crate::{
        datetimetype::sentinel_datetime,
        oauth::{CALENDAR_SCOPE, GoogleEndpoints, GoogleOAuth, Token},
    };

    fn get_oauth(server: &MockServer) -> Result<GoogleOAuth, Error> {
        let uri = server.uri();
        let endpoints = GoogleEndpoints::new(
            &format!("{uri}/auth"),
            &format!("{uri}/token"),
            &format!("{uri}/userinfo"),
        )?;
        GoogleOAuth::new(
            "client-id",
            "client-secret",
            "http://localhost:8000/google/redirect",
            endpoints,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_auth_code_url() -> Result<(), Error> {
        let oauth = GoogleOAuth::new(
            "client-id",
            "client-secret",
            "http://localhost:8000/google/redirect",
            GoogleEndpoints::default(),
            Duration::from_secs(5),
        )?;
        let url = oauth.auth_code_url("abc");
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(query["redirect_uri"], "http://localhost:8000/google/redirect");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["state"], "abc");
        assert!(query["scope"].split(' ').any(|s| s == CALENDAR_SCOPE));
        assert_eq!(query["scope"].split(' ').count(), 3);
        Ok(())
    }

    #[test]
    fn test_token_expiry() {
        let token = Token::new("a", "r", sentinel_datetime());
        assert!(!token.is_expired());
        let token = Token::new("a", "r", OffsetDateTime::now_utc() - TimeDuration::minutes(5));
        assert!(token.is_expired());
        let token = Token::new("a", "r", OffsetDateTime::now_utc() + TimeDuration::hours(1));
        assert!(!token.is_expired());
        assert_eq!(token.authorization().as_str(), "Bearer a");
    }

    #[tokio::test]
    async fn test_exchange() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=good-code"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "refresh_token": "rt-1",
                "expires_in": 3599,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let token = oauth.exchange("good-code").await?;
        assert_eq!(token.access_token.as_str(), "at-1");
        assert_eq!(token.refresh_token.as_str(), "rt-1");
        assert!(token.expiry > OffsetDateTime::now_utc());
        assert!(!token.is_expired());
        Ok(())
    }

    #[tokio::test]
    async fn test_exchange_without_expiry() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "at-1"})),
            )
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let token = oauth.exchange("code").await?;
        assert_eq!(token.expiry, sentinel_datetime());
        assert_eq!(token.refresh_token.as_str(), "");
        assert_eq!(token.token_type.as_str(), "Bearer");
        Ok(())
    }

    #[tokio::test]
    async fn test_exchange_out_of_range_expiry() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "expires_in": i64::MAX,
            })))
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let token = oauth.exchange("code").await?;
        assert_eq!(token.access_token.as_str(), "at-1");
        assert_eq!(token.expiry, sentinel_datetime());
        assert!(!token.is_expired());
        Ok(())
    }

    #[tokio::test]
    async fn test_exchange_failure() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let err = oauth.exchange("bad-code").await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
        Ok(())
    }

    #[tokio::test]
    async fn test_valid_token_refreshes_expired() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let expired = Token::new(
            "at-1",
            "rt-1",
            OffsetDateTime::now_utc() - TimeDuration::hours(1),
        );
        let token = oauth.valid_token(expired).await?;
        assert_eq!(token.access_token.as_str(), "at-2");
        assert_eq!(token.refresh_token.as_str(), "rt-1");

        let fresh = token.clone();
        let token = oauth.valid_token(fresh).await?;
        assert_eq!(token.access_token.as_str(), "at-2");
        Ok(())
    }

    #[tokio::test]
    async fn test_user_info() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc123",
                "email": "a@x.com",
                "verified_email": true,
                "picture": "https://example.com/a.png",
            })))
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let token = Token::new("at-1", "", sentinel_datetime());
        let info = oauth.user_info(&token).await?;
        assert_eq!(info.id.as_str(), "abc123");
        assert_eq!(info.email.as_str(), "a@x.com");
        assert_eq!(info.verified_email, Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn test_user_info_decode_failure() -> Result<(), Error> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let oauth = get_oauth(&server)?;
        let token = Token::new("at-1", "", sentinel_datetime());
        assert!(oauth.user_info(&token).await.is_err());
        Ok(())
    }
}
