//! HTTP client for the chat proxy: token issuance (`POST /auth`), event
//! broadcast (`POST /event`) and room listing (`GET /rooms`).

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    config::Config,
    models::{
        ApiErrorBody, Capability, CreateTokenRequest, CreateTokenResponse, ListRoomsResponse,
        SendEventRequest, SendEventResponse, UserAttributes,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ChatError, ChatResult},
    ids,
    token::{Credential, EventRelay, Profile, TokenProvider},
};

/// Lightweight API client for the chat proxy.
///
/// Every request body is built as a local value per call; the client holds
/// only immutable settings and the connection pool.
#[derive(Clone, Debug)]
pub struct ChatApiClient {
    base_url: Url,
    room_arn: String,
    duration_minutes: u32,
    client: Client,
}

impl ChatApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    /// Returns [`ChatError::Api`] if the HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        room_arn: impl Into<String>,
        duration_minutes: u32,
        timeout: Duration,
    ) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("livechat-cli")
            .build()
            .map_err(|err| ChatError::api(None, format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url,
            room_arn: room_arn.into(),
            duration_minutes,
            client,
        })
    }

    /// Client for the proxy and room named in `config`.
    ///
    /// # Errors
    /// See [`ChatApiClient::new`].
    pub fn from_config(config: &Config) -> ChatResult<Self> {
        Self::new(
            config.api_url.clone(),
            config.room_arn.clone(),
            config.session.duration_minutes,
            config.session.request_timeout(),
        )
    }

    /// Room every request is scoped to.
    #[must_use]
    pub fn room_arn(&self) -> &str {
        &self.room_arn
    }

    fn endpoint(&self, path: &str) -> ChatResult<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|err| ChatError::api(None, format!("invalid {path} endpoint: {err}")))
    }

    /// Builds the token request for `profile` with a freshly generated room-scoped user id.
    #[must_use]
    pub fn token_request(&self, profile: &Profile) -> CreateTokenRequest {
        CreateTokenRequest {
            arn: self.room_arn.clone(),
            user_id: ids::room_user_id(&profile.username),
            attributes: UserAttributes {
                username: profile.username.clone(),
                avatar: profile.avatar.clone(),
            },
            capabilities: Capability::for_role(profile.is_moderator),
            duration_in_minutes: self.duration_minutes,
        }
    }

    /// Lists the rooms visible to the proxy.
    ///
    /// # Errors
    /// Returns [`ChatError::Api`] on transport failure, a non-success status
    /// or an undecodable listing.
    pub async fn list_rooms(&self) -> ChatResult<ListRoomsResponse> {
        let url = self.endpoint("rooms")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ChatError::api(None, format!("failed to list rooms: {err}")))?;
        let response = ensure_success(response, ChatError::api).await?;
        let status = response.status().as_u16();

        response
            .json()
            .await
            .map_err(|err| ChatError::api(Some(status), format!("malformed room listing: {err}")))
    }
}

/// Returns the response untouched on success, otherwise the described error body.
async fn ensure_success(
    response: Response,
    make_error: fn(Option<u16>, String) -> ChatError,
) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = ApiErrorBody::describe(&body);
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };
    Err(make_error(Some(status.as_u16()), message))
}

#[async_trait]
impl TokenProvider for ChatApiClient {
    async fn request_token(&self, profile: &Profile) -> ChatResult<Credential> {
        let request = self.token_request(profile);
        let url = self.endpoint("auth")?;
        debug!(
            user_id = %request.user_id,
            moderator = profile.is_moderator,
            duration_minutes = request.duration_in_minutes,
            "requesting chat token"
        );

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ChatError::auth(None, err.to_string()))?;
        let response = ensure_success(response, ChatError::auth).await.inspect_err(|err| {
            warn!(error = %err, "token request rejected");
        })?;
        let status = response.status().as_u16();

        let issued: CreateTokenResponse = response.json().await.map_err(|err| {
            ChatError::auth(Some(status), format!("malformed token response: {err}"))
        })?;

        info!(
            user_id = %request.user_id,
            token_expires_at = %issued.token_expiration_time,
            session_expires_at = %issued.session_expiration_time,
            "chat token issued"
        );

        Ok(Credential {
            token: issued.token,
            user_id: request.user_id,
            capabilities: request.capabilities,
            session_expires_at: issued.session_expiration_time,
            token_expires_at: issued.token_expiration_time,
        })
    }
}

#[async_trait]
impl EventRelay for ChatApiClient {
    async fn send_event(
        &self,
        event_name: &str,
        attributes: BTreeMap<String, String>,
    ) -> ChatResult<SendEventResponse> {
        let request = SendEventRequest {
            arn: self.room_arn.clone(),
            event_name: event_name.to_string(),
            event_attributes: attributes,
        };
        let url = self.endpoint("event")?;

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ChatError::relay(None, err.to_string()))?;
        let response = ensure_success(response, ChatError::relay).await?;
        let status = response.status().as_u16();

        let sent: SendEventResponse = response.json().await.map_err(|err| {
            ChatError::relay(Some(status), format!("malformed event response: {err}"))
        })?;
        info!(event_name, status = %sent.status, "event relayed");
        Ok(sent)
    }
}
