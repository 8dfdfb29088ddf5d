use sheetlog_core::{GoogleOAuthClient, OAuthToken};
use thiserror::Error;
use time::OffsetDateTime;

use crate::storage::{OAuthState, StorageError, TokenFile};

#[derive(Debug, Error)]
pub enum TokenProviderError {
    #[error("refresh token is missing; delete the token cache and re-authorize")]
    MissingRefreshToken,
    #[error("oauth refresh failed: {0}")]
    OAuth(#[from] sheetlog_core::OAuthError),
    #[error("token cache error: {0}")]
    Storage(#[from] StorageError),
}

/// Hands out a valid access token, refreshing through the OAuth client
/// shortly before expiry and persisting the refreshed state to the token
/// cache file.
pub struct TokenProvider {
    state: OAuthState,
    oauth_client: GoogleOAuthClient,
    token_file: TokenFile,
    refresh_skew_secs: i64,
}

impl TokenProvider {
    pub fn new(state: OAuthState, oauth_client: GoogleOAuthClient, token_file: TokenFile) -> Self {
        Self {
            state,
            oauth_client,
            token_file,
            refresh_skew_secs: 60,
        }
    }

    pub async fn valid_access_token(&mut self) -> Result<String, TokenProviderError> {
        if self.should_refresh() {
            self.refresh().await?;
        }
        Ok(self.state.access_token.clone())
    }

    pub fn state(&self) -> &OAuthState {
        &self.state
    }

    fn should_refresh(&self) -> bool {
        let Some(expires_at) = self.state.expires_at else {
            return false;
        };
        expires_at <= now_unix().saturating_add(self.refresh_skew_secs)
    }

    async fn refresh(&mut self) -> Result<(), TokenProviderError> {
        let refresh_token = self
            .state
            .refresh_token
            .clone()
            .ok_or(TokenProviderError::MissingRefreshToken)?;
        let token = self.oauth_client.refresh_token(&refresh_token).await?;
        self.state = oauth_state_from_token(&token, Some(refresh_token));
        self.token_file.save(&self.state)?;
        Ok(())
    }
}

/// Builds the cached state from a token response; a missing refresh token
/// in the response keeps the previous one.
pub fn oauth_state_from_token(token: &OAuthToken, previous_refresh: Option<String>) -> OAuthState {
    OAuthState {
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone().or(previous_refresh),
        expires_at: token
            .expires_in
            .map(|secs| now_unix().saturating_add(secs as i64)),
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
