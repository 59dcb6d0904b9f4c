//! Token request construction for the three supported grants (§4.4).

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::config::{OAuth2AuthData, OAuth2Grant};
use crate::error::{RelayError, RelayResult};

/// A fully-built token request: form body plus whatever Basic-auth
/// credentials apply when `authData.auth_scheme = "basic"`.
pub struct TokenRequest {
    pub form: Vec<(&'static str, String)>,
    pub basic_user: String,
    pub basic_pass: SecretString,
}

/// Resolve the token endpoint and build the form body for `auth`.
///
/// When `refresh_override` is `Some`, a `refresh_token` grant is sent
/// using that token regardless of `auth.grant`'s configured grant type
/// — this is the "MAY perform a refresh-grant before falling back"
/// behavior from §4.4.
pub fn build_token_request(
    auth: &OAuth2AuthData,
    target_endpoint: &Url,
    refresh_override: Option<&str>,
) -> RelayResult<(Url, TokenRequest)> {
    let url = match &auth.token_endpoint {
        Some(u) => u.clone(),
        None => target_endpoint
            .join("/oauth/tokens")
            .map_err(|e| RelayError::credential(format!("invalid default token endpoint: {e}")))?,
    };

    let (client_id, client_secret) = client_credentials(auth);

    let mut form: Vec<(&'static str, String)> = Vec::new();

    if let Some(refresh_token) = refresh_override {
        form.push(("grant_type", "refresh_token".to_string()));
        form.push(("refresh_token", refresh_token.to_string()));
        form.push(("client_id", client_id.clone()));
        form.push(("client_secret", client_secret.expose_secret().to_string()));
    } else {
        match &auth.grant {
            OAuth2Grant::Password {
                username,
                password,
                client_id,
                client_secret,
                scope,
            } => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.expose_secret().to_string()));
                form.push(("client_id", client_id.clone()));
                form.push(("client_secret", client_secret.expose_secret().to_string()));
                if let Some(scope) = scope {
                    form.push(("scope", scope.clone()));
                }
            }
            OAuth2Grant::ClientCredentials {
                client_id,
                client_secret,
                scope,
            } => {
                form.push(("grant_type", "client_credentials".to_string()));
                form.push(("client_id", client_id.clone()));
                form.push(("client_secret", client_secret.expose_secret().to_string()));
                if let Some(scope) = scope {
                    form.push(("scope", scope.clone()));
                }
            }
            OAuth2Grant::RefreshToken {
                refresh_token,
                client_id,
                client_secret,
            } => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh_token.expose_secret().to_string()));
                form.push(("client_id", client_id.clone()));
                form.push(("client_secret", client_secret.expose_secret().to_string()));
            }
        }
    }

    Ok((
        url,
        TokenRequest {
            form,
            basic_user: client_id,
            basic_pass: client_secret,
        },
    ))
}

fn client_credentials(auth: &OAuth2AuthData) -> (String, SecretString) {
    match &auth.grant {
        OAuth2Grant::Password {
            client_id,
            client_secret,
            ..
        }
        | OAuth2Grant::ClientCredentials {
            client_id,
            client_secret,
            ..
        }
        | OAuth2Grant::RefreshToken {
            client_id,
            client_secret,
            ..
        } => (client_id.clone(), client_secret.clone()),
    }
}
