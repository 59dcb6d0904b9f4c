//! Configuration types for the Relay
//!
//! Mirrors the untyped-property-bag source material with a validated,
//! tagged representation instead: `authData` becomes [`AuthSpec`], built
//! once at load time via [`TryFrom`] and never re-parsed per request.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::crypto;
use crate::error::{RelayError, RelayResult};

/// Process-wide configuration snapshot.
///
/// Never mutated after [`RelayConfig::load`] returns; `main.rs` holds it
/// behind an `arc_swap::ArcSwap` so a reload only ever replaces the whole
/// snapshot, matching the "config hot-reload" guidance in the design
/// notes — readers never observe a half-updated config.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub auth_tokens: std::collections::HashSet<String>,
    pub mode: ProxyMode,
    pub chain: Option<ChainConfig>,
    pub targets: HashMap<String, TargetSpec>,
    pub timeout_seconds: u64,
    pub permissions: Permissions,
}

/// Operating mode of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    Direct,
    Chain,
}

/// Chain-mode downstream relay target.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub target: TargetSpec,
}

/// Runtime-override permission flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub allow_target_config: bool,
    pub allow_log_read: bool,
    pub allow_log_level_change: bool,
}

/// A named outbound destination with an endpoint and credential policy.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub endpoint: Url,
    pub description: Option<String>,
    pub enabled: bool,
    pub headers: HashMap<String, String>,
    pub auth: AuthSpec,
    pub variables: HashMap<String, String>,
    pub ignore_certificate_validation: bool,
    pub token: Option<SecretString>,
    pub health_check: Option<HealthCheckSpec>,
    pub timeout_seconds: Option<u64>,
}

/// Validated credential policy for a target. Built once at load time so
/// the forwarder never has to re-validate an untyped property bag on
/// the hot path.
#[derive(Debug, Clone)]
pub enum AuthSpec {
    /// Static headers only (already merged into `TargetSpec::headers`).
    Static,
    /// OAuth 2.0 bearer token via the Token Cache.
    OAuth2(OAuth2AuthData),
    /// OAuth 1.0 request signing.
    OAuth1(crate::oauth1::OAuth1Credentials),
}

/// Validated `authData` for `authType = oauth`.
#[derive(Debug, Clone)]
pub struct OAuth2AuthData {
    pub token_endpoint: Option<Url>,
    pub grant: OAuth2Grant,
    pub auth_scheme_basic: bool,
}

/// The three supported OAuth 2.0 grants (§4.4).
#[derive(Debug, Clone)]
pub enum OAuth2Grant {
    Password {
        username: String,
        password: SecretString,
        client_id: String,
        client_secret: SecretString,
        scope: Option<String>,
    },
    ClientCredentials {
        client_id: String,
        client_secret: SecretString,
        scope: Option<String>,
    },
    RefreshToken {
        refresh_token: SecretString,
        client_id: String,
        client_secret: SecretString,
    },
}

/// `HealthCheckSpec` (§3).
#[derive(Debug, Clone)]
pub struct HealthCheckSpec {
    pub url: Url,
    pub enabled: bool,
    pub kind: HealthCheckKind,
    pub body: Option<String>,
    pub content_type: String,
    pub expected_status_codes: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum HealthCheckKind {
    HttpGet,
    HttpPost,
    TcpConnect,
}

impl RelayConfig {
    /// Load configuration per §6: `TOKENRELAY_CONFIG_MODE=env` reads the
    /// full JSON document from `TOKENRELAY_CONFIG_JSON`; otherwise the
    /// file named by `ConfigPath` (default `tokenrelay.json`) is read.
    pub fn load() -> RelayResult<Self> {
        let raw = if std::env::var("TOKENRELAY_CONFIG_MODE").as_deref() == Ok("env") {
            std::env::var("TOKENRELAY_CONFIG_JSON")
                .map_err(|_| RelayError::config("TOKENRELAY_CONFIG_JSON not set"))?
        } else {
            let path =
                std::env::var("ConfigPath").unwrap_or_else(|_| "tokenrelay.json".to_string());
            std::fs::read_to_string(&path)
                .map_err(|e| RelayError::config(format!("reading {path}: {e}")))?
        };
        Self::from_json(&raw, std::env::var("TOKENRELAY_ENC_KEY").ok().as_deref())
    }

    /// Parse and validate a configuration document, decrypting any
    /// `ENC:`-wrapped secrets with `enc_key` (if provided).
    pub fn from_json(raw: &str, enc_key: Option<&str>) -> RelayResult<Self> {
        let doc: ConfigDocument = serde_json::from_str(raw)?;
        let proxy = doc.proxy;
        let mut targets = HashMap::new();
        for (name, raw_target) in proxy.targets {
            targets.insert(name, RawTargetSpec::validate(raw_target, enc_key)?);
        }
        let chain = match proxy.chain {
            Some(raw) => Some(ChainConfig {
                target: RawTargetSpec::validate(raw.target, enc_key)?,
            }),
            None => None,
        };
        if proxy.mode == ProxyMode::Chain && chain.is_none() {
            return Err(RelayError::config_with_key(
                "mode = chain requires chain.target",
                "chain",
            ));
        }
        let auth_tokens = proxy
            .auth
            .tokens
            .into_iter()
            .map(|t| crypto::decrypt_if_wrapped(&t, enc_key))
            .collect::<RelayResult<_>>()?;
        Ok(RelayConfig {
            auth_tokens,
            mode: proxy.mode,
            chain,
            targets,
            timeout_seconds: proxy.timeout_seconds.unwrap_or(30),
            permissions: proxy.permissions.unwrap_or_default(),
        })
    }

    /// Look up a target by name. O(1); yields at most one spec (§3 invariant).
    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.get(name)
    }

    /// Effective per-request timeout: the target's override, else the
    /// process default.
    pub fn timeout_for(&self, target: &TargetSpec) -> Duration {
        Duration::from_secs(target.timeout_seconds.unwrap_or(self.timeout_seconds))
    }
}

// --- wire format -----------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    proxy: ProxyDocument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyDocument {
    auth: AuthDocument,
    mode: ProxyMode,
    #[serde(default)]
    chain: Option<ChainDocument>,
    #[serde(default)]
    targets: HashMap<String, RawTargetSpec>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    permissions: Option<Permissions>,
}

#[derive(Debug, Deserialize)]
struct AuthDocument {
    tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainDocument {
    target: RawTargetSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTargetSpec {
    endpoint: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    headers: HashMap<String, String>,
    auth_type: String,
    #[serde(default)]
    auth_data: HashMap<String, String>,
    #[serde(default)]
    variables: HashMap<String, String>,
    #[serde(default)]
    ignore_certificate_validation: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    health_check: Option<RawHealthCheck>,
    #[serde(default)]
    health_check_url: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHealthCheck {
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(rename = "type")]
    kind: HealthCheckKind,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    expected_status_codes: Option<Vec<u16>>,
}

fn default_true() -> bool {
    true
}

impl RawTargetSpec {
    fn validate(self, enc_key: Option<&str>) -> RelayResult<TargetSpec> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| RelayError::config_with_key(e.to_string(), "endpoint"))?;

        let mut headers = HashMap::with_capacity(self.headers.len());
        for (k, v) in self.headers {
            headers.insert(k, crypto::decrypt_if_wrapped(&v, enc_key)?);
        }

        let auth = build_auth_spec(&self.auth_type, self.auth_data, enc_key)?;

        let token = self
            .token
            .map(|t| crypto::decrypt_if_wrapped(&t, enc_key))
            .transpose()?
            .map(SecretString::from);

        let health_check = build_health_check(self.health_check, self.health_check_url, &endpoint)?;

        Ok(TargetSpec {
            endpoint,
            description: self.description,
            enabled: self.enabled,
            headers,
            auth,
            variables: self.variables,
            ignore_certificate_validation: self.ignore_certificate_validation,
            token,
            health_check,
            timeout_seconds: self.timeout_seconds,
        })
    }
}

fn build_auth_spec(
    auth_type: &str,
    mut data: HashMap<String, String>,
    enc_key: Option<&str>,
) -> RelayResult<AuthSpec> {
    for v in data.values_mut() {
        *v = crypto::decrypt_if_wrapped(v, enc_key)?;
    }
    match auth_type {
        "static" => Ok(AuthSpec::Static),
        "oauth" => {
            let token_endpoint = match data.remove("token_endpoint") {
                Some(u) => Some(
                    Url::parse(&u)
                        .map_err(|e| RelayError::config_with_key(e.to_string(), "token_endpoint"))?,
                ),
                None => None,
            };
            let auth_scheme_basic = data.remove("auth_scheme").as_deref() == Some("basic");
            let grant_type = data
                .remove("grant_type")
                .ok_or_else(|| RelayError::config_with_key("grant_type is required", "authData"))?;
            let grant = match grant_type.as_str() {
                "password" => OAuth2Grant::Password {
                    username: require(&mut data, "username")?,
                    password: SecretString::from(require(&mut data, "password")?),
                    client_id: require(&mut data, "client_id")?,
                    client_secret: SecretString::from(require(&mut data, "client_secret")?),
                    scope: data.remove("scope"),
                },
                "client_credentials" => OAuth2Grant::ClientCredentials {
                    client_id: require(&mut data, "client_id")?,
                    client_secret: SecretString::from(require(&mut data, "client_secret")?),
                    scope: data.remove("scope"),
                },
                "refresh_token" => OAuth2Grant::RefreshToken {
                    refresh_token: SecretString::from(require(&mut data, "refresh_token")?),
                    client_id: require(&mut data, "client_id")?,
                    client_secret: SecretString::from(require(&mut data, "client_secret")?),
                },
                other => {
                    return Err(RelayError::config_with_key(
                        format!("unsupported grant_type: {other}"),
                        "grant_type",
                    ));
                }
            };
            Ok(AuthSpec::OAuth2(OAuth2AuthData {
                token_endpoint,
                grant,
                auth_scheme_basic,
            }))
        }
        "oauth1" => {
            let signature_method = match data.remove("signature_method").as_deref() {
                Some("HMAC-SHA1") => crate::oauth1::SignatureMethod::HmacSha1,
                Some("HMAC-SHA256") | None => crate::oauth1::SignatureMethod::HmacSha256,
                Some(other) => {
                    return Err(RelayError::config_with_key(
                        format!("unsupported signature_method: {other}"),
                        "signature_method",
                    ));
                }
            };
            Ok(AuthSpec::OAuth1(crate::oauth1::OAuth1Credentials {
                consumer_key: require(&mut data, "consumer_key")?,
                consumer_secret: SecretString::from(require(&mut data, "consumer_secret")?),
                token: require(&mut data, "token")?,
                token_secret: SecretString::from(require(&mut data, "token_secret")?),
                realm: data.remove("realm"),
                signature_method,
            }))
        }
        other => Err(RelayError::config_with_key(
            format!("unsupported authType: {other}"),
            "authType",
        )),
    }
}

fn require(data: &mut HashMap<String, String>, key: &str) -> RelayResult<String> {
    data.remove(key)
        .ok_or_else(|| RelayError::config_with_key(format!("missing authData.{key}"), key))
}

fn build_health_check(
    structured: Option<RawHealthCheck>,
    legacy_url: Option<String>,
    endpoint: &Url,
) -> RelayResult<Option<HealthCheckSpec>> {
    // The structured form wins when both are present (Open Question in §9).
    let Some(raw) = structured.or_else(|| {
        legacy_url.map(|url| RawHealthCheck {
            url: Some(url),
            enabled: true,
            kind: HealthCheckKind::HttpGet,
            body: None,
            content_type: None,
            expected_status_codes: None,
        })
    }) else {
        return Ok(None);
    };

    let url_str = raw.url.ok_or_else(|| {
        RelayError::config_with_key("healthCheck.url is required", "healthCheck.url")
    })?;
    let url = endpoint
        .join(&url_str)
        .map_err(|e| RelayError::config_with_key(e.to_string(), "healthCheck.url"))?;

    Ok(Some(HealthCheckSpec {
        url,
        enabled: raw.enabled,
        kind: raw.kind,
        body: raw.body,
        content_type: raw
            .content_type
            .unwrap_or_else(|| "application/json".to_string()),
        expected_status_codes: raw.expected_status_codes.unwrap_or_else(|| vec![200]),
    }))
}
