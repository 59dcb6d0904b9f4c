//! OAuth 1.0 request signer (RFC 5849 §3), per §4.3.
//!
//! Pure function from (method, URL, query/body params, credentials,
//! nonce, timestamp) to an `Authorization: OAuth …` header. Percent
//! encoding and signing follow the RFC 3986 unreserved-character set;
//! no crate currently in the dependency tree implements this, so it is
//! hand-rolled against the unreserved set the same way the reference
//! 4shared OAuth1 client in this corpus does, extended here to also
//! cover HMAC-SHA256 and full query/body parameter collection.

use std::collections::BTreeSet;

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha1::Sha1;
use sha2::Sha256;
use url::Url;

/// OAuth 1.0 credentials for a single target (§3 data model).
#[derive(Debug, Clone)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: SecretString,
    pub token: String,
    pub token_secret: SecretString,
    pub realm: Option<String>,
    pub signature_method: SignatureMethod,
}

/// Supported HMAC signature methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    HmacSha1,
    HmacSha256,
}

impl SignatureMethod {
    fn name(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }

    fn sign(self, key: &[u8], base_string: &str) -> Vec<u8> {
        match self {
            Self::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(base_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            Self::HmacSha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(base_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}

/// Percent-encode per RFC 3986's unreserved set (`A-Za-z0-9-._~`).
/// Distinct from `percent_encoding`'s default sets, which keep extra
/// characters unescaped that RFC 5849 requires escaped.
pub fn pct_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Generate a nonce of at least 16 bytes of randomness, rendered as
/// lowercase alphanumerics so it never contains `+`, `/`, or `=`.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| {
            const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
            ALPHABET[(*b as usize) % ALPHABET.len()] as char
        })
        .collect()
}

/// Current Unix timestamp in integer seconds.
pub fn generate_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A single `name=value` parameter contributing to the signature base
/// string — from the URL's query string, the OAuth protocol parameters,
/// or (when the body is form-encoded) the body parameters.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub value: String,
}

fn base_string_uri(url: &Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port_suffix = match (scheme.as_str(), url.port()) {
        ("https", Some(443)) | ("http", Some(80)) | (_, None) => String::new(),
        (_, Some(p)) => format!(":{p}"),
    };
    format!("{scheme}://{host}{port_suffix}{}", url.path())
}

fn query_params(url: &Url) -> Vec<Param> {
    url.query_pairs()
        .map(|(k, v)| Param {
            name: k.into_owned(),
            value: v.into_owned(),
        })
        .collect()
}

/// Build the RFC 5849 signature base string from method, URL, and the
/// full parameter collection (query + OAuth protocol params + optional
/// form body params). `oauth_signature` and `realm` must already be
/// excluded from `params`.
pub fn signature_base_string(method: &str, url: &Url, params: &[Param]) -> String {
    let mut encoded: BTreeSet<(String, String)> = BTreeSet::new();
    for p in params {
        encoded.insert((pct_encode(&p.name), pct_encode(&p.value)));
    }
    let joined = encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        pct_encode(&base_string_uri(url)),
        pct_encode(&joined)
    )
}

/// Compute the full `Authorization: OAuth …` header for a request.
///
/// `body_form_params` is `Some(..)` only when the request's
/// `Content-Type` is `application/x-www-form-urlencoded` (§4.3 step 2);
/// it is `None` otherwise so body bytes never affect the signature.
pub fn sign_request(
    method: &str,
    url: &Url,
    body_form_params: Option<&[(String, String)]>,
    creds: &OAuth1Credentials,
    nonce: &str,
    timestamp: u64,
) -> String {
    let mut params = query_params(url);
    params.push(Param {
        name: "oauth_consumer_key".to_string(),
        value: creds.consumer_key.clone(),
    });
    params.push(Param {
        name: "oauth_token".to_string(),
        value: creds.token.clone(),
    });
    params.push(Param {
        name: "oauth_signature_method".to_string(),
        value: creds.signature_method.name().to_string(),
    });
    params.push(Param {
        name: "oauth_timestamp".to_string(),
        value: timestamp.to_string(),
    });
    params.push(Param {
        name: "oauth_nonce".to_string(),
        value: nonce.to_string(),
    });
    params.push(Param {
        name: "oauth_version".to_string(),
        value: "1.0".to_string(),
    });
    if let Some(body_params) = body_form_params {
        for (k, v) in body_params {
            params.push(Param {
                name: k.clone(),
                value: v.clone(),
            });
        }
    }

    let base_string = signature_base_string(method, url, &params);
    let signing_key = format!(
        "{}&{}",
        pct_encode(creds.consumer_secret.expose_secret()),
        pct_encode(creds.token_secret.expose_secret())
    );
    let signature = creds
        .signature_method
        .sign(signing_key.as_bytes(), &base_string);
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature);

    let realm_part = creds
        .realm
        .as_ref()
        .map(|r| format!("realm=\"{}\", ", pct_encode(r)))
        .unwrap_or_default();

    format!(
        "OAuth {realm_part}oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature_method=\"{}\", oauth_timestamp=\"{}\", oauth_nonce=\"{}\", oauth_version=\"1.0\", oauth_signature=\"{}\"",
        pct_encode(&creds.consumer_key),
        pct_encode(&creds.token),
        creds.signature_method.name(),
        timestamp,
        pct_encode(nonce),
        pct_encode(&signature_b64),
    )
}
