//! HTTP Client Pool (§4.7).
//!
//! Two reqwest clients, selected per request by a target's
//! `ignoreCertificateValidation` flag. Connection reuse follows the
//! same shape as the teacher's HTTP backend client (pooled idle
//! connections, bounded lifetime, timeouts set at request dispatch
//! rather than baked into the client).

use std::time::Duration;

use crate::error::{RelayError, RelayResult};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_MAX_IDLE_PER_HOST_AUX: usize = 50;
const POOL_LIFETIME: Duration = Duration::from_secs(300);
const MAX_REDIRECTS: usize = 10;

/// Holds the verified and insecure reqwest clients plus the auxiliary
/// client used for health checks and token acquisition (always
/// verified; health checks don't opt into `ignoreCertificateValidation`).
#[derive(Clone)]
pub struct ClientPool {
    verified: reqwest::Client,
    insecure: reqwest::Client,
    auxiliary: reqwest::Client,
}

impl ClientPool {
    /// Build both pools. Fails only if the underlying TLS backend
    /// can't be initialized, which should not happen with rustls-tls.
    pub fn new() -> RelayResult<Self> {
        let verified = base_builder()
            .build()
            .map_err(|e| RelayError::internal(format!("building HTTP client: {e}")))?;
        let insecure = base_builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| RelayError::internal(format!("building insecure HTTP client: {e}")))?;
        let auxiliary = base_builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST_AUX)
            .build()
            .map_err(|e| RelayError::internal(format!("building auxiliary HTTP client: {e}")))?;
        Ok(Self {
            verified,
            insecure,
            auxiliary,
        })
    }

    /// Select the pool to use for forwarding to a target.
    pub fn for_target(&self, ignore_certificate_validation: bool) -> &reqwest::Client {
        if ignore_certificate_validation {
            &self.insecure
        } else {
            &self.verified
        }
    }

    /// The pool used for health checks and OAuth 2.0 token acquisition
    /// — always certificate-verified, a smaller per-host cap since this
    /// traffic is low-volume relative to proxied requests.
    pub fn auxiliary(&self) -> &reqwest::Client {
        &self.auxiliary
    }
}

fn base_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Some(POOL_LIFETIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_both_pools_without_error() {
        let pool = ClientPool::new().unwrap();
        let _ = pool.for_target(false);
        let _ = pool.for_target(true);
        let _ = pool.auxiliary();
    }
}
