//! Plugin invocation collaborator (§6, §10).
//!
//! The file-upload/"function" plugin controller is an external
//! collaborator out of core scope (§1); only its interface is honored
//! here so `/function/{plugin}/{function}` is honestly represented.
//! Callers supply a [`PluginInvoker`] via `AppState`; the default,
//! [`NotConfiguredInvoker`], always answers 501.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RelayError, RelayResult};

/// Parameters gathered from an inbound `/function/*` request: query
/// string, form fields, and/or a parsed JSON body, merged by the
/// caller before dispatch.
#[derive(Debug, Clone, Default)]
pub struct PluginParams {
    pub fields: HashMap<String, Value>,
}

/// What a plugin invocation returns (§6).
pub enum PluginOutcome {
    /// A JSON response body, relayed as-is.
    Json(Value),
    /// A streamed response; `filename` controls whether
    /// `Content-Disposition` is set.
    Stream {
        content_type: String,
        filename: Option<String>,
        body: Vec<u8>,
    },
}

/// External plugin collaborator (§6). Implementations live outside
/// this crate's core scope; this trait only pins down the contract the
/// `/function/*` route imposes on them.
#[async_trait]
pub trait PluginInvoker: Send + Sync {
    async fn invoke(
        &self,
        plugin: &str,
        function: &str,
        params: PluginParams,
    ) -> RelayResult<PluginOutcome>;
}

/// Default invoker used when no plugin backend is wired up. Always
/// returns a 501-mapped error so the route is honest about the feature
/// being out of scope rather than silently no-op-ing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotConfiguredInvoker;

#[async_trait]
impl PluginInvoker for NotConfiguredInvoker {
    async fn invoke(
        &self,
        plugin: &str,
        function: &str,
        _params: PluginParams,
    ) -> RelayResult<PluginOutcome> {
        Err(RelayError::not_implemented(format!(
            "no plugin invoker configured for {plugin}/{function}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_configured_invoker_always_errors() {
        let invoker = NotConfiguredInvoker;
        let result = invoker.invoke("demo", "run", PluginParams::default()).await;
        assert!(result.is_err());
    }
}
