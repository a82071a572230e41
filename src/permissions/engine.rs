//! Permission decisions for tool calls
//!
//! Decisions are keyed by `(tool type, discriminating parameter)`. A live
//! `always`/`never` entry answers without asking the editor; otherwise the
//! editor is asked and the decision follows strictly from the option the
//! user picked. Any failure along the way denies.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::cache::TtlCache;
use crate::client::EditorClient;
use crate::converter::notification::tool_call_fields;
use crate::resolver::normalize;
use crate::types::protocol::{
    PermissionOption, PermissionOptionKind, RequestPermissionOutcome, RequestPermissionRequest,
};
use crate::types::{PermissionConfig, ToolCall, ToolType};

use super::options::{grant_is_kind_wide, options_for};

/// Discriminator used for kind-wide grants
const ANY: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    Once,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool_type: ToolType,
    pub discriminator: String,
}

impl CacheKey {
    /// Key for `call` in a session rooted at `root`
    ///
    /// File paths are normalized against the root, so `a.rs` and `./a.rs`
    /// share one entry.
    pub fn for_call(call: &ToolCall, root: &Path) -> Self {
        let discriminator = match call.path() {
            Some(path) => normalize(&root.join(path)).display().to_string(),
            None => call.discriminator().to_string(),
        };
        Self {
            tool_type: call.tool_type(),
            discriminator,
        }
    }

    fn kind_wide(tool_type: ToolType) -> Self {
        Self {
            tool_type,
            discriminator: ANY.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tool_type, self.discriminator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub scope: PermissionScope,
    pub cache_key: CacheKey,
    pub decided_at: Instant,
}

impl PermissionDecision {
    fn new(allowed: bool, scope: PermissionScope, cache_key: CacheKey, now: Instant) -> Self {
        Self {
            allowed,
            scope,
            cache_key,
            decided_at: now,
        }
    }
}

#[derive(Debug)]
pub struct PermissionEngine {
    cache: TtlCache<CacheKey, PermissionDecision>,
}

impl PermissionEngine {
    pub fn new(config: &PermissionConfig) -> Self {
        Self::with_ttl(config.cache_capacity, config.cache_ttl())
    }

    pub fn with_ttl(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(capacity, ttl),
        }
    }

    pub async fn decide(
        &self,
        session_id: &str,
        root: &Path,
        call: &ToolCall,
        client: &dyn EditorClient,
    ) -> PermissionDecision {
        self.decide_at(session_id, root, call, client, Instant::now()).await
    }

    #[tracing::instrument(
        name = "permission_decide",
        skip_all,
        fields(session_id = %session_id, tool_call_id = %call.id, tool_type = %call.tool_type())
    )]
    pub async fn decide_at(
        &self,
        session_id: &str,
        root: &Path,
        call: &ToolCall,
        client: &dyn EditorClient,
        now: Instant,
    ) -> PermissionDecision {
        let key = CacheKey::for_call(call, root);

        if let Some(cached) = self.cached_at(&key, now) {
            tracing::debug!(
                cache_key = %cached.cache_key,
                allowed = cached.allowed,
                "Permission served from cache"
            );
            return cached;
        }

        let options = options_for(key.tool_type);
        let request = RequestPermissionRequest {
            session_id: session_id.to_string(),
            tool_call: tool_call_fields(call),
            options: options.clone(),
        };

        let decision = match client.request_permission(request).await {
            Ok(response) => match response.outcome {
                RequestPermissionOutcome::Cancelled => {
                    tracing::info!(cache_key = %key, "Permission request cancelled");
                    PermissionDecision::new(false, PermissionScope::Once, key, now)
                }
                RequestPermissionOutcome::Selected { option_id } => {
                    match options.iter().find(|o| o.option_id == option_id) {
                        Some(chosen) => self.record(chosen, key, now),
                        None => {
                            tracing::warn!(
                                option_id = %option_id,
                                cache_key = %key,
                                "Editor selected an option that was not offered, denying"
                            );
                            PermissionDecision::new(false, PermissionScope::Once, key, now)
                        }
                    }
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, cache_key = %key, "Permission request failed, denying");
                PermissionDecision::new(false, PermissionScope::Never, key, now)
            }
        };

        tracing::info!(
            cache_key = %decision.cache_key,
            allowed = decision.allowed,
            scope = ?decision.scope,
            "Permission decided"
        );
        decision
    }

    /// Turn the chosen option into a decision, caching persistent scopes
    fn record(&self, chosen: &PermissionOption, key: CacheKey, now: Instant) -> PermissionDecision {
        let (allowed, scope) = match chosen.kind {
            PermissionOptionKind::AllowOnce => (true, PermissionScope::Once),
            PermissionOptionKind::AllowAlways => (true, PermissionScope::Always),
            PermissionOptionKind::RejectOnce => (false, PermissionScope::Once),
            PermissionOptionKind::RejectAlways => (false, PermissionScope::Never),
        };

        let key = if allowed && scope == PermissionScope::Always && grant_is_kind_wide(key.tool_type)
        {
            CacheKey::kind_wide(key.tool_type)
        } else {
            key
        };

        let decision = PermissionDecision::new(allowed, scope, key.clone(), now);
        if scope != PermissionScope::Once {
            self.cache.insert_at(key, decision.clone(), now);
        }
        decision
    }

    /// Live cached decision for `key`, exact match first, then kind-wide
    pub fn cached_at(&self, key: &CacheKey, now: Instant) -> Option<PermissionDecision> {
        self.cache.get_at(key, now).or_else(|| {
            grant_is_kind_wide(key.tool_type)
                .then(|| self.cache.get_at(&CacheKey::kind_wide(key.tool_type), now))
                .flatten()
        })
    }

    /// Drop once-scoped entries; called when a new turn starts
    pub fn purge_once(&self) {
        self.cache.retain(|d| d.scope != PermissionScope::Once);
    }

    /// Drop expired entries
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        self.cache.sweep_at(now)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
