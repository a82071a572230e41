//! Core bridge agent structure
//!
//! The BridgeAgent holds shared state for handling protocol requests and
//! routes each inbound method to its handler.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::handlers;
use crate::backend::Backend;
use crate::client::EditorClient;
use crate::files::FileAccess;
use crate::permissions::PermissionEngine;
use crate::resolver::FileResolver;
use crate::session::{SessionManager, TurnServices};
use crate::telemetry::install_panic_hook;
use crate::tools::{ToolExecutor, WorkspaceTools};
use crate::telemetry::ResultTraceExt;
use crate::transport::{Admission, MessageHandler, RpcError};
use crate::types::protocol::{ClientCapabilities, methods};
use crate::types::{AgentError, BridgeConfig, Result};

/// Counts from one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub sessions_reaped: usize,
    pub permissions_swept: usize,
    pub resolver_swept: usize,
}

/// The bridge between one editor connection and the backend
pub struct BridgeAgent {
    config: BridgeConfig,
    sessions: Arc<SessionManager>,
    permissions: Arc<PermissionEngine>,
    resolver: Arc<FileResolver>,
    tools: Arc<dyn ToolExecutor>,
    backend: Arc<dyn Backend>,
    client: Arc<dyn EditorClient>,
    /// Set once by `initialize`; unset means not initialized
    capabilities: OnceLock<ClientCapabilities>,
}

impl std::fmt::Debug for BridgeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeAgent")
            .field("sessions", &self.sessions)
            .field("capabilities", &self.capabilities.get())
            .finish_non_exhaustive()
    }
}

impl BridgeAgent {
    pub fn new(
        config: BridgeConfig,
        backend: Arc<dyn Backend>,
        client: Arc<dyn EditorClient>,
    ) -> Self {
        install_panic_hook();

        let resolver = Arc::new(FileResolver::new(&config.resolver));
        let tools = Arc::new(WorkspaceTools::new(
            resolver.ignores(),
            config.resolver.max_walk_entries,
        ));
        Self {
            sessions: Arc::new(SessionManager::new(
                config.sessions.clone(),
                Arc::clone(&client),
            )),
            permissions: Arc::new(PermissionEngine::new(&config.permissions)),
            resolver,
            tools,
            backend,
            client,
            capabilities: OnceLock::new(),
            config,
        }
    }

    /// Replace the built-in tool executor
    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn name(&self) -> &'static str {
        env!("CARGO_PKG_NAME")
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn permissions(&self) -> &Arc<PermissionEngine> {
        &self.permissions
    }

    pub fn resolver(&self) -> &Arc<FileResolver> {
        &self.resolver
    }

    /// Capabilities negotiated by `initialize`
    pub fn capabilities(&self) -> Result<ClientCapabilities> {
        self.capabilities
            .get()
            .copied()
            .ok_or(AgentError::NotInitialized)
    }

    pub(super) fn set_capabilities(&self, capabilities: ClientCapabilities) {
        if self.capabilities.set(capabilities).is_err() {
            tracing::warn!("Repeated initialize; keeping the first negotiated capabilities");
        }
    }

    /// Collaborators for a prompt turn, using the negotiated file access
    pub fn services(&self) -> Result<TurnServices> {
        let capabilities = self.capabilities()?;
        Ok(TurnServices {
            backend: Arc::clone(&self.backend),
            permissions: Arc::clone(&self.permissions),
            resolver: Arc::clone(&self.resolver),
            tools: Arc::clone(&self.tools),
            client: Arc::clone(&self.client),
            files: FileAccess::new(Arc::clone(&self.client), capabilities.fs),
        })
    }

    /// Reap idle sessions and sweep expired cache entries
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            sessions_reaped: self.sessions.reap_expired().len(),
            permissions_swept: self.permissions.sweep(),
            resolver_swept: self.resolver.sweep(),
        };
        if report != MaintenanceReport::default() {
            tracing::debug!(?report, "Maintenance pass");
        }
        report
    }

    /// Destroy every session
    pub fn shutdown(&self) -> usize {
        self.sessions.destroy_all()
    }

    /// Route one request
    ///
    /// Synchronous handlers finish before `admission` is released, so a
    /// frame read after `initialize` or `session/new` sees their effect.
    async fn dispatch(&self, method: &str, params: Value, mut admission: Admission) -> Result<Value> {
        if method == methods::INITIALIZE {
            return to_value(handlers::initialize(self, parse(params)?));
        }
        let capabilities = self.capabilities()?;

        match method {
            methods::SESSION_NEW => to_value(handlers::new_session(self, parse(params)?)?),
            methods::SESSION_LOAD => {
                to_value(handlers::load_session(self, parse(params)?, admission).await?)
            }
            methods::SESSION_PROMPT => {
                to_value(handlers::prompt(self, parse(params)?, admission).await?)
            }
            methods::FS_READ_TEXT_FILE if capabilities.fs.read_text_file => {
                admission.admit();
                to_value(handlers::read_text_file(self, parse(params)?).await?)
            }
            methods::FS_WRITE_TEXT_FILE if capabilities.fs.write_text_file => {
                admission.admit();
                to_value(handlers::write_text_file(self, parse(params)?).await?)
            }
            _ => Err(AgentError::method_not_found(method)),
        }
    }
}

#[async_trait]
impl MessageHandler for BridgeAgent {
    async fn handle_request(
        &self,
        method: &str,
        params: Value,
        admission: Admission,
    ) -> std::result::Result<Value, RpcError> {
        self.dispatch(method, params, admission)
            .await
            .traced(method)
            .map_err(|e| RpcError::from(&e))
    }

    async fn handle_notification(&self, method: &str, params: Value) {
        match method {
            methods::SESSION_CANCEL => match parse(params) {
                Ok(notification) => handlers::cancel(self, notification),
                Err(e) => tracing::warn!(error = %e, "Malformed cancel notification"),
            },
            _ => tracing::debug!(method, "Ignoring unknown notification"),
        }
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| AgentError::invalid_params(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
