//! Editor-side collaborator
//!
//! Everything the bridge asks of the editor: permission prompts, file
//! reads and writes, and streamed session updates.

use async_trait::async_trait;

use crate::transport::ConnectionHandle;
use crate::types::Result;
use crate::types::protocol::{
    ReadTextFileRequest, ReadTextFileResponse, RequestPermissionRequest,
    RequestPermissionResponse, SessionNotification, WriteTextFileRequest, WriteTextFileResponse,
    methods,
};

#[async_trait]
pub trait EditorClient: Send + Sync + 'static {
    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse>;

    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<ReadTextFileResponse>;

    async fn write_text_file(&self, request: WriteTextFileRequest)
    -> Result<WriteTextFileResponse>;

    async fn session_update(&self, notification: SessionNotification) -> Result<()>;
}

/// [`EditorClient`] backed by the live connection
#[derive(Debug, Clone)]
pub struct ConnectionClient {
    connection: ConnectionHandle,
}

impl ConnectionClient {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl EditorClient for ConnectionClient {
    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse> {
        self.connection
            .call(methods::SESSION_REQUEST_PERMISSION, &request)
            .await
    }

    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<ReadTextFileResponse> {
        self.connection
            .call(methods::FS_READ_TEXT_FILE, &request)
            .await
    }

    async fn write_text_file(
        &self,
        request: WriteTextFileRequest,
    ) -> Result<WriteTextFileResponse> {
        let value = self
            .connection
            .request(
                methods::FS_WRITE_TEXT_FILE,
                serde_json::to_value(&request)?,
            )
            .await?;
        // Editors answer either `{}` or `null`
        if value.is_null() {
            return Ok(WriteTextFileResponse {});
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn session_update(&self, notification: SessionNotification) -> Result<()> {
        self.connection
            .notify(methods::SESSION_UPDATE, &notification)
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable editor double

    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use tokio::sync::Notify;

    use super::*;
    use crate::types::AgentError;
    use crate::types::protocol::RequestPermissionOutcome;

    #[derive(Debug, Clone)]
    pub enum PermissionReply {
        Select(&'static str),
        Cancel,
        Fail,
    }

    #[derive(Debug, Default)]
    pub struct RecordingClient {
        pub permission_replies: Mutex<VecDeque<PermissionReply>>,
        pub permission_requests: Mutex<Vec<RequestPermissionRequest>>,
        pub updates: Mutex<Vec<SessionNotification>>,
        pub files: Mutex<HashMap<PathBuf, String>>,
        pub writes: Mutex<Vec<WriteTextFileRequest>>,
        /// When set, permission replies wait for a notification
        pub permission_gate: Mutex<Option<Arc<Notify>>>,
    }

    impl RecordingClient {
        pub fn with_replies(replies: impl IntoIterator<Item = PermissionReply>) -> Self {
            let client = Self::default();
            client
                .permission_replies
                .lock()
                .unwrap()
                .extend(replies);
            client
        }

        pub fn permission_count(&self) -> usize {
            self.permission_requests.lock().unwrap().len()
        }

        pub fn updates(&self) -> Vec<SessionNotification> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EditorClient for RecordingClient {
        async fn request_permission(
            &self,
            request: RequestPermissionRequest,
        ) -> Result<RequestPermissionResponse> {
            self.permission_requests.lock().unwrap().push(request);
            let gate = self.permission_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let reply = self
                .permission_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PermissionReply::Cancel);
            match reply {
                PermissionReply::Select(id) => Ok(RequestPermissionResponse {
                    outcome: RequestPermissionOutcome::Selected {
                        option_id: id.to_string(),
                    },
                }),
                PermissionReply::Cancel => Ok(RequestPermissionResponse {
                    outcome: RequestPermissionOutcome::Cancelled,
                }),
                PermissionReply::Fail => Err(AgentError::ConnectionClosed),
            }
        }

        async fn read_text_file(
            &self,
            request: ReadTextFileRequest,
        ) -> Result<ReadTextFileResponse> {
            self.files
                .lock()
                .unwrap()
                .get(&request.path)
                .cloned()
                .map(|content| ReadTextFileResponse { content })
                .ok_or_else(|| AgentError::internal("no such file in editor"))
        }

        async fn write_text_file(
            &self,
            request: WriteTextFileRequest,
        ) -> Result<WriteTextFileResponse> {
            self.files
                .lock()
                .unwrap()
                .insert(request.path.clone(), request.content.clone());
            self.writes.lock().unwrap().push(request);
            Ok(WriteTextFileResponse {})
        }

        async fn session_update(&self, notification: SessionNotification) -> Result<()> {
            self.updates.lock().unwrap().push(notification);
            Ok(())
        }
    }
}
