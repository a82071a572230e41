//! Capability-gated file access
//!
//! Reads and writes go through the editor when it advertised the matching
//! `fs` capability during `initialize` (so unsaved buffers are seen), and
//! straight to disk otherwise.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::client::EditorClient;
use crate::types::Result;
use crate::types::protocol::{FileSystemCapability, ReadTextFileRequest, WriteTextFileRequest};

#[derive(Clone)]
pub struct FileAccess {
    client: Option<Arc<dyn EditorClient>>,
    capability: FileSystemCapability,
}

impl fmt::Debug for FileAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAccess")
            .field("has_client", &self.client.is_some())
            .field("capability", &self.capability)
            .finish()
    }
}

impl FileAccess {
    /// Local filesystem only
    pub fn local() -> Self {
        Self {
            client: None,
            capability: FileSystemCapability::default(),
        }
    }

    pub fn new(client: Arc<dyn EditorClient>, capability: FileSystemCapability) -> Self {
        Self {
            client: Some(client),
            capability,
        }
    }

    fn reader(&self) -> Option<&Arc<dyn EditorClient>> {
        self.client
            .as_ref()
            .filter(|_| self.capability.read_text_file)
    }

    fn writer(&self) -> Option<&Arc<dyn EditorClient>> {
        self.client
            .as_ref()
            .filter(|_| self.capability.write_text_file)
    }

    pub async fn read_text(&self, session_id: &str, path: &Path) -> Result<String> {
        match self.reader() {
            Some(client) => {
                let response = client
                    .read_text_file(ReadTextFileRequest {
                        session_id: session_id.to_string(),
                        path: path.to_path_buf(),
                        line: None,
                        limit: None,
                    })
                    .await?;
                Ok(response.content)
            }
            None => Ok(tokio::fs::read_to_string(path).await?),
        }
    }

    pub async fn write_text(&self, session_id: &str, path: &Path, content: &str) -> Result<()> {
        match self.writer() {
            Some(client) => {
                client
                    .write_text_file(WriteTextFileRequest {
                        session_id: session_id.to_string(),
                        path: path.to_path_buf(),
                        content: content.to_string(),
                    })
                    .await?;
                Ok(())
            }
            None => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Ok(tokio::fs::write(path, content).await?)
            }
        }
    }
}

/// Slice `content` to `limit` lines starting at 1-based `line`
pub fn slice_lines(content: &str, line: Option<u32>, limit: Option<u32>) -> String {
    if line.is_none() && limit.is_none() {
        return content.to_string();
    }
    let skip = line.map_or(0, |l| l.saturating_sub(1) as usize);
    let take = limit.map_or(usize::MAX, |l| l as usize);
    content
        .split_inclusive('\n')
        .skip(skip)
        .take(take)
        .collect()
}
