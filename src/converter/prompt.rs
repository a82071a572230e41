//! Prompt content to backend text conversion
//!
//! File references are resolved against the session root and inlined as
//! `<context>` blocks so the backend sees their contents.

use std::path::Path;

use crate::files::FileAccess;
use crate::resolver::{FileResolver, ResolveError, strip_file_scheme};
use crate::types::protocol::{ContentBlock, ResourceLink};

/// A prompt ready to hand to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Full text including inlined context
    pub text: String,
    /// Only the text the user typed, used for history replay
    pub user_text: String,
    pub image_count: usize,
}

/// Convert prompt blocks, resolving resource links through `resolver`
pub async fn render_prompt(
    session_id: &str,
    root: &Path,
    blocks: &[ContentBlock],
    resolver: &FileResolver,
    files: &FileAccess,
) -> RenderedPrompt {
    let mut parts = Vec::with_capacity(blocks.len());
    let mut user_parts = Vec::new();
    let mut image_count = 0;

    for block in blocks {
        match block {
            ContentBlock::Text(t) => {
                parts.push(t.text.clone());
                user_parts.push(t.text.clone());
            }
            ContentBlock::Image(_) => {
                image_count += 1;
            }
            ContentBlock::Resource(embedded) => {
                let resource = &embedded.resource;
                match &resource.text {
                    Some(text) => parts.push(context_block(&resource.uri, text)),
                    None => tracing::debug!(uri = %resource.uri, "Skipping non-text resource"),
                }
            }
            ContentBlock::ResourceLink(link) => {
                if let Some(part) = render_link(session_id, root, link, resolver, files).await {
                    parts.push(part);
                }
            }
        }
    }

    if image_count > 0 {
        tracing::debug!(image_count, "Images are not forwarded as text");
    }

    RenderedPrompt {
        text: parts.join("\n"),
        user_text: user_parts.join("\n"),
        image_count,
    }
}

async fn render_link(
    session_id: &str,
    root: &Path,
    link: &ResourceLink,
    resolver: &FileResolver,
    files: &FileAccess,
) -> Option<String> {
    match resolver.resolve(session_id, root, &link.uri, files).await {
        Ok(Some(resolved)) => Some(context_block(
            &resolved.path.display().to_string(),
            &resolved.text,
        )),
        Ok(None) => Some(markdown_link(link)),
        Err(ResolveError::Traversal { path }) => {
            tracing::warn!(
                session_id,
                path = %path.display(),
                "Dropping reference outside the session root"
            );
            None
        }
        Err(e) => {
            tracing::debug!(uri = %link.uri, error = %e, "Reference unreadable, linking instead");
            Some(markdown_link(link))
        }
    }
}

fn context_block(uri: &str, text: &str) -> String {
    format!("<context uri=\"{uri}\">\n{text}\n</context>")
}

fn markdown_link(link: &ResourceLink) -> String {
    let path = strip_file_scheme(&link.uri);
    let title = link.title.as_deref().unwrap_or(&link.name);
    format!("[{title}]({path})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolverConfig;
    use crate::types::protocol::{EmbeddedResource, ImageContent, ResourceContents};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn link(uri: &str) -> ContentBlock {
        ContentBlock::ResourceLink(ResourceLink {
            uri: uri.to_string(),
            name: "notes.md".into(),
            title: None,
        })
    }

    async fn render(dir: &TempDir, blocks: &[ContentBlock]) -> RenderedPrompt {
        let resolver = FileResolver::new(&ResolverConfig::default());
        render_prompt("s1", dir.path(), blocks, &resolver, &FileAccess::local()).await
    }

    #[tokio::test]
    async fn test_text_and_embedded_resource() {
        let dir = TempDir::new().unwrap();
        let blocks = [
            ContentBlock::text("Explain this"),
            ContentBlock::Resource(EmbeddedResource {
                resource: ResourceContents {
                    uri: "file:///x/a.rs".into(),
                    text: Some("fn main() {}".into()),
                    mime_type: None,
                },
            }),
        ];
        let rendered = render(&dir, &blocks).await;
        assert_eq!(
            rendered.text,
            "Explain this\n<context uri=\"file:///x/a.rs\">\nfn main() {}\n</context>"
        );
        assert_eq!(rendered.user_text, "Explain this");
    }

    #[tokio::test]
    async fn test_link_resolved_by_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/notes.md"), "hello").unwrap();

        let rendered = render(&dir, &[link("notes.md")]).await;
        let expected = context_block(
            &dir.path().join("docs/notes.md").display().to_string(),
            "hello",
        );
        assert_eq!(rendered.text, expected);
    }

    #[tokio::test]
    async fn test_unresolved_link_becomes_markdown() {
        let dir = TempDir::new().unwrap();
        let rendered = render(&dir, &[link("missing.md")]).await;
        assert_eq!(rendered.text, "[notes.md](missing.md)");
    }

    #[tokio::test]
    async fn test_traversal_link_dropped_and_images_counted() {
        let dir = TempDir::new().unwrap();
        let blocks = [
            link("file:///etc/passwd"),
            ContentBlock::Image(ImageContent {
                data: "aGk=".into(),
                mime_type: "image/png".into(),
            }),
        ];
        let rendered = render(&dir, &blocks).await;
        assert_eq!(rendered.text, "");
        assert_eq!(rendered.image_count, 1);
    }
}
