//! Workspace-scoped file skills.
//!
//! Paths are always resolved under the configured workspace directory;
//! absolute paths and parent-directory traversal are rejected before any
//! filesystem access.

use crate::security::ActionClass;
use crate::skills::{truncate_output, Skill};
use anyhow::{anyhow, bail, Context as _};
use futures::FutureExt as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const MAX_READ_BYTES: usize = 16 * 1024;

/// Resolve a user-supplied relative path inside the workspace.
fn resolve(workspace: &Path, relative: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        bail!("absolute paths are not allowed");
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => bail!("path may not leave the workspace"),
        }
    }
    Ok(workspace.join(candidate))
}

pub fn file_read(workspace: PathBuf) -> Skill {
    Skill::new(
        "file_read",
        "Read a text file from the assistant workspace.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                }
            },
            "required": ["path"],
        }),
        ActionClass::Read,
        Arc::new(move |_ctx, args| {
            let workspace = workspace.clone();
            async move {
                let path = args
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'path' argument"))?;
                let full = resolve(&workspace, path)?;

                let contents = tokio::fs::read_to_string(&full)
                    .await
                    .with_context(|| format!("failed to read {path}"))?;
                Ok(truncate_output(&contents, MAX_READ_BYTES))
            }
            .boxed()
        }),
    )
}

pub fn file_write(workspace: PathBuf) -> Skill {
    Skill::new(
        "file_write",
        "Write a text file in the assistant workspace, creating parent \
         directories as needed.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                }
            },
            "required": ["path", "content"],
        }),
        ActionClass::Write,
        Arc::new(move |_ctx, args| {
            let workspace = workspace.clone();
            async move {
                let path = args
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'path' argument"))?;
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'content' argument"))?;
                let full = resolve(&workspace, path)?;

                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("failed to create parent directories")?;
                }
                tokio::fs::write(&full, content)
                    .await
                    .with_context(|| format!("failed to write {path}"))?;
                Ok(format!("Wrote {} bytes to {path}.", content.len()))
            }
            .boxed()
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::SkillContext;

    #[test]
    fn rejects_escaping_paths() {
        let workspace = Path::new("/tmp/ws");
        assert!(resolve(workspace, "notes.txt").is_ok());
        assert!(resolve(workspace, "sub/dir/notes.txt").is_ok());
        assert!(resolve(workspace, "../outside.txt").is_err());
        assert!(resolve(workspace, "sub/../../outside.txt").is_err());
        assert!(resolve(workspace, "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let workspace = std::env::temp_dir().join(format!("pocketbot-ws-{}", uuid::Uuid::new_v4()));
        let write = file_write(workspace.clone());
        let read = file_read(workspace.clone());

        let wrote = write
            .run(
                SkillContext::default(),
                serde_json::json!({"path": "notes/today.md", "content": "buy milk"}),
            )
            .await;
        assert!(wrote.contains("Wrote 8 bytes"));

        let contents = read
            .run(
                SkillContext::default(),
                serde_json::json!({"path": "notes/today.md"}),
            )
            .await;
        assert_eq!(contents, "buy milk");

        let _ = tokio::fs::remove_dir_all(workspace).await;
    }

    #[tokio::test]
    async fn missing_file_is_an_error_string() {
        let workspace = std::env::temp_dir().join(format!("pocketbot-ws-{}", uuid::Uuid::new_v4()));
        let read = file_read(workspace);
        let output = read
            .run(
                SkillContext::default(),
                serde_json::json!({"path": "nope.txt"}),
            )
            .await;
        assert!(output.starts_with("Error:"));
    }
}
