//! Shell execution skill. Execute class: only available at full autonomy.

use crate::security::ActionClass;
use crate::skills::{truncate_output, Skill};
use anyhow::{anyhow, Context as _};
use futures::FutureExt as _;
use std::sync::Arc;
use std::time::Duration;

const MAX_OUTPUT_BYTES: usize = 8 * 1024;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub fn shell(workspace: std::path::PathBuf) -> Skill {
    Skill::new(
        "shell",
        "Run a shell command in the assistant workspace and return its \
         combined output.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to run with sh -c"
                }
            },
            "required": ["command"],
        }),
        ActionClass::Execute,
        Arc::new(move |_ctx, args| {
            let workspace = workspace.clone();
            async move {
                let command = args
                    .get("command")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'command' argument"))?;

                tokio::fs::create_dir_all(&workspace)
                    .await
                    .context("failed to create workspace directory")?;

                let output = tokio::time::timeout(
                    COMMAND_TIMEOUT,
                    tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(command)
                        .current_dir(&workspace)
                        .output(),
                )
                .await
                .map_err(|_| anyhow!("command timed out after {}s", COMMAND_TIMEOUT.as_secs()))?
                .context("failed to spawn command")?;

                let mut combined = String::new();
                combined.push_str(&String::from_utf8_lossy(&output.stdout));
                if !output.stderr.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                if !output.status.success() {
                    combined.push_str(&format!("\n[exit status: {}]", output.status));
                }
                if combined.trim().is_empty() {
                    combined = "[no output]".to_string();
                }

                Ok(truncate_output(&combined, MAX_OUTPUT_BYTES))
            }
            .boxed()
        }),
    )
}
