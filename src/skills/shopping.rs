//! Shopping list skill, backed by memory fragments under a fixed key.

use crate::memory::{MemoryStore, NewFragment};
use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::{anyhow, bail};
use futures::FutureExt as _;
use std::sync::Arc;

const LIST_KEY: &str = "shopping_list";

pub fn shopping_list(memory: Arc<MemoryStore>) -> Skill {
    Skill::new(
        "shopping_list",
        "Manage the user's shopping list: add an item, remove an item, \
         list everything, or clear the list.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "remove", "list", "clear"],
                },
                "item": {
                    "type": "string",
                    "description": "The item, required for add and remove"
                }
            },
            "required": ["action"],
        }),
        ActionClass::Write,
        Arc::new(move |ctx, args| {
            let memory = memory.clone();
            async move {
                let action = args
                    .get("action")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'action' argument"))?;
                let user = ctx.user_id.as_deref();

                match action {
                    "add" => {
                        let item = required_item(&args)?;
                        memory
                            .remember(NewFragment {
                                content: item.to_string(),
                                user_id: ctx.user_id.clone(),
                                conversation_id: ctx.conversation_id.clone(),
                                key: Some(LIST_KEY.to_string()),
                                category: Some("shopping".to_string()),
                                metadata: None,
                            })
                            .await?;
                        Ok(format!("Added '{item}' to the shopping list."))
                    }
                    "remove" => {
                        let item = required_item(&args)?;
                        let removed = memory.remove_item(LIST_KEY, item, user).await?;
                        if removed == 0 {
                            Ok(format!("'{item}' was not on the shopping list."))
                        } else {
                            Ok(format!("Removed '{item}' from the shopping list."))
                        }
                    }
                    "list" => {
                        let items = memory.by_key(LIST_KEY, user).await?;
                        if items.is_empty() {
                            Ok("The shopping list is empty.".to_string())
                        } else {
                            let mut out = String::from("Shopping list:\n");
                            for item in items {
                                out.push_str(&format!("- {}\n", item.content));
                            }
                            Ok(out)
                        }
                    }
                    "clear" => {
                        let cleared = memory.clear(LIST_KEY, "shopping", user).await?;
                        Ok(format!("Cleared {cleared} item(s) from the shopping list."))
                    }
                    other => bail!("unknown action '{other}'"),
                }
            }
            .boxed()
        }),
    )
}

fn required_item(args: &serde_json::Value) -> anyhow::Result<&str> {
    args.get("item")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("missing 'item' argument"))
}
