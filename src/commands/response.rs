//! Custom-response CRUD commands and the `!name` message-prefix lookup.

use tracing::error;

use super::{get_str, CommandContext, CommandOption};
use crate::responses::ResponseRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCommand {
    Add { name: String, response: String },
    Remove { name: String },
    Update { name: String, response: String },
    List { pattern: String },
}

impl ResponseCommand {
    /// `command` is the top-level command name (`add`, `remove`, `update`,
    /// `list`).
    pub fn parse(command: &str, options: &[CommandOption]) -> Result<Self, String> {
        let name = || {
            get_str(options, "name")
                .map(str::to_string)
                .ok_or_else(|| "name の指定が必要です".to_string())
        };
        let response = || {
            get_str(options, "response")
                .map(str::to_string)
                .ok_or_else(|| "response の指定が必要です".to_string())
        };
        match command {
            "add" => Ok(Self::Add {
                name: name()?,
                response: response()?,
            }),
            "remove" => Ok(Self::Remove { name: name()? }),
            "update" => Ok(Self::Update {
                name: name()?,
                response: response()?,
            }),
            "list" => Ok(Self::List {
                pattern: get_str(options, "q").unwrap_or_default().to_string(),
            }),
            _ => Err("未知のコマンドです".to_string()),
        }
    }

    pub async fn execute(self, ctx: &CommandContext, repo: &ResponseRepository) -> String {
        match self {
            Self::Add { name, response } => {
                match repo.add(ctx.guild_id, &name, &response).await {
                    Ok(true) => format!("コマンド '{name}' を追加しました。"),
                    Ok(false) => "追加に失敗しました。同じ名前のコマンドが既に存在します。".to_string(),
                    Err(e) => {
                        error!("failed to add custom response: {e:?}");
                        "追加に失敗しました。".to_string()
                    }
                }
            }
            Self::Remove { name } => match repo.remove(ctx.guild_id, &name).await {
                Ok(true) => format!("コマンド '{name}' を削除しました。"),
                Ok(false) => "そのコマンドは存在しません。".to_string(),
                Err(e) => {
                    error!("failed to remove custom response: {e:?}");
                    "削除に失敗しました。".to_string()
                }
            },
            Self::Update { name, response } => {
                match repo.update(ctx.guild_id, &name, &response).await {
                    Ok(true) => format!("コマンド '{name}' を更新しました。"),
                    Ok(false) => "そのコマンドは存在しません。".to_string(),
                    Err(e) => {
                        error!("failed to update custom response: {e:?}");
                        "更新に失敗しました。".to_string()
                    }
                }
            }
            Self::List { pattern } => match repo.list(ctx.guild_id, &pattern).await {
                Ok(responses) if responses.is_empty() => {
                    "コマンドは登録されていません。".to_string()
                }
                Ok(responses) => responses
                    .iter()
                    .map(|r| format!("!{}: {}", r.name, r.response))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => {
                    error!("failed to list custom responses: {e:?}");
                    "コマンドは登録されていません。".to_string()
                }
            },
        }
    }
}

/// Resolve a plain channel message: `!name` (the whole remainder is the name)
/// looks up the guild's registered response. Non-prefixed or unknown names
/// yield nothing. Bot-authored messages are filtered before this is called.
pub async fn prefix_response(
    repo: &ResponseRepository,
    guild_id: i64,
    content: &str,
) -> Option<String> {
    let name = content.trim().strip_prefix('!')?;
    if name.is_empty() {
        return None;
    }
    match repo.get(guild_id, name).await {
        Ok(found) => found.map(|c| c.response),
        Err(e) => {
            error!("custom response lookup failed: {e:?}");
            None
        }
    }
}

/// Build the stored response for the message context-menu registration:
/// the message text followed by each attachment URL on its own line.
pub fn build_registered_response(content: &str, attachment_urls: &[String]) -> String {
    let mut response = content.to_string();
    for url in attachment_urls {
        if !response.is_empty() {
            response.push('\n');
        }
        response.push_str(url);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_requires_both_fields() {
        let err = ResponseCommand::parse("add", &[CommandOption::str("name", "hello")]).unwrap_err();
        assert_eq!(err, "response の指定が必要です");
    }

    #[test]
    fn list_pattern_is_optional() {
        let cmd = ResponseCommand::parse("list", &[]).unwrap();
        assert_eq!(
            cmd,
            ResponseCommand::List {
                pattern: String::new()
            }
        );
    }

    #[test]
    fn registered_response_appends_attachment_urls() {
        let response = build_registered_response(
            "menu",
            &["https://cdn.example/a.png".to_string(), "https://cdn.example/b.png".to_string()],
        );
        assert_eq!(response, "menu\nhttps://cdn.example/a.png\nhttps://cdn.example/b.png");
    }

    #[test]
    fn attachment_only_message_skips_the_leading_newline() {
        let response = build_registered_response("", &["https://cdn.example/a.png".to_string()]);
        assert_eq!(response, "https://cdn.example/a.png");
    }
}
