//! The `/jikan` scheduling surface. Times are entered in the process's local
//! timezone and stored as UTC.

use std::sync::Arc;

use chrono::{Local, TimeZone, Utc};
use tracing::error;

use super::parse;
use super::{get_bool, get_str, CommandContext, CommandOption};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq)]
pub enum JikanCommand {
    Add {
        command: String,
        time: String,
        repeat: bool,
    },
    List,
}

impl JikanCommand {
    pub fn parse(sub: &str, options: &[CommandOption]) -> Result<Self, String> {
        match sub {
            "add" => {
                let (command, time) = match (get_str(options, "command"), get_str(options, "time"))
                {
                    (Some(command), Some(time)) => (command, time),
                    _ => return Err("コマンドと時間を指定してください".to_string()),
                };
                Ok(Self::Add {
                    command: command.to_string(),
                    time: time.to_string(),
                    repeat: get_bool(options, "repeat").unwrap_or(false),
                })
            }
            "list" => Ok(Self::List),
            _ => Err("サブコマンドを指定してください".to_string()),
        }
    }

    pub async fn execute(self, ctx: &CommandContext, scheduler: &Arc<Scheduler>) -> String {
        match self {
            Self::Add {
                command,
                time,
                repeat,
            } => {
                let now = Local::now();
                let target = match parse::resolve_time(&time, now.naive_local()) {
                    Ok(target) => target,
                    Err(e) => {
                        return format!("時間の形式が正しくありません: {e} (例: 18:00, 2025-12-26 18:00)")
                    }
                };
                let Some(target_local) = Local.from_local_datetime(&target).earliest() else {
                    return format!(
                        "時間の形式が正しくありません: {} (例: 18:00, 2025-12-26 18:00)",
                        parse::ParseError::Time
                    );
                };
                if target_local <= now {
                    return "指定された時間は既に過ぎています".to_string();
                }

                let fire_at = target_local.with_timezone(&Utc).naive_utc();
                match scheduler
                    .add(&command, fire_at, repeat, &ctx.channel_id, ctx.guild_id, &ctx.user_id)
                    .await
                {
                    Ok(task) => {
                        let mut message = format!(
                            "ID: {}\nコマンド `{}` を {} に実行するように予約しました",
                            task.id,
                            command,
                            target.format("%Y-%m-%d %H:%M")
                        );
                        if repeat {
                            message.push_str("（毎日繰り返し）");
                        }
                        message
                    }
                    Err(e) => {
                        error!("failed to persist scheduled task: {e:?}");
                        "タスクの保存に失敗しました".to_string()
                    }
                }
            }
            Self::List => {
                let tasks = scheduler.list(ctx.guild_id).await;
                if tasks.is_empty() {
                    return "このサーバーで予約されているコマンドはありません".to_string();
                }
                let mut out = String::from("予約コマンド一覧:\n");
                for task in tasks {
                    let local = Utc.from_utc_datetime(&task.fire_at).with_timezone(&Local);
                    out.push_str(&format!(
                        "- ID: {} | {} | `{}`{}\n",
                        task.id,
                        local.format("%Y-%m-%d %H:%M"),
                        task.command,
                        if task.repeat { " (毎日)" } else { "" }
                    ));
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_requires_command_and_time() {
        let err = JikanCommand::parse("add", &[CommandOption::str("command", "!menu")]).unwrap_err();
        assert_eq!(err, "コマンドと時間を指定してください");
    }

    #[test]
    fn add_defaults_to_one_shot() {
        let cmd = JikanCommand::parse(
            "add",
            &[
                CommandOption::str("command", "nomikai start"),
                CommandOption::str("time", "18:00"),
            ],
        )
        .unwrap();
        assert_eq!(
            cmd,
            JikanCommand::Add {
                command: "nomikai start".to_string(),
                time: "18:00".to_string(),
                repeat: false,
            }
        );
    }

    #[test]
    fn repeat_flag_is_carried() {
        let cmd = JikanCommand::parse(
            "add",
            &[
                CommandOption::str("command", "!standup"),
                CommandOption::str("time", "09:00"),
                CommandOption::bool("repeat", true),
            ],
        )
        .unwrap();
        assert!(matches!(cmd, JikanCommand::Add { repeat: true, .. }));
    }
}
