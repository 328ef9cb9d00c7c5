//! The `/nomikai` session surface: one variant per subcommand, parsed from
//! the gateway's option bag, executed against the session service.

use tracing::error;

use super::parse::{self, SeisanAmount};
use super::{get_int, get_num, get_str, get_user, Choice, CommandContext, CommandOption};
use crate::error::{AppError, SessionError};
use crate::session::service::{DEFAULT_REMAINDER_STRATEGY, DEFAULT_ROUNDING_UNIT};
use crate::session::{SessionRepository, SessionService};

const NO_SESSION: &str = "セッションが開始されていません";

#[derive(Debug, Clone, PartialEq)]
pub enum NomikaiCommand {
    Start,
    Stop,
    Join,
    Member {
        users: Vec<String>,
    },
    Weight {
        users: Vec<String>,
        value: f64,
    },
    Tatekae {
        amount: i64,
        payer: Option<String>,
        beneficiaries: Vec<String>,
        memo: String,
    },
    Settle,
    Status,
    MemberList,
    Remind {
        interval_minutes: i32,
        disable: bool,
    },
    Seisan {
        payee: String,
        amount: SeisanAmount,
        payer: Option<String>,
        memo: String,
    },
}

impl NomikaiCommand {
    /// Parse a subcommand and its options. The error is the reply text.
    pub fn parse(sub: &str, options: &[CommandOption]) -> Result<Self, String> {
        match sub {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "join" => Ok(Self::Join),
            "member" => {
                let users = get_str(options, "users").ok_or("users の指定が必要です")?;
                let users = parse::parse_mention_ids(users);
                if users.is_empty() {
                    return Err("ユーザーのメンション/IDを認識できませんでした".to_string());
                }
                Ok(Self::Member { users })
            }
            "weight" => {
                let (users, value) = match (get_str(options, "users"), get_num(options, "value")) {
                    (Some(users), Some(value)) => (users, value),
                    _ => return Err("users と value の指定が必要です".to_string()),
                };
                let users = parse::parse_mention_ids(users);
                if users.is_empty() {
                    return Err("ユーザーのメンション/IDを認識できませんでした".to_string());
                }
                Ok(Self::Weight { users, value })
            }
            "tatekae" => {
                let amount = get_int(options, "amount").ok_or("金額の指定が必要です")?;
                let beneficiaries = get_str(options, "for")
                    .map(parse::parse_mention_ids)
                    .unwrap_or_default();
                Ok(Self::Tatekae {
                    amount,
                    payer: get_user(options, "payer"),
                    beneficiaries,
                    memo: get_str(options, "memo").unwrap_or_default().to_string(),
                })
            }
            "settle" => Ok(Self::Settle),
            "status" => Ok(Self::Status),
            "memberlist" => Ok(Self::MemberList),
            "remind" => {
                let interval_minutes = match get_str(options, "interval") {
                    Some(raw) => {
                        let minutes =
                            parse::parse_interval_minutes(raw).map_err(|e| e.to_string())?;
                        i32::try_from(minutes)
                            .map_err(|_| parse::ParseError::IntervalTooLarge.to_string())?
                    }
                    // Absent means: inherit the configured interval.
                    None => 0,
                };
                let disable = match get_str(options, "state") {
                    None => false,
                    Some(state) => match state.trim().to_lowercase().as_str() {
                        "on" | "enable" | "オン" => false,
                        "off" | "disable" | "オフ" => true,
                        _ => return Err("state は on/off で指定してください".to_string()),
                    },
                };
                Ok(Self::Remind {
                    interval_minutes,
                    disable,
                })
            }
            "seisan" => {
                let payee = get_user(options, "to").ok_or("to の指定が必要です")?;
                let amount = get_str(options, "amount").ok_or("amount の指定が必要です")?;
                let amount = parse::parse_seisan_amount(amount).map_err(|e| e.to_string())?;
                Ok(Self::Seisan {
                    payee,
                    amount,
                    payer: get_user(options, "payer"),
                    memo: get_str(options, "memo").unwrap_or_default().to_string(),
                })
            }
            _ => Err("未知のサブコマンドです".to_string()),
        }
    }

    /// Run the command and produce the reply text.
    pub async fn execute(self, ctx: &CommandContext, sessions: &SessionService) -> String {
        match self {
            Self::Start => {
                if ctx.guild_id == 0 {
                    return "ギルドIDの取得に失敗しました".to_string();
                }
                let result = sessions
                    .start(
                        &ctx.channel_id,
                        ctx.guild_id,
                        &ctx.user_id,
                        DEFAULT_ROUNDING_UNIT,
                        DEFAULT_REMAINDER_STRATEGY,
                    )
                    .await;
                match result {
                    Ok(()) => "このチャンネルでセッションを開始しました".to_string(),
                    Err(e) => map_error(e, NO_SESSION),
                }
            }
            Self::Stop => match sessions.stop(&ctx.channel_id).await {
                Ok(()) => "セッションを終了しました".to_string(),
                Err(e) => map_error(e, "セッションが存在しません"),
            },
            Self::Join => match sessions.join(&ctx.channel_id, &ctx.user_id).await {
                Ok(()) => "参加者として登録しました".to_string(),
                Err(e) => map_error(e, NO_SESSION),
            },
            Self::Member { users } => {
                for user_id in &users {
                    if let Err(e) = sessions.join(&ctx.channel_id, user_id).await {
                        return map_error(e, NO_SESSION);
                    }
                }
                if users.len() == 1 {
                    format!("<@{}> を参加者に追加しました", users[0])
                } else {
                    format!(
                        "{} 名を参加者に追加しました\n追加: {}",
                        users.len(),
                        mention_list(&users)
                    )
                }
            }
            Self::Weight { users, value } => {
                let mut newly_joined = Vec::new();
                for user_id in &users {
                    match sessions.set_weight(&ctx.channel_id, user_id, value).await {
                        Ok(true) => newly_joined.push(user_id.clone()),
                        Ok(false) => {}
                        Err(e) => return map_error(e, NO_SESSION),
                    }
                }
                if users.len() == 1 {
                    let mut message = format!("<@{}> の比率を {:.2} に設定しました", users[0], value);
                    if newly_joined.len() == 1 {
                        message.push_str("\nこのユーザーを参加登録しました");
                    }
                    message
                } else {
                    let mut message = format!("{} 名の比率を {:.2} に設定しました", users.len(), value);
                    if !newly_joined.is_empty() {
                        message.push_str(&format!("\n参加登録: {}", mention_list(&newly_joined)));
                    }
                    message
                }
            }
            Self::Tatekae {
                amount,
                payer,
                beneficiaries,
                memo,
            } => {
                let payer = payer.unwrap_or_else(|| ctx.user_id.clone());
                let result = if beneficiaries.is_empty() {
                    sessions
                        .add_payment(&ctx.channel_id, &payer, amount, &memo)
                        .await
                        .map(|payer_joined| (payer_joined, Vec::new()))
                } else {
                    sessions
                        .add_payment_for(&ctx.channel_id, &payer, amount, &memo, &beneficiaries)
                        .await
                };
                let (payer_joined, beneficiaries_joined) = match result {
                    Ok(r) => r,
                    Err(e) => return map_error(e, NO_SESSION),
                };

                let mut message = format!("<@{payer}> の支払として {amount} 円を記録しました");
                if !beneficiaries.is_empty() {
                    message.push_str(&format!("\n対象: {}", mention_list(&beneficiaries)));
                }
                let mut joined = Vec::new();
                if payer_joined {
                    joined.push(payer);
                }
                joined.extend(beneficiaries_joined);
                if !joined.is_empty() {
                    message.push_str(&format!("\n参加登録: {}", mention_list(&joined)));
                }
                message
            }
            Self::Settle => match sessions.settle(&ctx.channel_id).await {
                Ok(result) => result.summary,
                Err(e) => map_error(e, NO_SESSION),
            },
            Self::Status => match sessions.status(&ctx.channel_id).await {
                Ok(text) => text,
                Err(e) => map_error(e, NO_SESSION),
            },
            Self::MemberList => match sessions.members(&ctx.channel_id).await {
                Ok(ids) => {
                    let mut message = format!("参加者 ({}名):\n", ids.len());
                    for id in ids {
                        message.push_str(&format!("・<@{id}>\n"));
                    }
                    message
                }
                Err(e) => map_error(e, NO_SESSION),
            },
            Self::Remind {
                interval_minutes,
                disable,
            } => {
                match sessions
                    .configure_reminder(&ctx.channel_id, interval_minutes, disable, true)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => map_error(e, NO_SESSION),
                }
            }
            Self::Seisan {
                payee,
                amount,
                payer,
                memo,
            } => {
                let payer = payer.unwrap_or_else(|| ctx.user_id.clone());
                let (amount, pay_all) = match amount {
                    SeisanAmount::All => (0, true),
                    SeisanAmount::Fixed(v) => (v, false),
                };
                match sessions
                    .register_payment(
                        &ctx.channel_id,
                        &payer,
                        &payee,
                        amount,
                        &memo,
                        &ctx.user_id,
                        pay_all,
                    )
                    .await
                {
                    Ok(text) => text,
                    Err(e) => map_error(e, NO_SESSION),
                }
            }
        }
    }
}

/// Autocomplete for the seisan `amount` option: the pair's outstanding total
/// as a one-click choice when there is one, always the `all` shorthand, and
/// the user's own input echoed back. Best effort; lookups never fail the
/// interaction.
pub async fn seisan_amount_choices(
    repo: &SessionRepository,
    channel_id: &str,
    payer_id: &str,
    payee_id: Option<&str>,
    user_input: &str,
) -> Vec<Choice> {
    let mut choices = vec![Choice {
        name: "all（未払い全額）".to_string(),
        value: "all".to_string(),
    }];

    if let (false, Some(payee_id)) = (payer_id.is_empty(), payee_id) {
        if let Ok(Some(event)) = repo.active_event_by_channel(channel_id).await {
            if let Ok(outstanding) = repo.outstanding_amount(event.id, payer_id, payee_id).await {
                if outstanding > 0 {
                    choices.insert(
                        0,
                        Choice {
                            name: format!("{outstanding}（未払い全額）"),
                            value: outstanding.to_string(),
                        },
                    );
                }
            }
        }
    }

    let input = user_input.trim();
    if !input.is_empty() {
        choices.push(Choice {
            name: input.to_string(),
            value: input.to_string(),
        });
    }
    choices.truncate(25);
    choices
}

fn mention_list(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("<@{id}>"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_error(error: AppError, no_session_text: &str) -> String {
    match error {
        AppError::Session(SessionError::NoActiveSession) => no_session_text.to_string(),
        AppError::Session(SessionError::TooFewMembers) => "参加者が2人以上必要です".to_string(),
        AppError::Session(SessionError::InvalidAmount) => {
            "金額は正の値で指定してください".to_string()
        }
        AppError::Session(SessionError::MissingParameters) => {
            "必要な情報が不足しています".to_string()
        }
        other => {
            error!("nomikai command failed: {other:?}");
            "エラーが発生しました。時間をおいて再度お試しください".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tatekae_parses_payer_beneficiaries_and_memo() {
        let options = vec![
            CommandOption::int("amount", 3000),
            CommandOption::user("payer", "42"),
            CommandOption::str("for", "<@1> <@2> <@1>"),
            CommandOption::str("memo", "肉"),
        ];
        let cmd = NomikaiCommand::parse("tatekae", &options).unwrap();
        assert_eq!(
            cmd,
            NomikaiCommand::Tatekae {
                amount: 3000,
                payer: Some("42".to_string()),
                beneficiaries: vec!["1".to_string(), "2".to_string()],
                memo: "肉".to_string(),
            }
        );
    }

    #[test]
    fn tatekae_requires_an_amount() {
        let err = NomikaiCommand::parse("tatekae", &[]).unwrap_err();
        assert_eq!(err, "金額の指定が必要です");
    }

    #[test]
    fn weight_rejects_unparseable_users() {
        let options = vec![
            CommandOption::str("users", "nobody here"),
            CommandOption::num("value", 2.0),
        ];
        let err = NomikaiCommand::parse("weight", &options).unwrap_err();
        assert_eq!(err, "ユーザーのメンション/IDを認識できませんでした");
    }

    #[test]
    fn remind_parses_interval_and_state() {
        let options = vec![
            CommandOption::str("interval", "1d2h"),
            CommandOption::str("state", "off"),
        ];
        let cmd = NomikaiCommand::parse("remind", &options).unwrap();
        assert_eq!(
            cmd,
            NomikaiCommand::Remind {
                interval_minutes: 1560,
                disable: true,
            }
        );
    }

    #[test]
    fn remind_without_interval_inherits() {
        let cmd = NomikaiCommand::parse("remind", &[]).unwrap();
        assert_eq!(
            cmd,
            NomikaiCommand::Remind {
                interval_minutes: 0,
                disable: false,
            }
        );
    }

    #[test]
    fn seisan_accepts_all_and_fixed_amounts() {
        let options = vec![
            CommandOption::user("to", "9"),
            CommandOption::str("amount", "All"),
        ];
        let cmd = NomikaiCommand::parse("seisan", &options).unwrap();
        assert_eq!(
            cmd,
            NomikaiCommand::Seisan {
                payee: "9".to_string(),
                amount: SeisanAmount::All,
                payer: None,
                memo: String::new(),
            }
        );

        let options = vec![
            CommandOption::user("to", "9"),
            CommandOption::str("amount", "-3"),
        ];
        assert!(NomikaiCommand::parse("seisan", &options).is_err());
    }

    #[test]
    fn unknown_subcommand_is_reported() {
        let err = NomikaiCommand::parse("karaoke", &[]).unwrap_err();
        assert_eq!(err, "未知のサブコマンドです");
    }
}
