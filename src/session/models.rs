use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_CLOSED: &str = "closed";

/// One channel-scoped settlement session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub guild_id: i64,
    pub channel_id: String,
    pub organizer_id: String,
    pub status: String,
    pub rounding_unit: i32,
    pub remainder_strategy: String,
}

/// A participant of an event with a real-valued cost weight.
/// Weight 0 means the member carries no share.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub event_id: i64,
    pub user_id: String,
    pub weight: f64,
}

/// A recorded payment by one member. Negative amounts are corrections.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Expenditure {
    pub id: i64,
    pub event_id: i64,
    pub payer_id: String,
    pub amount: i64,
    pub memo: String,
}

/// A single payer→payee transfer amount. Used both for settlement tasks and
/// for per-pair repayment sums.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transfer {
    pub payer_id: String,
    pub payee_id: String,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct SettleResult {
    pub tasks: Vec<Transfer>,
    pub summary: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub interval_minutes: i32,
    pub next_due_at: Option<NaiveDateTime>,
}

/// A reminder target returned by the due query: enabled, due (or armed with
/// no scheduled time), and with at least one pending task.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReminderDue {
    pub event_id: i64,
    pub channel_id: String,
    pub interval_minutes: i32,
}
