pub mod engine;
pub mod models;
pub mod repository;
pub mod service;

pub use models::{Event, Expenditure, Member, ReminderConfig, SettleResult, Transfer};
pub use repository::SessionRepository;
pub use service::SessionService;
