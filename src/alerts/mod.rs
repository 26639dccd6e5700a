pub mod gate;
pub mod notifications;
pub mod template;
pub mod thresholds;

pub use gate::{Evaluation, evaluate, record_sent, should_notify};
pub use notifications::{Email, LogMailer, Mailer, SmtpMailer, mailer_from_config};
pub use thresholds::{AlertLevel, AlertTier, TierTable, percent};
