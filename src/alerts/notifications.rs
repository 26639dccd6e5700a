use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::alerts::gate::Evaluation;
use crate::alerts::template::{self, HTML_TEMPLATE, SUBJECT_TEMPLATE};
use crate::config::{GeneralConfig, MailConfig};
use crate::metrics::snapshot::MetricsSnapshot;
use crate::utils::date_format::DateFormatter;
use crate::utils::size::{format_bytes, format_percent};

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub trait Mailer {
    fn send(&self, email: &Email) -> Result<()>;
}

/// Delivers through an SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let creds = Credentials::new(config.smtp_user.clone(), config.smtp_pass.clone());
        let with_auth = !config.smtp_user.is_empty();

        let builder = match config.smtp_tls.as_str() {
            // Implicit TLS, usually port 465
            "tls" => SmtpTransport::relay(&config.smtp_host)
                .with_context(|| format!("Failed to configure SMTP relay {}", config.smtp_host))?,
            "none" => SmtpTransport::builder_dangerous(&config.smtp_host),
            _ => SmtpTransport::starttls_relay(&config.smtp_host)
                .with_context(|| format!("Failed to configure SMTP STARTTLS relay {}", config.smtp_host))?,
        };

        let builder = builder.port(config.smtp_port);
        let builder = if with_auth { builder.credentials(creds) } else { builder };

        Ok(Self { transport: builder.build() })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &Email) -> Result<()> {
        let from = Mailbox::new(
            Some(email.from_name.clone()),
            email.from_address.parse().with_context(|| format!("Invalid sender address: {}", email.from_address))?,
        );
        let to: Mailbox = email.to.parse()
            .with_context(|| format!("Invalid recipient address: {}", email.to))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(email.text_body.clone(), email.html_body.clone()))
            .context("Failed to build alert email")?;

        self.transport.send(&message).context("SMTP send failed")?;
        info!(to = %email.to, "alert email sent");
        Ok(())
    }
}

/// Writes the message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: &Email) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "SMTP not configured, alert logged only");
        info!("{}", email.text_body);
        Ok(())
    }
}

/// SMTP when a relay host is configured, log-only otherwise.
pub fn mailer_from_config(config: &MailConfig) -> Result<Box<dyn Mailer>> {
    if config.smtp_host.trim().is_empty() {
        return Ok(Box::new(LogMailer));
    }
    Ok(Box::new(SmtpMailer::from_config(config)?))
}

pub fn template_values(
    snapshot: &MetricsSnapshot,
    evaluation: &Evaluation,
    site: &GeneralConfig,
    formatter: &DateFormatter,
) -> BTreeMap<&'static str, String> {
    let mut values = BTreeMap::new();

    values.insert("sitename", template::escape_html(&site.site_name));
    values.insert("siteurl", template::escape_html(&site.site_url));
    values.insert("level", evaluation.level.label().to_string());
    values.insert("disk_level_class", evaluation.disk_level.as_str().to_string());
    values.insert("user_level_class", evaluation.user_level.as_str().to_string());

    values.insert("diskusage", format_bytes(snapshot.disk_usage_bytes));
    values.insert("quotadisk", format_bytes(snapshot.disk_quota_bytes));
    values.insert("diskpercent", format_percent(snapshot.disk_percent));
    values.insert("databasesize", format_bytes(snapshot.database_size_bytes));

    values.insert("reportdate", formatter.format_date(&snapshot.report_date));
    values.insert("users", snapshot.user_count.to_string());
    values.insert("userthreshold", snapshot.user_threshold.to_string());
    values.insert("userpercent", format_percent(snapshot.user_percent));
    values.insert("users_last_24h", snapshot.users_last_24h.to_string());
    values.insert("coursescount", snapshot.course_count.to_string());

    let peak = match &snapshot.peak_90d {
        Some(peak) => format!("{} ({})", peak.count, formatter.format_date(&peak.date)),
        None => "not yet calculated".to_string(),
    };
    values.insert("peak_90d", template::escape_html(&peak));

    let recent: Vec<(String, String)> = snapshot.recent_logins
        .iter()
        .map(|r| (formatter.format_date(&r.date), r.count.to_string()))
        .collect();
    values.insert("recent_table", template::html_table(("Date", "Users"), &recent));

    let top: Vec<(String, String)> = snapshot.top_records
        .iter()
        .map(|r| (formatter.format_date(&r.date), r.count.to_string()))
        .collect();
    values.insert("top_table", template::html_table(("Date", "Users"), &top));

    values
}

pub fn build_alert_email(
    snapshot: &MetricsSnapshot,
    evaluation: &Evaluation,
    site: &GeneralConfig,
    mail: &MailConfig,
    formatter: &DateFormatter,
    recipient: &str,
) -> Result<Email> {
    if recipient.trim().is_empty() {
        bail!("No alert recipient configured");
    }

    let mut values = template_values(snapshot, evaluation, site, formatter);
    // Subject is plain text
    values.insert("sitename", site.site_name.clone());
    let subject = template::render(SUBJECT_TEMPLATE, &values);

    let values = template_values(snapshot, evaluation, site, formatter);
    let html_body = template::render(HTML_TEMPLATE, &values);
    let text_body = template::html_to_text(&html_body)?;

    Ok(Email {
        to: recipient.trim().to_string(),
        from_address: mail.from_address.clone(),
        from_name: mail.from_name.clone(),
        subject,
        html_body,
        text_body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::gate::evaluate;
    use crate::alerts::thresholds::TierTable;
    use crate::metrics::top_k::DailyUserRecord;
    use crate::utils::size::BYTES_PER_GB;
    use chrono::NaiveDate;

    fn snapshot() -> MetricsSnapshot {
        let day = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        MetricsSnapshot {
            report_date: day,
            disk_usage_bytes: 96 * BYTES_PER_GB / 10,
            disk_quota_bytes: 10 * BYTES_PER_GB,
            disk_percent: 96.0,
            database_size_bytes: 0,
            user_count: 40,
            user_threshold: 100,
            user_percent: 40.0,
            users_last_24h: 12,
            course_count: 3,
            recent_logins: vec![DailyUserRecord { date: day, count: 40 }],
            top_records: vec![DailyUserRecord { date: day, count: 40 }],
            peak_90d: None,
            last_disk_sample_time: 0,
        }
    }

    #[test]
    fn test_build_alert_email() {
        let site = GeneralConfig { site_name: "Campus & Co".to_string(), ..GeneralConfig::default() };
        let formatter = DateFormatter::new("dd/mm/yyyy", chrono_tz::UTC).unwrap();
        let evaluation = evaluate(&TierTable::default(), 96.0, 40.0);

        let email = build_alert_email(&snapshot(), &evaluation, &site, &MailConfig::default(), &formatter, " ops@example.com ").unwrap();

        assert_eq!(email.to, "ops@example.com");
        assert_eq!(email.subject, "[CRITICAL] System Monitoring Alert - Campus & Co");
        assert!(email.html_body.contains("Campus &amp; Co"));
        assert!(email.html_body.contains("alert-critical"));
        assert!(email.text_body.contains("9.60 GB of 10.00 GB (96.00%)"));
        assert!(email.text_body.contains("09/06/2024 | 40"));
        assert!(email.text_body.contains("not yet calculated"));
    }

    #[test]
    fn test_missing_recipient_is_an_error() {
        let formatter = DateFormatter::new("yyyy-mm-dd", chrono_tz::UTC).unwrap();
        let evaluation = evaluate(&TierTable::default(), 96.0, 0.0);
        let result = build_alert_email(&snapshot(), &evaluation, &GeneralConfig::default(), &MailConfig::default(), &formatter, "");
        assert!(result.is_err());
    }

    #[test]
    fn test_unconfigured_smtp_logs_only() {
        let mailer = mailer_from_config(&MailConfig::default()).unwrap();
        let email = Email {
            to: "ops@example.com".to_string(),
            from_address: "noreply@localhost".to_string(),
            from_name: "Usage Monitor".to_string(),
            subject: "test".to_string(),
            html_body: "<p>x</p>".to_string(),
            text_body: "x".to_string(),
        };
        assert!(mailer.send(&email).is_ok());
    }
}
