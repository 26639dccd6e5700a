use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

/// Date styles accepted by `[general] date_format`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateFormat {
    YearMonthDay, // yyyy-mm-dd (ISO)
    DayMonthYear, // dd/mm/yyyy
    MonthDayYear, // mm/dd/yyyy
}

impl DateFormat {
    pub fn from_config_str(format_str: &str) -> Result<Self> {
        match format_str.trim().to_lowercase().as_str() {
            "yyyy-mm-dd" => Ok(DateFormat::YearMonthDay),
            "dd/mm/yyyy" => Ok(DateFormat::DayMonthYear),
            "mm/dd/yyyy" => Ok(DateFormat::MonthDayYear),
            _ => Err(anyhow!(
                "Invalid date format '{}'. Supported formats: yyyy-mm-dd, dd/mm/yyyy, mm/dd/yyyy",
                format_str
            )),
        }
    }

    pub fn to_chrono_format(&self) -> &'static str {
        match self {
            DateFormat::YearMonthDay => "%Y-%m-%d",
            DateFormat::DayMonthYear => "%d/%m/%Y",
            DateFormat::MonthDayYear => "%m/%d/%Y",
        }
    }
}

/// Renders dates and stored unix timestamps in the site's style and zone.
#[derive(Debug, Clone)]
pub struct DateFormatter {
    format: DateFormat,
    timezone: Tz,
}

impl DateFormatter {
    pub fn new(config_format: &str, timezone: Tz) -> Result<Self> {
        let format = DateFormat::from_config_str(config_format)?;
        Ok(Self { format, timezone })
    }

    pub fn format_date(&self, date: &NaiveDate) -> String {
        date.format(self.format.to_chrono_format()).to_string()
    }

    /// `never` for a zero or unparseable timestamp.
    pub fn format_timestamp(&self, timestamp: i64) -> String {
        if timestamp <= 0 {
            return "never".to_string();
        }
        match DateTime::from_timestamp(timestamp, 0) {
            Some(utc) => {
                let local = utc.with_timezone(&self.timezone);
                format!("{} {}", local.format(self.format.to_chrono_format()), local.format("%H:%M"))
            }
            None => "never".to_string(),
        }
    }
}
