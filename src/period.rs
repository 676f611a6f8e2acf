use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta, TimeZone};
use regex::Regex;
use serde::Serialize;

use crate::error::SyncError;

pub const THIS_YEAR: &str = "This Year";
pub const LAST_YEAR: &str = "Last Year";
pub const THIS_QUARTER: &str = "This Quarter";
pub const LAST_QUARTER: &str = "Last Quarter";

static QUARTER_LABEL: OnceLock<Regex> = OnceLock::new();
static YEAR_LABEL: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Quarter,
    Year,
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKind::Quarter => write!(f, "quarter"),
            PeriodKind::Year => write!(f, "year"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Period {
    pub kind: PeriodKind,
    pub label: String,
    pub year: i32,
    pub quarter: Option<u8>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl Period {
    pub fn contains<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> bool {
        let instant = instant.fixed_offset();
        self.start <= instant && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelForm {
    Quarter { year: i32, quarter: u8 },
    Year(i32),
    ThisYear,
    LastYear,
    ThisQuarter,
    LastQuarter,
}

fn parse_label(label: &str) -> Option<LabelForm> {
    let trimmed = label.trim();
    if trimmed.eq_ignore_ascii_case(THIS_YEAR) {
        return Some(LabelForm::ThisYear);
    }
    if trimmed.eq_ignore_ascii_case(LAST_YEAR) {
        return Some(LabelForm::LastYear);
    }
    if trimmed.eq_ignore_ascii_case(THIS_QUARTER) {
        return Some(LabelForm::ThisQuarter);
    }
    if trimmed.eq_ignore_ascii_case(LAST_QUARTER) {
        return Some(LabelForm::LastQuarter);
    }

    let quarter_re = QUARTER_LABEL
        .get_or_init(|| Regex::new(r"(?i)^q\s*([1-4])\s+(\d{4})$").expect("quarter pattern"));
    if let Some(caps) = quarter_re.captures(trimmed) {
        let quarter = caps[1].parse().ok()?;
        let year = caps[2].parse().ok()?;
        return Some(LabelForm::Quarter { year, quarter });
    }

    let year_re = YEAR_LABEL.get_or_init(|| Regex::new(r"^(\d{4})$").expect("year pattern"));
    let caps = year_re.captures(trimmed)?;
    Some(LabelForm::Year(caps[1].parse().ok()?))
}

pub fn resolve<Tz: TimeZone>(label: &str, now: &DateTime<Tz>) -> Period {
    let now = now.fixed_offset();
    parse_label(label)
        .and_then(|form| build(form, label, &now))
        .or_else(|| year_period(now.year(), THIS_YEAR, *now.offset()))
        .unwrap_or_else(|| Period {
            kind: PeriodKind::Year,
            label: THIS_YEAR.to_string(),
            year: now.year(),
            quarter: None,
            start: now,
            end: now,
        })
}

pub fn try_resolve<Tz: TimeZone>(label: &str, now: &DateTime<Tz>) -> Result<Period, SyncError> {
    let now = now.fixed_offset();
    parse_label(label)
        .and_then(|form| build(form, label, &now))
        .ok_or_else(|| SyncError::InvalidPeriod(label.to_string()))
}

pub fn period_options<Tz: TimeZone>(now: &DateTime<Tz>, quarters: usize) -> Vec<String> {
    let mut options = vec![THIS_YEAR.to_string(), LAST_YEAR.to_string()];
    let (mut year, mut quarter) = (now.year(), quarter_of(now.month()));
    for _ in 0..quarters {
        options.push(format!("Q{quarter} {year}"));
        (year, quarter) = previous_quarter(year, quarter);
    }
    options
}

fn build(form: LabelForm, raw_label: &str, now: &DateTime<FixedOffset>) -> Option<Period> {
    let offset = *now.offset();
    let current_quarter = quarter_of(now.month());
    match form {
        LabelForm::Quarter { year, quarter } => {
            quarter_period(year, quarter, &format!("Q{quarter} {year}"), offset)
        }
        LabelForm::Year(year) => year_period(year, raw_label.trim(), offset),
        LabelForm::ThisYear => year_period(now.year(), THIS_YEAR, offset),
        LabelForm::LastYear => year_period(now.year() - 1, LAST_YEAR, offset),
        LabelForm::ThisQuarter => quarter_period(now.year(), current_quarter, THIS_QUARTER, offset),
        LabelForm::LastQuarter => {
            let (year, quarter) = previous_quarter(now.year(), current_quarter);
            quarter_period(year, quarter, LAST_QUARTER, offset)
        }
    }
}

fn year_period(year: i32, label: &str, offset: FixedOffset) -> Option<Period> {
    let start = month_start(year, 1, offset)?;
    let end = month_start(year + 1, 1, offset)? - TimeDelta::milliseconds(1);
    Some(Period {
        kind: PeriodKind::Year,
        label: label.to_string(),
        year,
        quarter: None,
        start,
        end,
    })
}

fn quarter_period(year: i32, quarter: u8, label: &str, offset: FixedOffset) -> Option<Period> {
    let first_month = u32::from(quarter - 1) * 3 + 1;
    let start = month_start(year, first_month, offset)?;
    let next = if quarter == 4 {
        month_start(year + 1, 1, offset)?
    } else {
        month_start(year, first_month + 3, offset)?
    };
    Some(Period {
        kind: PeriodKind::Quarter,
        label: label.to_string(),
        year,
        quarter: Some(quarter),
        start,
        end: next - TimeDelta::milliseconds(1),
    })
}

fn month_start(year: i32, month: u32, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let midnight = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    offset.from_local_datetime(&midnight).single()
}

fn quarter_of(month: u32) -> u8 {
    ((month - 1) / 3 + 1) as u8
}

fn previous_quarter(year: i32, quarter: u8) -> (i32, u8) {
    if quarter == 1 {
        (year - 1, 4)
    } else {
        (year, quarter - 1)
    }
}
