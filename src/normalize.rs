use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Goal,
    Kpi,
    Leaderboard,
    Directory,
    #[default]
    Generic,
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKind::Goal => write!(f, "goal"),
            RowKind::Kpi => write!(f, "kpi"),
            RowKind::Leaderboard => write!(f, "leaderboard"),
            RowKind::Directory => write!(f, "directory"),
            RowKind::Generic => write!(f, "generic"),
        }
    }
}

impl FromStr for RowKind {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "goal" | "goals" => Ok(RowKind::Goal),
            "kpi" | "kpis" => Ok(RowKind::Kpi),
            "leaderboard" => Ok(RowKind::Leaderboard),
            "directory" | "people" => Ok(RowKind::Directory),
            "generic" => Ok(RowKind::Generic),
            _ => Err(SyncError::InvalidRowKind(value.to_string())),
        }
    }
}

impl RowKind {
    fn id_fields(self) -> &'static [&'static str] {
        match self {
            RowKind::Goal => &["goal_id", "id"],
            RowKind::Kpi => &["kpi_id", "metric_id", "id"],
            RowKind::Leaderboard => &["user_id", "employee_id", "member_id", "id"],
            RowKind::Directory => &["user_id", "employee_id", "profile_id", "id"],
            RowKind::Generic => &["id", "uuid", "key"],
        }
    }

    fn label_fields(self) -> &'static [&'static str] {
        match self {
            RowKind::Goal => &["title", "goal_title", "name"],
            RowKind::Kpi => &["kpi_name", "name", "title"],
            RowKind::Leaderboard => &["full_name", "display_name", "name"],
            RowKind::Directory => &["full_name", "display_name", "name", "email"],
            RowKind::Generic => &["name", "title"],
        }
    }

    fn current_fields(self) -> &'static [&'static str] {
        match self {
            RowKind::Goal => &["current_value", "progress_value", "value"],
            RowKind::Kpi => &["value_in_period", "value_all_time", "current_value", "value"],
            RowKind::Leaderboard => &[
                "score",
                "total",
                "value_in_period",
                "value_all_time",
                "value",
            ],
            RowKind::Directory => &["value"],
            RowKind::Generic => &["value", "current_value"],
        }
    }
}

const GROUP_FIELDS: &[&str] = &[
    "department",
    "department_name",
    "team",
    "team_name",
    "category",
    "group",
];
const START_FIELDS: &[&str] = &["start_value", "baseline", "initial_value", "start"];
const TARGET_FIELDS: &[&str] = &["target_value", "goal_value", "target"];
const PROGRESS_FIELDS: &[&str] = &["progress", "progress_pct", "percent_complete"];
const UNIT_FIELDS: &[&str] = &["unit", "unit_label", "uom"];
const CURRENCY_FIELDS: &[&str] = &["currency", "currency_code"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaHints {
    pub kind: RowKind,
    #[serde(default)]
    pub label_fields: Option<Vec<String>>,
    #[serde(default)]
    pub value_fields: Option<Vec<String>>,
    #[serde(default)]
    pub default_unit: Option<String>,
    #[serde(default)]
    pub default_currency: Option<String>,
}

impl SchemaHints {
    pub fn new(kind: RowKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_label_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_value_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default_unit(mut self, unit: impl Into<String>) -> Self {
        self.default_unit = Some(unit.into());
        self
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = Some(currency.into());
        self
    }
}

/// Canonical view-model row. Field names double as the last alias of each
/// lookup, which makes normalization idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub id: String,
    pub label: String,
    pub kind: RowKind,
    pub group: Option<String>,
    pub start: Option<f64>,
    pub current: f64,
    pub target: Option<f64>,
    pub progress: Option<f64>,
    pub unit: Option<String>,
    pub currency: Option<String>,
}

impl NormalizedRow {
    pub fn display_value(&self) -> String {
        format_amount(self.current, self.unit.as_deref(), self.currency.as_deref())
    }

    pub fn display_target(&self) -> Option<String> {
        self.target
            .map(|target| format_amount(target, self.unit.as_deref(), self.currency.as_deref()))
    }
}

pub fn normalize(raw: &Value, hints: &SchemaHints) -> NormalizedRow {
    let empty = Map::new();
    let row = raw.as_object().unwrap_or(&empty);
    let kind = hints.kind;

    let id = lookup(row, kind.id_fields().iter().copied().chain(["id"]), text)
        .unwrap_or_default();
    let label = match &hints.label_fields {
        Some(fields) => lookup(row, fields.iter().map(String::as_str).chain(["label"]), text),
        None => lookup(row, kind.label_fields().iter().copied().chain(["label"]), text),
    }
    .unwrap_or_else(|| id.clone());
    let group = lookup(row, GROUP_FIELDS.iter().copied(), text);

    let start = lookup(row, START_FIELDS.iter().copied(), number);
    let current = match &hints.value_fields {
        Some(fields) => lookup(row, fields.iter().map(String::as_str).chain(["current"]), number),
        None => lookup(row, kind.current_fields().iter().copied().chain(["current"]), number),
    }
    .unwrap_or(0.0);
    let target = lookup(row, TARGET_FIELDS.iter().copied(), number);

    let progress = match target {
        Some(target) => Some(progress_percent(start.unwrap_or(0.0), current, target)),
        None => lookup(row, PROGRESS_FIELDS.iter().copied(), number)
            .map(|value| value.clamp(0.0, 100.0)),
    };

    let unit = lookup(row, UNIT_FIELDS.iter().copied(), text)
        .or_else(|| hints.default_unit.clone());
    let currency = lookup(row, CURRENCY_FIELDS.iter().copied(), text)
        .or_else(|| hints.default_currency.clone())
        .map(|code| code.to_ascii_uppercase());

    NormalizedRow {
        id,
        label,
        kind,
        group,
        start,
        current,
        target,
        progress,
        unit,
        currency,
    }
}

pub fn normalize_rows(rows: &[Value], hints: &SchemaHints) -> Vec<NormalizedRow> {
    rows.iter().map(|row| normalize(row, hints)).collect()
}

/// `clamp(((current - start) / ((target - start) || target || 1)) * 100, 0, 100)`
/// where a zero divisor falls through to the next alternative.
pub fn progress_percent(start: f64, current: f64, target: f64) -> f64 {
    let span = target - start;
    let divisor = if span != 0.0 && span.is_finite() {
        span
    } else if target != 0.0 {
        target
    } else {
        1.0
    };
    let percent = (current - start) / divisor * 100.0;
    if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub fn coerce_number(value: &Value) -> f64 {
    number(value).unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRow {
    pub rank: u32,
    #[serde(flatten)]
    pub row: NormalizedRow,
}

pub fn rank_rows(mut rows: Vec<NormalizedRow>) -> Vec<RankedRow> {
    rows.sort_by(|a, b| {
        b.current
            .total_cmp(&a.current)
            .then_with(|| a.label.cmp(&b.label))
    });
    let mut ranked: Vec<RankedRow> = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let rank = match ranked.last() {
            Some(previous) if previous.row.current == row.current => previous.rank,
            _ => index as u32 + 1,
        };
        ranked.push(RankedRow { rank, row });
    }
    ranked
}

pub fn currency_symbol(code: &str) -> Option<&'static str> {
    match code.trim().to_ascii_uppercase().as_str() {
        "USD" | "$" => Some("$"),
        "EUR" | "€" => Some("€"),
        "GBP" | "£" => Some("£"),
        "JPY" | "¥" => Some("¥"),
        "INR" | "₹" => Some("₹"),
        "CAD" => Some("CA$"),
        "AUD" => Some("A$"),
        _ => None,
    }
}

pub fn format_amount(value: f64, unit: Option<&str>, currency: Option<&str>) -> String {
    let number = format_number(value);
    let symbol = currency
        .and_then(currency_symbol)
        .or_else(|| unit.and_then(currency_symbol));
    if let Some(symbol) = symbol {
        return match number.strip_prefix('-') {
            Some(magnitude) => format!("-{symbol}{magnitude}"),
            None => format!("{symbol}{number}"),
        };
    }
    match unit.map(str::trim).filter(|unit| !unit.is_empty()) {
        Some("%") => format!("{number}%"),
        Some(unit) => format!("{number} {unit}"),
        None => number,
    }
}

pub fn format_number(value: f64) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let fraction = fraction.trim_end_matches('0');

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && (whole != "0" || !fraction.is_empty()) {
        "-"
    } else {
        ""
    };
    if fraction.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{fraction}")
    }
}

fn lookup<'k, T>(
    row: &Map<String, Value>,
    fields: impl IntoIterator<Item = &'k str>,
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    fields
        .into_iter()
        .filter_map(|field| row.get(field))
        .find_map(convert)
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

fn text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}
