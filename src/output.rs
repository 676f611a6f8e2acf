use std::io::{self, Write};

use serde::Serialize;

use crate::normalize::RankedRow;
use crate::period::Period;
use crate::prefs::Preferences;
use crate::view::ViewModel;

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport<'a> {
    #[serde(flatten)]
    pub model: &'a ViewModel,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Vec<RankedRow>>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch(report: &FetchReport<'_>) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_period(period: &Period) -> io::Result<()> {
        Self::print_json(period)
    }

    pub fn print_options(options: &[String]) -> io::Result<()> {
        Self::print_json(options)
    }

    pub fn print_preferences(prefs: &Preferences) -> io::Result<()> {
        Self::print_json(prefs)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
