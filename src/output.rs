use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AccessionsResult, ClearResult, FetchResult, HistoryResult, ServicesResult};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_services(result: &ServicesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_accessions(result: &AccessionsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_history(result: &HistoryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
