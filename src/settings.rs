//! Runtime configuration, layered from an optional `bfd.toml` and
//! `BFD_`-prefixed environment variables.

use chrono::FixedOffset;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{BfdError, Result};
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// SQLite database path, or ":memory:" for an ephemeral store.
    #[serde(default = "default_database")]
    pub database: String,
    /// UTC offset applied to datetime literals written without one, as
    /// `+hh:mm`, `-hh:mm` or `Z`. Passed explicitly into the query engine
    /// rather than read from process-wide state.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Users with site-wide administrative privileges.
    #[serde(default)]
    pub site_admins: Vec<String>,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

impl Settings {
    pub fn load() -> Result<Settings> {
        Config::builder()
            .add_source(File::with_name("bfd").required(false))
            .add_source(Environment::with_prefix("BFD"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BfdError::Config(e.to_string()))
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.database == ":memory:" {
            PersistenceMode::InMemory
        } else {
            PersistenceMode::File(PathBuf::from(&self.database))
        }
    }

    pub fn default_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
            .ok_or_else(|| BfdError::Config(format!("not a valid timezone: {}", self.timezone)))
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    if text == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = match text.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let (hours, minutes) = text[1..].split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
