use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    #[serde(default)]
    pub country: String,
    pub address: String,
    #[serde(default, alias = "htmlContent")]
    pub html_content: String,
    #[serde(default)]
    pub icon: String,
}

impl AddressEntry {
    pub fn new(
        country: impl Into<String>,
        address: impl Into<String>,
        html_content: impl Into<String>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            country: country.into(),
            address: address.into(),
            html_content: html_content.into(),
            icon: icon.into(),
        }
    }

    /// Whether the address has already been widened to the country.
    pub fn is_country_level(&self) -> bool {
        self.address == self.country
    }
}

/// Reads entries from CSV with a `country,address,html_content,icon` header.
/// Only `address` is required.
pub fn parse_csv<R: Read>(reader: R) -> AppResult<Vec<AddressEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Fields)
        .flexible(true)
        .from_reader(reader);
    let entries = rdr
        .deserialize::<AddressEntry>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn parse_json(bytes: &[u8]) -> AppResult<Vec<AddressEntry>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Loads entries from a `.csv` or `.json` file.
pub fn load_entries(path: &Path) -> AppResult<Vec<AddressEntry>> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => parse_csv(fs::File::open(path)?),
        "json" => parse_json(&fs::read(path)?),
        other => Err(AppError::Config(format!(
            "unsupported address list format: {other:?}"
        ))),
    }
}
