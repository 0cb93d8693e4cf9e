use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use super::super::domain::{BranchId, CategoryId, NewTariff, ValidationError};

/// Loads tariff configuration from a CSV export.
///
/// Expected header: `name,category_id,branch_id,loan_percent,interest_rate,
/// min_loan,max_loan,effective_from,effective_to,is_active,description`.
/// Empty cells are read as null.
pub struct TariffCsvImporter;

impl TariffCsvImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<NewTariff>, TariffImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<NewTariff>, TariffImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut tariffs = Vec::new();

        for (index, record) in csv_reader.deserialize::<TariffRow>().enumerate() {
            // header is line 1
            let line = index + 2;
            let tariff = record?.into_tariff(line)?;
            tariff
                .validate()
                .map_err(|source| TariffImportError::Invalid { line, source })?;
            tariffs.push(tariff);
        }

        Ok(tariffs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TariffImportError {
    #[error("failed to read tariff file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tariff CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: cannot parse {field} from '{value}'")]
    Malformed {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Deserialize)]
struct TariffRow {
    name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    category_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    branch_id: Option<String>,
    loan_percent: String,
    interest_rate: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    min_loan: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    max_loan: Option<String>,
    effective_from: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    effective_to: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    is_active: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    description: Option<String>,
}

impl TariffRow {
    fn into_tariff(self, line: usize) -> Result<NewTariff, TariffImportError> {
        let field = Field { line };
        Ok(NewTariff {
            category_id: self
                .category_id
                .as_deref()
                .map(|raw| field.parse_id("category_id", raw).map(CategoryId))
                .transpose()?,
            branch_id: self
                .branch_id
                .as_deref()
                .map(|raw| field.parse_id("branch_id", raw).map(BranchId))
                .transpose()?,
            loan_percent: field.parse_decimal("loan_percent", &self.loan_percent)?,
            interest_rate: field.parse_decimal("interest_rate", &self.interest_rate)?,
            min_loan: self
                .min_loan
                .as_deref()
                .map(|raw| field.parse_decimal("min_loan", raw))
                .transpose()?,
            max_loan: self
                .max_loan
                .as_deref()
                .map(|raw| field.parse_decimal("max_loan", raw))
                .transpose()?,
            effective_from: field.parse_date("effective_from", &self.effective_from)?,
            effective_to: self
                .effective_to
                .as_deref()
                .map(|raw| field.parse_date("effective_to", raw))
                .transpose()?,
            is_active: self
                .is_active
                .as_deref()
                .map(|raw| field.parse_flag("is_active", raw))
                .transpose()?
                .unwrap_or(true),
            name: self.name,
            description: self.description,
        })
    }
}

struct Field {
    line: usize,
}

impl Field {
    fn malformed(&self, field: &'static str, value: &str) -> TariffImportError {
        TariffImportError::Malformed {
            line: self.line,
            field,
            value: value.to_string(),
        }
    }

    fn parse_id(&self, field: &'static str, raw: &str) -> Result<i64, TariffImportError> {
        raw.parse().map_err(|_| self.malformed(field, raw))
    }

    fn parse_decimal(&self, field: &'static str, raw: &str) -> Result<Decimal, TariffImportError> {
        raw.parse().map_err(|_| self.malformed(field, raw))
    }

    fn parse_date(&self, field: &'static str, raw: &str) -> Result<NaiveDate, TariffImportError> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| self.malformed(field, raw))
    }

    fn parse_flag(&self, field: &'static str, raw: &str) -> Result<bool, TariffImportError> {
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(self.malformed(field, raw)),
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
