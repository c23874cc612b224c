//! Raw line normalization.
//!
//! Turns one line of a product file into a typed row in table-column
//! order, or into nothing for lines that carry no record (blank station
//! lines, the station header, unofficial stations). Normalization is pure: the
//! same line always yields the same result.

use std::fmt;

use crate::error::RecordError;
use crate::product::{Column, ColumnKind, Product, ProductSpec, RecordShape};

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::Null => f.write_str("NULL"),
        }
    }
}

/// One normalized record of a product table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub product: Product,
    pub values: Vec<Value>,
}

impl Row {
    /// Values of the key columns.
    pub fn key(&self) -> &[Value] {
        &self.values[..self.product.spec().key_len]
    }

    /// Value of the named column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.product
            .spec()
            .columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Normalizer for one product.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    product: Product,
    spec: &'static ProductSpec,
}

impl Normalizer {
    pub fn for_product(product: Product) -> Self {
        Self {
            product,
            spec: product.spec(),
        }
    }

    pub fn product(&self) -> Product {
        self.product
    }

    /// Normalize one raw line.
    ///
    /// `Ok(None)` means the line holds no record. An error means the line
    /// is unusable and the whole file must be rejected.
    pub fn normalize(&self, line: &str) -> Result<Option<Row>, RecordError> {
        let tokens = match self.spec.shape {
            RecordShape::StationTable => {
                let fields: Vec<&str> = line
                    .trim_end_matches(['\r', '\n'])
                    .split('\t')
                    .map(str::trim)
                    .collect();
                // Skips blank lines, the header and stations without an
                // official code.
                if !is_station_code(fields[0]) {
                    return Ok(None);
                }
                self.check_count(fields.len())?;
                fields.into_iter().map(str::to_string).collect()
            }
            RecordShape::Timestamped { time_width } => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                self.check_count(fields.len())?;

                let utc = compose_stamp(fields[1], fields[2], time_width)?;
                let local = compose_stamp(fields[3], fields[4], time_width)?;

                let mut tokens = Vec::with_capacity(self.spec.columns.len());
                tokens.push(fields[0].to_string());
                tokens.push(utc);
                tokens.push(local);
                tokens.push(fields[5].to_string());
                // fields 6 and 7 are longitude and latitude
                tokens.extend(fields[8..].iter().map(|f| f.to_string()));
                tokens
            }
            RecordShape::Dated => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                self.check_count(fields.len())?;

                let mut tokens = Vec::with_capacity(self.spec.columns.len());
                tokens.extend(fields[..3].iter().map(|f| f.to_string()));
                tokens.extend(fields[5..].iter().map(|f| f.to_string()));
                tokens
            }
        };

        let values = tokens
            .iter()
            .zip(self.spec.columns)
            .map(|(token, column)| self.typed_value(token, column))
            .collect::<Result<Vec<_>, _>>()?;

        for (column, value) in self.spec.key_columns().iter().zip(&values) {
            if value.is_null() {
                return Err(RecordError::MissingKey {
                    column: column.name,
                });
            }
        }

        Ok(Some(Row {
            product: self.product,
            values,
        }))
    }

    fn check_count(&self, found: usize) -> Result<(), RecordError> {
        let expected = self.spec.raw_field_count();
        if found != expected {
            return Err(RecordError::FieldCount { expected, found });
        }
        Ok(())
    }

    fn typed_value(&self, token: &str, column: &Column) -> Result<Value, RecordError> {
        if self.spec.is_sentinel(token) {
            return Ok(Value::Null);
        }

        let invalid = || RecordError::InvalidField {
            column: column.name,
            value: token.to_string(),
        };

        match column.kind {
            ColumnKind::Text => Ok(Value::Text(token.to_string())),
            _ if token.is_empty() => Ok(Value::Null),
            ColumnKind::Integer => token.parse().map(Value::Integer).map_err(|_| invalid()),
            ColumnKind::Real => token.parse().map(Value::Real).map_err(|_| invalid()),
        }
    }
}

/// An all-digit code that fits the integer `wban` column.
fn is_station_code(field: &str) -> bool {
    !field.is_empty()
        && field.bytes().all(|b| b.is_ascii_digit())
        && field.parse::<i64>().is_ok()
}

/// Glue a date onto the leading `width` characters of a time field.
fn compose_stamp(date: &str, time: &str, width: Option<usize>) -> Result<String, RecordError> {
    let time = match width {
        Some(width) => time.get(..width).ok_or_else(|| RecordError::ShortTimeField {
            value: time.to_string(),
            width,
        })?,
        None => time,
    };
    Ok(format!("{}{}", date, time))
}
