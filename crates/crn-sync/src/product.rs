//! Fixed USCRN product table.
//!
//! Each product is described once: where its files live on the remote
//! host, how the directory tree is laid out, which names to pick up, how a
//! raw line is shaped, which tokens mean "missing", and the column order of
//! its target table. Everything downstream (discovery, normalization,
//! schema, merge statements) is driven from this table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Default root of the USCRN products tree on the NCEI FTP host.
pub const DEFAULT_PRODUCTS_ROOT: &str = "/pub/data/uscrn/products";

/// Table holding the import ledger.
pub const LEDGER_TABLE: &str = "imports";

/// One synchronizable product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Stations,
    Hourly02,
    Daily01,
    Monthly01,
    Subhourly01,
}

impl Product {
    /// All products in their default synchronization order.
    pub const ALL: [Product; 5] = [
        Product::Stations,
        Product::Hourly02,
        Product::Daily01,
        Product::Monthly01,
        Product::Subhourly01,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stations => "stations",
            Self::Hourly02 => "hourly02",
            Self::Daily01 => "daily01",
            Self::Monthly01 => "monthly01",
            Self::Subhourly01 => "subhourly01",
        }
    }

    /// Static description of this product.
    pub fn spec(&self) -> &'static ProductSpec {
        match self {
            Self::Stations => &STATIONS,
            Self::Hourly02 => &HOURLY02,
            Self::Daily01 => &DAILY01,
            Self::Monthly01 => &MONTHLY01,
            Self::Subhourly01 => &SUBHOURLY01,
        }
    }

    /// Directory holding this product's files under the given root.
    pub fn directory(&self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        match self.spec().subdirectory {
            Some(sub) => format!("{}/{}", root, sub),
            None => root.to_string(),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Product {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Product::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::UnknownProduct(s.to_string()))
    }
}

/// How a product's files are arranged below its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Files sit directly in the product directory.
    Flat,
    /// Files are grouped into 4-digit year subdirectories.
    YearPartitioned,
}

/// Shape of a raw line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// Tab-separated station metadata, leading numeric station code.
    StationTable,
    /// `wban date time date time version lon lat ...`; the time field is
    /// cut to `time_width` characters (whole field when `None`) and glued
    /// onto its date.
    Timestamped { time_width: Option<usize> },
    /// `wban date version lon lat ...`.
    Dated,
}

impl RecordShape {
    /// Raw fields consumed by key composition and dropped from the row.
    pub fn dropped_fields(&self) -> usize {
        match self {
            Self::StationTable => 0,
            Self::Timestamped { .. } => 4,
            Self::Dated => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn int(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Integer }
}

const fn real(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Real }
}

const fn text(name: &'static str) -> Column {
    Column { name, kind: ColumnKind::Text }
}

/// Everything the engine needs to know about one product.
#[derive(Debug)]
pub struct ProductSpec {
    pub table: &'static str,
    /// Subdirectory below the products root, `None` for the root itself.
    pub subdirectory: Option<&'static str>,
    pub layout: Layout,
    /// Regular expression matched against the start of file names.
    pub file_pattern: &'static str,
    pub shape: RecordShape,
    /// Raw tokens meaning "no observation". Compared as strings.
    pub sentinels: &'static [&'static str],
    pub columns: &'static [Column],
    /// Number of leading columns forming the row key.
    pub key_len: usize,
}

impl ProductSpec {
    pub fn key_columns(&self) -> &'static [Column] {
        &self.columns[..self.key_len]
    }

    /// Field count of a well-formed raw line.
    pub fn raw_field_count(&self) -> usize {
        self.columns.len() + self.shape.dropped_fields()
    }

    pub fn is_sentinel(&self, token: &str) -> bool {
        self.sentinels.contains(&token)
    }
}

/// Pattern for year subdirectories.
pub const YEAR_PATTERN: &str = r"\d{4}";

static STATIONS: ProductSpec = ProductSpec {
    table: "stations",
    subdirectory: None,
    layout: Layout::Flat,
    file_pattern: "stations.tsv",
    shape: RecordShape::StationTable,
    sentinels: &[],
    columns: &[
        int("wban"),
        text("country"),
        text("state"),
        text("location"),
        text("vector"),
        text("name"),
        real("latitude"),
        real("longitude"),
        real("elevation"),
        text("status"),
        text("commissioning"),
        text("closing"),
        text("operation"),
        text("pairing"),
        text("network"),
    ],
    key_len: 1,
};

static HOURLY02: ProductSpec = ProductSpec {
    table: "hourly02",
    subdirectory: Some("hourly02"),
    layout: Layout::YearPartitioned,
    file_pattern: "CRNH0203-.*",
    shape: RecordShape::Timestamped { time_width: Some(2) },
    sentinels: &["-9999.0", "-9999.00", "-99.000"],
    columns: &[
        int("wban"),
        int("utc_hour"),
        int("local_hour"),
        text("crx_version"),
        real("temp_calc"),
        real("temp_avg"),
        real("temp_max"),
        real("temp_min"),
        real("precip_sum"),
        real("solar_avg"),
        int("solar_avg_flag"),
        real("solar_max"),
        int("solar_max_flag"),
        real("solar_min"),
        int("solar_min_flag"),
        text("surface_type"),
        real("surface_avg"),
        int("surface_avg_flag"),
        real("surface_max"),
        int("surface_max_flag"),
        real("surface_min"),
        int("surface_min_flag"),
        real("rh_avg"),
        int("rh_avg_flag"),
        real("soil_moisture_5cm"),
        real("soil_moisture_10cm"),
        real("soil_moisture_20cm"),
        real("soil_moisture_50cm"),
        real("soil_moisture_100cm"),
        real("soil_temp_5cm"),
        real("soil_temp_10cm"),
        real("soil_temp_20cm"),
        real("soil_temp_50cm"),
        real("soil_temp_100cm"),
    ],
    key_len: 2,
};

static DAILY01: ProductSpec = ProductSpec {
    table: "daily01",
    subdirectory: Some("daily01"),
    layout: Layout::YearPartitioned,
    file_pattern: "CRND0103-.*",
    shape: RecordShape::Dated,
    sentinels: &["-99999", "-9999.0", "-9999.00", "-99.000"],
    columns: &[
        int("wban"),
        int("local_day"),
        text("crx_version"),
        real("temp_max"),
        real("temp_min"),
        real("temp_mean"),
        real("temp_avg"),
        real("precip_sum"),
        real("solar_sum"),
        text("surface_type"),
        real("surface_max"),
        real("surface_min"),
        real("surface_avg"),
        real("rh_max"),
        real("rh_min"),
        real("rh_avg"),
        real("soil_moisture_5cm"),
        real("soil_moisture_10cm"),
        real("soil_moisture_20cm"),
        real("soil_moisture_50cm"),
        real("soil_moisture_100cm"),
        real("soil_temp_5cm"),
        real("soil_temp_10cm"),
        real("soil_temp_20cm"),
        real("soil_temp_50cm"),
        real("soil_temp_100cm"),
    ],
    key_len: 2,
};

static MONTHLY01: ProductSpec = ProductSpec {
    table: "monthly01",
    subdirectory: Some("monthly01"),
    layout: Layout::Flat,
    file_pattern: "CRNM0102-.*",
    shape: RecordShape::Dated,
    sentinels: &["-99999", "-9999.0"],
    columns: &[
        int("wban"),
        int("local_month"),
        text("crx_version"),
        real("temp_max"),
        real("temp_min"),
        real("temp_mean"),
        real("temp_avg"),
        real("precip_sum"),
        real("solar_avg"),
        text("surface_type"),
        real("surface_max"),
        real("surface_min"),
        real("surface_avg"),
    ],
    key_len: 2,
};

static SUBHOURLY01: ProductSpec = ProductSpec {
    table: "subhourly01",
    subdirectory: Some("subhourly01"),
    layout: Layout::YearPartitioned,
    file_pattern: "CRNS0101-.*",
    shape: RecordShape::Timestamped { time_width: None },
    sentinels: &["-9999", "-99999", "-9999.0", "-9999.00", "-99.000"],
    columns: &[
        int("wban"),
        int("utc_time"),
        int("local_time"),
        text("crx_version"),
        real("temp_avg"),
        real("precip_sum"),
        real("solar_avg"),
        int("solar_flag"),
        real("surface_avg"),
        text("surface_type"),
        int("surface_flag"),
        real("rh_avg"),
        int("rh_flag"),
        real("soil_moisture_5cm"),
        real("soil_temp_5cm"),
        real("wet"),
        int("wet_flag"),
        real("wind"),
        int("wind_flag"),
    ],
    key_len: 2,
};
