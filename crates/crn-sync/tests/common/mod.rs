//! Builders for raw product lines shared by the integration tests.

#![allow(dead_code)]

use crn_sync::{MemoryRemote, SyncStore, Synchronizer};

pub const ROOT: &str = "/crn";

fn padded(prefix: &[&str], total: usize) -> String {
    let mut fields: Vec<&str> = prefix.to_vec();
    fields.resize(total, "0");
    fields.join(" ")
}

/// An hourly02 line: 38 whitespace-separated fields.
pub fn hourly_line(wban: &str, date: &str, time: &str, temp_calc: &str) -> String {
    padded(
        &[wban, date, time, date, time, "2.422", "-111.85", "32.24", temp_calc],
        38,
    )
}

/// A subhourly01 line: 23 whitespace-separated fields.
pub fn subhourly_line(wban: &str, date: &str, time: &str, temp_avg: &str) -> String {
    padded(
        &[wban, date, time, date, time, "2.422", "-111.85", "32.24", temp_avg],
        23,
    )
}

/// A daily01 line: 28 whitespace-separated fields.
pub fn daily_line(wban: &str, date: &str, temp_max: &str) -> String {
    padded(&[wban, date, "2.422", "-111.85", "32.24", temp_max], 28)
}

/// A monthly01 line: 15 whitespace-separated fields.
pub fn monthly_line(wban: &str, month: &str, temp_max: &str) -> String {
    padded(&[wban, month, "2.422", "-111.85", "32.24", temp_max], 15)
}

/// A stations.tsv line: 15 tab-separated fields.
pub fn station_line(code: &str, name: &str) -> String {
    [
        code,
        "US",
        "AZ",
        "Tucson",
        "11 W",
        name,
        "32.24",
        "-111.17",
        "2422",
        "Operational",
        "2002-09-12",
        "",
        "",
        "",
        "USCRN",
    ]
    .join("\t")
}

pub async fn memory_synchronizer(remote: &MemoryRemote) -> Synchronizer<MemoryRemote> {
    let store = SyncStore::open_memory().await.unwrap();
    Synchronizer::new(remote.clone(), store).with_root(ROOT)
}
