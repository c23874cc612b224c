//! End-to-end synchronization tests against the in-memory remote archive.

mod common;

use common::{
    daily_line, hourly_line, memory_synchronizer, monthly_line, station_line, subhourly_line, ROOT,
};
use crn_sync::{MemoryRemote, Product, SyncError, SyncStore, Synchronizer};

fn path(relative: &str) -> String {
    format!("{}/{}", ROOT, relative)
}

async fn hourly_rows(store: &SyncStore) -> Vec<(i64, i64, Option<f64>)> {
    sqlx::query_as("SELECT wban, utc_hour, temp_calc FROM hourly02 ORDER BY wban, utc_hour")
        .fetch_all(store.pool())
        .await
        .unwrap()
}

async fn daily_rows(store: &SyncStore) -> Vec<(i64, i64, Option<f64>)> {
    sqlx::query_as("SELECT wban, local_day, temp_max FROM daily01 ORDER BY wban, local_day")
        .fetch_all(store.pool())
        .await
        .unwrap()
}

fn seed_hourly(remote: &MemoryRemote) {
    remote.put_file(
        &path("hourly02/2007/CRNH0203-2007-AZ_Tucson.txt"),
        "20080101000000",
        [
            hourly_line("53131", "20070101", "0100", "4.5"),
            hourly_line("53131", "20070101", "0200", "-9999.0"),
        ],
    );
    remote.put_file(
        &path("hourly02/2009/CRNH0203-2009-AZ_Tucson.txt"),
        "20100101000000",
        [hourly_line("53131", "20090101", "0100", "-9999.1")],
    );
    remote.put_file(&path("hourly02/2009/README.txt"), "20100101000000", ["not data"]);
}

// ============================================================================
// Idempotence and change detection
// ============================================================================

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let remote = MemoryRemote::new();
    seed_hourly(&remote);
    let sync = memory_synchronizer(&remote).await;

    let first = sync.sync_product(Product::Hourly02).await.unwrap();
    assert_eq!(first.candidates, 2);
    assert_eq!(first.imported, 2);
    assert_eq!(first.rows_merged, 3);
    let rows_after_first = hourly_rows(sync.store()).await;
    let fetches_after_first = remote.fetch_count();

    let second = sync.sync_product(Product::Hourly02).await.unwrap();
    assert_eq!(second.candidates, 2);
    assert_eq!(second.stale, 0);
    assert_eq!(second.imported, 0);
    assert_eq!(remote.fetch_count(), fetches_after_first);
    assert_eq!(hourly_rows(sync.store()).await, rows_after_first);
}

#[tokio::test]
async fn test_changed_token_triggers_reimport() {
    let remote = MemoryRemote::new();
    let file = path("monthly01/CRNM0102-AZ_Tucson.txt");
    remote.put_file(&file, "T1", [monthly_line("53131", "201301", "10.0")]);
    remote.put_file(
        &path("monthly01/CRNM0102-CO_Boulder.txt"),
        "T1",
        [monthly_line("94075", "201301", "2.0")],
    );
    let sync = memory_synchronizer(&remote).await;
    sync.sync_product(Product::Monthly01).await.unwrap();
    let fetches = remote.fetch_count();

    remote.put_file(&file, "T2", [monthly_line("53131", "201301", "11.5")]);
    let report = sync.sync_product(Product::Monthly01).await.unwrap();

    assert_eq!(report.stale, 1);
    assert_eq!(report.imported, 1);
    assert_eq!(remote.fetch_count(), fetches + 1);
    assert_eq!(
        sync.store().ledger_entry(&file).await.unwrap(),
        Some("T2".to_string())
    );

    let temp: (Option<f64>,) =
        sqlx::query_as("SELECT temp_max FROM monthly01 WHERE wban = 53131 AND local_month = 201301")
            .fetch_one(sync.store().pool())
            .await
            .unwrap();
    assert_eq!(temp.0, Some(11.5));
    assert_eq!(sync.store().row_count(Product::Monthly01).await.unwrap(), 2);
}

// ============================================================================
// Ordering and replacement
// ============================================================================

#[tokio::test]
async fn test_later_file_wins_for_shared_key() {
    let remote = MemoryRemote::new();
    // The 2009 file is processed after the 2007 one even though it is
    // added first.
    remote.put_file(
        &path("hourly02/2009/CRNH0203-2009-a.txt"),
        "T1",
        [hourly_line("53131", "20070101", "0100", "9.0")],
    );
    remote.put_file(
        &path("hourly02/2007/CRNH0203-2007-b.txt"),
        "T1",
        [hourly_line("53131", "20070101", "0100", "1.0")],
    );
    let sync = memory_synchronizer(&remote).await;

    sync.sync_product(Product::Hourly02).await.unwrap();
    assert_eq!(
        hourly_rows(sync.store()).await,
        vec![(53131, 2007010101, Some(9.0))]
    );
}

#[tokio::test]
async fn test_sentinels_are_stored_as_null() {
    let remote = MemoryRemote::new();
    seed_hourly(&remote);
    let sync = memory_synchronizer(&remote).await;

    sync.sync_product(Product::Hourly02).await.unwrap();
    assert_eq!(
        hourly_rows(sync.store()).await,
        vec![
            (53131, 2007010101, Some(4.5)),
            (53131, 2007010102, None),
            (53131, 2009010101, Some(-9999.1)),
        ]
    );
}

#[tokio::test]
async fn test_subhourly_keys_keep_minutes() {
    let remote = MemoryRemote::new();
    remote.put_file(
        &path("subhourly01/2013/CRNS0101-05-2013-AZ_Tucson.txt"),
        "T1",
        [
            subhourly_line("53131", "20130101", "0005", "3.0"),
            subhourly_line("53131", "20130101", "0010", "-9999"),
        ],
    );
    let sync = memory_synchronizer(&remote).await;

    sync.sync_product(Product::Subhourly01).await.unwrap();
    let rows: Vec<(i64, Option<f64>)> =
        sqlx::query_as("SELECT utc_time, temp_avg FROM subhourly01 ORDER BY utc_time")
            .fetch_all(sync.store().pool())
            .await
            .unwrap();
    assert_eq!(rows, vec![(201301010005, Some(3.0)), (201301010010, None)]);
}

// ============================================================================
// Per-file failures
// ============================================================================

#[tokio::test]
async fn test_malformed_record_rejects_whole_file() {
    let remote = MemoryRemote::new();
    let bad = path("daily01/2013/CRND0103-2013-AZ_Tucson.txt");
    let good = path("daily01/2013/CRND0103-2013-CO_Boulder.txt");
    remote.put_file(
        &bad,
        "T1",
        [
            daily_line("53131", "20130101", "10.0"),
            daily_line("53131", "20130102", "11.0"),
            "53131 20130103 2.422 -111.85".to_string(),
            daily_line("53131", "20130104", "12.0"),
            daily_line("53131", "20130105", "13.0"),
        ],
    );
    remote.put_file(&good, "T1", [daily_line("94075", "20130101", "1.0")]);
    let sync = memory_synchronizer(&remote).await;

    let report = sync.sync_product(Product::Daily01).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, bad);
    assert!(report.failures[0].error.contains("line 3"));

    assert_eq!(daily_rows(sync.store()).await, vec![(94075, 20130101, Some(1.0))]);
    assert_eq!(sync.store().ledger_entry(&bad).await.unwrap(), None);
    assert_eq!(
        sync.store().ledger_entry(&good).await.unwrap(),
        Some("T1".to_string())
    );

    // Without a ledger entry the file is attempted again.
    let retry = sync.sync_product(Product::Daily01).await.unwrap();
    assert_eq!(retry.stale, 1);
    assert_eq!(retry.failures.len(), 1);

    remote.put_file(&bad, "T2", [daily_line("53131", "20130101", "10.0")]);
    let fixed = sync.sync_product(Product::Daily01).await.unwrap();
    assert!(fixed.is_clean());
    assert_eq!(sync.store().row_count(Product::Daily01).await.unwrap(), 2);
}

#[tokio::test]
async fn test_blank_line_rejects_time_series_file() {
    let remote = MemoryRemote::new();
    let file = path("daily01/2013/CRND0103-2013-AZ_Tucson.txt");
    remote.put_file(
        &file,
        "T1",
        [
            daily_line("53131", "20130101", "10.0"),
            daily_line("53131", "20130102", "11.0"),
            "   ".to_string(),
            daily_line("53131", "20130104", "12.0"),
            daily_line("53131", "20130105", "13.0"),
        ],
    );
    let sync = memory_synchronizer(&remote).await;

    let report = sync.sync_product(Product::Daily01).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("line 3"));
    assert_eq!(sync.store().row_count(Product::Daily01).await.unwrap(), 0);
    assert_eq!(sync.store().ledger_entry(&file).await.unwrap(), None);
}

#[tokio::test]
async fn test_fetch_failure_does_not_stop_later_files() {
    let remote = MemoryRemote::new();
    let first = path("monthly01/CRNM0102-A.txt");
    let second = path("monthly01/CRNM0102-B.txt");
    let third = path("monthly01/CRNM0102-C.txt");
    remote.put_file(
        &first,
        "T1",
        [
            monthly_line("1", "201301", "1.0"),
            monthly_line("1", "201302", "1.0"),
            monthly_line("1", "201303", "1.0"),
        ],
    );
    remote.fail_fetch_after(&first, 2);
    remote.put_file(&second, "T1", [monthly_line("2", "201301", "2.0")]);
    remote.put_file(&third, "T1", [monthly_line("3", "201301", "3.0")]);
    remote.delete_content(&second);
    let sync = memory_synchronizer(&remote).await;

    let report = sync.sync_product(Product::Monthly01).await.unwrap();
    let failed: Vec<&str> = report.failures.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(failed, vec![first.as_str(), second.as_str()]);
    assert_eq!(report.imported, 1);

    let wbans: Vec<(i64,)> = sqlx::query_as("SELECT wban FROM monthly01")
        .fetch_all(sync.store().pool())
        .await
        .unwrap();
    assert_eq!(wbans, vec![(3,)]);

    let ledger = sync.store().ledger().await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(ledger.contains_key(&third));
}

// ============================================================================
// Station metadata
// ============================================================================

#[tokio::test]
async fn test_station_filter() {
    let remote = MemoryRemote::new();
    remote.put_file(
        &path("stations.tsv"),
        "T1",
        [
            "WBAN\tCOUNTRY\tSTATE\tLOCATION\tVECTOR\tNAME\tLATITUDE\tLONGITUDE\tELEVATION\tSTATUS\tCOMMISSIONING\tCLOSING\tOPERATION\tPAIRING\tNETWORK".to_string(),
            station_line("ABC123", "Pending"),
            station_line("53131", "AZ Tucson 11 W"),
            String::new(),
            station_line("94075", "CO Boulder 14 W"),
        ],
    );
    let sync = memory_synchronizer(&remote).await;

    let report = sync.sync_product(Product::Stations).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.rows_merged, 2);

    let stations: Vec<(i64, String, Option<String>)> =
        sqlx::query_as("SELECT wban, name, closing FROM stations ORDER BY wban")
            .fetch_all(sync.store().pool())
            .await
            .unwrap();
    assert_eq!(
        stations,
        vec![
            (53131, "AZ Tucson 11 W".to_string(), Some(String::new())),
            (94075, "CO Boulder 14 W".to_string(), Some(String::new())),
        ]
    );
}

// ============================================================================
// Fatal errors
// ============================================================================

#[tokio::test]
async fn test_unreachable_remote_aborts() {
    let remote = MemoryRemote::new();
    seed_hourly(&remote);
    remote.set_unavailable(true);
    let sync = memory_synchronizer(&remote).await;

    let result = sync.sync_product(Product::Hourly02).await;
    assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
    assert!(sync.store().ledger().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_product_directory_aborts() {
    let remote = MemoryRemote::new();
    seed_hourly(&remote);
    let sync = memory_synchronizer(&remote).await;

    let result = sync
        .sync_all(&[Product::Hourly02, Product::Daily01, Product::Monthly01])
        .await;
    assert!(matches!(result, Err(SyncError::RemoteUnavailable(_))));
    // Files committed before the failure stay committed.
    assert_eq!(sync.store().row_count(Product::Hourly02).await.unwrap(), 3);
}

#[tokio::test]
async fn test_storage_error_stops_the_run() {
    let remote = MemoryRemote::new();
    remote.put_file(
        &path("monthly01/CRNM0102-A.txt"),
        "T1",
        [monthly_line("1", "201301", "1.0")],
    );
    remote.put_file(
        &path("monthly01/CRNM0102-B.txt"),
        "T1",
        [monthly_line("2", "201301", "2.0")],
    );
    let sync = memory_synchronizer(&remote).await;
    sqlx::query("DROP TABLE monthly01")
        .execute(sync.store().pool())
        .await
        .unwrap();

    let result = sync.sync_product(Product::Monthly01).await;
    assert!(matches!(result, Err(SyncError::Storage(_))));
    assert_eq!(remote.fetch_count(), 1);
    assert!(sync.store().ledger().await.unwrap().is_empty());
}

// ============================================================================
// On-disk database
// ============================================================================

#[tokio::test]
async fn test_on_disk_database_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("crn.sqlite");
    let remote = MemoryRemote::new();
    seed_hourly(&remote);

    {
        let store = SyncStore::open(&db).await.unwrap();
        let sync = Synchronizer::new(remote.clone(), store).with_root(ROOT);
        let report = sync.sync_product(Product::Hourly02).await.unwrap();
        assert_eq!(report.imported, 2);
        sync.store().pool().close().await;
    }

    let store = SyncStore::open(&db).await.unwrap();
    let sync = Synchronizer::new(remote.clone(), store).with_root(ROOT);
    let plan = sync.plan(Product::Hourly02).await.unwrap();
    assert_eq!(plan.candidates, 2);
    assert!(plan.stale.is_empty());
    assert_eq!(sync.store().row_count(Product::Hourly02).await.unwrap(), 3);
}
