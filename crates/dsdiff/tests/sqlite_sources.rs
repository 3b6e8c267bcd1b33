//! End-to-end runs against SQLite data sources.
//!
//! Every test builds its databases in a scratch directory, connects a
//! session and checks the reports written to disk.

use dsdiff::config::{CommandsConfig, ExecutorConfig};
use dsdiff::{BdiffOptions, Config, DataSourceConfig, DbType, DsdiffError, Session};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a SQLite database file from a script.
async fn create_db(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::raw_sql(script).execute(&pool).await.unwrap();
    pool.close().await;
    path
}

fn source(path: &Path) -> DataSourceConfig {
    DataSourceConfig {
        r#type: DbType::Sqlite,
        url: String::new(),
        schema: path.to_string_lossy().into_owned(),
        username: String::new(),
        password: String::new(),
        enabled: true,
    }
}

fn config(dir: &TempDir, dbs: &[&PathBuf]) -> Config {
    let commands = CommandsConfig {
        bdiff_output_dir: dir.path().join("bdiff"),
        ..Default::default()
    };
    Config {
        data_source_args: String::new(),
        data_sources: dbs.iter().map(|p| source(p)).collect(),
        commands,
        executor: ExecutorConfig::default(),
    }
}

fn tables(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn report(dir: &TempDir, table: &str) -> String {
    std::fs::read_to_string(dir.path().join("bdiff").join(format!("{}.csv", table))).unwrap()
}

const USERS_BASE: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
    INSERT INTO users VALUES (1, 'a'), (2, 'b');
";

const USERS_TARGET: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
    INSERT INTO users VALUES (1, 'a'), (3, 'c');
";

#[tokio::test]
async fn test_extra_and_missing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;
    let config = config(&dir, &[&base, &target]);
    let key = source(&target).key();

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.status, "completed");
    assert_eq!(summary.tables_compared, 1);
    assert_eq!((summary.extra, summary.missing, summary.diff), (1, 1, 0));
    assert_eq!(
        report(&dir, "users"),
        format!(
            "id,name,Table,DataSource,Type,SQL\n\
             3,c,users,{key},EXTRA,\"INSERT INTO users(id,name) VALUES ('3','c')\"\n\
             2,b,users,{key},MISSING,\"INSERT INTO users(id,name) VALUES ('2','b')\"\n",
            key = key
        )
    );
}

#[tokio::test]
async fn test_diff_pair_and_null_cells() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(
        dir.path(),
        "base.db",
        "CREATE TABLE items (id INTEGER, name TEXT, note TEXT);
         INSERT INTO items VALUES (1, 'a', 'x'), (2, 'b', NULL);",
    )
    .await;
    let target = create_db(
        dir.path(),
        "target.db",
        "CREATE TABLE items (id INTEGER, name TEXT, note TEXT);
         INSERT INTO items VALUES (1, 'z', 'x'), (2, 'b', 'NULL');",
    )
    .await;
    let config = config(&dir, &[&base, &target]);
    let key = source(&target).key();

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["items"])).await.unwrap();
    session.close().await;

    // A real NULL and the text NULL compare equal
    assert_eq!(summary.diff, 1);
    assert_eq!(
        report(&dir, "items"),
        format!(
            "id,name,note,Table,DataSource,Type,SQL\n\
             1,a,x,items,BASE,DIFF,\n\
             1,z,/,items,{},DIFF,\n",
            key
        )
    );
}

#[tokio::test]
async fn test_skipped_column_change_is_masked() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(
        dir.path(),
        "base.db",
        "CREATE TABLE t (id INTEGER, name TEXT, updated_at TEXT);
         INSERT INTO t VALUES (1, 'a', '2020-01-01');",
    )
    .await;
    let target = create_db(
        dir.path(),
        "target.db",
        "CREATE TABLE t (id INTEGER, name TEXT, updated_at TEXT);
         INSERT INTO t VALUES (1, 'a', '2024-05-05');",
    )
    .await;
    let mut config = config(&dir, &[&base, &target]);
    config.commands.bdiff_skip_columns = tables(&["updated_at", "not_a_column"]);

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["t"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.diff, 0);
    assert_eq!(report(&dir, "t"), "id,name,updated_at,Table,DataSource,Type,SQL\n");
}

#[tokio::test]
async fn test_schema_mismatch_single_record() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(
        dir.path(),
        "target.db",
        "CREATE TABLE users (id INTEGER, name TEXT, extra TEXT);
         INSERT INTO users VALUES (1, 'a', 'e'), (5, 'q', 'e');",
    )
    .await;
    let config = config(&dir, &[&base, &target]);
    let key = source(&target).key();

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.schema_mismatches, 1);
    assert_eq!((summary.extra, summary.missing, summary.diff), (0, 0, 0));
    assert_eq!(
        report(&dir, "users"),
        format!(
            "id,name,Table,DataSource,Type,SQL\nid,name,extra,users,{},DIFF_TABLE,\n",
            key
        )
    );
}

#[tokio::test]
async fn test_row_guard_skips_table() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;
    let mut config = config(&dir, &[&base, &target]);
    config.commands.bdiff_max_rows = 1;

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.tables_skipped, 1);
    assert_eq!(summary.tables[0].base_rows, Some(2));
    assert!(summary.tables[0].report.is_none());
    assert_eq!(report(&dir, "users"), "");
}

#[tokio::test]
async fn test_batch_sizes_produce_same_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut base_script = String::from("CREATE TABLE n (id INTEGER, v TEXT);");
    let mut target_script = String::from("CREATE TABLE n (id INTEGER, v TEXT);");
    for i in 0..40 {
        if i % 4 != 0 {
            base_script.push_str(&format!("INSERT INTO n VALUES ({}, 'v{}');", i, i));
        }
        if i % 5 != 0 {
            let v = if i % 3 == 0 { "changed".to_string() } else { format!("v{}", i) };
            target_script.push_str(&format!("INSERT INTO n VALUES ({}, '{}');", i, v));
        }
    }
    let base = create_db(dir.path(), "base.db", &base_script).await;
    let target = create_db(dir.path(), "target.db", &target_script).await;

    let mut outputs = Vec::new();
    for batch in [0u64, 1, 7, 100] {
        let mut config = config(&dir, &[&base, &target]);
        config.commands.bdiff_batch_size = batch;
        let options = BdiffOptions::from_config(&config);
        let session = Session::connect(config).await.unwrap();
        session.bdiff(options).run(&tables(&["n"])).await.unwrap();
        session.close().await;
        outputs.push(report(&dir, "n"));
    }

    assert!(outputs[0].lines().count() > 1);
    for output in &outputs[1..] {
        assert_eq!(output, &outputs[0]);
    }
}

#[tokio::test]
async fn test_rerun_is_byte_identical_with_many_targets() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let first = create_db(dir.path(), "t1.db", USERS_TARGET).await;
    let second = create_db(
        dir.path(),
        "t2.db",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO users VALUES (2, 'B');",
    )
    .await;

    let mut runs = Vec::new();
    for parallel in [true, true, false] {
        let mut config = config(&dir, &[&base, &first, &second]);
        config.executor.parallel = parallel;
        let options = BdiffOptions::from_config(&config);
        let session = Session::connect(config).await.unwrap();
        session.bdiff(options).run(&tables(&["users"])).await.unwrap();
        session.close().await;
        runs.push(report(&dir, "users"));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], runs[2]);

    // Sections follow data source order
    let first_key = source(&first).key();
    let second_key = source(&second).key();
    let first_pos = runs[0].find(&first_key).unwrap();
    let second_pos = runs[0].find(&second_key).unwrap();
    assert!(first_pos < second_pos);
}

#[tokio::test]
async fn test_failed_target_does_not_stop_others() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let broken = create_db(dir.path(), "broken.db", "CREATE TABLE other (id INTEGER);").await;
    let good = create_db(dir.path(), "good.db", USERS_TARGET).await;
    let config = config(&dir, &[&base, &broken, &good]);
    let good_key = source(&good).key();
    let broken_key = source(&broken).key();

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session.bdiff(options).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.status, "failed");
    assert!(summary.has_failures());
    assert_eq!(summary.failures.len(), 1);
    let targets = &summary.tables[0].targets;
    assert!(targets[0].error.is_some());
    assert!(targets[1].error.is_none());

    let content = report(&dir, "users");
    assert!(content.contains(&good_key));
    assert!(!content.contains(&broken_key));
}

#[tokio::test]
async fn test_stop_on_error_aborts_at_table_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;
    let mut config = config(&dir, &[&base, &target]);
    config.executor.stop_on_error = true;

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session
        .bdiff(options)
        .run(&tables(&["no_such_table", "users"]))
        .await
        .unwrap();
    session.close().await;

    assert_eq!(summary.status, "aborted");
    assert_eq!(summary.tables_failed, 1);
    assert_eq!(summary.tables.len(), 1);
    assert!(!dir.path().join("bdiff").join("users.csv").exists());
}

#[tokio::test]
async fn test_missing_base_table_continues_without_stop_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;
    let config = config(&dir, &[&base, &target]);

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    let summary = session
        .bdiff(options)
        .run(&tables(&["no_such_table", "users"]))
        .await
        .unwrap();
    session.close().await;

    assert_eq!(summary.tables_failed, 1);
    assert_eq!(summary.tables_compared, 1);
    assert_eq!(summary.extra, 1);
}

#[tokio::test]
async fn test_disabled_source_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;
    let mut config = config(&dir, &[&base, &target]);
    let mut disabled = source(&dir.path().join("never-created.db"));
    disabled.enabled = false;
    config.data_sources.insert(1, disabled);

    let options = BdiffOptions::from_config(&config);
    let session = Session::connect(config).await.unwrap();
    assert_eq!(session.pool().len(), 2);
    let summary = session.bdiff(options).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.tables[0].targets.len(), 1);
    assert_eq!(summary.tables[0].targets[0].data_source_key, source(&target).key());
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let missing = dir.path().join("missing.db");
    let config = config(&dir, &[&base, &missing]);

    let err = Session::connect(config).await.err().unwrap();
    assert!(matches!(err, DsdiffError::Connect { .. }));
    assert_eq!(err.exit_code(), dsdiff::error::EXIT_CONNECT_ERROR);
}

#[tokio::test]
async fn test_health_check_reports_each_source() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let missing = dir.path().join("missing.db");
    let config = config(&dir, &[&base, &missing]);

    let result = Session::health_check(&config).await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.sources.len(), 2);
    assert!(result.sources[0].connected);
    assert!(!result.sources[1].connected);
    assert!(result.sources[1].error.is_some());
}

#[tokio::test]
async fn test_count_report() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(
        dir.path(),
        "target.db",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO users VALUES (1, 'a'), (3, 'c'), (4, 'd');",
    )
    .await;
    let config = config(&dir, &[&base, &target]);
    let keys = (source(&base).key(), source(&target).key());
    let output = dir.path().join("count.csv");

    let session = Session::connect(config).await.unwrap();
    let summary = session.count(&output).run(&tables(&["users"])).await.unwrap();
    session.close().await;

    assert_eq!(summary.tables[0].counts, vec![Some(2), Some(3)]);
    assert!(!summary.tables[0].consistent());
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        format!("Tables,{},{}\nusers,2,3\n", keys.0, keys.1)
    );
}

#[tokio::test]
async fn test_count_failure_still_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", "CREATE TABLE other (id INTEGER);").await;
    let config = config(&dir, &[&base, &target]);
    let output = dir.path().join("count.csv");

    let session = Session::connect(config).await.unwrap();
    let err = session.count(&output).run(&tables(&["users"])).await.err().unwrap();
    session.close().await;

    assert!(matches!(err, DsdiffError::Query { .. }));
    let content = std::fs::read_to_string(&output).unwrap();
    assert!(content.ends_with("users,2,ERROR\n"));
}

#[tokio::test]
async fn test_reconfigure_swaps_sources() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", USERS_BASE).await;
    let target = create_db(dir.path(), "target.db", USERS_TARGET).await;

    let session = Session::connect(config(&dir, &[&base])).await.unwrap();
    assert_eq!(session.pool().len(), 1);

    let session = match session.reconfigure(config(&dir, &[&base, &target])).await {
        Ok(session) => session,
        Err((_, e)) => panic!("reconfigure failed: {}", e),
    };
    assert_eq!(session.pool().len(), 2);
    assert_eq!(session.executor().lanes(), 2);

    // A failing reconfigure keeps the current session
    let broken = config(&dir, &[&base, &dir.path().join("missing.db")]);
    let session = match session.reconfigure(broken).await {
        Ok(_) => panic!("reconfigure should fail"),
        Err((session, e)) => {
            assert!(matches!(e, DsdiffError::Connect { .. }));
            session
        }
    };
    assert_eq!(session.pool().len(), 2);
    session.close().await;
}

const ROWS_BASE: &str = "
    CREATE TABLE users (id INTEGER, name TEXT);
    INSERT INTO users VALUES (1, 'a'), (2, 'b'), (3, 'c');
";

const ROWS_TARGET: &str = "
    CREATE TABLE users (id INTEGER, name TEXT);
    INSERT INTO users VALUES (2, 'x'), (3, 'c'), (3, 'c');
";

fn row_diff_report(dir: &TempDir, table: &str) -> String {
    std::fs::read_to_string(dir.path().join("rows").join(format!("diff-{}.csv", table))).unwrap()
}

#[tokio::test]
async fn test_row_diff_tags_missing_duplicated_and_changed() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", ROWS_BASE).await;
    let target = create_db(dir.path(), "target.db", ROWS_TARGET).await;
    let config = config(&dir, &[&base, &target]);
    let key = source(&target).key();

    let session = Session::connect(config).await.unwrap();
    let summary = session
        .row_diff(0, dir.path().join("rows"))
        .run("users")
        .await
        .unwrap();
    session.close().await;

    assert_eq!(summary.base, source(&base).key());
    assert!(!summary.has_failures());
    assert_eq!(summary.lines(), 3);
    // The base is looked up against itself too and matches
    assert_eq!(summary.targets[0].rows_checked, 3);
    assert_eq!(summary.targets[0].changed, 0);
    assert_eq!(
        row_diff_report(&dir, "users"),
        format!(
            "DataSource,id,name\n\
             {key},1,[NO_DATA]\n\
             {key},2,x [b]\n\
             {key},3,[DUPLICATED_DATA]\n",
            key = key
        )
    );
}

#[tokio::test]
async fn test_row_diff_with_other_base() {
    let dir = tempfile::tempdir().unwrap();
    let first = create_db(dir.path(), "first.db", ROWS_BASE).await;
    let second = create_db(dir.path(), "second.db", ROWS_TARGET).await;
    let config = config(&dir, &[&first, &second]);
    let (first_key, second_key) = (source(&first).key(), source(&second).key());

    let session = Session::connect(config).await.unwrap();
    let summary = session
        .row_diff(1, dir.path().join("rows"))
        .run("users")
        .await
        .unwrap();
    session.close().await;

    assert_eq!(summary.base, second_key);
    // Duplicate base identities are looked up once
    assert_eq!(summary.targets[0].rows_checked, 2);
    assert_eq!(
        row_diff_report(&dir, "users"),
        format!(
            "DataSource,id,name\n\
             {first},2,b [x]\n\
             {second},3,[DUPLICATED_DATA]\n",
            first = first_key,
            second = second_key
        )
    );
}

#[tokio::test]
async fn test_row_diff_failed_source_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", ROWS_BASE).await;
    let other = create_db(dir.path(), "other.db", "CREATE TABLE accounts (id INTEGER);").await;
    let config = config(&dir, &[&base, &other]);

    let session = Session::connect(config).await.unwrap();
    let summary = session
        .row_diff(0, dir.path().join("rows"))
        .run("users")
        .await
        .unwrap();
    session.close().await;

    assert!(summary.has_failures());
    assert!(summary.targets[0].error.is_none());
    assert!(summary.targets[1].error.is_some());
    assert_eq!(row_diff_report(&dir, "users"), "DataSource,id,name\n");
}

#[tokio::test]
async fn test_row_diff_base_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let base = create_db(dir.path(), "base.db", ROWS_BASE).await;
    let config = config(&dir, &[&base]);

    let session = Session::connect(config).await.unwrap();
    let err = session
        .row_diff(3, dir.path().join("rows"))
        .run("users")
        .await
        .unwrap_err();
    session.close().await;

    assert!(matches!(err, DsdiffError::Config(_)));
    assert!(!dir.path().join("rows").exists());
}
