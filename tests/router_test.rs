//! Routing tests for ClusterDb over recording in-memory nodes.
//!
//! These verify:
//! 1. Reads are spread over the readers, writes always reach the writer
//! 2. A cluster without readers sends reads to the writer
//! 3. Ping checks the writer first and stops at the first failure
//! 4. Close reaches every distinct node once, logged or not
//! 5. Logging can be switched on, re-applied and removed without stacking, including
//!    through `with_logging` / `without_logging` on the cluster handle

mod common;

use common::{CaptureSink, Calls, StubNode, as_handle};
use sqlx_cluster::handle::same_handle;
use sqlx_cluster::{
    ClusterDb, ClusterOptions, Command, Connection, DbError, Handle, NamedArgs, TxOptions, Value,
    with_logging, without_logging,
};
use std::sync::Arc;

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(n, op)| (n.to_string(), op.to_string()))
        .collect()
}

fn cluster_of(
    writer: &Arc<StubNode>,
    readers: &[Arc<StubNode>],
    options: ClusterOptions,
) -> ClusterDb {
    match ClusterDb::new(
        as_handle(writer),
        readers.iter().map(as_handle).collect(),
        "stub",
        options,
    ) {
        Ok(cluster) => cluster,
        Err(e) => panic!("cluster construction failed: {}", e),
    }
}

#[tokio::test]
async fn test_reads_spread_over_readers_and_writes_hit_writer() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let readers: Vec<_> = (1..=3)
        .map(|i| StubNode::new(&format!("r{}", i), &calls).handle())
        .collect();
    let cluster = cluster_of(&writer, &readers, ClusterOptions::new());

    for _ in 0..100 {
        let rows = cluster.query("SELECT * FROM users", &[]).await.unwrap();
        let node = rows.iter().next().unwrap().get("node").unwrap();
        assert_ne!(node, &Value::from("w"));
    }
    let result = cluster
        .execute("UPDATE users SET active = ?", &[Value::Bool(true)])
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);

    assert_eq!(calls.ops_on("w"), vec!["execute"]);
    let reads: usize = ["r1", "r2", "r3"].iter().map(|r| calls.on(r)).sum();
    assert_eq!(reads, 100);
    for reader in ["r1", "r2", "r3"] {
        assert!(calls.on(reader) > 0, "{} never chosen", reader);
        assert!(calls.ops_on(reader).iter().all(|op| op == "query"));
    }
}

#[tokio::test]
async fn test_no_readers_falls_back_to_writer() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let cluster = cluster_of(&writer, &[], ClusterOptions::new());

    cluster.query("SELECT 1", &[]).await.unwrap();
    cluster.get("SELECT 1", &[]).await.unwrap();
    assert!(same_handle(cluster.reader(), cluster.writer()));
    assert_eq!(calls.ops_on("w"), vec!["query", "get"]);
}

#[tokio::test]
async fn test_single_reader_always_chosen() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let cluster = cluster_of(&writer, &[Arc::clone(&reader)], ClusterOptions::new());

    for _ in 0..20 {
        assert!(same_handle(cluster.reader(), &as_handle(&reader)));
        cluster.select("SELECT 1", &[]).await.unwrap();
    }
    assert_eq!(calls.on("r"), 20);
    assert_eq!(calls.on("w"), 0);
}

#[tokio::test]
async fn test_every_operation_is_routed_by_kind() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let cluster = cluster_of(&writer, &[reader], ClusterOptions::new());
    let named = NamedArgs::new().bind("id", 1);

    cluster.query("SELECT 1", &[]).await.unwrap();
    cluster.query_row("SELECT 1", &[]).await.into_result().unwrap();
    cluster.get("SELECT 1", &[]).await.unwrap();
    cluster.select("SELECT 1", &[]).await.unwrap();
    cluster
        .named_query("SELECT * FROM t WHERE id = :id", &named)
        .await
        .unwrap();

    cluster.execute("DELETE FROM t", &[]).await.unwrap();
    let stmt = cluster.prepare("SELECT * FROM t").await.unwrap();
    assert_eq!(stmt.columns, vec!["node"]);
    cluster
        .named_execute("DELETE FROM t WHERE id = :id", &named)
        .await
        .unwrap();
    let tx = cluster.begin().await.unwrap();
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        calls.ops_on("r"),
        vec!["query", "query_row", "get", "select", "named_query"]
    );
    assert_eq!(
        calls.ops_on("w"),
        vec![
            "execute",
            "prepare",
            "named_execute",
            "begin",
            "tx_execute",
            "commit"
        ]
    );
}

#[tokio::test]
async fn test_prepared_statement_query_runs_on_reader() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let cluster = cluster_of(&writer, &[reader], ClusterOptions::new());

    let stmt = cluster.prepare("SELECT * FROM t").await.unwrap();
    stmt.query(&cluster, &[]).await.unwrap();
    stmt.execute(&cluster, &[]).await.unwrap();

    assert_eq!(calls.ops_on("w"), vec!["prepare", "execute"]);
    assert_eq!(calls.ops_on("r"), vec!["query"]);
}

#[tokio::test]
async fn test_handle_selects_by_kind() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let cluster = cluster_of(&writer, &[Arc::clone(&reader)], ClusterOptions::new());

    assert!(same_handle(cluster.handle(false), &as_handle(&writer)));
    assert!(same_handle(cluster.handle(true), &as_handle(&reader)));
}

#[tokio::test]
async fn test_ping_checks_writer_then_readers() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let readers = vec![
        StubNode::new("r1", &calls).handle(),
        StubNode::new("r2", &calls).handle(),
    ];
    let cluster = cluster_of(&writer, &readers, ClusterOptions::new());

    cluster.ping().await.unwrap();
    assert_eq!(
        calls.all(),
        pairs(&[("w", "ping"), ("r1", "ping"), ("r2", "ping")])
    );
}

#[tokio::test]
async fn test_ping_stops_at_first_failing_reader() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let readers = vec![
        StubNode::new("r1", &calls).failing_ping().handle(),
        StubNode::new("r2", &calls).handle(),
    ];
    let cluster = cluster_of(&writer, &readers, ClusterOptions::new());

    let err = cluster.ping().await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.to_string().contains("r1 is down"));
    assert_eq!(calls.all(), pairs(&[("w", "ping"), ("r1", "ping")]));
}

#[tokio::test]
async fn test_ping_stops_at_failing_writer() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).failing_ping().handle();
    let readers = vec![StubNode::new("r1", &calls).handle()];
    let cluster = cluster_of(&writer, &readers, ClusterOptions::new());

    assert!(cluster.ping().await.is_err());
    assert_eq!(calls.all(), pairs(&[("w", "ping")]));
}

#[tokio::test]
async fn test_errors_pass_through_unchanged() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let readers = vec![StubNode::new("r", &calls).failing().handle()];
    let cluster = cluster_of(&writer, &readers, ClusterOptions::new());

    let err = cluster.query("SELECT * FROM missing", &[]).await.unwrap_err();
    match err {
        DbError::Database { sql_state, .. } => assert_eq!(sql_state.as_deref(), Some("42P01")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_close_reaches_each_node_once() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    // The writer doubles as a reader
    let cluster = cluster_of(
        &writer,
        &[Arc::clone(&writer), Arc::clone(&reader)],
        CaptureSink::new().cluster_options(),
    );

    cluster.close().await;
    assert_eq!(writer.close_count(), 1);
    assert_eq!(reader.close_count(), 1);
}

#[tokio::test]
async fn test_require_readers_rejects_empty_reader_list() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();

    let result = ClusterDb::new(
        as_handle(&writer),
        Vec::new(),
        "stub",
        ClusterOptions::new().name("orders").require_readers(true),
    );
    match result {
        Err(DbError::Configuration { message }) => assert!(message.contains("orders")),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("cluster without readers was accepted"),
    }
}

#[tokio::test]
async fn test_name_metadata_and_driver() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let mut cluster = cluster_of(&writer, &[], ClusterOptions::new().name("orders"));

    assert_eq!(cluster.name(), "orders");
    assert_eq!(cluster.driver_name(), "stub");
    assert!(cluster.metadata::<u32>().is_none());

    cluster.set_name("billing");
    cluster.set_metadata(42u32);
    assert_eq!(cluster.name(), "billing");
    assert_eq!(cluster.metadata::<u32>().as_deref(), Some(&42));
    assert!(cluster.metadata::<String>().is_none());
}

#[tokio::test]
async fn test_logging_enable_reapply_and_disable() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let sink = CaptureSink::new();
    let mut cluster = cluster_of(&writer, &[Arc::clone(&reader)], sink.cluster_options());
    assert!(cluster.is_logging());

    cluster.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(sink.lines().len(), 1);

    // Re-enabling replaces the decorator instead of nesting a second one
    cluster.enable_logging(sink.options(false));
    cluster.query("SELECT 2", &[]).await.unwrap();
    assert_eq!(sink.count("SELECT 2"), 1);

    cluster.disable_logging();
    assert!(!cluster.is_logging());
    assert!(same_handle(cluster.writer(), &as_handle(&writer)));
    assert!(same_handle(&cluster.readers()[0], &as_handle(&reader)));

    cluster.query("SELECT 3", &[]).await.unwrap();
    assert_eq!(sink.count("SELECT 3"), 0);
    assert_eq!(calls.ops_on("r").len(), 3);
}

#[tokio::test]
async fn test_logged_cluster_transaction_is_logged_once() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let sink = CaptureSink::new();
    let cluster = cluster_of(&writer, &[reader], sink.cluster_options());

    let tx = sqlx_cluster::begin(&cluster, TxOptions::default())
        .await
        .unwrap();
    assert!(tx.log_options().is_some());
    tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(sink.count("BEGIN"), 1);
    assert_eq!(sink.count("INSERT INTO t"), 1);
    assert_eq!(sink.count("COMMIT"), 1);
    assert_eq!(calls.ops_on("w"), vec!["begin", "tx_execute", "commit"]);
}

#[tokio::test]
async fn test_with_logging_on_logging_cluster_does_not_duplicate() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let reader = StubNode::new("r", &calls).handle();
    let sink = CaptureSink::new();
    let cluster = cluster_of(&writer, &[reader], sink.cluster_options());

    let handle = with_logging(Arc::new(cluster), sink.options(false));
    assert!(handle.unwrap_logged().is_none());
    handle.execute("UPDATE t SET x = 1", &[]).await.unwrap();
    handle.query("SELECT 1", &[]).await.unwrap();
    let tx = sqlx_cluster::begin(handle.as_ref(), TxOptions::default())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(sink.count("UPDATE t SET x = 1"), 1);
    assert_eq!(sink.count("SELECT 1"), 1);
    assert_eq!(sink.count("BEGIN"), 1);
    assert_eq!(sink.count("COMMIT"), 1);

    // Stripping a logging cluster yields a quiet cluster over the same nodes
    let quiet = without_logging(handle);
    assert!(quiet.log_options().is_none());
    quiet.execute("UPDATE t SET x = 2", &[]).await.unwrap();
    assert_eq!(sink.count("UPDATE t SET x = 2"), 0);
    assert_eq!(calls.ops_on("w"), vec!["execute", "begin", "commit", "execute"]);
}

#[tokio::test]
async fn test_with_logging_on_quiet_cluster_logs_once() {
    let calls = Calls::new();
    let writer = StubNode::new("w", &calls).handle();
    let sink = CaptureSink::new();
    let bare: Handle = Arc::new(cluster_of(&writer, &[], ClusterOptions::new()));

    assert!(same_handle(&without_logging(Arc::clone(&bare)), &bare));
    let logged = with_logging(Arc::clone(&bare), sink.options(false));
    let again = with_logging(logged, sink.options(false));
    again.get("SELECT 1", &[]).await.unwrap();

    assert_eq!(sink.count("SELECT 1"), 1);
    assert!(bare.log_options().is_none());
}
