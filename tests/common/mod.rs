//! In-memory handles that record what was routed to them.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sqlx_cluster::{
    ClusterOptions, Command, Connection, DbError, DbResult, ExecResult, Handle, LogOptions,
    NamedArgs, Row, RowResult, Rows, Statement, Transaction, TxOptions, Value,
};

/// Shared call journal: `(node, operation)` in call order.
#[derive(Debug, Default)]
pub struct Calls(Mutex<Vec<(String, String)>>);

impl Calls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, node: &str, op: &str) {
        self.0.lock().unwrap().push((node.to_string(), op.to_string()));
    }

    pub fn all(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }

    /// Calls seen by `node`, any operation.
    pub fn on(&self, node: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|(n, _)| n == node).count()
    }

    pub fn ops_on(&self, node: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, op)| op.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A fake node. Every row it returns has a single `node` column holding its name.
#[derive(Debug)]
pub struct StubNode {
    name: String,
    calls: Arc<Calls>,
    fail_ping: bool,
    fail_statements: bool,
    empty: bool,
    closed: AtomicUsize,
}

impl StubNode {
    pub fn new(name: &str, calls: &Arc<Calls>) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::clone(calls),
            fail_ping: false,
            fail_statements: false,
            empty: false,
            closed: AtomicUsize::new(0),
        }
    }

    pub fn failing_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    /// Statements fail with a database error.
    pub fn failing(mut self) -> Self {
        self.fail_statements = true;
        self
    }

    /// Queries match no rows.
    pub fn empty(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn handle(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn failure(&self) -> DbError {
        DbError::database(
            format!("no such table on {}", self.name),
            Some("42P01".to_string()),
            "Check the table name",
        )
    }

    fn run(&self, op: &str) -> DbResult<Vec<Row>> {
        self.calls.record(&self.name, op);
        if self.fail_statements {
            return Err(self.failure());
        }
        if self.empty {
            return Ok(Vec::new());
        }
        let columns: Arc<[String]> = Arc::from(vec!["node".to_string()]);
        Ok(vec![Row::new(columns, vec![Value::from(self.name.as_str())])])
    }

    fn exec(&self, op: &str) -> DbResult<ExecResult> {
        self.calls.record(&self.name, op);
        if self.fail_statements {
            return Err(self.failure());
        }
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn first(&self, op: &str) -> DbResult<Row> {
        self.run(op)?.into_iter().next().ok_or(DbError::RowNotFound)
    }
}

#[async_trait]
impl Command for StubNode {
    async fn execute(&self, _query: &str, _args: &[Value]) -> DbResult<ExecResult> {
        self.exec("execute")
    }

    async fn query(&self, _query: &str, _args: &[Value]) -> DbResult<Rows> {
        self.run("query").map(Rows::new)
    }

    async fn query_row(&self, _query: &str, _args: &[Value]) -> RowResult {
        RowResult::new(self.first("query_row"))
    }

    async fn get(&self, _query: &str, _args: &[Value]) -> DbResult<Row> {
        self.first("get")
    }

    async fn select(&self, _query: &str, _args: &[Value]) -> DbResult<Vec<Row>> {
        self.run("select")
    }

    async fn prepare(&self, query: &str) -> DbResult<Statement> {
        self.calls.record(&self.name, "prepare");
        Ok(Statement::new(query, vec!["node".to_string()]))
    }

    async fn named_execute(&self, _query: &str, _args: &NamedArgs) -> DbResult<ExecResult> {
        self.exec("named_execute")
    }

    async fn named_query(&self, _query: &str, _args: &NamedArgs) -> DbResult<Rows> {
        self.run("named_query").map(Rows::new)
    }
}

#[async_trait]
impl Connection for StubNode {
    async fn begin_with(&self, _options: TxOptions) -> DbResult<Box<dyn Transaction>> {
        self.calls.record(&self.name, "begin");
        Ok(Box::new(StubTransaction {
            node: self.name.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn ping(&self) -> DbResult<()> {
        self.calls.record(&self.name, "ping");
        if self.fail_ping {
            return Err(DbError::connection(
                format!("{} is down", self.name),
                "Start the node",
            ));
        }
        Ok(())
    }

    async fn close(&self) {
        self.calls.record(&self.name, "close");
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn driver_name(&self) -> &str {
        "stub"
    }
}

/// Transaction begun on a [`StubNode`]; records as `tx_<op>`.
#[derive(Debug)]
pub struct StubTransaction {
    node: String,
    calls: Arc<Calls>,
}

impl StubTransaction {
    fn exec(&self, op: &str) -> DbResult<ExecResult> {
        self.calls.record(&self.node, op);
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }

    fn rows(&self, op: &str) -> Vec<Row> {
        self.calls.record(&self.node, op);
        let columns: Arc<[String]> = Arc::from(vec!["node".to_string()]);
        vec![Row::new(columns, vec![Value::from(self.node.as_str())])]
    }
}

#[async_trait]
impl Command for StubTransaction {
    async fn execute(&self, _query: &str, _args: &[Value]) -> DbResult<ExecResult> {
        self.exec("tx_execute")
    }

    async fn query(&self, _query: &str, _args: &[Value]) -> DbResult<Rows> {
        Ok(Rows::new(self.rows("tx_query")))
    }

    async fn query_row(&self, _query: &str, _args: &[Value]) -> RowResult {
        RowResult::new(self.rows("tx_query_row").into_iter().next().ok_or(DbError::RowNotFound))
    }

    async fn get(&self, _query: &str, _args: &[Value]) -> DbResult<Row> {
        self.rows("tx_get").into_iter().next().ok_or(DbError::RowNotFound)
    }

    async fn select(&self, _query: &str, _args: &[Value]) -> DbResult<Vec<Row>> {
        Ok(self.rows("tx_select"))
    }

    async fn prepare(&self, query: &str) -> DbResult<Statement> {
        self.calls.record(&self.node, "tx_prepare");
        Ok(Statement::new(query, Vec::new()))
    }

    async fn named_execute(&self, _query: &str, _args: &NamedArgs) -> DbResult<ExecResult> {
        self.exec("tx_named_execute")
    }

    async fn named_query(&self, _query: &str, _args: &NamedArgs) -> DbResult<Rows> {
        Ok(Rows::new(self.rows("tx_named_query")))
    }
}

#[async_trait]
impl Transaction for StubTransaction {
    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.calls.record(&self.node, "commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.calls.record(&self.node, "rollback");
        Ok(())
    }

    fn driver_name(&self) -> &str {
        "stub"
    }

    fn into_unlogged(self: Box<Self>) -> Box<dyn Transaction> {
        self
    }
}

/// Upcast a stub into a shared handle, keeping the concrete `Arc` for assertions.
pub fn as_handle(node: &Arc<StubNode>) -> Handle {
    Arc::clone(node) as Handle
}

/// Captures decorator output lines in memory.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink(Arc<Mutex<Vec<String>>>);

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self, color: bool) -> LogOptions {
        let lines = Arc::clone(&self.0);
        LogOptions::new().color(color).output(move |line| {
            lines
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(line).into_owned());
            Ok(line.len())
        })
    }

    /// Cluster options with logging switched on and routed into this sink.
    pub fn cluster_options(&self) -> ClusterOptions {
        ClusterOptions {
            enable_log: true,
            output: self.options(false).output,
            ..ClusterOptions::default()
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}
