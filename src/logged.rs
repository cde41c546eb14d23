//! Statement logging decorator.
//!
//! [`LoggedConnection`] and [`LoggedTransaction`] forward every call to the wrapped
//! handle and write one line per statement to a [`Sink`]:
//!
//! ```text
//! [OK] [3ms] SELECT * FROM users WHERE id = ?  [42]
//! no such table: user
//! [FAIL] [0ms] SELECT * FROM user
//! ```
//!
//! # Stacking
//!
//! Wrapping always starts from the bare handle: [`with_logging`] strips an existing
//! decorator before applying the new one, so enabling logging twice (or changing the
//! colour/sink) never produces duplicate lines, and [`without_logging`] recovers the
//! original handle. Handles that log on their own nodes, such as a
//! [`crate::ClusterDb`], are rebuilt through [`Connection::relog`] instead of being
//! wrapped. Transactions begun on a logged connection are wrapped with the
//! same options, exactly once.
//!
//! "No rows" is a normal query outcome and is logged as `[OK]`.

use async_trait::async_trait;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::handle::{Command, Connection, Handle, Transaction, base_handle};
use crate::models::{ExecResult, NamedArgs, Row, RowResult, Rows, Statement, TxOptions, Value};

/// Output target for statement lines.
pub type Sink = Arc<dyn Fn(&[u8]) -> io::Result<usize> + Send + Sync>;

const COLOR_RED: &str = "\x1b[31m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_YELLOW: &str = "\x1b[33m";
const COLOR_PURPLE: &str = "\x1b[35m";
const COLOR_END: &str = "\x1b[0m";

/// Process-wide default sink, created on first use.
static DEFAULT_OUTPUT: LazyLock<Sink> = LazyLock::new(|| -> Sink { Arc::new(write_stderr) });

/// Get the default sink: timestamped lines on stderr.
pub fn default_output() -> Sink {
    Arc::clone(&DEFAULT_OUTPUT)
}

fn write_stderr(line: &[u8]) -> io::Result<usize> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{} ", chrono::Local::now().format("%Y/%m/%d %H:%M:%S"))?;
    stderr.write_all(line)?;
    stderr.write_all(b"\n")?;
    Ok(line.len())
}

/// Logging configuration shared by a decorator and the transactions it begins.
#[derive(Clone, Default)]
pub struct LogOptions {
    pub color: bool,
    /// `None` selects [`default_output`].
    pub output: Option<Sink>,
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn output<F>(mut self, output: F) -> Self
    where
        F: Fn(&[u8]) -> io::Result<usize> + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(output));
        self
    }

    pub fn sink(&self) -> Sink {
        self.output.clone().unwrap_or_else(default_output)
    }
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("color", &self.color)
            .field("custom_output", &self.output.is_some())
            .finish()
    }
}

/// Arguments as they appear in a log line.
#[derive(Debug, Clone, Copy)]
pub enum LoggedArgs<'a> {
    None,
    Positional(&'a [Value]),
    Named(&'a NamedArgs),
}

impl fmt::Display for LoggedArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggedArgs::None => Ok(()),
            LoggedArgs::Positional(args) => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                Ok(())
            }
            LoggedArgs::Named(args) => {
                for (i, (name, arg)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", name, arg)?;
                }
                Ok(())
            }
        }
    }
}

impl LoggedArgs<'_> {
    fn is_empty(&self) -> bool {
        match self {
            LoggedArgs::None => true,
            LoggedArgs::Positional(args) => args.is_empty(),
            LoggedArgs::Named(args) => args.is_empty(),
        }
    }
}

fn push_colored(buf: &mut String, color: bool, code: &str, text: &str) {
    if color {
        buf.push_str(code);
        buf.push_str(text);
        buf.push_str(COLOR_END);
    } else {
        buf.push_str(text);
    }
}

/// Render one statement line.
pub fn format_statement(
    error: Option<&DbError>,
    color: bool,
    elapsed: Duration,
    query: &str,
    args: &LoggedArgs<'_>,
) -> Vec<u8> {
    let failure = error.filter(|e| !e.is_row_not_found());
    let mut buf = String::with_capacity(query.len() + 32);

    if let Some(err) = failure {
        push_colored(&mut buf, color, COLOR_RED, &err.to_string());
        buf.push('\n');
        push_colored(&mut buf, color, COLOR_RED, "[FAIL]");
    } else {
        push_colored(&mut buf, color, COLOR_GREEN, "[OK]");
    }

    push_colored(
        &mut buf,
        color,
        COLOR_YELLOW,
        &format!(" [{}ms]", elapsed.as_millis()),
    );
    buf.push(' ');
    push_colored(&mut buf, color, COLOR_PURPLE, query);

    if !args.is_empty() {
        buf.push_str(&format!("  [{}]", args));
    }

    buf.into_bytes()
}

fn record(
    options: &LogOptions,
    error: Option<&DbError>,
    elapsed: Duration,
    query: &str,
    args: LoggedArgs<'_>,
) {
    let ok = error.is_none_or(DbError::is_row_not_found);
    debug!(
        target: "sqlx_cluster::statement",
        ok,
        elapsed_ms = elapsed.as_millis() as u64,
        statement = %query,
        "statement finished"
    );

    let line = format_statement(error, options.color, elapsed, query, &args);
    if let Err(e) = (options.sink())(&line) {
        warn!(error = %e, "Statement log sink failed");
    }
}

macro_rules! impl_logged_command {
    ($ty:ty) => {
        #[async_trait]
        impl Command for $ty {
            async fn execute(&self, query: &str, args: &[Value]) -> DbResult<ExecResult> {
                let started = Instant::now();
                let result = self.inner.execute(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Positional(args),
                );
                result
            }

            async fn query(&self, query: &str, args: &[Value]) -> DbResult<Rows> {
                let started = Instant::now();
                let result = self.inner.query(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Positional(args),
                );
                result
            }

            async fn query_row(&self, query: &str, args: &[Value]) -> RowResult {
                let started = Instant::now();
                let row = self.inner.query_row(query, args).await;
                record(
                    &self.options,
                    row.err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Positional(args),
                );
                row
            }

            async fn get(&self, query: &str, args: &[Value]) -> DbResult<Row> {
                let started = Instant::now();
                let result = self.inner.get(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Positional(args),
                );
                result
            }

            async fn select(&self, query: &str, args: &[Value]) -> DbResult<Vec<Row>> {
                let started = Instant::now();
                let result = self.inner.select(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Positional(args),
                );
                result
            }

            async fn prepare(&self, query: &str) -> DbResult<Statement> {
                let started = Instant::now();
                let result = self.inner.prepare(query).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::None,
                );
                result
            }

            async fn named_execute(&self, query: &str, args: &NamedArgs) -> DbResult<ExecResult> {
                let started = Instant::now();
                let result = self.inner.named_execute(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Named(args),
                );
                result
            }

            async fn named_query(&self, query: &str, args: &NamedArgs) -> DbResult<Rows> {
                let started = Instant::now();
                let result = self.inner.named_query(query, args).await;
                record(
                    &self.options,
                    result.as_ref().err(),
                    started.elapsed(),
                    query,
                    LoggedArgs::Named(args),
                );
                result
            }
        }
    };
}

/// A connection that logs every statement it forwards.
pub struct LoggedConnection {
    inner: Handle,
    options: LogOptions,
}

impl LoggedConnection {
    /// Wrap the bare form of `handle`; any existing decorator is dropped first.
    pub fn new(handle: Handle, options: LogOptions) -> Self {
        Self {
            inner: base_handle(&handle),
            options,
        }
    }

    pub fn inner(&self) -> &Handle {
        &self.inner
    }

    pub fn options(&self) -> &LogOptions {
        &self.options
    }
}

impl fmt::Debug for LoggedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggedConnection")
            .field("driver", &self.inner.driver_name())
            .field("options", &self.options)
            .finish()
    }
}

impl_logged_command!(LoggedConnection);

#[async_trait]
impl Connection for LoggedConnection {
    async fn begin_with(&self, options: TxOptions) -> DbResult<Box<dyn Transaction>> {
        let started = Instant::now();
        let result = self.inner.begin_with(options).await;
        record(
            &self.options,
            result.as_ref().err(),
            started.elapsed(),
            "BEGIN",
            LoggedArgs::None,
        );
        Ok(wrap_transaction(result?, self.options.clone()))
    }

    async fn ping(&self) -> DbResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn driver_name(&self) -> &str {
        self.inner.driver_name()
    }

    fn log_options(&self) -> Option<&LogOptions> {
        Some(&self.options)
    }

    fn unwrap_logged(&self) -> Option<Handle> {
        Some(Arc::clone(&self.inner))
    }
}

/// A transaction that logs every statement plus its commit or rollback.
pub struct LoggedTransaction {
    inner: Box<dyn Transaction>,
    options: LogOptions,
}

impl_logged_command!(LoggedTransaction);

#[async_trait]
impl Transaction for LoggedTransaction {
    async fn commit(self: Box<Self>) -> DbResult<()> {
        let LoggedTransaction { inner, options } = *self;
        let started = Instant::now();
        let result = inner.commit().await;
        record(
            &options,
            result.as_ref().err(),
            started.elapsed(),
            "COMMIT",
            LoggedArgs::None,
        );
        result
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        let LoggedTransaction { inner, options } = *self;
        let started = Instant::now();
        let result = inner.rollback().await;
        record(
            &options,
            result.as_ref().err(),
            started.elapsed(),
            "ROLLBACK",
            LoggedArgs::None,
        );
        result
    }

    fn driver_name(&self) -> &str {
        self.inner.driver_name()
    }

    fn log_options(&self) -> Option<&LogOptions> {
        Some(&self.options)
    }

    fn into_unlogged(self: Box<Self>) -> Box<dyn Transaction> {
        self.inner
    }
}

/// Enable logging on a handle. Idempotent: an existing decorator is replaced, not nested.
pub fn with_logging(handle: Handle, options: LogOptions) -> Handle {
    let base = base_handle(&handle);
    match base.relog(Some(options.clone())) {
        Some(relogged) => relogged,
        None => Arc::new(LoggedConnection::new(base, options)),
    }
}

/// Remove logging from a handle, returning the bare handle.
pub fn without_logging(handle: Handle) -> Handle {
    let base = base_handle(&handle);
    base.relog(None).unwrap_or(base)
}

/// Wrap a transaction with logging, replacing any existing decorator.
pub fn wrap_transaction(tx: Box<dyn Transaction>, options: LogOptions) -> Box<dyn Transaction> {
    Box::new(LoggedTransaction {
        inner: tx.into_unlogged(),
        options,
    })
}

/// Begin a transaction on `handle`. When the handle carries logging configuration the
/// transaction is logged with the same options.
pub async fn begin<C>(handle: &C, options: TxOptions) -> DbResult<Box<dyn Transaction>>
where
    C: Connection + ?Sized,
{
    let tx = handle.begin_with(options).await?;
    Ok(match handle.log_options() {
        Some(log) => wrap_transaction(tx, log.clone()),
        None => tx,
    })
}
