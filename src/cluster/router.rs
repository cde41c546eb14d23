//! Read/write splitting router.
//!
//! A [`ClusterDb`] owns one writer handle and any number of reader handles.
//! Writes, prepares and transactions go to the writer; reads go to a reader
//! picked uniformly at random, or to the writer when the cluster has no readers.
//! Every call is routed independently.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::db::SqlxConnection;
use crate::error::{DbError, DbResult};
use crate::handle::{Command, Connection, Handle, Transaction, base_handle, same_handle};
use crate::logged::{LogOptions, Sink, with_logging, without_logging};
use crate::models::{
    ClusterConfig, ExecResult, NamedArgs, Row, RowResult, Rows, Statement, TxOptions, Value,
};

/// Process-wide reader selection RNG.
static READER_RNG: LazyLock<Mutex<StdRng>> = LazyLock::new(|| {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos.wrapping_mul(u64::from(std::process::id()));
    Mutex::new(StdRng::seed_from_u64(seed))
});

/// Uniform index in `0..len`. `len` must be greater than 1.
fn random_index(len: usize) -> usize {
    READER_RNG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .gen_range(0..len)
}

/// Construction options for [`ClusterDb`].
#[derive(Clone, Default)]
pub struct ClusterOptions {
    pub name: Option<String>,
    pub enable_log: bool,
    pub color: bool,
    pub output: Option<Sink>,
    /// Fail construction when the reader list is empty.
    pub require_readers: bool,
}

impl ClusterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn enable_log(mut self, enable: bool) -> Self {
        self.enable_log = enable;
        self
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

    pub fn require_readers(mut self, require: bool) -> Self {
        self.require_readers = require;
        self
    }

    fn log_options(&self) -> LogOptions {
        LogOptions {
            color: self.color,
            output: self.output.clone(),
        }
    }
}

impl fmt::Debug for ClusterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterOptions")
            .field("name", &self.name)
            .field("enable_log", &self.enable_log)
            .field("color", &self.color)
            .field("custom_output", &self.output.is_some())
            .field("require_readers", &self.require_readers)
            .finish()
    }
}

/// One writer plus N readers behind a single [`Connection`].
///
/// Clones share the node handles and their pools.
#[derive(Clone)]
pub struct ClusterDb {
    name: String,
    driver_name: String,
    writer: Handle,
    readers: Vec<Handle>,
    metadata: Option<Arc<dyn Any + Send + Sync>>,
    logging: Option<LogOptions>,
}

impl ClusterDb {
    /// Build a router over existing handles.
    pub fn new(
        writer: Handle,
        readers: Vec<Handle>,
        driver_name: impl Into<String>,
        options: ClusterOptions,
    ) -> DbResult<Self> {
        let name = options.name.clone().unwrap_or_default();
        if options.require_readers && readers.is_empty() {
            return Err(DbError::configuration(format!(
                "Cluster '{}' requires at least one reader",
                name
            )));
        }

        let mut cluster = Self {
            name,
            driver_name: driver_name.into(),
            writer,
            readers,
            metadata: None,
            logging: None,
        };
        if options.enable_log {
            cluster.enable_logging(options.log_options());
        }

        info!(
            cluster = %cluster.name,
            driver = %cluster.driver_name,
            readers = cluster.readers.len(),
            logging = options.enable_log,
            "Cluster router created"
        );
        Ok(cluster)
    }

    /// Open sqlx pools for every node of `config` and build a router over them.
    ///
    /// Pools already opened are closed again when a later node fails.
    pub async fn connect(config: &ClusterConfig, options: ClusterOptions) -> DbResult<Self> {
        let writer: Handle = Arc::new(SqlxConnection::connect(&config.writer).await?);

        let mut readers: Vec<Handle> = Vec::with_capacity(config.readers.len());
        for node in &config.readers {
            match SqlxConnection::connect(node).await {
                Ok(reader) => readers.push(Arc::new(reader)),
                Err(e) => {
                    close_all(&writer, &readers).await;
                    return Err(e);
                }
            }
        }

        let options = if options.name.is_some() {
            options
        } else {
            options.name(config.name.clone())
        };
        let driver_name = config.db_type().driver_name();

        match Self::new(Arc::clone(&writer), readers.clone(), driver_name, options) {
            Ok(cluster) => Ok(cluster),
            Err(e) => {
                close_all(&writer, &readers).await;
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Opaque caller data, if it was set with type `T`.
    pub fn metadata<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.metadata.clone()?.downcast::<T>().ok()
    }

    pub fn set_metadata<T: Any + Send + Sync>(&mut self, metadata: T) {
        self.metadata = Some(Arc::new(metadata));
    }

    pub fn writer(&self) -> &Handle {
        &self.writer
    }

    pub fn readers(&self) -> &[Handle] {
        &self.readers
    }

    /// Pick a reader; the writer when there are none.
    pub fn reader(&self) -> &Handle {
        match self.readers.len() {
            0 => &self.writer,
            1 => &self.readers[0],
            n => &self.readers[random_index(n)],
        }
    }

    /// The handle a call of the given kind is routed to.
    pub fn handle(&self, read_only: bool) -> &Handle {
        if read_only {
            self.reader()
        } else {
            &self.writer
        }
    }

    /// Wrap every node with a logging decorator. Re-enabling replaces the previous one.
    pub fn enable_logging(&mut self, options: LogOptions) {
        self.writer = with_logging(Arc::clone(&self.writer), options.clone());
        self.readers = self
            .readers
            .iter()
            .map(|r| with_logging(Arc::clone(r), options.clone()))
            .collect();
        debug!(cluster = %self.name, color = options.color, "Statement logging enabled");
        self.logging = Some(options);
    }

    /// Restore the bare node handles.
    pub fn disable_logging(&mut self) {
        self.writer = without_logging(Arc::clone(&self.writer));
        self.readers = self
            .readers
            .iter()
            .map(|r| without_logging(Arc::clone(r)))
            .collect();
        self.logging = None;
        debug!(cluster = %self.name, "Statement logging disabled");
    }

    pub fn is_logging(&self) -> bool {
        self.logging.is_some()
    }
}

/// Close each distinct underlying handle once.
async fn close_all(writer: &Handle, readers: &[Handle]) {
    let mut closed: Vec<Handle> = Vec::with_capacity(readers.len() + 1);
    for handle in std::iter::once(writer).chain(readers) {
        let base = base_handle(handle);
        if closed.iter().any(|c| same_handle(c, &base)) {
            continue;
        }
        base.close().await;
        closed.push(base);
    }
}

impl fmt::Debug for ClusterDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterDb")
            .field("name", &self.name)
            .field("driver_name", &self.driver_name)
            .field("readers", &self.readers.len())
            .field("logging", &self.logging)
            .field("has_metadata", &self.metadata.is_some())
            .finish()
    }
}

#[async_trait]
impl Command for ClusterDb {
    async fn execute(&self, query: &str, args: &[Value]) -> DbResult<ExecResult> {
        self.writer.execute(query, args).await
    }

    async fn query(&self, query: &str, args: &[Value]) -> DbResult<Rows> {
        self.reader().query(query, args).await
    }

    async fn query_row(&self, query: &str, args: &[Value]) -> RowResult {
        self.reader().query_row(query, args).await
    }

    async fn get(&self, query: &str, args: &[Value]) -> DbResult<Row> {
        self.reader().get(query, args).await
    }

    async fn select(&self, query: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        self.reader().select(query, args).await
    }

    async fn prepare(&self, query: &str) -> DbResult<Statement> {
        self.writer.prepare(query).await
    }

    async fn named_execute(&self, query: &str, args: &NamedArgs) -> DbResult<ExecResult> {
        self.writer.named_execute(query, args).await
    }

    async fn named_query(&self, query: &str, args: &NamedArgs) -> DbResult<Rows> {
        self.reader().named_query(query, args).await
    }
}

#[async_trait]
impl Connection for ClusterDb {
    async fn begin_with(&self, options: TxOptions) -> DbResult<Box<dyn Transaction>> {
        self.writer.begin_with(options).await
    }

    /// Writer first, then readers in order; stops at the first failure.
    async fn ping(&self) -> DbResult<()> {
        self.writer.ping().await?;
        for reader in &self.readers {
            reader.ping().await?;
        }
        Ok(())
    }

    async fn close(&self) {
        info!(cluster = %self.name, "Closing cluster");
        close_all(&self.writer, &self.readers).await;
    }

    fn driver_name(&self) -> &str {
        &self.driver_name
    }

    fn log_options(&self) -> Option<&LogOptions> {
        self.logging.as_ref()
    }

    /// Logging lives on the nodes, so an outer decorator would log every statement twice.
    fn relog(&self, options: Option<LogOptions>) -> Option<Handle> {
        if options.is_none() && self.logging.is_none() {
            return None;
        }
        let mut cluster = self.clone();
        match options {
            Some(options) => cluster.enable_logging(options),
            None => cluster.disable_logging(),
        }
        Some(Arc::new(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_index_in_range() {
        let mut seen = [false; 3];
        for _ in 0..300 {
            let idx = random_index(3);
            assert!(idx < 3);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_cluster_options_builder() {
        let opts = ClusterOptions::new()
            .name("main")
            .enable_log(true)
            .color(true)
            .output(|line: &[u8]| Ok(line.len()))
            .require_readers(true);
        assert_eq!(opts.name.as_deref(), Some("main"));
        assert!(opts.enable_log);
        assert!(opts.require_readers);

        let log = opts.log_options();
        assert!(log.color);
        assert!(log.output.is_some());
    }

    #[test]
    fn test_cluster_options_debug_hides_sink() {
        let opts = ClusterOptions::new().output(|line: &[u8]| Ok(line.len()));
        let text = format!("{:?}", opts);
        assert!(text.contains("custom_output: true"));
    }
}
