//! Blocking wrapper over the async client.
//!
//! Owns a private runtime; every call blocks the calling thread. Use one
//! client per thread, or distinct session ids, exactly as with the async
//! client.

use ch_types::{Block, Result, Value};

use crate::client::{Client as AsyncClient, ClientBuilder};
use crate::insert::InsertContext;
use crate::query::{BlockStream, QueryContext, QueryResult, Summary};

pub struct Client {
    inner: AsyncClient,
    runtime: tokio::runtime::Runtime,
}

impl Client {
    /// Connects with the same options as the async client.
    pub fn connect(mut builder: ClientBuilder) -> Result<Self> {
        builder.mode = "sync";
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| ch_types::Error::Operational(format!("cannot start runtime: {e}")))?;
        let inner = runtime.block_on(builder.connect())?;
        Ok(Self { inner, runtime })
    }

    pub fn query(&self, query: &str) -> Result<QueryResult> {
        self.runtime.block_on(self.inner.query(query))
    }

    pub fn query_with_context(&self, ctx: QueryContext) -> Result<QueryResult> {
        self.runtime.block_on(self.inner.query_with_context(ctx))
    }

    /// Streams blocks through a blocking iterator.
    pub fn query_block_iter(&self, ctx: QueryContext) -> Result<BlockIter<'_>> {
        let stream = self.runtime.block_on(self.inner.query_stream(ctx))?;
        Ok(BlockIter {
            stream,
            runtime: &self.runtime,
        })
    }

    pub fn insert(&self, ctx: InsertContext) -> Result<Summary> {
        self.runtime.block_on(self.inner.insert(ctx))
    }

    pub fn insert_rows(
        &self,
        table: &str,
        column_names: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<Summary> {
        self.runtime
            .block_on(self.inner.insert_rows(table, column_names, rows))
    }

    pub fn command(&self, cmd: &str) -> Result<Vec<String>> {
        self.runtime.block_on(self.inner.command(cmd))
    }

    pub fn ping(&self) -> bool {
        self.runtime.block_on(self.inner.ping())
    }

    pub fn server_version(&self) -> &str {
        self.inner.server_version()
    }
}

/// Blocking block iterator; closing (or dropping) cancels the stream.
pub struct BlockIter<'a> {
    stream: BlockStream,
    runtime: &'a tokio::runtime::Runtime,
}

impl BlockIter<'_> {
    pub fn close(&mut self) {
        self.stream.close();
    }
}

impl Iterator for BlockIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.runtime.block_on(self.stream.next_block()) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
