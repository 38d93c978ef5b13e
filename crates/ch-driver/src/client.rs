//! The async client: connection bootstrap, query and insert execution,
//! and session lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ch_types::{
    Block, ByteSource, Error, NativeReader, ReadContext, Result, Tz, UtcTzMode, Value, get_type,
};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::sync::mpsc;
use url::Url;

use crate::binding::{
    self, Parameters, apply_query_limit, bind_params, finalize_query, is_columns_only,
    quote_identifier, uses_server_binding,
};
use crate::bridge::{self, BridgeReader, CHUNK_QUEUE_CAPACITY};
use crate::compression::{ContentEncoding, StreamDecompressor};
use crate::http::{
    Auth, HEADER_EXCEPTION_TAG, HEADER_QUERY_ID, HEADER_TIMEZONE, HttpTransport, TransportOptions,
    header_str, parse_summary,
};
use crate::insert::InsertContext;
use crate::query::{BlockStream, QueryContext, QueryResult, Summary};
use crate::settings::{
    InvalidSettingAction, Setting, SettingsCatalog, validate_settings,
};

/// Native protocol revision that introduced wire-compatible
/// LowCardinality serialization; sent as `client_protocol_version` once
/// the probe confirms the server honors it.
const PROTOCOL_VERSION_WITH_LOW_CARD: u64 = 54_405;

/// First server version that accepts `client_protocol_version`.
const CH_VERSION_WITH_PROTOCOL: (u64, u64) = (23, 2);

/// Connection and behavior options; finalized by [`ClientBuilder::connect`].
pub struct ClientBuilder {
    url: String,
    username: Option<String>,
    password: String,
    bearer_token: Option<String>,
    certificate_auth: bool,
    database: Option<String>,
    client_name: Option<String>,
    product_tags: Vec<String>,
    compress: bool,
    query_limit: u64,
    query_retries: usize,
    connect_timeout: Duration,
    send_receive_timeout: Duration,
    max_connection_age: Duration,
    session_id: Option<String>,
    autogenerate_session_id: bool,
    settings: HashMap<String, Setting>,
    apply_server_timezone: bool,
    utc_tz_mode: UtcTzMode,
    invalid_setting_action: InvalidSettingAction,
    show_clickhouse_errors: bool,
    server_host_name: Option<String>,
    pub(crate) mode: &'static str,
}

impl ClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: String::new(),
            bearer_token: None,
            certificate_auth: false,
            database: None,
            client_name: None,
            product_tags: Vec::new(),
            compress: true,
            query_limit: 0,
            query_retries: 2,
            connect_timeout: Duration::from_secs(10),
            send_receive_timeout: Duration::from_secs(300),
            max_connection_age: Duration::from_secs(15),
            session_id: None,
            autogenerate_session_id: false,
            settings: HashMap::new(),
            apply_server_timezone: true,
            utc_tz_mode: UtcTzMode::default(),
            invalid_setting_action: InvalidSettingAction::default(),
            show_clickhouse_errors: true,
            server_host_name: None,
            mode: "async",
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Authenticate through a client TLS certificate; the username rides
    /// in the `X-ClickHouse-User` header.
    pub fn certificate_auth(mut self) -> Self {
        self.certificate_auth = true;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Registers an integration product tag (`name/version`) reported in
    /// the User-Agent ahead of the client identifier.
    pub fn product_tag(mut self, tag: impl Into<String>) -> Self {
        self.product_tags.push(tag.into());
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Default LIMIT applied to SELECT queries without one; 0 disables.
    pub fn query_limit(mut self, limit: u64) -> Self {
        self.query_limit = limit;
        self
    }

    pub fn query_retries(mut self, retries: usize) -> Self {
        self.query_retries = retries;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn send_receive_timeout(mut self, timeout: Duration) -> Self {
        self.send_receive_timeout = timeout;
        self
    }

    pub fn max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = age;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn autogenerate_session_id(mut self) -> Self {
        self.autogenerate_session_id = true;
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<Setting>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    pub fn apply_server_timezone(mut self, apply: bool) -> Self {
        self.apply_server_timezone = apply;
        self
    }

    pub fn utc_tz_mode(mut self, mode: UtcTzMode) -> Self {
        self.utc_tz_mode = mode;
        self
    }

    pub fn invalid_setting_action(mut self, action: InvalidSettingAction) -> Self {
        self.invalid_setting_action = action;
        self
    }

    pub fn show_clickhouse_errors(mut self, show: bool) -> Self {
        self.show_clickhouse_errors = show;
        self
    }

    pub fn server_host_name(mut self, host: impl Into<String>) -> Self {
        self.server_host_name = Some(host.into());
        self
    }

    /// Builds the transport, probes the server, and loads the settings
    /// catalog.
    pub async fn connect(self) -> Result<Client> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::Programming(format!("invalid server url '{}': {e}", self.url)))?;
        let auth = if self.certificate_auth {
            Auth::Certificate {
                username: self.username.clone().unwrap_or_default(),
            }
        } else if let Some(token) = &self.bearer_token {
            Auth::Bearer(token.clone())
        } else if let Some(username) = &self.username {
            Auth::Basic {
                username: username.clone(),
                password: self.password.clone(),
            }
        } else {
            Auth::None
        };
        let transport = HttpTransport::new(TransportOptions {
            url,
            auth,
            client_name: self.client_name.clone(),
            product_tags: self.product_tags.clone(),
            connect_timeout: self.connect_timeout,
            send_receive_timeout: self.send_receive_timeout,
            query_retries: self.query_retries,
            compress: self.compress,
            show_clickhouse_errors: self.show_clickhouse_errors,
            max_connection_age: self.max_connection_age,
            server_host_name: self.server_host_name.clone(),
            mode: self.mode,
        })?;

        let session_id = self.session_id.clone().or_else(|| {
            self.autogenerate_session_id
                .then(|| uuid::Uuid::new_v4().to_string())
        });
        let client_settings: HashMap<String, String> = self
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), v.as_wire()))
            .collect();

        let mut client = Client {
            transport,
            database: self.database,
            client_settings,
            catalog: None,
            server_version: String::new(),
            server_tz: None,
            apply_server_timezone: self.apply_server_timezone,
            utc_tz_mode: self.utc_tz_mode,
            invalid_setting_action: self.invalid_setting_action,
            query_limit: self.query_limit,
            session_id,
            active_session: Arc::new(Mutex::new(None)),
            protocol_version: 0,
        };
        client.initialize().await?;
        Ok(client)
    }
}

/// An async ClickHouse client over HTTP.
///
/// One client owns one settings-catalog snapshot, one session-id slot,
/// and the shared HTTP connection pool. A single client must not run two
/// concurrent requests under the same session id; the second request
/// fails fast.
pub struct Client {
    transport: HttpTransport,
    database: Option<String>,
    client_settings: HashMap<String, String>,
    catalog: Option<SettingsCatalog>,
    server_version: String,
    server_tz: Option<Tz>,
    apply_server_timezone: bool,
    utc_tz_mode: UtcTzMode,
    invalid_setting_action: InvalidSettingAction,
    query_limit: u64,
    session_id: Option<String>,
    active_session: Arc<Mutex<Option<String>>>,
    protocol_version: u64,
}

impl Client {
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn server_timezone(&self) -> Option<Tz> {
        self.server_tz
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Server probe plus settings-catalog load, run once at connect.
    async fn initialize(&mut self) -> Result<()> {
        let probe = self.command("SELECT version(), timezone()").await?;
        if probe.len() >= 2 {
            self.server_version.clone_from(&probe[0]);
            match Tz::named(&probe[1]) {
                Ok(tz) => self.server_tz = Some(tz),
                Err(_) => {
                    tracing::warn!(zone = %probe[1], "server reports an unrecognized time zone, using UTC");
                    self.server_tz = Some(ch_types::tz::UTC);
                }
            }
        }
        let catalog_query = "SELECT name, value, changed, readonly, description, type \
             FROM system.settings LIMIT 10000";
        let result = self.query(catalog_query).await?;
        self.catalog = Some(SettingsCatalog::from_rows(result.rows()));
        self.probe_protocol_version().await;
        Ok(())
    }

    /// Asks the server to frame native responses at a pinned protocol
    /// revision. Best-effort: any failure leaves the default framing.
    async fn probe_protocol_version(&mut self) {
        if !self.min_version(CH_VERSION_WITH_PROTOCOL) {
            return;
        }
        let mut params = self.base_params(HashMap::new());
        params.push((
            "client_protocol_version".to_owned(),
            PROTOCOL_VERSION_WITH_LOW_CARD.to_string(),
        ));
        let outcome = self
            .transport
            .request_bytes(
                reqwest::Method::POST,
                &params,
                HeaderMap::new(),
                Some(Bytes::from_static(b"SELECT 1 AS check\n FORMAT Native")),
                0,
            )
            .await;
        if let Ok(response) = outcome {
            if let Ok(raw) = response.bytes().await {
                if raw.len() >= 16 && raw[8..16] == *b"\x01\x01\x05check" {
                    self.protocol_version = PROTOCOL_VERSION_WITH_LOW_CARD;
                }
            }
        }
    }

    fn min_version(&self, minimum: (u64, u64)) -> bool {
        let mut parts = self
            .server_version
            .split('.')
            .map(|p| p.parse::<u64>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        (major, minor) >= minimum
    }

    fn validate_request_settings(
        &self,
        requested: &HashMap<String, Setting>,
    ) -> Result<HashMap<String, String>> {
        validate_settings(
            self.catalog.as_ref(),
            &self.client_settings,
            requested,
            self.invalid_setting_action,
        )
    }

    /// Common URL parameters: database, client settings, validated
    /// request settings, and the session id.
    fn base_params(&self, request_settings: HashMap<String, String>) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(database) = &self.database {
            params.push(("database".to_owned(), database.clone()));
        }
        for (name, value) in &self.client_settings {
            params.push((name.clone(), value.clone()));
        }
        for (name, value) in request_settings {
            params.push((name, value));
        }
        if let Some(session) = &self.session_id {
            params.push(("session_id".to_owned(), session.clone()));
        }
        if self.protocol_version > 0 {
            params.push((
                "client_protocol_version".to_owned(),
                self.protocol_version.to_string(),
            ));
        }
        params
    }

    fn acquire_session(&self) -> Result<SessionGuard> {
        SessionGuard::acquire(Arc::clone(&self.active_session), self.session_id.as_deref())
    }

    /// Runs a query and materializes every block.
    pub async fn query(&self, query: &str) -> Result<QueryResult> {
        self.query_with_context(QueryContext::new(query)).await
    }

    pub async fn query_with_context(&self, ctx: QueryContext) -> Result<QueryResult> {
        if is_columns_only(&ctx.query) {
            return self.columns_only_query(&ctx).await;
        }
        let stream = self.query_stream(ctx).await?;
        stream.collect().await
    }

    /// Runs a query and returns the block stream without materializing.
    pub async fn query_stream(&self, ctx: QueryContext) -> Result<BlockStream> {
        let session_guard = self.acquire_session()?;
        let (final_sql, mut params) = self.finalize(&ctx)?;
        params.extend(self.base_params(self.validate_request_settings(&ctx.settings)?));
        if let Some(query_id) = &ctx.query_id {
            params.push(("query_id".to_owned(), query_id.clone()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let body = format!("{final_sql}\n FORMAT Native");

        let response = if ctx.external_data.is_empty() {
            self.transport
                .request_bytes(
                    reqwest::Method::POST,
                    &params,
                    headers,
                    Some(Bytes::from(body)),
                    self.transport.query_retries,
                )
                .await?
        } else {
            params.push(("query".to_owned(), body));
            let mut form = reqwest::multipart::Form::new();
            for table in &ctx.external_data {
                params.push((format!("{}_structure", table.name), table.structure.clone()));
                if let Some(format) = &table.format {
                    params.push((format!("{}_format", table.name), format.clone()));
                }
                form = form.part(
                    table.name.clone(),
                    reqwest::multipart::Part::bytes(table.data.to_vec())
                        .file_name(table.name.clone()),
                );
            }
            self.transport.request_multipart(&params, form).await?
        };

        let response_headers = response.headers().clone();
        let query_id = header_str(&response_headers, HEADER_QUERY_ID);
        let summary = parse_summary(&response_headers);
        let exception_tag = header_str(&response_headers, HEADER_EXCEPTION_TAG);
        let encoding = ContentEncoding::from_header(
            header_str(&response_headers, reqwest::header::CONTENT_ENCODING.as_str()).as_deref(),
        )?;
        let response_tz = header_str(&response_headers, HEADER_TIMEZONE)
            .and_then(|name| Tz::named(&name).ok())
            .or(self.server_tz);

        let mut read_ctx = ctx.read_context(response_tz, self.apply_server_timezone);
        read_ctx.utc_tz_mode = self.utc_tz_mode;
        read_ctx.block_info = self.protocol_version > 0;
        let renamer = ctx.column_renamer.clone();

        // Producer: socket chunks onto the bounded queue.
        let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes>>(CHUNK_QUEUE_CAPACITY);
        let producer = tokio::spawn(async move {
            // The session slot stays occupied until the response is
            // drained or the stream is cancelled.
            let _session_guard = session_guard;
            let mut response = response;
            'read: loop {
                match response.chunk().await {
                    Ok(Some(mut chunk)) => {
                        // Keep queue entries near the target chunk size so
                        // backpressure stays meaningful.
                        while chunk.len() > bridge::READ_CHUNK_SIZE {
                            let piece = chunk.split_to(bridge::READ_CHUNK_SIZE);
                            if chunk_tx.send(Ok(piece)).await.is_err() {
                                break 'read;
                            }
                        }
                        if chunk_tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        // A peer close mid-body is downgraded to clean
                        // EOF so a trailing exception tag can still be
                        // decoded.
                        if err.is_body() || err.is_decode() {
                            tracing::warn!(%err, "response body ended early");
                        } else {
                            let _ = chunk_tx
                                .send(Err(Error::Operational(format!(
                                    "error reading response body: {err}"
                                ))))
                                .await;
                        }
                        break;
                    }
                }
            }
        });

        // Consumer: the codec on a blocking thread.
        let (block_tx, block_rx) = mpsc::channel::<Result<Block>>(CHUNK_QUEUE_CAPACITY);
        tokio::task::spawn_blocking(move || {
            let reader = BridgeReader::new(
                chunk_rx,
                match StreamDecompressor::new(encoding) {
                    Ok(decompressor) => decompressor,
                    Err(err) => {
                        let _ = block_tx.blocking_send(Err(err));
                        return;
                    }
                },
                exception_tag,
            );
            let source = ByteSource::new(Box::new(reader));
            let mut native = NativeReader::new(source, read_ctx);
            loop {
                match native.next_block() {
                    Ok(Some(mut block)) => {
                        if let Some(renamer) = &renamer {
                            for name in &mut block.column_names {
                                *name = renamer(name);
                            }
                        }
                        if block_tx.blocking_send(Ok(block)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(Error::StreamComplete) => {
                        // Truncated inside a block with no server
                        // exception: surface what was decoded.
                        tracing::warn!("native stream ended inside a block");
                        break;
                    }
                    Err(err) => {
                        let _ = block_tx.blocking_send(Err(err));
                        break;
                    }
                }
            }
        });

        Ok(BlockStream::new(block_rx, producer, query_id, summary))
    }

    /// Column discovery for `... LIMIT 0` probes: the JSON format carries
    /// names and types without any native payload.
    async fn columns_only_query(&self, ctx: &QueryContext) -> Result<QueryResult> {
        let _session = self.acquire_session()?;
        let (final_sql, mut params) = self.finalize(ctx)?;
        params.extend(self.base_params(self.validate_request_settings(&ctx.settings)?));
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let response = self
            .transport
            .request_bytes(
                reqwest::Method::POST,
                &params,
                headers,
                Some(Bytes::from(format!("{final_sql}\n FORMAT JSON"))),
                self.transport.query_retries,
            )
            .await?;
        let query_id = header_str(response.headers(), HEADER_QUERY_ID);
        let summary = parse_summary(response.headers());
        let raw = response
            .bytes()
            .await
            .map_err(|e| Error::Operational(format!("error reading response body: {e}")))?;
        let parsed: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| Error::Operational(format!("cannot parse JSON column probe: {e}")))?;
        let mut column_names = Vec::new();
        let mut column_types = Vec::new();
        for meta in parsed["meta"].as_array().into_iter().flatten() {
            let name = meta["name"].as_str().unwrap_or_default();
            let type_name = meta["type"].as_str().unwrap_or_default();
            column_names.push(ctx.rename(name));
            column_types.push(get_type(type_name)?);
        }
        Ok(QueryResult {
            column_names,
            column_types,
            blocks: Vec::new(),
            query_id,
            summary,
        })
    }

    /// SQL finalization: parameter binding plus the LIMIT decoration.
    /// Server-side `{name:Type}` binding leaves the text alone and ships
    /// values as `param_` fields.
    fn finalize(&self, ctx: &QueryContext) -> Result<(String, Vec<(String, String)>)> {
        let mut params = Vec::new();
        let final_sql = if uses_server_binding(&ctx.query) {
            if let Parameters::Named(named) = &ctx.parameters {
                params.extend(bind_params(named, self.server_tz));
            }
            ctx.query.clone()
        } else {
            finalize_query(&ctx.query, &ctx.parameters, self.server_tz)?
        };
        Ok((apply_query_limit(&final_sql, self.query_limit), params))
    }

    /// Streams an insert. The captured serializer error, if any, replaces
    /// the HTTP-level failure.
    pub async fn insert(&self, ctx: InsertContext) -> Result<Summary> {
        let _session = self.acquire_session()?;
        ctx.validate()?;
        let mut params = self.base_params(self.validate_request_settings(&ctx.settings)?);
        let column_list = ctx
            .column_names
            .iter()
            .map(|name| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ");
        params.push((
            "query".to_owned(),
            format!("INSERT INTO {} ({column_list}) FORMAT Native", ctx.table),
        ));
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        if let Some(encoding) = ctx.compression.content_encoding() {
            headers.insert(
                reqwest::header::CONTENT_ENCODING,
                HeaderValue::from_static(encoding),
            );
        }

        let (chunks, error_slot) = ctx.into_chunks();
        let (body_tx, body_rx) = mpsc::channel::<Bytes>(CHUNK_QUEUE_CAPACITY);
        let serializer = tokio::task::spawn_blocking(move || {
            for chunk in chunks {
                if body_tx.blocking_send(chunk).is_err() {
                    break;
                }
            }
        });
        let body = reqwest::Body::wrap_stream(bridge::body_stream(body_rx));
        let outcome = self.transport.request_stream(&params, headers, body).await;
        // Give the serializer a moment to finish recording any capture.
        let _ = tokio::time::timeout(Duration::from_secs(1), serializer).await;
        if let Some(captured) = error_slot.lock().take() {
            return Err(captured);
        }
        let response = outcome?;
        let summary = parse_summary(response.headers());
        tracing::debug!(rows = ?summary.get("written_rows"), "insert complete");
        Ok(summary)
    }

    /// Convenience insert: fetches the table's column types, then streams
    /// row-oriented data.
    pub async fn insert_rows(
        &self,
        table: &str,
        column_names: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<Summary> {
        let (names, types) = self.table_columns(table, column_names).await?;
        self.insert(InsertContext::new(table, names, types).rows(rows))
            .await
    }

    /// Column names and types for a table, restricted to `selection` when
    /// non-empty, in selection order.
    pub async fn table_columns(
        &self,
        table: &str,
        selection: &[&str],
    ) -> Result<(Vec<String>, Vec<Arc<ch_types::ChType>>)> {
        let described = self
            .query(&format!("DESCRIBE TABLE {table}"))
            .await?;
        let mut available: Vec<(String, Arc<ch_types::ChType>)> = Vec::new();
        for row in described.rows() {
            let name = row
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Internal("malformed DESCRIBE response".to_owned()))?
                .to_owned();
            let type_name = row
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Internal("malformed DESCRIBE response".to_owned()))?;
            available.push((name, get_type(type_name)?));
        }
        if selection.is_empty() {
            return Ok(available.into_iter().unzip());
        }
        let mut names = Vec::with_capacity(selection.len());
        let mut types = Vec::with_capacity(selection.len());
        for wanted in selection {
            let found = available
                .iter()
                .find(|(name, _)| name == wanted)
                .ok_or_else(|| {
                    Error::Programming(format!("table {table} has no column '{wanted}'"))
                })?;
            names.push(found.0.clone());
            types.push(Arc::clone(&found.1));
        }
        Ok((names, types))
    }

    /// Executes a statement outside the native format: DDL, SET, simple
    /// scalar probes. Returns the tab-separated fields of the first
    /// response line.
    pub async fn command(&self, cmd: &str) -> Result<Vec<String>> {
        let _session = self.acquire_session()?;
        let mut params = self.base_params(HashMap::new());
        params.push(("wait_end_of_query".to_owned(), "1".to_owned()));
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let response = self
            .transport
            .request_bytes(
                reqwest::Method::POST,
                &params,
                headers,
                Some(Bytes::from(cmd.to_owned())),
                self.transport.query_retries,
            )
            .await?;
        let raw = response
            .bytes()
            .await
            .map_err(|e| Error::Operational(format!("error reading response body: {e}")))?;
        let text = String::from_utf8_lossy(&raw);
        let first_line = text.lines().next().unwrap_or_default();
        Ok(first_line.split('\t').map(str::to_owned).collect())
    }

    /// Raw query escape hatch: the response body bytes in the requested
    /// format.
    pub async fn raw_query(
        &self,
        query: &str,
        parameters: &Parameters,
        fmt: Option<&str>,
    ) -> Result<Bytes> {
        let _session = self.acquire_session()?;
        let final_sql = binding::finalize_query(query, parameters, self.server_tz)?;
        let body = match fmt {
            Some(fmt) => format!("{final_sql}\n FORMAT {fmt}"),
            None => final_sql,
        };
        let params = self.base_params(HashMap::new());
        let response = self
            .transport
            .request_bytes(
                reqwest::Method::POST,
                &params,
                HeaderMap::new(),
                Some(Bytes::from(body)),
                self.transport.query_retries,
            )
            .await?;
        response
            .bytes()
            .await
            .map_err(|e| Error::Operational(format!("error reading response body: {e}")))
    }

    /// Server liveness via the `/ping` endpoint.
    pub async fn ping(&self) -> bool {
        self.transport.ping().await
    }
}

/// Single-slot guard against concurrent reuse of one session id.
struct SessionGuard {
    slot: Arc<Mutex<Option<String>>>,
    held: Option<String>,
}

impl SessionGuard {
    fn acquire(slot: Arc<Mutex<Option<String>>>, session_id: Option<&str>) -> Result<SessionGuard> {
        let Some(session_id) = session_id else {
            return Ok(SessionGuard { slot, held: None });
        };
        let mut active = slot.lock();
        if active.as_deref() == Some(session_id) {
            return Err(Error::Programming(
                "attempt to execute concurrent queries within the same session; \
                 use a separate client instance per concurrent query"
                    .to_owned(),
            ));
        }
        *active = Some(session_id.to_owned());
        drop(active);
        Ok(SessionGuard {
            slot,
            held: Some(session_id.to_owned()),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(held) = self.held.take() {
            let mut active = self.slot.lock();
            if active.as_deref() == Some(held.as_str()) {
                *active = None;
            }
        }
    }
}
