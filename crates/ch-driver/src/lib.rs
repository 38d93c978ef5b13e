//! ch-driver — query, insert, and HTTP transport layers.
//!
//! Composes the `ch-types` codec around an HTTP connection: SQL
//! finalization and parameter binding, settings validation against the
//! server catalog, the bounded streaming bridge between socket and codec,
//! and the async client with its blocking wrapper.

pub mod binding;
pub mod blocking;
pub mod bridge;
pub mod client;
pub mod compression;
pub mod http;
pub mod insert;
pub mod query;
pub mod settings;

pub use binding::{Parameters, finalize_query, format_query_value, quote_identifier};
pub use client::{Client, ClientBuilder};
pub use compression::Compression;
pub use insert::{InsertContext, InsertData};
pub use query::{
    BlockStream, ColumnRenamer, ExternalData, QueryContext, QueryResult, RowStream, Summary,
};
pub use settings::{InvalidSettingAction, Setting, SettingsCatalog};
