//! The engine-agnostic contract a storage driver implements.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{ClientContext, HistoryCursor, InboundMessage, StoredMessage, UpstreamContext};

/// A persistent, time-ordered chat history store.
///
/// Implementations own one embedded relational database and serialize all
/// writes (ingest and retention) against it; see the `chatstore-sqlite`
/// driver for the reference implementation of this contract.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Whether this driver supports serving history queries.
    const SUPPORTS_READ: bool = true;
    /// Whether this driver supports ingesting new messages.
    const SUPPORTS_WRITE: bool = true;

    /// Enqueue a message for persistence. Returns as soon as the message
    /// has been accepted into the ingest queue — actual persistence is
    /// asynchronous and best-effort from the caller's point of view: no
    /// error is ever surfaced here.
    async fn store(
        &self,
        message: InboundMessage,
        upstream: UpstreamContext,
        client: ClientContext,
    );

    /// Messages with `time` strictly greater than the time of `msgid`,
    /// ascending. Empty if `msgid` is unknown.
    async fn query_from_msgid(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        msgid: &str,
        limit: u32,
    ) -> Vec<StoredMessage>;

    /// Messages with `time` strictly greater than `time`, ascending.
    async fn query_from_time(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        time: i64,
        limit: u32,
    ) -> Vec<StoredMessage>;

    /// Messages with `time` less than or equal to the time of `msgid`,
    /// ascending. Empty if `msgid` is unknown.
    async fn query_before_msgid(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        msgid: &str,
        limit: u32,
    ) -> Vec<StoredMessage>;

    /// Messages with `time` less than or equal to `time`, ascending.
    async fn query_before_time(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        time: i64,
        limit: u32,
    ) -> Vec<StoredMessage>;

    /// Messages in `[from, to)` — `from` inclusive, `to` exclusive — both
    /// optional, ascending. Omitting both is "most recent N in buffer".
    async fn query_between(
        &self,
        upstream: &UpstreamContext,
        client: &ClientContext,
        buffer: &str,
        from: Option<HistoryCursor>,
        to: Option<HistoryCursor>,
        limit: u32,
    ) -> Vec<StoredMessage>;

    /// Drain the ingest queue and stop any background tasks.
    async fn shutdown(self) -> Result<()>;
}
