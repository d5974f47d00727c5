//! Wire-agnostic message types: the input the store's `store()` method
//! accepts, and the materialized record its queries return.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Stable identifier for a dedup-pool payload row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadId(pub i64);

/// Opaque identifier for the bouncer user that owns a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Opaque identifier for the IRC network a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

/// The two message kinds the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An IRC `PRIVMSG`.
    Privmsg = 1,
    /// An IRC `NOTICE`.
    Notice = 2,
}

impl EventKind {
    /// Parse an IRC command string into an `EventKind`, if it qualifies.
    pub fn from_command(command: &str) -> Option<Self> {
        match command.to_ascii_uppercase().as_str() {
            "PRIVMSG" => Some(EventKind::Privmsg),
            "NOTICE" => Some(EventKind::Notice),
            _ => None,
        }
    }

    /// The integer representation stored in the `kind` column.
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Reconstruct an `EventKind` from its stored integer representation.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(EventKind::Privmsg),
            2 => Some(EventKind::Notice),
            _ => None,
        }
    }
}

/// Which side of the bouncer originated a message.
///
/// Used by the buffer-name and prefix derivation rules: a message the
/// local client sent upstream is attributed to the local nick; a message
/// arriving from upstream is attributed to the sender on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// The local client sent this message to the network.
    ClientToUpstream,
    /// The network sent this message to the local client.
    UpstreamToClient,
}

/// A parsed inbound IRC message, as handed to the store by the bouncer's
/// line parser. Tag ordering does not matter here; canonicalisation
/// happens at derivation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The IRC command, e.g. `"PRIVMSG"` or `"NOTICE"`.
    pub command: String,
    /// All space-separated parameters, including the trailing one.
    pub params: Vec<String>,
    /// IRCv3 message tags.
    pub tags: BTreeMap<String, String>,
    /// The nick portion of the message's source prefix, if any (the IRC
    /// sender — absent for client-to-upstream messages the bouncer
    /// relays, which the bouncer instead tags with `Direction`).
    pub source_nick: Option<String>,
}

/// Network-scoped context accompanying a `store()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamContext {
    /// The network this message was exchanged on.
    pub network_id: NetworkId,
}

/// User/connection-scoped context accompanying a `store()` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    /// The bouncer user who owns this connection.
    pub user_id: UserId,
    /// The local client's current nick on this network.
    pub local_nick: String,
    /// Which side originated the message.
    pub direction: Direction,
}

/// A single cursor endpoint for `query_between`: either an absolute
/// timestamp or a reference to the time of a previously-seen `msgid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryCursor {
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// An IRCv3 message id.
    Msgid(String),
}

/// A materialized history record: every payload reference resolved to
/// its bytes/text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The bouncer user this event belongs to.
    pub user_id: UserId,
    /// The network this event was exchanged on.
    pub network_id: NetworkId,
    /// The buffer (channel or PM nick) this event belongs to.
    pub buffer: String,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    /// `PRIVMSG` or `NOTICE`.
    pub kind: EventKind,
    /// The IRCv3 message id, or empty string if absent.
    pub msgid: String,
    /// Canonical JSON serialisation of the tag map.
    pub tags: String,
    /// All parameters except the last, space-joined.
    pub params: String,
    /// The last IRC parameter.
    pub data: String,
    /// The sender: the local nick or the remote nick, per direction.
    pub prefix: String,
}
