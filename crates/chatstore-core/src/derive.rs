//! Pure functions implementing the ingest serializer's qualification and
//! field-derivation rules. Kept free of any database concern so they are
//! unit-testable on their own.

use std::collections::BTreeMap;

use chrono::DateTime;

use crate::message::{ClientContext, Direction, EventKind, InboundMessage, UpstreamContext};

/// CTCP messages are framed by this byte.
const CTCP_DELIM: u8 = 0x01;

/// The one CTCP variant that is kept: `/me` actions.
const CTCP_ACTION_PREFIX: &str = "\u{1}ACTION";

/// The fields derived from an `InboundMessage` that qualifies for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedEvent {
    /// Buffer name (channel, or the remote nick for a PM).
    pub buffer_name: String,
    /// The last IRC parameter.
    pub data: String,
    /// All parameters except the last, space-joined.
    pub params: String,
    /// The IRCv3 message id, or empty string if absent.
    pub msgid: String,
    /// Canonical JSON serialisation of the tag map.
    pub tags: String,
    /// The sender nick to store as `prefix`.
    pub prefix: String,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    /// `PRIVMSG` or `NOTICE`.
    pub kind: EventKind,
}

/// Returns whether `data` is a CTCP message that should be dropped.
///
/// CTCP framing is a leading `0x01` byte; the one variant that is kept
/// is `ACTION` (`/me`), which is logged as ordinary chat content.
pub fn is_dropped_ctcp(data: &str) -> bool {
    match data.as_bytes().first() {
        Some(&CTCP_DELIM) => !data.starts_with(CTCP_ACTION_PREFIX),
        _ => false,
    }
}

/// Serialise a tag map canonically: `serde_json`'s default `Map` is
/// `BTreeMap`-backed, so iterating a `BTreeMap` and encoding as a JSON
/// object already yields a deterministic, key-sorted byte string — no
/// extra ordering feature is required for dedup to work correctly.
pub fn canonical_tags(tags: &BTreeMap<String, String>) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "{}".to_string())
}

fn derive_msgid(tags: &BTreeMap<String, String>) -> String {
    tags.get("draft/msgid")
        .or_else(|| tags.get("msgid"))
        .cloned()
        .unwrap_or_default()
}

fn derive_time(tags: &BTreeMap<String, String>, now_ms: i64) -> i64 {
    tags.get("time")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(now_ms)
}

fn derive_buffer_name(
    target: &str,
    message: &InboundMessage,
    client: &ClientContext,
) -> Option<String> {
    if target.starts_with('#') || target.starts_with('&') {
        return Some(target.to_string());
    }
    // Private-message buffer: always named after the remote party,
    // regardless of which side of the bouncer the message travelled.
    match client.direction {
        Direction::ClientToUpstream => Some(target.to_string()),
        Direction::UpstreamToClient => message.source_nick.clone(),
    }
}

fn derive_prefix(message: &InboundMessage, client: &ClientContext) -> Option<String> {
    match client.direction {
        Direction::ClientToUpstream => Some(client.local_nick.clone()),
        Direction::UpstreamToClient => message.source_nick.clone(),
    }
}

/// Derive a storable event from a qualifying inbound message, or `None`
/// if the message should be dropped (non-qualifying command, CTCP
/// filtering, or missing target/data).
pub fn derive(
    message: &InboundMessage,
    _upstream: &UpstreamContext,
    client: &ClientContext,
    now_ms: i64,
) -> Option<DerivedEvent> {
    let kind = EventKind::from_command(&message.command)?;

    let target = message.params.first()?;
    let data = message.params.last()?.clone();

    if is_dropped_ctcp(&data) {
        return None;
    }

    let buffer_name = derive_buffer_name(target, message, client)?;
    let prefix = derive_prefix(message, client)?;

    let params = if message.params.len() > 1 {
        message.params[..message.params.len() - 1].join(" ")
    } else {
        String::new()
    };

    Some(DerivedEvent {
        buffer_name,
        data,
        params,
        msgid: derive_msgid(&message.tags),
        tags: canonical_tags(&message.tags),
        prefix,
        time: derive_time(&message.tags, now_ms),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{NetworkId, UserId};

    fn msg(command: &str, params: &[&str], tags: &[(&str, &str)], source: Option<&str>) -> InboundMessage {
        InboundMessage {
            command: command.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            source_nick: source.map(str::to_string),
        }
    }

    fn upstream() -> UpstreamContext {
        UpstreamContext { network_id: NetworkId(1) }
    }

    fn client(direction: Direction) -> ClientContext {
        ClientContext {
            user_id: UserId(1),
            local_nick: "me".to_string(),
            direction,
        }
    }

    #[test]
    fn ctcp_non_action_is_dropped() {
        assert!(is_dropped_ctcp("\u{1}PING abc\u{1}"));
    }

    #[test]
    fn ctcp_action_is_kept() {
        assert!(!is_dropped_ctcp("\u{1}ACTION waves\u{1}"));
    }

    #[test]
    fn plain_text_is_kept() {
        assert!(!is_dropped_ctcp("hello"));
    }

    #[test]
    fn channel_buffer_name_is_literal() {
        let m = msg("PRIVMSG", &["#ops", "hello"], &[], Some("alice"));
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.buffer_name, "#ops");
        assert_eq!(derived.prefix, "alice");
    }

    #[test]
    fn pm_buffer_resolves_to_remote_nick_inbound() {
        let m = msg("PRIVMSG", &["me", "hi"], &[], Some("alice"));
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.buffer_name, "alice");
        assert_eq!(derived.prefix, "alice");
    }

    #[test]
    fn pm_buffer_resolves_to_target_outbound() {
        let m = msg("PRIVMSG", &["alice", "hi"], &[], None);
        let derived = derive(&m, &upstream(), &client(Direction::ClientToUpstream), 1000).unwrap();
        assert_eq!(derived.buffer_name, "alice");
        assert_eq!(derived.prefix, "me");
    }

    #[test]
    fn non_qualifying_command_is_dropped() {
        let m = msg("JOIN", &["#ops"], &[], Some("alice"));
        assert!(derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).is_none());
    }

    #[test]
    fn msgid_prefers_draft_tag() {
        let m = msg(
            "PRIVMSG",
            &["#ops", "hi"],
            &[("draft/msgid", "d1"), ("msgid", "m1")],
            Some("alice"),
        );
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.msgid, "d1");
    }

    #[test]
    fn missing_msgid_is_empty_string() {
        let m = msg("PRIVMSG", &["#ops", "hi"], &[], Some("alice"));
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.msgid, "");
    }

    #[test]
    fn time_tag_overrides_clock() {
        let m = msg(
            "PRIVMSG",
            &["#ops", "hi"],
            &[("time", "2024-01-01T00:00:00.000Z")],
            Some("alice"),
        );
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.time, 1704067200000);
    }

    #[test]
    fn unparseable_time_tag_falls_back_to_clock() {
        let m = msg("PRIVMSG", &["#ops", "hi"], &[("time", "not-a-time")], Some("alice"));
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 4242).unwrap();
        assert_eq!(derived.time, 4242);
    }

    #[test]
    fn params_excludes_trailing_data() {
        let m = msg("PRIVMSG", &["#ops", "arg1", "arg2", "hi"], &[], Some("alice"));
        let derived = derive(&m, &upstream(), &client(Direction::UpstreamToClient), 1000).unwrap();
        assert_eq!(derived.params, "#ops arg1 arg2");
        assert_eq!(derived.data, "hi");
    }

    #[test]
    fn canonical_tags_are_deterministic_regardless_of_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        assert_eq!(canonical_tags(&a), canonical_tags(&b));
    }
}
