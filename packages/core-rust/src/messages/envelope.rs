//! The wire envelope: routing fields, intent, metadata, and an opaque payload.
//!
//! ```text
//! {version, source, target, intent, meta:{timestamp, trace_id, correlation_id?}, payload:{...}}
//! ```
//!
//! `meta` carries arbitrary extra keys (`language`, `adapter_version`, ...)
//! which are preserved through decode/encode.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reserved target naming the relay's control plane.
pub const KERNEL_TARGET: &str = "kernel";

/// Protocol version used for control-plane traffic.
pub const CONTROL_VERSION: &str = "8.0";

/// Protocol version of the legacy client-library flavor.
pub const LEGACY_VERSION: &str = "1.0";

/// Well-known intent names.
pub mod intents {
    /// Control-plane adapter registration.
    pub const REGISTER_ADAPTER: &str = "register_adapter";
    /// Control-plane topic subscription.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Legacy registration used by client libraries.
    pub const REGISTER: &str = "REGISTER";
    /// Request to perform a task.
    pub const INVOKE: &str = "invoke";
    /// Reply to an earlier request, matched by `trace_id`.
    pub const RESPONSE: &str = "response";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";

    /// Returns `true` for `ping` in any letter case (`PING` is used by some peers).
    #[must_use]
    pub fn is_ping(intent: &str) -> bool {
        intent.eq_ignore_ascii_case(PING)
    }

    /// Returns `true` for intents that only make sense on the control plane.
    #[must_use]
    pub fn is_control(intent: &str) -> bool {
        matches!(intent, REGISTER_ADAPTER | SUBSCRIBE | REGISTER)
    }
}

/// Current UTC time as ISO-8601 with millisecond precision and a `Z` suffix.
#[must_use]
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fresh trace identifier (UUID v4).
#[must_use]
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// ProtocolVersion
// ---------------------------------------------------------------------------

/// Parsed `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    /// Parses `"8.0"` style strings. A bare major (`"8"`) is read as `8.0`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(2, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor })
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

/// Envelope metadata.
///
/// `trace_id` and `correlation_id` are optional on decode: peers are not
/// required to send them, and a missing trace id means "no reply expected".
/// The camelCase spellings some peers emit are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default, alias = "traceId")]
    pub trace_id: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        alias = "correlationId"
    )]
    pub correlation_id: Option<String>,
    /// Any other metadata keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Metadata stamped with the current time and the given trace id.
    #[must_use]
    pub fn now(trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: Some(utc_timestamp()),
            trace_id: Some(trace_id.into()),
            correlation_id: None,
            extra: Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit of communication between an adapter and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    pub source: String,
    pub target: String,
    pub intent: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: Meta,
    #[serde(default)]
    pub payload: Value,
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    /// Builds an envelope with a fresh timestamp and trace id.
    pub fn new(
        version: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        intent: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            version: version.into(),
            source: source.into(),
            target: target.into(),
            intent: intent.into(),
            meta: Meta::now(new_trace_id()),
            payload,
        }
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.meta.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.meta.correlation_id = Some(correlation_id.into());
        self
    }

    /// Adds an extra metadata key (e.g. `language`, `adapter_version`).
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.meta.trace_id.as_deref()
    }

    /// `true` when the envelope is addressed to the relay's control plane.
    #[must_use]
    pub fn is_control_plane(&self) -> bool {
        self.target == KERNEL_TARGET
    }

    #[must_use]
    pub fn parsed_version(&self) -> Option<ProtocolVersion> {
        ProtocolVersion::parse(&self.version)
    }

    /// Builds a reply addressed back to this envelope's `source`.
    ///
    /// The reply echoes `trace_id` and `correlation_id` so the original caller
    /// can match it. When the request carried no trace id the reply carries
    /// none either.
    pub fn reply(
        &self,
        version: impl Into<String>,
        source: impl Into<String>,
        intent: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            version: version.into(),
            source: source.into(),
            target: self.source.clone(),
            intent: intent.into(),
            meta: Meta {
                timestamp: Some(utc_timestamp()),
                trace_id: self.meta.trace_id.clone(),
                correlation_id: self.meta.correlation_id.clone(),
                extra: Map::new(),
            },
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
