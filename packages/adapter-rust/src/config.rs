//! Adapter configuration.
//!
//! One `AdapterConfig` value is built at process start (from CLI flags and
//! `MESHLINK_*` environment variables in the binary, or directly in code) and
//! shared as `Arc<AdapterConfig>` by the session, transports, and handlers.

use std::time::Duration;

use meshlink_core::{intents, ProtocolVersion, CONTROL_VERSION, LEGACY_VERSION};
use rand::Rng;

/// Default duplex endpoint of the relay.
pub const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";
/// Default request/reply endpoint of the relay.
pub const DEFAULT_HTTP_URL: &str = "http://localhost:3000/udl";

// ---------------------------------------------------------------------------
// ProtocolFlavor
// ---------------------------------------------------------------------------

/// Which envelope dialect a session speaks. A session never mixes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolFlavor {
    /// Version `8.0`: `register_adapter` followed by an optional `subscribe`.
    Control,
    /// Version `1.0`: a single `REGISTER`, as sent by the client libraries.
    Legacy,
}

impl ProtocolFlavor {
    /// Version string stamped on every envelope emitted under this flavor.
    #[must_use]
    pub fn version(self) -> &'static str {
        match self {
            Self::Control => CONTROL_VERSION,
            Self::Legacy => LEGACY_VERSION,
        }
    }

    #[must_use]
    pub fn register_intent(self) -> &'static str {
        match self {
            Self::Control => intents::REGISTER_ADAPTER,
            Self::Legacy => intents::REGISTER,
        }
    }
}

// ---------------------------------------------------------------------------
// VersionPolicy
// ---------------------------------------------------------------------------

/// How inbound envelopes whose `version` differs from the session's are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum VersionPolicy {
    /// Accept every version; mismatches are logged at debug level.
    #[default]
    Tolerate,
    /// Accept only envelopes with the same major version.
    SameMajor,
    /// Accept only the exact `major.minor` version.
    Exact,
}

impl VersionPolicy {
    /// Returns `true` if an envelope carrying `got` should be processed by a
    /// session speaking `expected`.
    #[must_use]
    pub fn accepts(self, expected: &str, got: &str) -> bool {
        if self == Self::Tolerate {
            return true;
        }
        let (Some(expected), Some(got)) =
            (ProtocolVersion::parse(expected), ProtocolVersion::parse(got))
        else {
            return false;
        };
        match self {
            Self::Tolerate => true,
            Self::SameMajor => expected.major == got.major,
            Self::Exact => expected == got,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectPolicy
// ---------------------------------------------------------------------------

/// What to do after the duplex connection is lost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stop after the first disconnect.
    #[default]
    Never,
    /// Wait a constant delay between attempts.
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
    /// Double the delay after each failed attempt, capped at `max`, with
    /// up to 20% random jitter.
    Exponential {
        initial: Duration,
        max: Duration,
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None`
    /// when the policy gives up.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Fixed {
                delay,
                max_attempts,
            } => within(attempt, *max_attempts).then_some(*delay),
            Self::Exponential {
                initial,
                max,
                max_attempts,
            } => {
                if !within(attempt, *max_attempts) {
                    return None;
                }
                let exp = attempt.saturating_sub(1).min(16);
                let base = initial.saturating_mul(1u32 << exp).min(*max);
                let jitter = rand::rng().random_range(0.0..=0.2);
                Some(base.mul_f64(1.0 + jitter).min(*max))
            }
        }
    }
}

fn within(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.is_none_or(|max| attempt <= max)
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Transport-level settings shared by all bindings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded capacity of the session's outbound queue.
    pub outbound_channel_capacity: usize,
    /// Maximum time to wait for room in the outbound queue.
    pub send_timeout: Duration,
    /// Maximum time to establish the duplex connection.
    pub connect_timeout: Duration,
    /// Default deadline for correlated requests and request/reply calls.
    pub request_timeout: Duration,
    /// Extra send attempts for a correlated request before giving up.
    pub send_retries: u32,
    /// Upper bound on outstanding correlated requests.
    pub max_pending_requests: usize,
    /// Longest accepted line on the line-stream binding, in bytes.
    pub max_line_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            send_retries: 2,
            max_pending_requests: 1024,
            max_line_length: 1 << 20,
        }
    }
}

/// Task dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Tasks allowed to run at once. `1` keeps execution strictly in arrival order.
    pub max_concurrent_tasks: usize,
    /// Per-task deadline; `None` disables the timeout layer's limit.
    pub task_timeout: Option<Duration>,
    /// Answer `ping` envelopes with `pong`.
    pub answer_pings: bool,
    /// How long an explicit shutdown waits for running tasks to finish.
    pub drain_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1,
            task_timeout: Some(Duration::from_secs(30)),
            answer_pings: true,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for the `code.execute` handler.
///
/// Code runs in a child process started as `program args... <code>`. The
/// child shares the host's user, filesystem, and network.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Captured stdout/stderr beyond this many bytes is truncated.
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-c".to_string()],
            timeout: Duration::from_secs(10),
            max_output_bytes: 64 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// AdapterConfig
// ---------------------------------------------------------------------------

/// Complete adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Identity used as `source` on every emitted envelope.
    pub adapter_id: String,
    /// Reported as `meta.adapter_version` on responses.
    pub adapter_version: String,
    pub language: String,
    pub flavor: ProtocolFlavor,
    pub kernel_ws_url: String,
    pub kernel_http_url: String,
    /// Declared in the registration envelope.
    pub capabilities: Vec<String>,
    /// Topic sent in the optional `subscribe` envelope; `None` skips it.
    pub subscribe_topic: Option<String>,
    pub connection: ConnectionConfig,
    pub dispatch: DispatchConfig,
    pub reconnect: ReconnectPolicy,
    pub version_policy: VersionPolicy,
    pub execution: ExecutionConfig,
}

impl AdapterConfig {
    /// Defaults for an adapter with the given identity, subscribed to
    /// `adapter:<id>:execute`.
    pub fn new(adapter_id: impl Into<String>) -> Self {
        let adapter_id = adapter_id.into();
        Self {
            subscribe_topic: Some(default_topic(&adapter_id)),
            adapter_id,
            adapter_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "rust".to_string(),
            flavor: ProtocolFlavor::Control,
            kernel_ws_url: DEFAULT_WS_URL.to_string(),
            kernel_http_url: DEFAULT_HTTP_URL.to_string(),
            capabilities: vec!["execute".to_string(), "math".to_string()],
            connection: ConnectionConfig::default(),
            dispatch: DispatchConfig::default(),
            reconnect: ReconnectPolicy::default(),
            version_policy: VersionPolicy::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Envelope version emitted by sessions using this config.
    #[must_use]
    pub fn version(&self) -> &'static str {
        self.flavor.version()
    }
}

/// Topic an adapter subscribes to by default.
#[must_use]
pub fn default_topic(adapter_id: &str) -> String {
    format!("adapter:{adapter_id}:execute")
}
