//! `meshlink-adapter` binary.
//!
//! - `connect`: duplex worker registered with the relay
//! - `stdio`: line-stream worker on stdin/stdout
//! - `send`: one request/reply call, reply printed to stdout
//! - `call`: correlated request over a duplex session

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use meshlink_core::Envelope;
use serde_json::Value;
use tracing::{info, warn};

use meshlink_adapter::config::{
    default_topic, AdapterConfig, ProtocolFlavor, ReconnectPolicy, VersionPolicy,
};
use meshlink_adapter::logging::{self, LogFormat};
use meshlink_adapter::network::{
    run_line_worker, run_with_reconnect, LineTransport, Session, SessionHandle, SessionState,
};
use meshlink_adapter::service::{default_registry, Dispatcher};
use meshlink_adapter::KernelClient;

#[derive(Debug, Parser)]
#[command(name = "meshlink-adapter", version, about = "Worker adapter for the meshlink relay")]
struct Cli {
    /// Log line format (logs always go to stderr).
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Pretty,
        env = "MESHLINK_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register with the relay over websocket and serve tasks.
    Connect(ConnectArgs),
    /// Serve `{task_name, data}` lines from stdin, one response line per task on stdout.
    Stdio(CommonArgs),
    /// POST one envelope to the relay's request/reply endpoint.
    Send(MessageArgs),
    /// Send one envelope over a duplex session and wait for the correlated reply.
    Call(MessageArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReconnectMode {
    Never,
    Fixed,
    Exponential,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Identity announced to the relay.
    #[arg(long, env = "MESHLINK_ADAPTER_ID", default_value = "rust-adapter")]
    adapter_id: String,

    #[arg(long, value_enum, env = "MESHLINK_FLAVOR", default_value_t = ProtocolFlavor::Control)]
    flavor: ProtocolFlavor,

    #[arg(long, env = "MESHLINK_WS_URL", default_value = meshlink_adapter::config::DEFAULT_WS_URL)]
    ws_url: String,

    #[arg(
        long,
        env = "MESHLINK_HTTP_URL",
        default_value = meshlink_adapter::config::DEFAULT_HTTP_URL
    )]
    http_url: String,

    /// Per-task deadline in milliseconds; 0 disables it.
    #[arg(long, env = "MESHLINK_TASK_TIMEOUT_MS", default_value_t = 30_000)]
    task_timeout_ms: u64,

    /// Deadline for correlated requests and request/reply calls.
    #[arg(long, env = "MESHLINK_REQUEST_TIMEOUT_MS", default_value_t = 5_000)]
    request_timeout_ms: u64,

    /// Interpreter for `code.execute`; the code is passed after `--exec-arg`s.
    #[arg(long, env = "MESHLINK_EXEC_PROGRAM", default_value = "python3")]
    exec_program: String,

    #[arg(
        long = "exec-arg",
        env = "MESHLINK_EXEC_ARGS",
        value_delimiter = ',',
        default_value = "-c",
        allow_hyphen_values = true
    )]
    exec_args: Vec<String>,

    #[arg(long, env = "MESHLINK_EXEC_TIMEOUT_MS", default_value_t = 10_000)]
    exec_timeout_ms: u64,
}

#[derive(Debug, Args)]
struct ConnectArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Topic to subscribe to; defaults to `adapter:<id>:execute`.
    #[arg(long, env = "MESHLINK_TOPIC")]
    topic: Option<String>,

    #[arg(long, env = "MESHLINK_NO_SUBSCRIBE")]
    no_subscribe: bool,

    /// Comma-separated capabilities declared at registration.
    #[arg(
        long,
        env = "MESHLINK_CAPABILITIES",
        value_delimiter = ',',
        default_value = "execute,math"
    )]
    capabilities: Vec<String>,

    /// Tasks allowed to run at once; 1 keeps arrival order.
    #[arg(long, env = "MESHLINK_MAX_CONCURRENT_TASKS", default_value_t = 1)]
    max_concurrent_tasks: usize,

    #[arg(long, env = "MESHLINK_NO_PONG")]
    no_pong: bool,

    #[arg(
        long,
        value_enum,
        env = "MESHLINK_VERSION_POLICY",
        default_value_t = VersionPolicy::Tolerate
    )]
    version_policy: VersionPolicy,

    #[arg(long, value_enum, env = "MESHLINK_RECONNECT", default_value_t = ReconnectMode::Never)]
    reconnect: ReconnectMode,

    #[arg(long, env = "MESHLINK_RECONNECT_DELAY_MS", default_value_t = 1_000)]
    reconnect_delay_ms: u64,

    /// Upper bound for exponential backoff.
    #[arg(long, env = "MESHLINK_RECONNECT_MAX_DELAY_MS", default_value_t = 30_000)]
    reconnect_max_delay_ms: u64,

    /// Give up after this many consecutive failed attempts (unlimited if unset).
    #[arg(long, env = "MESHLINK_RECONNECT_MAX_ATTEMPTS")]
    reconnect_max_attempts: Option<u32>,
}

#[derive(Debug, Args)]
struct MessageArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    target: String,

    #[arg(long, default_value = "invoke")]
    intent: String,

    /// JSON payload.
    #[arg(long, default_value = "{}")]
    payload: String,

    #[arg(long)]
    correlation_id: Option<String>,
}

impl CommonArgs {
    fn config(&self) -> AdapterConfig {
        let mut config = AdapterConfig::new(self.adapter_id.clone());
        config.flavor = self.flavor;
        config.kernel_ws_url.clone_from(&self.ws_url);
        config.kernel_http_url.clone_from(&self.http_url);
        config.dispatch.task_timeout =
            (self.task_timeout_ms > 0).then(|| Duration::from_millis(self.task_timeout_ms));
        config.connection.request_timeout = Duration::from_millis(self.request_timeout_ms);
        config.execution.program.clone_from(&self.exec_program);
        config.execution.args.clone_from(&self.exec_args);
        config.execution.timeout = Duration::from_millis(self.exec_timeout_ms);
        config
    }
}

impl MessageArgs {
    fn envelope(&self, client: &KernelClient) -> Result<Envelope> {
        let payload: Value =
            serde_json::from_str(&self.payload).context("--payload is not valid JSON")?;
        Ok(client.create_message(
            &self.target,
            &self.intent,
            payload,
            self.correlation_id.as_deref(),
        ))
    }
}

impl ConnectArgs {
    fn config(&self) -> AdapterConfig {
        let mut config = self.common.config();
        config.subscribe_topic = if self.no_subscribe {
            None
        } else {
            Some(
                self.topic
                    .clone()
                    .unwrap_or_else(|| default_topic(&config.adapter_id)),
            )
        };
        config.capabilities.clone_from(&self.capabilities);
        config.dispatch.max_concurrent_tasks = self.max_concurrent_tasks;
        config.dispatch.answer_pings = !self.no_pong;
        config.version_policy = self.version_policy;
        config.reconnect = match self.reconnect {
            ReconnectMode::Never => ReconnectPolicy::Never,
            ReconnectMode::Fixed => ReconnectPolicy::Fixed {
                delay: Duration::from_millis(self.reconnect_delay_ms),
                max_attempts: self.reconnect_max_attempts,
            },
            ReconnectMode::Exponential => ReconnectPolicy::Exponential {
                initial: Duration::from_millis(self.reconnect_delay_ms),
                max: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.reconnect_max_attempts,
            },
        };
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    match cli.command {
        Command::Connect(args) => connect(args.config()).await,
        Command::Stdio(args) => stdio(args.config()).await,
        Command::Send(args) => send(&args).await,
        Command::Call(args) => call(&args).await,
    }
}

async fn connect(config: AdapterConfig) -> Result<()> {
    let registry = Arc::new(default_registry(&config).context("failed to build handler registry")?);
    let connector = KernelClient::new(&config)
        .duplex_connector()
        .context("invalid websocket url")?;
    info!(adapter_id = %config.adapter_id, url = %connector.url(), "starting adapter");

    let mut session = Session::new(config, registry);
    let handle = session.handle();
    tokio::spawn(shutdown_on_ctrl_c(handle));

    let exit = run_with_reconnect(&mut session, &connector).await?;
    info!(reason = ?exit, "adapter stopped");
    Ok(())
}

async fn stdio(config: AdapterConfig) -> Result<()> {
    let registry = Arc::new(default_registry(&config).context("failed to build handler registry")?);
    let dispatcher = Dispatcher::new(registry, &config);
    let mut transport = LineTransport::stdio(config.connection.max_line_length);
    info!(adapter_id = %config.adapter_id, "line worker ready");

    tokio::select! {
        result = run_line_worker(&mut transport, &dispatcher) => {
            result.context("line worker failed")?;
        }
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    Ok(())
}

async fn send(args: &MessageArgs) -> Result<()> {
    let config = args.common.config();
    let client = KernelClient::new(&config);
    let envelope = args.envelope(&client)?;

    let reply = client.send_http(&envelope).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn call(args: &MessageArgs) -> Result<()> {
    let mut config = args.common.config();
    config.subscribe_topic = None;
    let client = KernelClient::new(&config);
    let connector = client.duplex_connector().context("invalid websocket url")?;
    let envelope = args.envelope(&client)?;
    let timeout = config.connection.request_timeout;

    let registry = Arc::new(default_registry(&config)?);
    let mut session = Session::new(config, registry);
    let handle = session.handle();
    let runner = tokio::spawn(async move { session.run(&connector).await });

    let deadline = tokio::time::Instant::now() + timeout;
    while handle.state() != SessionState::Listening {
        if runner.is_finished() {
            bail!("could not connect to the relay at {}", args.common.ws_url);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for the session to register");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let result = handle.request(envelope, Some(timeout)).await;
    handle.shutdown();
    if let Err(e) = runner.await {
        warn!(error = %e, "session task failed");
    }

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn shutdown_on_ctrl_c(handle: SessionHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
        handle.shutdown();
    }
}
