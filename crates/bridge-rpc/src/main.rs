//! SecureBridge command line.
//!
//! `keygen` writes a key file, `serve` runs a bridge server with the
//! built-in operations (plus an optional HTTP sidecar), and `call` sends a
//! single request and prints the reply.

mod handler;
mod operations;
mod server;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secure_bridge::{
    ClientConfig, KeyFile, KeyPair, PrometheusMetrics, RequestEnvelope, SecureBridge,
    ServerConfig, WireFormat, ZapPolicy,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "secure-bridge")]
#[command(about = "Encrypted, authenticated request/reply over ZeroMQ")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate server and client identities into a key file
    Keygen {
        #[arg(long, default_value = "keys.json")]
        out: PathBuf,
    },

    /// Serve the built-in operations
    Serve {
        #[arg(long, default_value = "keys.json")]
        keys: PathBuf,

        /// Identity in the key file to serve as
        #[arg(long, default_value = "server")]
        identity: String,

        /// Port to bind (0 = auto-assign)
        #[arg(short, long, env = "BRIDGE_SERVER_PORT", default_value = "5555")]
        port: u16,

        #[arg(long, default_value = "*")]
        bind_host: String,

        /// Shared secret for request tokens
        #[arg(long, env = "BRIDGE_JWT_SECRET", hide_env_values = true)]
        jwt_secret: String,

        /// Also serve /health, /metrics and /operations over HTTP
        #[arg(long, env = "BRIDGE_HTTP_PORT")]
        http_port: Option<u16>,

        #[arg(long, default_value = "127.0.0.1")]
        http_host: String,

        /// Only accept clients with these Z85 public keys
        #[arg(long = "allow-client")]
        allow_client: Vec<String>,
    },

    /// Send one request and print the reply
    Call {
        #[arg(long, default_value = "keys.json")]
        keys: PathBuf,

        /// Identity in the key file to call as
        #[arg(long, default_value = "client")]
        identity: String,

        /// Identity in the key file whose public key the server presents
        #[arg(long, default_value = "server")]
        server_identity: String,

        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(short, long, env = "BRIDGE_SERVER_PORT", default_value = "5555")]
        port: u16,

        #[arg(long, env = "BRIDGE_TOKEN", hide_env_values = true)]
        token: String,

        /// Payload encoding: json, msgpack or protobuf:<schema>
        #[arg(long, default_value = "json")]
        format: WireFormat,

        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        operation: String,

        /// Request payload as JSON
        #[arg(default_value = "{}")]
        data: String,
    },
}

fn init_logging(format: LogFormat, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.debug);

    match cli.command {
        Command::Keygen { out } => keygen(&out),
        Command::Serve {
            keys,
            identity,
            port,
            bind_host,
            jwt_secret,
            http_port,
            http_host,
            allow_client,
        } => {
            let keys = KeyFile::load(&keys)?.key_pair(&identity)?;
            let zap = allow_client
                .iter()
                .try_fold(ZapPolicy::default(), |policy, key| {
                    Ok::<_, secure_bridge::BridgeError>(policy.allow_client_key(key.parse()?))
                })?;
            serve(ServeOptions {
                keys,
                server: ServerConfig {
                    bind_host,
                    port,
                    ..Default::default()
                },
                jwt_secret,
                http: http_port.map(|port| (http_host, port)),
                zap: (!allow_client.is_empty()).then_some(zap),
            })
            .await
        }
        Command::Call {
            keys,
            identity,
            server_identity,
            host,
            port,
            token,
            format,
            timeout_ms,
            operation,
            data,
        } => {
            let key_file = KeyFile::load(&keys)?;
            let data: Value =
                serde_json::from_str(&data).context("request data is not valid JSON")?;
            let mut client = ClientConfig::new(host, port);
            client.request_timeout = Duration::from_millis(timeout_ms);

            let client = SecureBridge::builder()
                .keys(key_file.key_pair(&identity)?)
                .peer_key(key_file.public_key(&server_identity)?)
                .client_config(client)
                .schema(operations::sum_schema())
                .build()?
                .connect_client()?;

            let reply = client
                .invoke(&RequestEnvelope::new(operation, token, data), &format)
                .await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            if let Some(message) = reply.message() {
                bail!("request failed: {}", message);
            }
            Ok(())
        }
    }
}

fn keygen(out: &std::path::Path) -> Result<()> {
    let mut file = KeyFile::new();
    for name in ["server", "client"] {
        let pair = KeyPair::generate()?;
        file.insert(name, &pair)?;
        // Public keys only; secrets stay in the file.
        println!("{}: {}", name, pair.public_z85()?);
    }
    file.save(out)?;
    info!("Wrote key file {}", out.display());
    Ok(())
}

struct ServeOptions {
    keys: KeyPair,
    server: ServerConfig,
    jwt_secret: String,
    http: Option<(String, u16)>,
    zap: Option<ZapPolicy>,
}

async fn serve(options: ServeOptions) -> Result<()> {
    info!("Starting SecureBridge server");

    let metrics = PrometheusMetrics::new()?;
    let mut builder = operations::register(SecureBridge::builder())
        .keys(options.keys)
        .jwt_secret(options.jwt_secret)
        .server_config(options.server)
        .metrics(Arc::new(metrics.clone()));
    if let Some(policy) = options.zap {
        builder = builder.zap_policy(policy);
    }
    let bridge = builder.build()?;
    info!(public_key = %bridge.public_key_z85()?, operations = ?bridge.operations(), "Bridge configured");

    let handle = bridge.start_server()?;

    // Machine-readable port line for supervising processes.
    println!("BRIDGE_PORT={}", handle.port());

    if let Some((host, port)) = options.http {
        let state = server::AppState {
            metrics,
            operations: operations::describe(),
        };
        let addr = server::start_server(state, &host, port).await?;
        println!("BRIDGE_HTTP_PORT={}", addr.port());
    }

    info!("Bridge server running on {}", handle.endpoint());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");
    handle.stop().await?;

    Ok(())
}
