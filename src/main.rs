use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peercall::codec::{CodecCatalog, MediaKind};
use peercall::config::{self, IceServerConfig};
use peercall::media::WebRtcEngine;
use peercall::session::{ConnectionState, SessionController};
use peercall::signaling::{Delivery, LocalRelay, PeerId};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// peercall command line arguments
#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(version, about = "Signaling and negotiation for a single WebRTC call", long_about = None)]
struct CliArgs {
    /// Configuration file (JSON); defaults apply when absent
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the codec catalog
    Codecs,
    /// Call between two in-process endpoints over a local relay
    Loopback {
        /// Seconds to keep the call up once connected
        #[arg(long, default_value_t = 5)]
        hold_secs: u64,

        /// STUN server URL (repeatable); overrides the config file
        #[arg(long, value_name = "URL")]
        stun: Vec<String>,
    },
}

const CALLER: u64 = 1;
const CALLEE: u64 = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    match args.command {
        Command::Codecs => {
            print_codecs();
            Ok(())
        }
        Command::Loopback { hold_secs, stun } => {
            let mut app_config = match &args.config {
                Some(path) => config::load(path)
                    .await
                    .with_context(|| format!("loading {}", path.display()))?,
                None => config::AppConfig::default(),
            };
            if !stun.is_empty() {
                app_config.session.ice_servers =
                    stun.into_iter().map(IceServerConfig::stun).collect();
            }
            run_loopback(app_config, Duration::from_secs(hold_secs)).await
        }
    }
}

fn print_codecs() {
    let catalog = CodecCatalog;
    for kind in [MediaKind::Audio, MediaKind::Video] {
        println!("{}:", kind);
        let preferred = catalog.preferred(kind);
        for codec in catalog.codecs(kind) {
            let marker = if *codec == preferred { "*" } else { " " };
            println!(" {} {:>3}  {}/{}", marker, codec.payload_type, codec.name, codec.clock_rate);
        }
    }
}

async fn run_loopback(app_config: config::AppConfig, hold: Duration) -> anyhow::Result<()> {
    tracing::info!("Starting loopback call v{}", env!("CARGO_PKG_VERSION"));

    let relay = LocalRelay::new();
    let media = Arc::new(WebRtcEngine::new());

    let (caller_endpoint, caller_inbox) = relay.register(PeerId::from(CALLER));
    let (callee_endpoint, callee_inbox) = relay.register(PeerId::from(CALLEE));

    let caller = SessionController::new(
        app_config.session.clone(),
        media.clone(),
        Arc::new(caller_endpoint),
    );
    let callee = SessionController::new(app_config.session, media, Arc::new(callee_endpoint));

    let pumps = [
        tokio::spawn(pump(caller.clone(), caller_inbox)),
        tokio::spawn(pump(callee.clone(), callee_inbox)),
    ];
    let printers = [
        tokio::spawn(print_events("caller", caller.clone())),
        tokio::spawn(print_events("callee", callee.clone())),
    ];

    caller.connect(CALLEE).await.context("placing call")?;

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        tokio::join!(
            wait_for(&caller, ConnectionState::Connected),
            wait_for(&callee, ConnectionState::Connected)
        )
    })
    .await;

    match connected {
        Ok(_) => {
            tracing::info!("Call established, holding for {}s", hold.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(hold) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
        }
        Err(_) => tracing::error!(
            "Call not established within {}s (caller {}, callee {})",
            CONNECT_TIMEOUT.as_secs(),
            caller.state(),
            callee.state()
        ),
    }

    caller.disconnect().await;
    if tokio::time::timeout(Duration::from_secs(5), wait_for(&callee, ConnectionState::Idle))
        .await
        .is_err()
    {
        tracing::warn!("Callee did not observe hangup, shutting down anyway");
    }

    caller.shutdown().await;
    callee.shutdown().await;
    for task in pumps.into_iter().chain(printers) {
        task.abort();
    }

    tracing::info!("Loopback finished");
    Ok(())
}

/// Feed relay deliveries into a session
async fn pump(session: SessionController, mut inbox: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = inbox.recv().await {
        session.on_message(delivery.from, delivery.payload);
    }
}

async fn print_events(label: &'static str, session: SessionController) {
    let mut rx = session.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!("[{}] {}", label, json),
                Err(e) => tracing::warn!("[{}] unprintable {}: {}", label, event.name(), e),
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("[{}] missed {} events", label, n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn wait_for(session: &SessionController, state: ConnectionState) {
    let mut rx = session.watch_state();
    loop {
        if rx.borrow_and_update().state == state {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "peercall=error,webrtc=error",
        LogLevel::Warn => "peercall=warn,webrtc=warn",
        LogLevel::Info => "peercall=info,webrtc=warn",
        LogLevel::Verbose => "peercall=debug,webrtc=warn",
        LogLevel::Debug => "peercall=debug,webrtc=info",
        LogLevel::Trace => "peercall=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
