//! input-coop CLI: configuration, status codes, and a scripted demo session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coop_device::mock::{MockCrossingSwitch, MockCursor, MockDevice, MockRegistry, MockRemoteMgr};
use coop_dinput::mock::MockSdk;
use coop_service::error::ipc_status;
use coop_service::{
    setup, ChannelObserver, Collaborators, Config, CoopError, CooperationHandle,
    CooperationService, CooperationSnapshot,
};
use coop_types::{
    CooperationState, DeviceId, Dhid, MouseLocationPercent, NetworkId, PeerSignal, ScreenGeometry,
};

#[derive(Parser)]
#[command(
    name = "coop",
    about = "Share one keyboard and mouse across nearby devices",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML.
    Config,

    /// List the status codes returned to IPC callers.
    StatusCodes,

    /// Run a scripted session against in-process mock collaborators.
    Demo {
        /// Remote peer to cooperate with.
        #[arg(long, default_value = "peer")]
        peer: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = setup::load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .init();

    match cli.command {
        Commands::Config => {
            tracing::debug!(path = %setup::default_config_path().display(), "default config path");
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::StatusCodes => {
            for error in CoopError::catalogue() {
                println!("{:>4}  {error}", error.status_code());
            }
        }
        Commands::Demo { peer } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(demo(config, NetworkId::from(peer.as_str())))?;
        }
    }

    Ok(())
}

async fn demo(config: Config, peer: NetworkId) -> anyhow::Result<()> {
    let registry = MockRegistry::new("local")
        .with_device(MockDevice::pointer(1, "mouse-local", "local").with_keyboard("kbd-local"))
        .with_device(MockDevice::pointer(9, "mouse-remote", peer.as_str()).remote());
    let remote = Arc::new(MockRemoteMgr::new());
    let cursor = Arc::new(MockCursor::new());
    let screen = ScreenGeometry::new(1920, 1080);
    let service = CooperationService::new(
        &config,
        Collaborators {
            registry: Arc::new(registry),
            remote: remote.clone(),
            cursor: cursor.clone(),
            crossing: Arc::new(MockCrossingSwitch::new()),
            dinput: Arc::new(MockSdk::new()),
        },
    );
    let handle = service.handle();
    let task = tokio::spawn(service.run());

    let (observer, mut notices) = ChannelObserver::new();
    handle.subscribe(Arc::new(observer)).await?;
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            match notice.reason {
                Some(reason) => println!("  notice  {} ({}) {reason}", notice.message, notice.network_id),
                None => println!("  notice  {} ({})", notice.message, notice.network_id),
            }
        }
    });

    // pointer pushed against the right edge
    cursor.move_to(MouseLocationPercent::from_position(1919, 540, &screen));
    println!("share the local mouse with {peer}");
    handle.start_cooperation(peer.clone(), DeviceId(1)).await?;
    let snapshot = wait_for(&handle, |s| matches!(s.state, CooperationState::Out(_))).await?;
    report(&cursor, &screen, &snapshot);
    let again = handle.start_cooperation(peer.clone(), DeviceId(1)).await;
    println!("  second start answered {}", ipc_status(&again));

    println!("{peer} hands the pointer back");
    handle
        .peer_signal(PeerSignal::StartResult {
            from: peer.clone(),
            success: true,
            dhid: Dhid::from("mouse-local"),
            location: MouseLocationPercent::new(0.0, 40.0),
        })
        .await?;
    let snapshot = wait_for(&handle, |s| s.state.is_free()).await?;
    report(&cursor, &screen, &snapshot);

    println!("{peer} shares its mouse with us");
    handle
        .peer_signal(PeerSignal::StartRequest { from: peer.clone() })
        .await?;
    handle
        .peer_signal(PeerSignal::StartResult {
            from: peer.clone(),
            success: true,
            dhid: Dhid::from("mouse-remote"),
            location: MouseLocationPercent::new(100.0, 40.0),
        })
        .await?;
    let snapshot = wait_for(&handle, |s| matches!(s.state, CooperationState::In(_))).await?;
    report(&cursor, &screen, &snapshot);

    println!("stop");
    handle.stop_cooperation().await?;
    let snapshot = wait_for(&handle, |s| s.state.is_free() && !s.guard.is_busy()).await?;
    report(&cursor, &screen, &snapshot);

    handle.shutdown().await?;
    task.await?.context("service loop failed")?;
    printer.await?;

    println!("signals sent to peers:");
    for signal in remote.sent() {
        println!("  {signal:?}");
    }
    Ok(())
}

async fn wait_for(
    handle: &CooperationHandle,
    pred: impl Fn(&CooperationSnapshot) -> bool,
) -> anyhow::Result<CooperationSnapshot> {
    let mut status = handle.status();
    let snapshot = tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| pred(s)))
        .await
        .context("timed out waiting for the service")?
        .context("service stopped")?
        .clone();
    Ok(snapshot)
}

fn report(cursor: &MockCursor, screen: &ScreenGeometry, snapshot: &CooperationSnapshot) {
    let (x, y) = cursor.location().to_position(screen);
    println!(
        "  state   {} (peer: {}), cursor {} at ({x}, {y})",
        snapshot.state,
        snapshot
            .session_peer
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string),
        if cursor.is_visible() { "shown" } else { "hidden" },
    );
}
