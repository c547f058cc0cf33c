use anyhow::{bail, Context, Result};
use clap::Parser;
use kestrel_core::config::ServerConfig;
use kestrel_core::target::avr8::supported_parts;
use kestrel_core::tools::SIMULATOR_TOOL_NAME;
use kestrel_core::{
    supported_tool_names, EnvironmentConfig, EventManager, EventPayload, TargetController,
    TargetControllerConsole,
};
use kestrel_gdb::GdbServer;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Target used by `--mock` when none is given.
const MOCK_TARGET: &str = "atmega328p";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON environment configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug tool name (overrides the configuration file)
    #[arg(long)]
    tool: Option<String>,

    /// Target name, or "avr8" to detect it from the signature
    #[arg(long)]
    target: Option<String>,

    /// Host to bind the GDB server to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Debug a simulated target (no hardware required)
    #[arg(long)]
    mock: bool,

    /// List supported debug tools and targets, then exit
    #[arg(long)]
    list_tools: bool,
}

fn environment(args: &Args) -> Result<EnvironmentConfig> {
    let mut config = match &args.config {
        Some(path) => EnvironmentConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            let tool = match (&args.tool, args.mock) {
                (_, true) => SIMULATOR_TOOL_NAME.to_string(),
                (Some(tool), false) => tool.clone(),
                (None, false) => bail!("no debug tool configured; pass --tool, --config or --mock"),
            };
            let target = match (&args.target, args.mock) {
                (Some(target), _) => target.clone(),
                (None, true) => MOCK_TARGET.to_string(),
                (None, false) => bail!("no target configured; pass --target or --config"),
            };
            EnvironmentConfig::new(tool, target)
        }
    };

    if args.mock {
        config.tool.name = SIMULATOR_TOOL_NAME.to_string();
    } else if let Some(tool) = &args.tool {
        config.tool.name.clone_from(tool);
    }
    if let Some(target) = &args.target {
        config.target.name.clone_from(target);
    }
    let ServerConfig { host, port } = &mut config.server;
    if let Some(value) = &args.host {
        host.clone_from(value);
    }
    if let Some(value) = args.port {
        *port = value;
    }

    Ok(config)
}

fn list_tools() {
    println!("Debug tools:");
    for name in supported_tool_names() {
        println!("  {name}");
    }
    println!("Targets:");
    println!("  avr8 (detect from signature)");
    for part in supported_parts() {
        println!("  {}", part.name);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_tools {
        list_tools();
        return Ok(());
    }

    let config = environment(&args)?;
    info!("Starting Kestrel {}", env!("CARGO_PKG_VERSION"));
    if args.mock {
        info!("Starting in MOCK mode. No hardware will be accessed.");
    }

    let events = Arc::new(EventManager::new());
    let (handle, controller) = TargetController::new(config.clone(), Arc::clone(&events))
        .spawn()
        .context("failed to start the target controller")?;

    let server = GdbServer::bind(
        &config.server,
        TargetControllerConsole::new(handle),
        Arc::clone(&events),
    )
    .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?;
    info!("GDB server listening on {}", server.local_addr()?);

    let result = server.serve().context("debug server failed");

    events.publish(EventPayload::ShutdownTargetController);
    if controller.join().is_err() {
        bail!("target controller thread panicked");
    }
    result
}
