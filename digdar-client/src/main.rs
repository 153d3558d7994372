use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use digdar_client::command::Command;
use digdar_client::config::ClientConfig;
use digdar_client::console::Console;
use digdar_client::scheduler::SyncScheduler;
use digdar_client::storage;
use digdar_client::surface::TerminalSurface;
use digdar_client::transport::HttpTransport;
use digdar_client::{Cli, VERSION};

const COMMAND_BUFFER: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.verbose.log_level_filter().to_string()),
    )
    .target(env_logger::Target::Stderr)
    .init();

    log::info!("digdar-client {} starting", VERSION);

    let config = ClientConfig::from_cli(&args);
    let transport =
        Arc::new(HttpTransport::new(&config.root_url, config.request_timeout).into_diagnostic()?);

    let mut startup = Vec::new();
    if let Some(path) = &args.import {
        let params = storage::import_from(path).into_diagnostic()?;
        startup.push(Command::ImportParams(params));
    }
    if args.single {
        startup.push(Command::Single);
    }
    if let Some(path) = &args.export {
        startup.push(Command::ExportParams(path.clone()));
    }

    let surface = Box::new(TerminalSurface::new(config.plot_width));
    let scheduler = SyncScheduler::new(transport, config, surface).with_startup(startup);
    let events = scheduler.subscribe();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let console = (!args.no_console).then(|| Console::new(command_tx, events));

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("Scheduler", |subsys| {
            scheduler.run(command_rx, subsys)
        }));
        if let Some(console) = console {
            s.start(SubsystemBuilder::new("Console", |subsys| console.run(subsys)));
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
