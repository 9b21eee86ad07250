use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use replay_server::{Cli, Station, VERSION};

mod web;

use web::Web;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .format_timestamp_millis()
        .init();

    info!("Replay server {} starting", VERSION);

    let station = Station::new(args).into_diagnostic()?;

    Toplevel::new(|s| async move {
        station.start_subsystems(&s);
        s.start(SubsystemBuilder::new("Webserver", |a| Web::new(station).run(a)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .into_diagnostic()
}
