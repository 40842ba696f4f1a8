#[macro_use]
extern crate tracing;

use clap::Parser;
use engine::{LiveMap, ReplaySource};
use eyre::WrapErr;
use libmap::Projection;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

mod backoff;
mod config;
mod layers;
mod mqtt;

use crate::{
    config::{Cli, Command, LiveArgs, ReplayArgs},
    mqtt::MqttSource,
};

const LOG_FILTER: &str = "trainmap=info,engine=info,libmap=info,rumqttc=warn";
const VERBOSE_LOG_FILTER: &str = "trainmap=debug,engine=debug,libmap=debug,rumqttc=info";

fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { VERBOSE_LOG_FILTER } else { LOG_FILTER })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NONE)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let mut map = LiveMap::new(cli.viewport());
    layers::load_static(&mut map.view, &cli.stations, &cli.tracks, cli.data_projection).await;
    if let Some(position) = cli.locate {
        map.view.locate(position)?;
    }

    match &cli.command {
        Command::Live(args) => live(&cli, args, &map).await,
        Command::Replay(args) => replay(&cli, args, &map),
    }
}

async fn live(cli: &Cli, args: &LiveArgs, map: &LiveMap) -> eyre::Result<()> {
    let mut source = MqttSource::new(args.mqtt_config());
    map.attach(&mut source);
    let mut feed = tokio::spawn(source.run());

    let mut ticker = tokio::time::interval(args.report_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = ticker.tick() => report(cli, map),
            joined = &mut feed => break joined.wrap_err("feed task panicked").and_then(|run| run),
            signal = &mut shutdown => {
                signal?;
                info!("interrupted, shutting down");
                feed.abort();
                break Ok(());
            }
        }
    };

    report(cli, map);
    outcome
}

fn replay(cli: &Cli, args: &ReplayArgs, map: &LiveMap) -> eyre::Result<()> {
    let mut source = ReplaySource::open(&args.file)
        .wrap_err_with(|| format!("opening {}", args.file.display()))?;
    map.attach(&mut source);
    source.run()?;
    report(cli, map);

    if let Some(position) = args.inspect {
        let coord = Projection::Geographic.transform(map.view.projection(), position.coord())?;
        print!("{}", map.view.inspect(coord)?);
    }
    Ok(())
}

/// Logs the feed counters and rewrites the snapshot file when one is configured.
fn report(cli: &Cli, map: &LiveMap) {
    let trains = match map.view.train_count() {
        Ok(trains) => trains,
        Err(err) => {
            error!(%err, "feature store unavailable");
            return;
        }
    };
    info!(trains, "{}", map.stats.snapshot());

    let Some(path) = &cli.snapshot else {
        return;
    };
    let written = map
        .view
        .snapshot(cli.snapshot_projection)
        .map_err(eyre::Report::from)
        .and_then(|collection| Ok(libmap::ser::write_file(path, &collection)?));
    match written {
        Ok(()) => debug!(path = %path.display(), trains, "wrote snapshot"),
        Err(err) => warn!(path = %path.display(), "snapshot failed: {err:#}"),
    }
}
