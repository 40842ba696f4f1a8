use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{GeoPosition, Viewport};
use libmap::Projection;

use crate::{backoff::BackoffConfig, mqtt::MqttConfig};

pub const DEFAULT_STATIONS: &str =
    "https://rata.digitraffic.fi/infra-api/latest/rautatieliikennepaikat.geojson?srsName=crs:84";
pub const DEFAULT_TRACKS: &str = "raiteet.geojson";
pub const DEFAULT_BROKER: &str = "rata.digitraffic.fi";
pub const DEFAULT_TOPIC: &str = "train-locations/#";

#[derive(Parser, Debug)]
#[command(name = "trainmap")]
#[command(author, version, about = "Live map of trains and rail infrastructure", long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Station GeoJSON, file path or http(s) URL
    #[arg(long, global = true, default_value = DEFAULT_STATIONS)]
    pub stations: String,

    /// Track GeoJSON, file path or http(s) URL
    #[arg(long, global = true, default_value = DEFAULT_TRACKS)]
    pub tracks: String,

    /// Projection of the station and track sources
    #[arg(long, global = true, default_value = "EPSG:4326")]
    pub data_projection: Projection,

    /// Center the map on this `lon,lat` and mark it
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub locate: Option<GeoPosition>,

    /// Viewport size in pixels, `WIDTHxHEIGHT`
    #[arg(long, global = true, default_value = "800x600")]
    pub viewport: ViewportSize,

    /// Write the train features to this GeoJSON file
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    /// Projection of the written train features
    #[arg(long, global = true, default_value = "EPSG:4326")]
    pub snapshot_projection: Projection,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow the live MQTT train location feed
    Live(LiveArgs),
    /// Replay recorded payloads, one JSON document per line
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
pub struct LiveArgs {
    /// Broker host name
    #[arg(long, default_value = DEFAULT_BROKER)]
    pub host: String,

    #[arg(long, default_value_t = 443)]
    pub port: u16,

    #[arg(long, value_enum, default_value_t = Transport::Wss)]
    pub transport: Transport,

    /// Websocket path on the broker
    #[arg(long, default_value = "/mqtt")]
    pub path: String,

    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// A random number below 10000 is appended to this prefix
    #[arg(long, default_value = "myclientid_")]
    pub client_prefix: String,

    /// Seconds between MQTT keep-alive pings
    #[arg(long, default_value_t = 30)]
    pub keep_alive: u64,

    /// Seconds to wait for the broker to accept a connection
    #[arg(long, default_value_t = 3)]
    pub connect_timeout: u64,

    /// First reconnect delay in milliseconds, doubled on every failed attempt
    #[arg(long, default_value_t = 1_000)]
    pub backoff_initial_ms: u64,

    /// Longest reconnect delay in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub backoff_max_ms: u64,

    /// Give up after this many consecutive failed reconnects
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Seconds between status reports and snapshot writes
    #[arg(long, default_value_t = 5)]
    pub report_interval: u64,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Newline-delimited JSON payloads
    pub file: PathBuf,

    /// Print what is under this `lon,lat` once the replay is done
    #[arg(long, allow_hyphen_values = true)]
    pub inspect: Option<GeoPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// MQTT over TLS websockets
    Wss,
    /// MQTT over plain websockets
    Ws,
    /// MQTT over TLS
    Tls,
    /// Plain MQTT
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

impl FromStr for ViewportSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("expected WIDTHxHEIGHT, got `{s}`");
        let (width, height) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: f64 = width.trim().parse().map_err(|_| invalid())?;
        let height: f64 = height.trim().parse().map_err(|_| invalid())?;
        if width <= 0.0 || height <= 0.0 || !width.is_finite() || !height.is_finite() {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl Cli {
    pub fn viewport(&self) -> Viewport {
        Viewport::with_size(self.viewport.width, self.viewport.height)
    }
}

impl LiveArgs {
    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.host.clone(),
            port: self.port,
            transport: self.transport,
            path: self.path.clone(),
            topic: self.topic.clone(),
            client_id: format!("{}{}", self.client_prefix, fastrand::u32(..10_000)),
            keep_alive: Duration::from_secs(self.keep_alive),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            backoff: BackoffConfig {
                initial: Duration::from_millis(self.backoff_initial_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                max_attempts: self.max_reconnects,
            },
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval.max(1))
    }
}

#[test]
fn defaults_follow_digitraffic() {
    let cli = Cli::parse_from(["trainmap", "live"]);
    assert_eq!(cli.stations, DEFAULT_STATIONS);
    assert_eq!(cli.tracks, DEFAULT_TRACKS);
    assert_eq!(cli.data_projection, Projection::Geographic);
    assert!(cli.locate.is_none());

    let Command::Live(live) = &cli.command else {
        panic!("expected live command");
    };
    let config = live.mqtt_config();
    assert_eq!(config.host, DEFAULT_BROKER);
    assert_eq!(config.port, 443);
    assert_eq!(config.transport, Transport::Wss);
    assert_eq!(config.topic, DEFAULT_TOPIC);
    assert!(config.client_id.starts_with("myclientid_"));
    assert_eq!(config.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.backoff.max, Duration::from_secs(60));
}

#[test]
fn parses_replay_arguments() {
    let cli = Cli::parse_from([
        "trainmap",
        "replay",
        "positions.ndjson",
        "--inspect",
        "24.941,60.172",
        "--locate",
        "24.9,60.2",
        "--viewport",
        "1024x768",
        "--snapshot-projection",
        "EPSG:3857",
    ]);
    let Command::Replay(replay) = &cli.command else {
        panic!("expected replay command");
    };
    assert_eq!(replay.file, PathBuf::from("positions.ndjson"));
    assert_eq!(replay.inspect, Some(GeoPosition::new(24.941, 60.172).unwrap()));
    assert_eq!(cli.locate, Some(GeoPosition::new(24.9, 60.2).unwrap()));
    assert_eq!(cli.viewport().size, [1024.0, 768.0]);
    assert_eq!(cli.snapshot_projection, Projection::WebMercator);
}

#[test]
fn rejects_bad_viewport() {
    assert!("800".parse::<ViewportSize>().is_err());
    assert!("0x600".parse::<ViewportSize>().is_err());
    assert!("axb".parse::<ViewportSize>().is_err());
}
