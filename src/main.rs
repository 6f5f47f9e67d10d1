use clap::{Parser, Subcommand};
use cdc_capture::checkpoint::{FilePositionStore, PositionStore};
use cdc_capture::event::{EventDispatcher, JsonLinesListener};
use cdc_capture::mysql::{BinlogDecoder, BinlogExtractor, EventFramer, StreamFormat};
use cdc_capture::polling::{Point, WatermarkValue};
use cdc_capture::{Config, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "cdc-capture")]
#[command(about = "MySQL binlog and polling change data capture", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a binlog file and print its change events as JSON lines
    Decode {
        #[arg(value_name = "BINLOG")]
        file: PathBuf,

        #[arg(long, help = "Print every decoded event instead of row changes")]
        events: bool,
    },
    /// Print the persisted position map
    Positions,
    /// Show each configured command resolved against the persisted positions
    Resolve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    match args.command {
        Command::Decode { file, events: true } => dump_events(file).await,
        Command::Decode { file, events: false } => decode(file).await,
        Command::Positions => {
            let config = load_config(&args.config)?;
            let store = FilePositionStore::new(&config.position.path);
            let positions = store.load().await?;
            println!("{}", serde_json::to_string_pretty(&positions)?);
            Ok(())
        }
        Command::Resolve => {
            let config = load_config(&args.config)?;
            resolve(&config).await
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    match Config::from_file(path) {
        Ok(cfg) => {
            info!(
                mapping = %cfg.mapping.id,
                listener = ?cfg.listener.listener_type,
                commands = cfg.listener.commands.len(),
                position_file = ?cfg.position.path,
                "Configuration loaded"
            );
            Ok(cfg)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(Error::from(e))
        }
    }
}

async fn decode(file: PathBuf) -> Result<()> {
    info!("Decoding binlog file {:?}", file);
    let reader = tokio::fs::File::open(&file).await?;
    let dispatcher = EventDispatcher::new().with_listener(Arc::new(JsonLinesListener::new(tokio::io::stdout())));
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut extractor =
        BinlogExtractor::new(StreamFormat::File, Arc::new(dispatcher)).with_position(name, 4);
    let stats = extractor.run(tokio::io::BufReader::new(reader)).await?;
    info!(
        "Decoded {} events, {} row changes, ending at {}",
        stats.events,
        stats.changes,
        extractor.position()
    );
    Ok(())
}

async fn dump_events(file: PathBuf) -> Result<()> {
    let data = tokio::fs::read(&file).await?;
    let mut framer = EventFramer::for_file();
    framer.feed(&data);

    let mut decoder = BinlogDecoder::new();
    while let Some(raw) = framer.next_event()? {
        let decoded = decoder.decode(&raw)?;
        println!("{}", serde_json::to_string(&decoded)?);
    }
    framer.finish()
}

async fn resolve(config: &Config) -> Result<()> {
    let store = FilePositionStore::new(&config.position.path);
    let positions = store.load().await?;
    let catalog = config.marker_catalog();
    let clock = cdc_capture::polling::SystemClock;

    for (index, command) in config.listener.commands.iter().enumerate() {
        let point = Point::resolve(index, &command.query, &catalog, &positions, &clock)?;
        let args: Vec<String> = point.args().iter().map(WatermarkValue::to_string).collect();
        println!(
            "{}",
            serde_json::json!({
                "index": index,
                "table": command.table,
                "command": point.command(),
                "args": args,
            })
        );
    }
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("cdc_capture=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cdc_capture=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
