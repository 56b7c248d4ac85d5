//! HAP controller demo: pairs with every accessory that connects and toggles
//! its first switch.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hap_client::{store_for, ClientConfig, HapClient, PairingStore};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, Level};

/// Characteristic toggled on each accessory (aid, iid).
const TARGET: (u64, u64) = (1, 10);

/// Command-line arguments
struct Args {
    bind: SocketAddr,
    pairing_file: Option<PathBuf>,
    setup_code: Option<String>,
    debug: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 4242)),
            pairing_file: None,
            setup_code: None,
            debug: false,
        }
    }
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--bind" | "-b" => {
                let value = iter.next().context("--bind needs an address")?;
                args.bind = value
                    .parse()
                    .with_context(|| format!("invalid bind address {:?}", value))?;
            }
            "--pairing-file" | "-p" => {
                let value = iter.next().context("--pairing-file needs a path")?;
                args.pairing_file = Some(PathBuf::from(value));
            }
            "--setup-code" | "-c" => {
                args.setup_code = Some(iter.next().context("--setup-code needs a code")?);
            }
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    Ok(args)
}

fn print_help() {
    println!("hap-client - HomeKit Accessory Protocol controller");
    println!();
    println!("Usage: hap-client-rs [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -b, --bind ADDR          Listen address (default: 0.0.0.0:4242)");
    println!("  -p, --pairing-file PATH  Keep the pairing in PATH instead of memory");
    println!("  -c, --setup-code CODE    Accessory setup code, XXX-XX-XXX (default: 111-11-111)");
    println!("  -d, --debug              Enable debug logging");
    println!("  -h, --help               Show this help message");
    println!();
    println!("Environment: HAP_SETUP_CODE, HAP_PAIRING_FILE, HAP_TIMEOUT_SECS");
}

fn setup_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(debug)
        .init();
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("invalid HAP_* environment")?;
    if let Some(code) = &args.setup_code {
        config.setup_code = code.clone();
    }
    if let Some(path) = &args.pairing_file {
        config.pairing_file = Some(path.clone());
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run_accessory(
    stream: TcpStream,
    config: ClientConfig,
    store: Arc<dyn PairingStore>,
) -> hap_client::Result<()> {
    stream.set_nodelay(true)?;
    let mut client = HapClient::from_stream(stream, config, store)?;

    let status = client.probe().await?;
    info!(status, "unauthenticated accessories fetch");

    client.pair().await?;
    client.get_accessories().await?;

    let (aid, iid) = TARGET;
    client.set_value(aid, iid, json!(0)).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    client.set_value(aid, iid, json!(1)).await?;

    client.close().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    setup_logging(args.debug);

    let config = load_config(&args)?;
    let store = store_for(&config);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "waiting for accessories");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "accessory connected");

        let config = config.clone();
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            match run_accessory(stream, config, store).await {
                Ok(()) => info!(%peer, "accessory session finished"),
                Err(e) => error!(%peer, error = %e, "accessory session failed"),
            }
        });
    }
}
