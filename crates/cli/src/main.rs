use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "edgelink")]
#[command(about = "Expose a local command relay through a tunnel and pair a phone by QR code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: EDGELINK_CONFIG_PATH or ~/.edgelink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the relay: start the tunnel, serve the pairing page on / and the WebSocket relay on /ws.
    Serve {
        /// Config file path (default: EDGELINK_CONFIG_PATH or ~/.edgelink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,

        /// LAN only: no tunnel, advertise ws://<lan-ip>:<port>/ws
        #[arg(long)]
        lan: bool,
    },

    /// Check that the tunnel binary is installed.
    Check {
        /// Config file path (default: EDGELINK_CONFIG_PATH or ~/.edgelink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Connect to a relay and send each input line as a command (interactive).
    Client {
        /// Relay URL, e.g. wss://<host>.trycloudflare.com/ws or ws://192.168.1.5:8000/ws
        url: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("edgelink {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port, lan }) => {
            if let Err(e) = run_serve(config, port, lan).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config).await {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Client { url }) => {
            if let Err(e) = run_client(&url).await {
                log::error!("client failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    lan: bool,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if lan {
        config.endpoint.mode = lib::config::EndpointMode::Lan;
    }
    log::info!(
        "starting relay on {}:{} ({} mode)",
        config.gateway.bind,
        config.gateway.port,
        config.endpoint.mode.as_str()
    );

    let cell = lib::tunnel::EndpointCell::new();
    let publisher = cell.publisher();
    let local_page = format!("http://localhost:{}/", config.gateway.port);
    tokio::spawn(async move {
        let endpoint = publisher.wait().await;
        print_pairing_banner(endpoint.relay_url(), &local_page);
    });

    lib::gateway::run_gateway(config, cell).await
}

fn print_pairing_banner(relay_url: &str, local_page: &str) {
    println!();
    println!("Relay URL: {}", relay_url);
    match lib::gateway::terminal_code(relay_url) {
        Ok(code) => println!("{}", code),
        Err(e) => log::warn!("could not draw pairing code: {}", e),
    }
    println!("Scan the code above, or open {} to pair.", local_page);
    println!();
}

async fn run_check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let binary = lib::config::resolve_tunnel_binary(&config);
    let version = lib::tunnel::tunnel_version(&binary).await?;
    if version.is_empty() {
        println!("{} is installed", binary);
    } else {
        println!("{} is installed: {}", binary, version);
    }
    Ok(())
}

async fn run_client(url: &str) -> anyhow::Result<()> {
    use anyhow::Context;
    use std::io::{self, Write};

    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connecting to {}", url))?;
    println!("connected to {} (/exit to quit)", url);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        ws.send(Message::Text(input.to_string()))
            .await
            .context("sending command")?;

        let ack = loop {
            let msg = ws
                .next()
                .await
                .context("connection closed by relay")?
                .context("reading ack")?;
            match msg {
                Message::Text(text) => break text,
                Message::Close(_) => anyhow::bail!("connection closed by relay"),
                _ => continue,
            }
        };
        println!("< {}", ack);
    }

    let _ = ws.close(None).await;
    Ok(())
}
