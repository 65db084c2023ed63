mod client;
mod dispatch;
mod error;
mod history;
mod protocol;
mod server;
mod tools;
mod weather;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use client::{ClientConfig, ToolClient};
use dispatch::Dispatcher;
use history::{HistoryStore, StorageConfig};
use server::ServerConfig;
use tools::Endpoint;
use weather::WeatherConfig;

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "wxtools")]
#[command(about = "Weather and health-check tool servers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tool server
    Serve {
        /// Tool set to expose
        #[arg(value_enum, default_value_t = Endpoint::Weather)]
        endpoint: Endpoint,
        #[command(flatten)]
        listen: ListenArgs,
        #[command(flatten)]
        storage: StorageArgs,
        #[command(flatten)]
        weather: WeatherArgs,
    },

    /// List the tools a running server exposes
    Tools {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Call a tool on a running server
    Call {
        /// Tool name, e.g. get_current_weather
        name: String,
        /// Tool input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,
        /// Shorthand for adding "location" to the input
        #[arg(short, long)]
        location: Option<String>,
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Follow tool call events of a running server
    Watch {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Print the recorded history of a location
    History {
        location: String,
        /// Only show this many of the most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[command(flatten)]
        storage: StorageArgs,
    },

    /// List locations with recorded history
    Locations {
        #[command(flatten)]
        storage: StorageArgs,
    },
}

#[derive(Args)]
struct ListenArgs {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 8001)]
    port: u16,
    /// Require this bearer token on every request
    #[arg(long, env = "WXTOOLS_TOKEN")]
    token: Option<String>,
}

#[derive(Args)]
struct StorageArgs {
    /// Directory holding the per-location history files
    #[arg(long, env = "WEATHER_DIR", default_value = "weather")]
    history_dir: PathBuf,
}

impl StorageArgs {
    fn config(self) -> StorageConfig {
        StorageConfig {
            base_path: self.history_dir,
        }
    }
}

#[derive(Args)]
struct WeatherArgs {
    /// Base URL of the wttr.in compatible weather API
    #[arg(long, env = "WEATHER_API_URL", default_value = "https://wttr.in")]
    weather_url: String,
    /// Timeout for weather API requests, in seconds
    #[arg(long, env = "WEATHER_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Args)]
struct RemoteArgs {
    /// Base URL of the tool server
    #[arg(long, env = "WXTOOLS_URL", default_value = "http://127.0.0.1:8001")]
    url: String,
    /// Bearer token expected by the server
    #[arg(long, env = "WXTOOLS_TOKEN")]
    token: Option<String>,
}

impl RemoteArgs {
    fn client(self) -> ToolClient {
        ToolClient::new(ClientConfig {
            base_url: self.url,
            token: self.token,
        })
    }
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve {
            endpoint,
            listen,
            storage,
            weather,
        } => handle_serve(endpoint, listen, storage, weather).await,
        Commands::Tools { remote } => handle_tools(remote).await,
        Commands::Call {
            name,
            input,
            location,
            remote,
        } => handle_call(name, input, location, remote).await,
        Commands::Watch { remote } => handle_watch(remote).await,
        Commands::History {
            location,
            limit,
            storage,
        } => handle_history(location, limit, storage).await,
        Commands::Locations { storage } => handle_locations(storage).await,
    }
}

// Logs go to stderr so command output on stdout stays parseable.
fn init_logging(level: &str) {
    let json_logging = std::env::var("WXTOOLS_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wxtools={}", level)));

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn handle_serve(
    endpoint: Endpoint,
    listen: ListenArgs,
    storage: StorageArgs,
    weather: WeatherArgs,
) -> MainResult<()> {
    let storage = storage.config();
    tracing::info!(
        endpoint = endpoint.server_name(),
        history_dir = %storage.base_path.display(),
        weather_url = %weather.weather_url,
        "starting tool server"
    );

    let dispatcher = Dispatcher::new(
        endpoint,
        storage,
        WeatherConfig {
            base_url: weather.weather_url,
            timeout: Duration::from_secs(weather.timeout_secs),
        },
    )?;

    server::run(
        ServerConfig {
            listen: format!("{}:{}", listen.host, listen.port),
            auth_token: listen.token,
        },
        dispatcher,
    )
    .await
}

async fn handle_tools(remote: RemoteArgs) -> MainResult<()> {
    let list = remote.client().list_tools().await?;
    println!("{} ({} tools)", list.server, list.tools.len());
    for tool in list.tools {
        println!("  {:<24} {}", tool.name, tool.description);
    }
    Ok(())
}

async fn handle_call(
    name: String,
    input: String,
    location: Option<String>,
    remote: RemoteArgs,
) -> MainResult<()> {
    let mut input: serde_json::Value =
        serde_json::from_str(&input).map_err(|e| format!("--input is not valid JSON: {}", e))?;
    if let Some(location) = location {
        let object = input
            .as_object_mut()
            .ok_or("--input must be a JSON object")?;
        object.insert("location".to_string(), serde_json::Value::String(location));
    }

    let response = remote.client().call_tool(&name, input).await?;
    println!("{}", response.content);
    if response.is_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_watch(remote: RemoteArgs) -> MainResult<()> {
    let client = remote.client();
    tracing::info!(url = client.base_url(), "following tool events");
    client
        .stream_events(|event| async move {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => tracing::warn!(error = %err, "failed to print event"),
            }
        })
        .await
}

async fn handle_history(
    location: String,
    limit: Option<usize>,
    storage: StorageArgs,
) -> MainResult<()> {
    let store = HistoryStore::new(storage.config());
    let mut log = store.fetch(&location).await?;
    if let Some(limit) = limit {
        log.truncate_to_latest(limit);
    }
    println!("{}", serde_json::to_string_pretty(&log)?);
    Ok(())
}

async fn handle_locations(storage: StorageArgs) -> MainResult<()> {
    let store = HistoryStore::new(storage.config());
    let locations = store.list_known_locations().await?;
    if locations.is_empty() {
        tracing::info!(history_dir = %store.base_path().display(), "no history recorded yet");
    }
    for location in locations {
        println!("{}", location);
    }
    Ok(())
}
