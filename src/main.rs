use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt as _;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use vesta_auth::TokenAuthority;
use vesta_client::{ApiClient, ReqwestTransport};
use vesta_config::{Config, LogConfig, LogFormat};
use vesta_store::SqliteTokenStore;
use vesta_stream::{OutboundMessage, StreamClient, StreamEvent};
use vesta_types::token::unix_now;
use vesta_types::{EndpointDescriptor, HttpTransport, TokenSet, TokenState, TokenStore};

#[derive(Parser, Debug)]
#[command(name = "vesta", about = "vesta — authenticated API and stream client")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (default: ~/.vesta/tokens.db).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the stored session state.
    Status,
    /// Remove stored session tokens.
    Logout,
    /// Store tokens obtained from an external sign-in.
    SetToken {
        #[arg(long)]
        refresh_token: String,
        #[arg(long)]
        access_token: Option<String>,
        /// Access token lifetime in seconds.
        #[arg(long, requires = "access_token")]
        expires_in: Option<u64>,
    },
    /// GET an API path and print the response body.
    Get {
        path: String,
        /// Query parameter as `key=value`; repeatable.
        #[arg(short, long = "query", value_name = "KEY=VALUE", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// Send without the session bearer.
        #[arg(long)]
        no_auth: bool,
    },
    /// Upload a file as multipart form data.
    Upload {
        path: String,
        file: PathBuf,
        /// MIME type of the file (default: application/octet-stream).
        #[arg(long)]
        mime: Option<String>,
    },
    /// Connect to the event stream and print events until interrupted.
    Stream {
        /// Stream URL (default: `stream.url` from config).
        #[arg(long)]
        url: Option<String>,
        #[arg(long = "channel")]
        channels: Vec<String>,
        #[arg(long = "symbol")]
        symbols: Vec<String>,
    },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        Config::load(cli.config.as_deref()).map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    init_tracing(&config.log);

    match cli.command {
        Commands::Status => cmd_status(&config, cli.db).await,
        Commands::Logout => cmd_logout(&config, cli.db).await,
        Commands::SetToken {
            refresh_token,
            access_token,
            expires_in,
        } => cmd_set_token(&config, cli.db, refresh_token, access_token, expires_in).await,
        Commands::Get {
            path,
            query,
            no_auth,
        } => cmd_get(&config, cli.db, path, query, no_auth).await,
        Commands::Upload { path, file, mime } => cmd_upload(&config, cli.db, path, file, mime).await,
        Commands::Stream {
            url,
            channels,
            symbols,
        } => cmd_stream(&config, cli.db, url, channels, symbols).await,
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let (text, json) = match log.format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

async fn cmd_status(config: &Config, db: Option<PathBuf>) -> Result<()> {
    let (auth, _) = open_session(config, db).await?;
    let state = if auth.is_authenticated() {
        "signed in"
    } else {
        "not signed in"
    };
    println!("{}: {state}", config.api.base_url);
    Ok(())
}

async fn cmd_logout(config: &Config, db: Option<PathBuf>) -> Result<()> {
    let (auth, _) = open_session(config, db).await?;
    auth.clear_tokens()
        .await
        .map_err(|e| anyhow::anyhow!("logout failed: {e}"))?;
    eprintln!("signed out");
    Ok(())
}

async fn cmd_set_token(
    config: &Config,
    db: Option<PathBuf>,
    refresh_token: String,
    access_token: Option<String>,
    expires_in: Option<u64>,
) -> Result<()> {
    let (auth, _) = open_session(config, db).await?;
    let tokens = TokenSet {
        access_token,
        refresh_token: Some(refresh_token),
        identity_token: None,
        expires_at: expires_in.map(|secs| unix_now().saturating_add(secs)),
    };
    let state = tokens.state(config.auth.refresh_leeway());
    auth.seed(tokens)
        .await
        .map_err(|e| anyhow::anyhow!("failed to store tokens: {e}"))?;
    match state {
        TokenState::Valid => eprintln!("session stored"),
        _ => eprintln!("session stored; the access token will be refreshed on first use"),
    }
    Ok(())
}

async fn cmd_get(
    config: &Config,
    db: Option<PathBuf>,
    path: String,
    query: Vec<(String, String)>,
    no_auth: bool,
) -> Result<()> {
    let client = open_client(config, db).await?;
    let mut descriptor = EndpointDescriptor::get(path);
    for (k, v) in query {
        descriptor = descriptor.with_query(k, v);
    }
    if no_auth {
        descriptor = descriptor.without_auth();
    }
    let body = client.execute(&descriptor).await.map_err(report)?;
    println!("{}", String::from_utf8_lossy(&body));
    Ok(())
}

async fn cmd_upload(
    config: &Config,
    db: Option<PathBuf>,
    path: String,
    file: PathBuf,
    mime: Option<String>,
) -> Result<()> {
    let client = open_client(config, db).await?;
    let payload = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
    let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());

    let body = client
        .upload(&EndpointDescriptor::post(path), payload, filename, mime)
        .await
        .map_err(report)?;
    println!("{}", String::from_utf8_lossy(&body));
    Ok(())
}

async fn cmd_stream(
    config: &Config,
    db: Option<PathBuf>,
    url: Option<String>,
    channels: Vec<String>,
    symbols: Vec<String>,
) -> Result<()> {
    let url = url
        .or_else(|| config.stream.url.clone())
        .context("no stream URL: pass --url or set stream.url")?;
    let (auth, _) = open_session(config, db).await?;
    tracing::debug!(%url, "connecting to stream");

    let stream = StreamClient::new(config.stream.clone());
    let mut events = stream.connect(&url).await.map_err(report)?;
    let forwarder = stream.forward_token_refreshes(auth.subscribe());

    if !channels.is_empty() || !symbols.is_empty() {
        stream
            .send(&OutboundMessage::Subscribe { channels, symbols })
            .await
            .map_err(report)?;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                stream.disconnect(1000).await;
                break;
            }
            event = events.next() => match event {
                Some(StreamEvent::Message(msg)) => {
                    let data = msg.data.map(|d| d.to_string()).unwrap_or_default();
                    println!("{:?} {} {data}", msg.kind, msg.event.as_deref().unwrap_or("-"));
                }
                Some(StreamEvent::Disconnected { code }) => {
                    eprintln!("disconnected (code {})", code.map_or_else(|| "none".to_string(), |c| c.to_string()));
                    break;
                }
                None => break,
            },
        }
    }
    forwarder.abort();
    Ok(())
}

fn report(err: vesta_types::NetworkError) -> anyhow::Error {
    match err.recovery_suggestion() {
        Some(hint) => anyhow::anyhow!("{err}. {hint}"),
        None => anyhow::anyhow!("{err}"),
    }
}

async fn open_session(
    config: &Config,
    db: Option<PathBuf>,
) -> Result<(Arc<TokenAuthority>, Arc<dyn HttpTransport>)> {
    let store: Arc<dyn TokenStore> = Arc::new(open_store(db).await?);
    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::with_pool(config.api.max_concurrent_requests).map_err(report)?,
    );
    let auth = TokenAuthority::load(store, Arc::clone(&transport), config.token_url(), &config.auth)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load session: {e}"))?;
    Ok((Arc::new(auth), transport))
}

async fn open_client(config: &Config, db: Option<PathBuf>) -> Result<ApiClient> {
    let (auth, transport) = open_session(config, db).await?;
    Ok(ApiClient::new(config.api.clone(), transport, auth))
}

async fn open_store(db: Option<PathBuf>) -> Result<SqliteTokenStore> {
    let path = db.unwrap_or_else(default_db_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let url = format!("sqlite://{}", path.display());
    SqliteTokenStore::new(&url)
        .await
        .map_err(|e| anyhow::anyhow!("database error: {e}"))
}

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".vesta").join("tokens.db")
}
