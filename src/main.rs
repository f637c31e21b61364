//! evstore - command-line client for event store servers.
//!
//! Runs one-shot commands, or streams a subscription until Ctrl+C.

mod commands;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use evstore_client::{Client, ClientSettings, CredentialSettings, ExpectedVersion};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evstore")]
#[command(about = "Command-line client for event store servers")]
#[command(version)]
struct Cli {
    /// Server endpoint (host:port)
    #[arg(short, long, env = "EVSTORE_ENDPOINT")]
    endpoint: Option<String>,

    /// Username for authenticated requests
    #[arg(short, long, env = "EVSTORE_USERNAME")]
    username: Option<String>,

    /// Password for authenticated requests
    #[arg(short, long, env = "EVSTORE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Name the server shows for this connection
    #[arg(long)]
    connection_name: Option<String>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long, requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long, requires = "client_cert")]
    client_key: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    /// Server name for TLS SNI (defaults to the endpoint host)
    #[arg(long)]
    server_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ping the server
    Ping,

    /// Append one event to a stream
    Append {
        stream: String,

        /// Event type
        #[arg(short = 't', long = "type")]
        event_type: String,

        /// Event data as JSON (or @file.json to read from file)
        data: String,

        /// Event metadata as JSON (or @file.json)
        #[arg(short, long)]
        metadata: Option<String>,

        /// any, no-stream, exists, or an event number
        #[arg(long, default_value = "any", value_parser = commands::parse_expected_version)]
        expected_version: ExpectedVersion,
    },

    /// Read events from a stream
    Read {
        stream: String,

        /// First event number (defaults to the start, or the end when reading backward)
        #[arg(short, long)]
        from: Option<i64>,

        /// Maximum events to return
        #[arg(short, long, default_value = "100")]
        count: usize,

        /// Read from newest to oldest
        #[arg(long)]
        backward: bool,

        /// Resolve link events to the events they point at
        #[arg(long)]
        resolve_links: bool,
    },

    /// Read a single event (-1 for the last one)
    ReadEvent {
        stream: String,

        #[arg(allow_hyphen_values = true)]
        number: i64,

        #[arg(long)]
        resolve_links: bool,
    },

    /// Read events from $all
    ReadAll {
        /// Commit position to start at
        #[arg(long)]
        commit: Option<i64>,

        /// Prepare position to start at (defaults to the commit position)
        #[arg(long)]
        prepare: Option<i64>,

        #[arg(short, long, default_value = "100")]
        count: usize,

        #[arg(long)]
        backward: bool,

        #[arg(long)]
        resolve_links: bool,
    },

    /// Delete a stream
    Delete {
        stream: String,

        #[arg(long, default_value = "any", value_parser = commands::parse_expected_version)]
        expected_version: ExpectedVersion,

        /// Remove the stream permanently
        #[arg(long)]
        hard: bool,
    },

    /// Stream new events until Ctrl+C
    Subscribe {
        /// Stream to follow (omit for $all)
        stream: Option<String>,

        /// Replay history after this event number first (-1 replays everything)
        #[arg(long, allow_hyphen_values = true)]
        from: Option<i64>,

        #[arg(long)]
        resolve_links: bool,
    },

    /// Manage and consume persistent subscriptions
    #[command(subcommand)]
    Persistent(PersistentCommands),

    /// Show stream metadata
    GetMetadata { stream: String },

    /// Replace stream metadata
    SetMetadata {
        stream: String,

        /// Metadata as JSON (or @file.json)
        metadata: String,

        /// Expected version of the metastream
        #[arg(long, default_value = "any", value_parser = commands::parse_expected_version)]
        expected_version: ExpectedVersion,
    },
}

#[derive(Subcommand)]
pub enum PersistentCommands {
    /// Create a subscription group
    Create(GroupArgs),

    /// Change the settings of a subscription group
    Update(GroupArgs),

    /// Delete a subscription group
    Delete { stream: String, group: String },

    /// Consume a group, acknowledging every event, until Ctrl+C
    Connect {
        stream: String,
        group: String,

        /// Events the server may have in flight to this consumer
        #[arg(long, default_value = "10")]
        buffer_size: i32,
    },
}

#[derive(Args)]
pub struct GroupArgs {
    pub stream: String,
    pub group: String,

    /// Start from the first event instead of the current end
    #[arg(long)]
    pub from_beginning: bool,

    #[arg(long)]
    pub resolve_links: bool,

    /// Deliveries before an event is parked
    #[arg(long)]
    pub max_retries: Option<i32>,

    /// Seconds before an unacknowledged event is retried
    #[arg(long)]
    pub message_timeout: Option<u64>,

    /// DispatchToSingle, RoundRobin or Pinned
    #[arg(long)]
    pub strategy: Option<String>,
}

impl Cli {
    /// Layers command-line options over the loaded settings.
    fn settings(&self) -> Result<ClientSettings, Box<dyn std::error::Error>> {
        let mut settings = ClientSettings::load()?;

        if let Some(endpoint) = &self.endpoint {
            settings.connection.endpoint = endpoint.clone();
        }
        if let Some(name) = &self.connection_name {
            settings.connection.name = Some(name.clone());
        } else if settings.connection.name.is_none() {
            settings.connection.name = Some("evstore-cli".to_string());
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => {
                settings.credentials = Some(CredentialSettings {
                    username: username.clone(),
                    password: password.clone(),
                });
            }
            (None, None) => {}
            _ => return Err("--username and --password must be used together".into()),
        }

        if self.tls || self.ca_cert.is_some() || self.client_cert.is_some() || self.insecure {
            settings.tls.enabled = true;
        }
        if let Some(path) = &self.ca_cert {
            settings.tls.ca_cert_path = Some(path.clone());
        }
        if let (Some(cert), Some(key)) = (&self.client_cert, &self.client_key) {
            settings.tls.client_cert_path = Some(cert.clone());
            settings.tls.client_key_path = Some(key.clone());
        }
        if self.insecure {
            settings.tls.insecure = true;
        }
        if let Some(name) = &self.server_name {
            settings.tls.server_name = Some(name.clone());
        }

        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(2);
        }
    };
    let client = match Client::from_settings(&settings) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(2);
        }
    };

    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    tracing::debug!(endpoint = %settings.connection.endpoint, "connected");

    let result = match cli.command {
        Commands::Subscribe {
            stream,
            from,
            resolve_links,
        } => commands::subscribe(&client, stream, from, resolve_links).await,
        Commands::Persistent(PersistentCommands::Connect {
            stream,
            group,
            buffer_size,
        }) => commands::consume_persistent(&client, &stream, &group, buffer_size).await,
        cmd => commands::execute(&client, cmd).await.map(|output| {
            println!("{}", output);
        }),
    };

    let _ = client.close().await;

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
