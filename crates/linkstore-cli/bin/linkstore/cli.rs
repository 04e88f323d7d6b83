use clap::{Parser, Subcommand, ValueEnum};
use linkstore_storage::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_WORKERS};
use linkstore_storage::{PipelineConfig, StoreConfig};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const WORKERS_ENV: &str = "LINKSTORE_WORKERS";
pub const BATCH_TIMEOUT_MS_ENV: &str = "LINKSTORE_BATCH_TIMEOUT_MS";
pub const MAX_CONNECTIONS_ENV: &str = "LINKSTORE_MAX_CONNECTIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "linkstore", version, about = "Inspect and maintain a link store")]
pub struct CLI {
    /// MySQL DSN. Takes precedence over the file path.
    #[arg(long, env = DATABASE_DSN_ENV, global = true)]
    pub database_dsn: Option<String>,

    /// Line-delimited JSON storage file.
    #[arg(long, env = FILE_STORAGE_PATH_ENV, global = true)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = WORKERS_ENV, default_value_t = DEFAULT_WORKERS, global = true)]
    pub workers: usize,

    /// Time limit of one tombstone sub-batch. Unbounded when unset.
    #[arg(long, env = BATCH_TIMEOUT_MS_ENV, global = true)]
    pub batch_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = MAX_CONNECTIONS_ENV,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        global = true
    )]
    pub max_connections: u32,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

impl CLI {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::builder()
            .database_dsn(self.database_dsn.clone())
            .file_storage_path(self.file_storage_path.clone())
            .max_connections(self.max_connections)
            .pipeline(
                PipelineConfig::builder()
                    .workers(self.workers)
                    .batch_timeout_ms(self.batch_timeout_ms)
                    .build(),
            )
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the record of a short code.
    Get { code: String },

    /// Store a URL. The code is derived from the URL unless given.
    Set {
        url: String,
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Store every entry of a JSON object mapping codes to URLs.
    Import { path: PathBuf },

    /// List the records of an owner, tombstoned ones included.
    List {
        #[arg(long)]
        owner: String,
    },

    /// Tombstone codes on behalf of their owner.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },

    /// Count live records and owners.
    Stats,

    /// Check the database connection.
    Ping,
}
