use clap::{Parser, Subcommand, ValueEnum};
use snipurl_core::BatchItem;
use snipurl_shortener::deletion::DEFAULT_BATCH_SIZE;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const BASE_URL_ENV: &str = "SNIPURL_BASE_URL";
pub const DATABASE_DSN_ENV: &str = "SNIPURL_DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIPURL_FILE_STORAGE_PATH";
pub const LOG_FORMAT_ENV: &str = "SNIPURL_LOG_FORMAT";
pub const DELETE_BATCH_SIZE_ENV: &str = "SNIPURL_DELETE_BATCH_SIZE";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

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

/// Storage is picked once at startup: a database DSN selects PostgreSQL,
/// otherwise a file path selects the JSON-lines log, otherwise memory.
#[derive(Debug, Parser)]
#[command(name = "snipurl", version, about = "Shorten URLs and manage the links you own")]
pub struct CLI {
    #[arg(
        long,
        env = BASE_URL_ENV,
        default_value = DEFAULT_BASE_URL,
        value_parser = parse_base_url
    )]
    pub base_url: String,

    #[arg(long, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    #[arg(
        long,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,

    #[arg(
        long,
        env = DELETE_BATCH_SIZE_ENV,
        default_value_t = DEFAULT_BATCH_SIZE
    )]
    pub delete_batch_size: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten {
        url: String,
        #[arg(long, default_value = "")]
        owner: String,
    },
    /// Shorten several URLs at once; each may be given as `id=url`.
    Batch {
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the URL a short code redirects to.
    Resolve { code: String },
    /// List the live URLs of an owner.
    List {
        #[arg(long, default_value = "")]
        owner: String,
    },
    /// Soft-delete short codes of an owner.
    Delete {
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Check that the storage backend is reachable.
    Ping,
}

fn parse_base_url(value: &str) -> Result<String, String> {
    let rest = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
        .ok_or_else(|| format!("base url must start with http:// or https://: {value}"))?;

    if rest.trim_matches('/').is_empty() {
        return Err(format!("base url has no host: {value}"));
    }
    Ok(value.to_string())
}

/// Turns `batch` arguments into items, in argument order.
///
/// `id=url` sets the correlation id explicitly; a bare URL gets `#<position>`,
/// counted from one. The prefix before `=` only counts as an id when it
/// cannot be part of a URL, so query strings stay intact.
pub fn batch_items(args: &[String]) -> Vec<BatchItem> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| match arg.split_once('=') {
            Some((id, url)) if !id.is_empty() && !id.contains([':', '/', '?', '&']) => {
                BatchItem::new(id, url)
            }
            _ => BatchItem::new(format!("#{}", i + 1), arg.as_str()),
        })
        .collect()
}
