use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "BURROW_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "BURROW_BASE_URL";
pub const LOG_LEVEL_ENV: &str = "BURROW_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "BURROW_LOG_FORMAT";
pub const OWNER_ENV: &str = "BURROW_OWNER";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "memory")]
    Memory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::Memory => write!(f, "memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "burrow", version, about = "Shorten, resolve and delete URLs")]
pub struct CLI {
    /// Storage backend; inferred from the other flags when omitted.
    #[arg(long, env = STORAGE_BACKEND_ENV, value_enum)]
    pub storage: Option<StorageBackendArg>,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, required_if_eq("storage", "file"))]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = LOG_LEVEL_ENV, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Owner the command acts for.
    #[arg(long, env = OWNER_ENV)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl CLI {
    /// The explicit backend, or postgres if a DSN is set, then file if a
    /// path is set, then memory.
    pub fn backend(&self) -> StorageBackendArg {
        match (self.storage, &self.database_dsn, &self.file_storage_path) {
            (Some(backend), _, _) => backend,
            (None, Some(_), _) => StorageBackendArg::Postgres,
            (None, None, Some(_)) => StorageBackendArg::File,
            (None, None, None) => StorageBackendArg::Memory,
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a URL.
    Shorten { url: String },
    /// Print the original URL behind a short code.
    Resolve { code: String },
    /// List the owner's live URLs as JSON.
    List,
    /// Soft-delete short codes owned by the owner.
    Delete {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Compact the journal of the file backend.
    Checkpoint,
    /// Check that the backend is reachable.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CLI {
        CLI::try_parse_from(std::iter::once("burrow").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn backend_defaults_to_memory() {
        let cli = parse(&["ping"]);
        assert_eq!(cli.backend(), StorageBackendArg::Memory);
        assert_eq!(cli.base_url(), "http://localhost:8080");
    }

    #[test]
    fn dsn_wins_over_file_path() {
        let cli = parse(&[
            "--file-storage-path",
            "/tmp/urls.jsonl",
            "--database-dsn",
            "postgres://localhost/burrow",
            "ping",
        ]);
        assert_eq!(cli.backend(), StorageBackendArg::Postgres);
    }

    #[test]
    fn file_path_selects_file_backend() {
        let cli = parse(&["--file-storage-path", "/tmp/urls.jsonl", "list"]);
        assert_eq!(cli.backend(), StorageBackendArg::File);
    }

    #[test]
    fn explicit_backend_is_kept() {
        let cli = parse(&[
            "--storage",
            "memory",
            "--database-dsn",
            "postgres://localhost/burrow",
            "ping",
        ]);
        assert_eq!(cli.backend(), StorageBackendArg::Memory);
    }

    #[test]
    fn postgres_requires_dsn() {
        let err = CLI::try_parse_from(["burrow", "--storage", "postgres", "ping"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cli = parse(&["--base-url", "https://bw.example/", "ping"]);
        assert_eq!(cli.base_url(), "https://bw.example");
    }
}
