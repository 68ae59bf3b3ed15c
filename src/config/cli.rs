use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the aperture binary.
#[derive(Debug, Parser)]
#[command(name = "aperture", version, about = "Aperture portfolio content cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "APERTURE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the public content API and the cache admin hooks.
    Serve(Box<ServeArgs>),
    /// Print the tags a mutation would invalidate.
    Cascade(CascadeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the server cache and invalidation pipeline.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Serve content from a directory of JSON documents.
    #[arg(long = "content-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub content_root: Option<PathBuf>,

    /// Serve content from the CMS REST API at this base URL.
    #[arg(long = "cms-url", value_name = "URL", conflicts_with = "content_root")]
    pub cms_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CascadeArgs {
    /// Mutated collection slug, e.g. `images`.
    #[arg(long, value_name = "NAME", required_unless_present = "global")]
    pub collection: Option<String>,

    /// Mutated global, e.g. `home`.
    #[arg(long, value_name = "NAME", conflicts_with = "collection")]
    pub global: Option<String>,

    /// Affected document as JSON.
    #[arg(long, value_name = "JSON", requires = "collection")]
    pub doc: Option<String>,

    /// Print the tags as a JSON array.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}
