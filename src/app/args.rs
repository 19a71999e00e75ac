use clap::{Parser, ValueEnum};
use tracing::Level;

/// A mock server speaking the PostgreSQL v3 wire protocol (spec.md §1).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(
        short,
        long,
        default_value_t = String::from("pg_mock_server.toml"),
        env
    )]
    pub config_file: String,

    /// Overrides `server.host` from the config file.
    #[arg(long, env)]
    pub host: Option<String>,

    /// Overrides `server.port` from the config file.
    #[arg(short, long, env)]
    pub port: Option<u16>,

    #[arg(short, long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(
        short,
        long,
        default_value_t = false,
        env,
        help = "disable colors in the log output"
    )]
    pub no_color: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Text,
    Structured,
    Debug,
}
