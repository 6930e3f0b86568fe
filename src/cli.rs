//! Command Line Interface (CLI) arguments.

use clap::Parser;
use url::Url;

/// Statboard command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "STATBOARD_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "STATBOARD_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "STATBOARD_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/statboard/certs/cert.pem",
        env = "STATBOARD_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/statboard/certs/key.pem",
        env = "STATBOARD_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "STATBOARD_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "STATBOARD_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Base URL of the dissemination API datasets are fetched from
    #[arg(
        long,
        default_value = "https://ec.europa.eu/eurostat/api/dissemination/statistics/1.0/data",
        env = "STATBOARD_BASE_URL"
    )]
    pub base_url: Url,
    /// Path to the response cache backing file
    #[arg(
        long,
        default_value = "~/.cache/statboard/responses.json",
        env = "STATBOARD_CACHE_FILE"
    )]
    pub cache_file: String,
    /// Response cache expiry in seconds
    #[arg(long, default_value_t = 3600, env = "STATBOARD_CACHE_EXPIRY")]
    pub cache_expiry: u64,
    /// Timeout in seconds for each upstream API request
    #[arg(long, default_value_t = 30, env = "STATBOARD_REQUEST_TIMEOUT")]
    pub request_timeout: u64,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
