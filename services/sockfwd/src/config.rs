//! Command-line configuration.
//!
//! Every option can also be supplied through a `SOCKFWD_*` environment
//! variable; an explicit flag wins.

use clap::{Parser, ValueEnum};

use crate::endpoint::Endpoint;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable single-line output.
    Compact,
}

/// Forward between sockets.
#[derive(Debug, Clone, Parser)]
#[command(name = "sockfwd")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Source endpoint to listen on (tcp://host:port or unix:/path).
    #[arg(short, long, env = "SOCKFWD_SOURCE")]
    pub source: Endpoint,

    /// Destination endpoint to forward to (tcp://host:port or unix:/path).
    #[arg(short, long, env = "SOCKFWD_DESTINATION")]
    pub destination: Endpoint,

    /// Quiet mode: no per-connection log lines.
    #[arg(short, long, env = "SOCKFWD_QUIET")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "SOCKFWD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "SOCKFWD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Transport;
    use clap::error::ErrorKind;

    #[test]
    fn test_short_flags() {
        let config = Config::try_parse_from([
            "sockfwd",
            "-s",
            "tcp://0.0.0.0:9000",
            "-d",
            "unix:/tmp/d.sock",
            "-q",
        ])
        .unwrap();

        assert_eq!(config.source.transport(), Transport::Tcp);
        assert_eq!(config.source.address(), "0.0.0.0:9000");
        assert_eq!(config.destination.transport(), Transport::Unix);
        assert_eq!(config.destination.address(), "/tmp/d.sock");
        assert!(config.quiet);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_long_flags() {
        let config = Config::try_parse_from([
            "sockfwd",
            "--source",
            "unix:///run/in.sock",
            "--destination",
            "tcp://127.0.0.1:80",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert!(!config.quiet);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_destination() {
        let err = Config::try_parse_from(["sockfwd", "-s", "tcp://0.0.0.0:9000"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_malformed_endpoint() {
        let err = Config::try_parse_from([
            "sockfwd",
            "-s",
            "0.0.0.0:9000",
            "-d",
            "tcp://127.0.0.1:80",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
