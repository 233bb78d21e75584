//! Command-line arguments of the server binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Settings, DEFAULT_CONFIG_PATH};

/// ccd_daq: line-protocol server for a cooled CCD camera
#[derive(Parser, Debug)]
#[command(name = "ccd_daq")]
#[command(about = "Serve CCD exposure and cooler control over TCP", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Bind address (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Command port (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level (overrides application.log_level)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Apply command-line overrides on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.application.log_level.clone_from(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["ccd_daq"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/ccd_daq.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "ccd_daq",
            "--host",
            "127.0.0.1",
            "--port",
            "6000",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6000);
        assert_eq!(settings.application.log_level, "debug");
    }

    #[test]
    fn test_bad_port_rejected() {
        assert!(Cli::try_parse_from(["ccd_daq", "--port", "99999"]).is_err());
    }
}
