//! Command-line interface handling for the replay driver.
//!
//! Parsing is done with the `clap` builder API. Every option overrides the
//! matching setting of the configuration file.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// JSON lines input; stdin when neither this nor the config names one
    pub input: Option<PathBuf>,
    /// JSON lines output; stdout when neither this nor the config names one
    pub output: Option<PathBuf>,
    /// Static data loaded by every partition before processing
    pub static_data: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        Self::parse_from(std::env::args_os())
    }

    pub fn parse_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Self::command().get_matches_from(args);

        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("geostream.toml")),
            input: matches.get_one::<String>("input").map(PathBuf::from),
            output: matches.get_one::<String>("output").map(PathBuf::from),
            static_data: matches.get_one::<String>("static-data").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    fn command() -> Command {
        Command::new("GeoStream")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Partitioned continuous spatio-textual query engine")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("geostream.toml"),
            )
            .arg(
                Arg::new("input")
                    .short('i')
                    .long("input")
                    .value_name("FILE")
                    .help("JSON lines of data objects and queries (default: stdin)"),
            )
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .value_name("FILE")
                    .help("Where output events are written as JSON lines (default: stdout)"),
            )
            .arg(
                Arg::new("static-data")
                    .short('s')
                    .long("static-data")
                    .value_name("FILE")
                    .help("JSON lines of static objects loaded before processing"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_arguments() {
        let args = CliArgs::parse_from(["geostream"]);
        assert_eq!(args.config_path, PathBuf::from("geostream.toml"));
        assert!(args.input.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn every_option_is_parsed() {
        let args = CliArgs::parse_from([
            "geostream",
            "--config",
            "prod.toml",
            "--input",
            "events.jsonl",
            "-o",
            "out.jsonl",
            "--static-data",
            "pois.jsonl",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));
        assert_eq!(args.input, Some(PathBuf::from("events.jsonl")));
        assert_eq!(args.output, Some(PathBuf::from("out.jsonl")));
        assert_eq!(args.static_data, Some(PathBuf::from("pois.jsonl")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }
}
