use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use mtrace::config::{MultiTraceConfig, Settings, positive_secs};

/// UDP traceroute over several port pairs at once, reporting where paths diverge or fail
#[derive(Parser, Debug, Clone)]
#[command(name = "mtrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Destination IPv4 address
    #[arg(short = 'd', long = "dest")]
    pub dest: Ipv4Addr,

    /// Local (source) ports, comma separated; paired by position with --dports
    #[arg(
        long = "sports",
        value_delimiter = ',',
        default_value = "60151,60151,60151,60151,60151"
    )]
    pub sports: Vec<u16>,

    /// Remote (destination) ports, comma separated
    #[arg(
        long = "dports",
        value_delimiter = ',',
        default_value = "60581,60582,60583,60584,60585"
    )]
    pub dports: Vec<u16>,

    /// Local IPv4 address to send from (default: resolved from the hostname)
    #[arg(long = "src")]
    pub src: Option<Ipv4Addr>,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-ttl")]
    pub max_ttl: Option<u8>,

    /// Per-hop reply timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<f64>,

    /// IPv4 type-of-service byte
    #[arg(long = "tos")]
    pub tos: Option<u8>,

    /// Overall deadline of each path's trace in seconds
    #[arg(long = "deadline")]
    pub deadline: Option<f64>,

    /// Output JSON (paths and summary)
    #[arg(long = "json", conflicts_with = "csv")]
    pub json: bool,

    /// Output CSV, one row per hop
    #[arg(long = "csv")]
    pub csv: bool,

    /// Print only the success/failure summary (with --json: the summary object alone)
    #[arg(long = "summary-only")]
    pub summary_only: bool,

    /// Settings file (default: ~/.config/mtrace/config.toml)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        if self.sports.is_empty() || self.dports.is_empty() {
            return Err("Port lists must not be empty".into());
        }

        if self.sports.len() != self.dports.len() {
            return Err(format!(
                "--sports has {} entries but --dports has {}; they are paired by position",
                self.sports.len(),
                self.dports.len()
            ));
        }

        if self.max_ttl == Some(0) {
            return Err("Max TTL must be at least 1".into());
        }

        if let Some(timeout) = self.timeout
            && positive_secs(timeout).is_none()
        {
            return Err("Timeout must be a positive number of seconds".into());
        }

        if let Some(deadline) = self.deadline
            && positive_secs(deadline).is_none()
        {
            return Err("Deadline must be a positive number of seconds".into());
        }

        Ok(())
    }

    /// Defaults, then the settings file, then command-line flags
    pub fn trace_config(&self, settings: &Settings) -> MultiTraceConfig {
        let mut config = settings.apply(MultiTraceConfig::default());
        if let Some(max_ttl) = self.max_ttl {
            config.trace.max_ttl = max_ttl;
        }
        if let Some(tos) = self.tos {
            config.trace.tos = tos;
        }
        if let Some(timeout) = self.timeout.and_then(positive_secs) {
            config.trace.timeout = timeout;
        }
        if let Some(deadline) = self.deadline.and_then(positive_secs) {
            config.deadline = deadline;
        }
        config
    }

    /// Log filter derived from -v when RUST_LOG is not set
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mtrace").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-d", "93.184.216.34"]);
        assert_eq!(args.dest, Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(args.sports, vec![60151; 5]);
        assert_eq!(args.dports, vec![60581, 60582, 60583, 60584, 60585]);
        assert!(args.validate().is_ok());
        assert_eq!(args.log_level(), "warn");
    }

    #[test]
    fn test_destination_required() {
        assert!(Args::try_parse_from(["mtrace"]).is_err());
        assert!(Args::try_parse_from(["mtrace", "-d", "example.com"]).is_err());
    }

    #[test]
    fn test_unequal_ports_rejected() {
        let args = parse(&["-d", "1.1.1.1", "--sports", "1,2", "--dports", "3"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(parse(&["-d", "1.1.1.1", "-m", "0"]).validate().is_err());
        assert!(parse(&["-d", "1.1.1.1", "--timeout", "0"]).validate().is_err());
        assert!(parse(&["-d", "1.1.1.1", "--deadline", "-2"]).validate().is_err());
    }

    #[test]
    fn test_out_of_range_seconds_rejected() {
        let args = parse(&["-d", "1.1.1.1", "--timeout", "1e20"]);
        assert!(args.validate().is_err());
        // Never panics, even unvalidated
        let config = args.trace_config(&Settings::default());
        assert_eq!(config.trace.timeout, MultiTraceConfig::default().trace.timeout);

        assert!(parse(&["-d", "1.1.1.1", "--deadline", "1e300"]).validate().is_err());
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            max_ttl: Some(20),
            tos: Some(32),
            timeout: Some(1.0),
            deadline: None,
        };
        let args = parse(&["-d", "1.1.1.1", "-m", "12", "--deadline", "4.5", "-vv"]);
        let config = args.trace_config(&settings);

        assert_eq!(config.trace.max_ttl, 12);
        assert_eq!(config.trace.tos, 32);
        assert_eq!(config.trace.timeout, Duration::from_secs(1));
        assert_eq!(config.deadline, Duration::from_millis(4500));
        assert_eq!(args.log_level(), "debug");
    }

    #[test]
    fn test_json_and_csv_conflict() {
        assert!(Args::try_parse_from(["mtrace", "-d", "1.1.1.1", "--json", "--csv"]).is_err());
    }
}
