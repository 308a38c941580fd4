//! CLI argument parsing with clap

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// VFX Ingest - classify a delivery and publish it into the show tree
///
/// Groups delivered files into frame sequences, sorts them into the
/// categories of a rule catalog and derives every destination path.
#[derive(Parser, Debug)]
#[command(name = "vfx-ingest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the rule catalog (TOML format)
    ///
    /// A bare name is also looked up in the `Config` directory next to
    /// the executable.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Delivery directory to scan
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Show (project) code; stored uppercased
    #[arg(long, env = "VFX_INGEST_SHOW", default_value = "")]
    pub show: String,

    /// Storage server name used in destination paths
    #[arg(long, env = "VFX_INGEST_SERVER", default_value = "")]
    pub server: String,

    /// JSON array of already published paths, used to resolve versions
    #[arg(short, long)]
    pub published: Option<PathBuf>,

    /// Copy approved rows to their destinations and emit publish requests
    #[arg(long)]
    pub publish: bool,

    /// Manifest file receiving one JSON line per publish request
    #[arg(short, long, default_value = "publish_manifest.jsonl")]
    pub manifest: PathBuf,

    /// Machines allowed to run transfer jobs
    #[arg(long, default_value = "")]
    pub allowlist: String,

    /// Mirror published paths under this root on the transfer target
    #[arg(long)]
    pub transfer_to: Option<PathBuf>,

    /// Submitting user recorded on transfer jobs
    #[arg(long, env = "USER", default_value = "")]
    pub user: String,

    /// Submitting machine recorded on transfer jobs
    ///
    /// Defaults to the host name of this machine.
    #[arg(long, default_value = "")]
    pub machine: String,

    /// Print a sample rule catalog and exit
    #[arg(long)]
    pub sample_config: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output log format as JSON
    #[arg(long)]
    pub json_log: bool,
}

impl Cli {
    /// Uppercased show code, if one was given
    pub fn show_name(&self) -> Option<String> {
        let show = self.show.trim();
        (!show.is_empty()).then(|| show.to_uppercase())
    }

    /// Name used to group log files: `<SHOW>_<server>` or just `<SHOW>`
    pub fn log_name(&self) -> Option<String> {
        self.show_name().map(|show| {
            let server = self.server.trim();
            if server.is_empty() {
                show
            } else {
                format!("{}_{}", show, server)
            }
        })
    }

    /// Submitting machine: `--machine` when given, else the local host name
    pub fn machine_name(&self) -> String {
        let machine = self.machine.trim();
        if machine.is_empty() {
            host_name()
        } else {
            machine.to_string()
        }
    }
}

/// Host name of this machine, or an empty string when none can be found
///
/// Shells rarely export `HOSTNAME`, so the environment is only the first
/// source; `/etc/hostname` and the `hostname` command follow.
pub fn host_name() -> String {
    let from_env = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok());
    let from_file = fs::read_to_string("/etc/hostname").ok();
    let from_command = || {
        Command::new("hostname")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
    };

    from_env
        .chain(from_file)
        .chain(std::iter::once_with(from_command).flatten())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish_run() {
        let cli = Cli::try_parse_from([
            "vfx-ingest",
            "--config",
            "rules.toml",
            "--source",
            "/delivery/0412",
            "--show",
            "demo",
            "--server",
            "srv01",
            "--publish",
            "--transfer-to",
            "/remote",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("rules.toml")));
        assert_eq!(cli.source, Some(PathBuf::from("/delivery/0412")));
        assert!(cli.publish);
        assert_eq!(cli.transfer_to, Some(PathBuf::from("/remote")));
        assert_eq!(cli.manifest, PathBuf::from("publish_manifest.jsonl"));
        assert_eq!(cli.show_name().as_deref(), Some("DEMO"));
        assert_eq!(cli.log_name().as_deref(), Some("DEMO_srv01"));
    }

    #[test]
    fn test_log_name_without_server() {
        let cli = Cli::try_parse_from(["vfx-ingest", "--show", "demo", "--server", ""]).unwrap();
        assert_eq!(cli.log_name().as_deref(), Some("DEMO"));

        let cli = Cli::try_parse_from(["vfx-ingest", "--show", " "]).unwrap();
        assert_eq!(cli.log_name(), None);
    }

    #[test]
    fn test_machine_name() {
        let cli = Cli::try_parse_from(["vfx-ingest", "--machine", " ws042 "]).unwrap();
        assert_eq!(cli.machine_name(), "ws042");

        let cli = Cli::try_parse_from(["vfx-ingest"]).unwrap();
        assert_eq!(cli.machine, "");
        assert_eq!(cli.machine_name(), host_name());
    }
}
