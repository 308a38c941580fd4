//! VFX Ingest - classify a delivery and publish it into the show tree
//!
//! Scans a delivery folder, prints the records derived for every category,
//! and optionally copies the approved rows to their destinations.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{Level, debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vfx_ingest::ingest::PREVIEW_COLUMN;
use vfx_ingest::{
    Cli, IngestSession, ManifestSink, PublishStatus, Publisher, ResolutionProber, RuleCatalog,
};

/// Colored terminal output for the CLI summary
mod cli_output {
    use crossterm::{
        QueueableCommand,
        style::{Color, Print, StyledContent, Stylize, style},
    };
    use std::io::{Write, stdout};

    pub struct CliTheme;

    impl CliTheme {
        pub const SUCCESS: Color = Color::Green;
        pub const WARNING: Color = Color::Yellow;
        pub const ERROR: Color = Color::Red;
        pub const HINT: Color = Color::DarkGrey;
        pub const ACCENT: Color = Color::Cyan;
    }

    const WIDTH: usize = 60;

    /// Write styled pieces followed by a newline
    fn line(parts: &[StyledContent<&str>]) {
        let mut out = stdout().lock();
        for part in parts {
            let _ = out.queue(Print(part));
        }
        let _ = out.queue(Print("\n"));
        let _ = out.flush();
    }

    /// Title framed by separators
    pub fn print_heading(title: &str) {
        let rule = "─".repeat(WIDTH);
        let pad = " ".repeat(WIDTH.saturating_sub(title.chars().count() + 4) / 2);
        line(&[style(rule.as_str())]);
        line(&[style(pad.as_str()), format!("╔ {} ╗", title).as_str().bold()]);
        line(&[style(rule.as_str())]);
    }

    pub fn print_separator() {
        line(&[style("─".repeat(WIDTH).as_str())]);
    }

    /// Message behind a colored mark such as `⚠` or `✗`
    pub fn print_marked(mark: &str, color: Color, msg: &str) {
        line(&[style(mark).with(color).bold(), style(" "), style(msg)]);
    }

    /// Indented `key: value`; colored values are also bold
    pub fn print_field(key: &str, value: &str, color: Option<Color>) {
        let value = match color {
            Some(color) => style(value).with(color).bold(),
            None => style(value),
        };
        line(&[style("  "), style(key).with(CliTheme::HINT), style(": "), value]);
    }

    /// One table row: status icon, source name, destination
    pub fn print_row(icon: &str, color: Color, source: &str, dest: &str) {
        line(&[
            style("  "),
            style(icon).with(color).bold(),
            style(" "),
            style(source).italic(),
            style(" → "),
            style(dest).with(CliTheme::HINT),
        ]);
    }

    pub fn print_blank() {
        line(&[]);
    }
}

/// Parse arguments, set up logging and run the ingest
fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.sample_config {
        print!("{}", RuleCatalog::sample_config());
        return Ok(());
    }

    let exe_dir = executable_dir();
    let log_path = log_path(&exe_dir, &cli);
    let _guard = setup_logging(&cli, &log_path)?;

    info!(version = env!("CARGO_PKG_VERSION"), "VFX Ingest starting");
    info!(log_file = %log_path.display(), "Log file location");

    if let Err(e) = run(&cli, &exe_dir, &log_path) {
        error!(error = %e, "Ingest failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Scan the delivery, print every table and publish when asked
fn run(cli: &Cli, exe_dir: &Path, log_path: &Path) -> Result<()> {
    use cli_output::*;

    let catalog = load_catalog(cli, exe_dir)?;
    let source = cli
        .source
        .as_deref()
        .context("No delivery directory given, use --source <DIR>")?;

    let prober = ResolutionProber::from_catalog(&catalog);
    let mut session = IngestSession::new(&catalog, &prober, cli.server.as_str(), cli.show.as_str());

    let stats = session.scan(source, |stats| {
        debug!(directories = stats.directories, records = stats.records, "Scan progress");
    })?;

    print_heading("Ingest Results");
    print_blank();
    for (key, value, color) in [
        ("Directories", stats.directories, CliTheme::ACCENT),
        ("Sequences", stats.sequences, CliTheme::ACCENT),
        ("Records", stats.records, CliTheme::SUCCESS),
        ("Skipped", stats.skipped, CliTheme::WARNING),
        ("Failed", stats.failed, CliTheme::ERROR),
    ] {
        print_field(key, &value.to_string(), Some(color));
    }
    print_blank();

    let report = session.validate_rows();
    if !report.is_empty() {
        print_separator();
        print_marked("⚠", CliTheme::WARNING, "Rows with missing data:");
        print!("{}", report);
        print_blank();
    }

    if let Some(ref published_path) = cli.published {
        let published = load_published(published_path)?;
        let versioned = session.resolve_versions(&published);
        info!(rows = versioned, "Versions resolved");
        print_field("Versioned rows", &versioned.to_string(), Some(CliTheme::SUCCESS));
    }

    for table in session.results().tables() {
        if table.is_empty() {
            continue;
        }
        print_separator();
        print_marked("→", CliTheme::HINT, &format!("{} ({})", table.name(), table.len()));
        print_blank();
        for row in table.rows() {
            let preview = row.fields.text(PREVIEW_COLUMN);
            let (icon, color) = if row.enabled {
                ("✓", CliTheme::SUCCESS)
            } else {
                ("○", CliTheme::HINT)
            };
            print_row(icon, color, &row.source.display_name(), &preview);

            if cli.verbose {
                for (column, value) in row.fields.iter() {
                    print_field(&format!("    {}", column), &value.to_string(), None);
                }
            }
        }
    }

    if cli.publish {
        publish(cli, &session)?;
    } else {
        print_separator();
        print_marked(
            "⚠",
            CliTheme::WARNING,
            "Dry run: nothing was copied, use --publish to publish approved rows",
        );
    }

    print_separator();
    print_field("Log file", &log_path.display().to_string(), Some(CliTheme::ACCENT));
    info!(log_file = %log_path.display(), "Ingest complete. Log saved to");

    Ok(())
}

/// Copy approved rows and append their requests to the manifest
fn publish(cli: &Cli, session: &IngestSession<'_>) -> Result<()> {
    use cli_output::*;

    let mut sink = ManifestSink::open(&cli.manifest)
        .with_context(|| format!("Failed to open manifest {}", cli.manifest.display()))?;

    let mut publisher = Publisher::new(cli.show.as_str(), cli.server.as_str(), cli.allowlist.as_str())
        .with_submitter(cli.user.as_str(), cli.machine_name());
    if let Some(ref root) = cli.transfer_to {
        publisher = publisher.with_transfer_root(root);
    }

    let report = publisher.publish(session.results(), &mut sink);
    report.log_summary();

    let published = report.published().count();
    let unpublished: Vec<_> = report.unpublished().collect();

    print_heading("Publish Complete");
    print_blank();
    print_field("Published", &published.to_string(), Some(CliTheme::SUCCESS));
    print_field("Unpublished", &unpublished.len().to_string(), Some(CliTheme::ERROR));
    print_field("Manifest", &sink.path().display().to_string(), None);
    print_blank();

    if !unpublished.is_empty() {
        print_separator();
        print_marked("✗", CliTheme::ERROR, &format!("Unpublished rows: {}", unpublished.len()));
        print_blank();
        for outcome in unpublished {
            let reason = match (outcome.status, outcome.error.as_deref()) {
                (_, Some(e)) => e.to_string(),
                (PublishStatus::Incomplete, None) => "row has empty or None cells".to_string(),
                _ => "unknown error".to_string(),
            };
            print_field(
                &format!("{} row {}: {}", outcome.category, outcome.row, outcome.source),
                &reason,
                Some(CliTheme::ERROR),
            );
        }
    }

    Ok(())
}

/// Directory holding the executable; `Log/` and `Config/` live next to it
fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Log file path, grouped per show when one is given
fn log_path(exe_dir: &Path, cli: &Cli) -> PathBuf {
    let log_dir = exe_dir.join("Log");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    match (cli.show_name(), cli.log_name()) {
        (Some(show), Some(name)) => log_dir.join(show).join(format!("{}_{}.log", name, timestamp)),
        _ => log_dir.join(format!("Ingest_{}.log", timestamp)),
    }
}

/// Find the catalog file for `--config`
///
/// Tries the path as given, then with a `.toml` extension, then the same
/// file name under `<exe_dir>/Config`. Falls back to the path as given so
/// the load error names it.
fn resolve_config_path(exe_dir: &Path, config_path: &Path) -> PathBuf {
    let with_toml = |path: PathBuf| {
        if path.extension().is_none() {
            path.with_extension("toml")
        } else {
            path
        }
    };
    let file_name = config_path.file_name().unwrap_or(config_path.as_os_str());

    [
        config_path.to_path_buf(),
        with_toml(config_path.to_path_buf()),
        with_toml(exe_dir.join("Config").join(file_name)),
    ]
    .into_iter()
    .find(|candidate| candidate.exists())
    .unwrap_or_else(|| config_path.to_path_buf())
}

/// Load the rule catalog named by `--config`
fn load_catalog(cli: &Cli, exe_dir: &Path) -> Result<RuleCatalog> {
    let Some(ref config_path) = cli.config else {
        anyhow::bail!("No rule catalog given, use --config <FILE> (see --sample-config)");
    };

    let resolved_path = resolve_config_path(exe_dir, config_path);
    info!(config_file = %resolved_path.display(), "Loading rule catalog");
    let catalog = RuleCatalog::load_from_file(&resolved_path)?;

    if cli.verbose {
        let names: Vec<&str> = catalog.rules().iter().map(|r| r.name.as_str()).collect();
        info!(categories = ?names, departments = ?catalog.departments(), "Rule catalog loaded");
    }

    Ok(catalog)
}

/// Previously published paths from a JSON array of strings
fn load_published(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read published paths {}", path.display()))?;
    let published: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Published paths file {} is not a JSON array of strings", path.display()))?;
    Ok(published)
}

/// Log to the file (plain text or JSON) and to stderr
///
/// The returned guard flushes the file writer when dropped.
fn setup_logging(cli: &Cli, log_path: &Path) -> Result<WorkerGuard> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::File::create(log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
    let file_layer = if cli.json_log {
        file_layer.json().boxed()
    } else {
        file_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_resolve_config_path_shorthand() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join("Config");
        fs::create_dir(&config_dir).unwrap();
        File::create(config_dir.join("show.toml")).unwrap();

        assert_eq!(
            resolve_config_path(temp_dir.path(), Path::new("show")),
            config_dir.join("show.toml")
        );

        let local = temp_dir.path().join("local.toml");
        File::create(&local).unwrap();
        assert_eq!(resolve_config_path(temp_dir.path(), &temp_dir.path().join("local")), local);

        let missing = Path::new("missing.toml");
        assert_eq!(resolve_config_path(temp_dir.path(), missing), missing);
    }
}
