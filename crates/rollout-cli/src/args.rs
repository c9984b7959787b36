use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use rollout_core::parse_version;
use semver::Version;

#[derive(Parser, Debug)]
#[command(name = "rollout")]
#[command(about = "Installer and auto-updater for desktop application trees", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the application to a target directory.
    Install(InstallArgs),
    /// Update the target application from a source.
    Update(UpdateArgs),
    /// Generate a manifest for the application directory.
    Generate(GenerateArgs),
}

#[derive(Args, Debug)]
struct InstallArgs {
    /// Source directory containing the application files.
    #[arg(short = 's', long = "source", value_name = "path/to/source")]
    source: Option<PathBuf>,

    /// Target directory where the application will be installed.
    #[arg(short = 't', long = "target", value_name = "path/to/target")]
    target: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    /// Source location (local path, network share, or URL).
    #[arg(short = 's', long = "source", value_name = "path/or/url")]
    source: String,

    /// Target directory to update. Defaults to the updater's own directory.
    #[arg(short = 't', long = "target", value_name = "path/to/target")]
    target: Option<PathBuf>,

    /// Force the update (user cannot skip).
    #[arg(long)]
    force: bool,

    /// Continue a self-update in progress (internal use).
    #[arg(long = "continue-update")]
    continue_update: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Relative path to the application executable.
    #[arg(long = "app_exe", value_name = "path/to/exe")]
    app_exe: String,

    /// Minimum version required for this update (forces update if the
    /// target is older).
    #[arg(long = "min_version", value_name = "d.d.d")]
    min_version: Option<String>,

    /// Directory to generate the manifest for.
    #[arg(value_name = "directory")]
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    Dir(PathBuf),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateConfig {
    pub directory: PathBuf,
    pub app_exe: String,
    pub min_version: Option<Version>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub source: UpdateSource,
    pub target_dir: PathBuf,
    pub force: bool,
    pub continue_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppConfig {
    Generate(GenerateConfig),
    Install(InstallConfig),
    Update(UpdateConfig),
}

pub fn is_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn exe_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context("cannot resolve the updater's own location")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("updater executable has no parent directory"))
}

/// Parse the command line into an application config, applying the
/// defaulting rules and the legacy `-u`/`--update` flag rewrite.
pub fn parse_cli<I>(raw_args: I) -> Result<AppConfig>
where
    I: IntoIterator<Item = OsString>,
{
    let mut raw_args: Vec<OsString> = raw_args.into_iter().collect();

    // Bare invocation: install, with the updater's directory as source.
    if raw_args.len() < 2 {
        return Ok(AppConfig::Install(InstallConfig {
            source_dir: Some(exe_dir()?),
            target_dir: None,
        }));
    }

    // Legacy compat: the old application launches its updater with
    // "-u -s <path>" instead of the update subcommand.
    if raw_args[1] == "-u" || raw_args[1] == "--update" {
        eprintln!(
            "warning: legacy flag {} detected, treating as 'update' subcommand",
            raw_args[1].to_string_lossy()
        );
        raw_args[1] = OsString::from("update");
    }

    let cli = match Cli::try_parse_from(&raw_args) {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            std::process::exit(0);
        }
        Err(err) => return Err(anyhow!("{err}")),
    };

    match cli.command {
        None => Ok(AppConfig::Install(InstallConfig {
            source_dir: Some(exe_dir()?),
            target_dir: None,
        })),
        Some(Commands::Install(install)) => {
            if let Some(source) = &install.source {
                if !source.is_dir() {
                    bail!(
                        "Source directory does not exist or is not accessible: {}",
                        source.display()
                    );
                }
            }
            Ok(AppConfig::Install(InstallConfig {
                source_dir: install.source,
                target_dir: install.target,
            }))
        }
        Some(Commands::Update(update)) => {
            let source = if is_url(&update.source) {
                UpdateSource::Url(update.source)
            } else {
                let dir = PathBuf::from(&update.source);
                if !dir.is_dir() {
                    bail!(
                        "Source directory does not exist or is not accessible: {}",
                        update.source
                    );
                }
                UpdateSource::Dir(dir)
            };

            let target_dir = match update.target {
                Some(target) => {
                    if !target.is_dir() {
                        bail!(
                            "Target directory does not exist or is not accessible: {}",
                            target.display()
                        );
                    }
                    target
                }
                None => exe_dir()?,
            };

            Ok(AppConfig::Update(UpdateConfig {
                source,
                target_dir,
                force: update.force,
                continue_update: update.continue_update,
            }))
        }
        Some(Commands::Generate(generate)) => {
            let directory = generate
                .directory
                .unwrap_or_else(|| PathBuf::from("."));
            if !directory.is_dir() {
                bail!("Directory does not exist: {}", directory.display());
            }

            let min_version = match &generate.min_version {
                Some(raw) => Some(
                    parse_version(raw)
                        .ok_or_else(|| anyhow!("Invalid --min_version value: {raw}"))?,
                ),
                None => None,
            };

            Ok(AppConfig::Generate(GenerateConfig {
                directory,
                app_exe: generate.app_exe,
                min_version,
            }))
        }
    }
}
