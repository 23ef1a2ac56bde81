use anyhow::{bail, Context};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing::{debug, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::path::PathBuf;

use apt_batch::commands::{self, ApplyRequest};
use apt_batch::{PackageMetadataService, QueueNode, Session, Settings};

/// Browse, search, queue and apply Debian package operations behind a single privilege prompt.
#[derive(Parser)]
#[clap(author, version = clap::crate_version!(), max_term_width = 100, about)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Increase logging level (-v: info, -vv: debug, -vvv: trace)
    #[clap(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML config file
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search package names and print one-line previews
    Search {
        term: String,
        /// Print JSON instead of a table
        #[clap(long)]
        json: bool,
    },
    /// Show the full records of a package
    Show {
        name: String,
        /// Print JSON instead of a table
        #[clap(long)]
        json: bool,
    },
    /// Print whether packages are installed
    Status {
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// Count or list pending upgrades
    Updates {
        /// List each pending upgrade with its versions
        #[clap(short, long)]
        list: bool,
    },
    /// Queue operations and apply them as one privileged batch
    Apply {
        /// Packages to install
        #[clap(long, num_args = 1..)]
        install: Vec<String>,
        /// Packages to uninstall
        #[clap(long, num_args = 1..)]
        remove: Vec<String>,
        /// Packages to upgrade, optionally as `name=version`
        #[clap(long, num_args = 1..)]
        upgrade: Vec<String>,
        /// Queue every pending upgrade
        #[clap(long)]
        upgrade_all: bool,
        /// Do not ask for confirmation
        #[clap(short = 'y', long)]
        yes: bool,
        /// Print the batch script without running it
        #[clap(long)]
        dry_run: bool,
    },
    /// Print the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn upgrade_node(arg: &str) -> QueueNode {
    match arg.split_once('=') {
        Some((name, version)) => QueueNode::upgrade(name, Some(version.to_string())),
        None => QueueNode::upgrade(arg, None),
    }
}

fn init_tracing(verbose: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            Cli::command().print_help()?;
            return Ok(());
        }
    };

    if let Commands::Completions { shell } = &command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "apt-batch", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(cli.verbose)?;
    debug!("Argument parsing complete.");

    let settings = Settings::load(cli.config.as_deref())?;
    info!(
        "Using {} with elevation {}",
        settings.tool, settings.elevation
    );

    match command {
        Commands::Search { term, json } => {
            let metadata = PackageMetadataService::from_settings(&settings);
            commands::search_command(&metadata, &term, json).await?;
        }
        Commands::Show { name, json } => {
            let metadata = PackageMetadataService::from_settings(&settings);
            commands::show_command(&metadata, &name, json).await?;
        }
        Commands::Status { names } => {
            let metadata = PackageMetadataService::from_settings(&settings);
            commands::status_command(&metadata, &names).await?;
        }
        Commands::Updates { list } => {
            let metadata = PackageMetadataService::from_settings(&settings);
            commands::updates_command(&metadata, list).await?;
        }
        Commands::Apply {
            install,
            remove,
            upgrade,
            upgrade_all,
            yes,
            dry_run,
        } => {
            let mut nodes: Vec<QueueNode> = install.into_iter().map(QueueNode::install).collect();
            nodes.extend(remove.into_iter().map(QueueNode::uninstall));
            nodes.extend(upgrade.iter().map(|arg| upgrade_node(arg)));
            if nodes.is_empty() && !upgrade_all {
                bail!("No operations specified. Usage: apt-batch apply --install <pkg> [--remove <pkg>] [--upgrade <pkg>[=version]]");
            }

            let session = Session::from_settings(settings);
            let request = ApplyRequest {
                nodes,
                upgrade_all,
                assume_yes: yes,
                dry_run,
            };
            if let Some(report) = commands::apply_command(&session, request).await? {
                report
                    .ensure_clean()
                    .context("batch finished with errors")?;
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Completions { .. } => {
            unreachable!("Completions should be handled before this point");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
