mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::enter::DriftChoice;
use commands::init::InitArgs;
use igloo_core::{install_signal_handler, CancelToken, Engine, HostContext, ReadinessOptions};
use igloo_runtime::{check_incus_prereqs, format_missing, select_backend};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "igloo",
    version,
    about = "Manage incus-based development environments"
)]
struct Cli {
    /// Directory holding fingerprint records and locks.
    #[arg(long, env = "IGLOO_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Container backend (incus, mock).
    #[arg(long, env = "IGLOO_BACKEND", default_value = "incus", global = true)]
    backend: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Seconds to wait for the guest to finish first-boot configuration.
    #[arg(long, default_value_t = 300, global = true)]
    ready_timeout: u64,

    /// Seconds between readiness probes.
    #[arg(long, default_value_t = 2, global = true)]
    ready_interval: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create .igloo/ in the current directory and provision the container.
    Init {
        /// Linux distribution (ubuntu, debian, fedora, archlinux).
        #[arg(short, long)]
        distro: Option<String>,
        /// Distribution release (e.g. questing, trixie, 43, current).
        #[arg(short, long)]
        release: Option<String>,
        /// Container name (default: igloo-<dirname>).
        #[arg(short, long)]
        name: Option<String>,
        /// Comma-separated list of packages to install.
        #[arg(short, long)]
        packages: Option<String>,
    },
    /// Reconcile the environment and open a shell inside it.
    Enter {
        /// Rebuild without asking when the configuration changed.
        #[arg(long, default_value_t = false, conflicts_with = "no_rebuild")]
        rebuild: bool,
        /// Keep the container without asking when the configuration changed.
        #[arg(long, default_value_t = false)]
        no_rebuild: bool,
    },
    /// Stop the running container.
    Stop,
    /// Delete the container but keep .igloo/.
    Remove {
        /// Remove even if the container is running.
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Delete the container and .igloo/.
    Destroy {
        /// Destroy even if the container is running.
        #[arg(short, long, default_value_t = false)]
        force: bool,
        /// Keep the .igloo configuration directory.
        #[arg(long, default_value_t = false)]
        keep_config: bool,
    },
    /// Show the state of this project's environment.
    Status,
    /// Run diagnostic checks on the system and data directory.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("IGLOO_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(igloo_store::default_data_dir);
    let json = cli.json;

    let result = match &cli.command {
        Commands::Init {
            distro,
            release,
            name,
            packages,
        } => with_engine(&cli, &data_dir, |engine| {
            commands::init::run(
                engine,
                &InitArgs {
                    distro: distro.as_deref(),
                    release: release.as_deref(),
                    name: name.as_deref(),
                    packages: packages.as_deref(),
                },
                json,
            )
        }),
        Commands::Enter {
            rebuild,
            no_rebuild,
        } => with_engine(&cli, &data_dir, |engine| {
            commands::enter::run(engine, DriftChoice::from_flags(*rebuild, *no_rebuild))
        }),
        Commands::Stop => with_engine(&cli, &data_dir, |engine| {
            commands::stop::run(engine, json)
        }),
        Commands::Remove { force } => with_engine(&cli, &data_dir, |engine| {
            commands::remove::run(engine, *force, json)
        }),
        Commands::Destroy { force, keep_config } => with_engine(&cli, &data_dir, |engine| {
            commands::destroy::run(engine, *force, *keep_config, json)
        }),
        Commands::Status => with_engine(&cli, &data_dir, |engine| {
            commands::status::run(engine, json)
        }),
        Commands::Doctor => commands::doctor::run(&data_dir, &cli.backend, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(commands::exit_code_for(&msg))
        }
    }
}

/// Check prerequisites, build the backend and the engine, then run `f`.
fn with_engine<F>(cli: &Cli, data_dir: &std::path::Path, f: F) -> Result<u8, String>
where
    F: FnOnce(&Engine<'_>) -> Result<u8, String>,
{
    if cli.backend == "incus" && std::env::var("IGLOO_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = check_incus_prereqs();
        if !missing.is_empty() {
            return Err(format_missing(&missing));
        }
    }
    let backend = select_backend(&cli.backend).map_err(|e| format!("configuration error: {e}"))?;
    let readiness = ReadinessOptions::new(
        Duration::from_secs(cli.ready_interval),
        Duration::from_secs(cli.ready_timeout),
    )
    .map_err(|e| format!("configuration error: {e}"))?;

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);

    let engine = Engine::new(backend.as_ref(), data_dir, HostContext::detect())
        .with_readiness(readiness)
        .with_cancel_token(cancel);
    f(&engine)
}
