//! copytask - concurrent file copying with pause, resume and cancel
//!
//! A thin front-end over `copytask-engine`: it submits one copy request,
//! renders the task's snapshots and maps Ctrl-C to a cancel request.

mod display;
mod json_output;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use copytask_config::{Config, ConfigLoader, LoggingConfig};
use copytask_device::{BufferAdvisor, SystemSpaceProbe};
use copytask_engine::{
    device_resolver, ControlAction, CopyRequest, ErrorKind, OverwritePolicy, TaskManager,
    TaskSnapshot, TaskState, VerifyMode,
};
use copytask_types::{BufferSize, DeviceClass, DeviceResolver, SpaceProbe};
use display::{display_advice, display_task_summary, format_bytes};
use json_output::CopyResultJson;
use progress::ProgressView;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

/// copytask - concurrent file copying with pause, resume and cancel
#[derive(Parser)]
#[command(
    name = "copytask",
    version = env!("CARGO_PKG_VERSION"),
    about = "Concurrent file copying with progress, retries and cancellation"
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files and directories into a destination directory
    Copy {
        /// Source files or directories, followed by the destination directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
        /// Number of tasks copied concurrently
        #[arg(short, long)]
        workers: Option<usize>,
        /// Behaviour when a destination file exists
        #[arg(long, value_enum)]
        overwrite: Option<OverwriteArg>,
        /// Compare sizes after copying
        #[arg(long)]
        verify: bool,
        /// Compare content hashes after copying
        #[arg(long)]
        checksum: bool,
        /// Do not copy modification and access times
        #[arg(long)]
        no_preserve_timestamps: bool,
        /// Retries per file for transient errors
        #[arg(long)]
        retries: Option<u32>,
        /// Fixed buffer size in bytes (power of two)
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Follow symbolic links instead of recreating them
        #[arg(long)]
        follow_symlinks: bool,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: FormatArg,
    },
    /// Show the buffer size used between two device classes
    Advise {
        /// Source device class (usb2, usb3, ssd, hdd, mtp, network)
        source: DeviceClass,
        /// Destination device class
        destination: DeviceClass,
    },
    /// Show the device class and free space of a path
    Device {
        /// Path to analyze
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum OverwriteArg {
    Prompt,
    Overwrite,
    Skip,
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(arg: OverwriteArg) -> Self {
        match arg {
            OverwriteArg::Prompt => OverwritePolicy::Prompt,
            OverwriteArg::Overwrite => OverwritePolicy::Overwrite,
            OverwriteArg::Skip => OverwritePolicy::Skip,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum FormatArg {
    Yaml,
    Toml,
    Json,
}

impl FormatArg {
    fn as_str(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }
}

struct CopyArgs {
    paths: Vec<PathBuf>,
    workers: Option<usize>,
    overwrite: Option<OverwriteArg>,
    verify: bool,
    checksum: bool,
    no_preserve_timestamps: bool,
    retries: Option<u32>,
    buffer_size: Option<usize>,
    follow_symlinks: bool,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigLoader::load_default().context("Failed to load configuration")?,
    };

    let _guard = init_logging(&config.logging, cli.debug, cli.quiet)?;
    info!("copytask v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Copy {
            paths,
            workers,
            overwrite,
            verify,
            checksum,
            no_preserve_timestamps,
            retries,
            buffer_size,
            follow_symlinks,
            json,
        } => {
            let args = CopyArgs {
                paths,
                workers,
                overwrite,
                verify,
                checksum,
                no_preserve_timestamps,
                retries,
                buffer_size,
                follow_symlinks,
                json,
            };
            copy_command(&config, args, cli.quiet).await
        }
        Commands::Config { default, format } => {
            config_command(&config, default, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Advise {
            source,
            destination,
        } => {
            display_advice(&advisor(&config), source, destination);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Device { path } => {
            device_command(&config, &path);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(
    logging: &LoggingConfig,
    debug: bool,
    quiet: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let guard = match &logging.log_file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            let builder = builder.with_writer(writer).with_ansi(false);
            if logging.json_format {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
        None => {
            let builder = builder.with_writer(std::io::stderr);
            if logging.json_format {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
    };

    Ok(guard)
}

fn advisor(config: &Config) -> BufferAdvisor {
    config
        .buffers
        .overrides()
        .into_iter()
        .fold(BufferAdvisor::new(), |advisor, (class, size)| {
            advisor.with_override(class, size)
        })
}

async fn copy_command(config: &Config, args: CopyArgs, quiet: bool) -> Result<ExitCode> {
    let mut sources = args.paths;
    let destination = sources.pop().context("A destination path is required")?;

    let mut options = config.copy_options();
    if let Some(overwrite) = args.overwrite {
        options.overwrite = overwrite.into();
    }
    if args.checksum {
        options.verify = VerifyMode::Checksum;
    } else if args.verify {
        options.verify = VerifyMode::Size;
    }
    if args.no_preserve_timestamps {
        options.preserve_timestamps = false;
    }
    if let Some(retries) = args.retries {
        options.max_retries = retries;
    }
    if let Some(size) = args.buffer_size {
        options.chunk_size = Some(BufferSize::new(size).map_err(anyhow::Error::msg)?);
    }
    options.follow_symlinks |= args.follow_symlinks;

    let mut builder = TaskManager::builder().with_config(config);
    if let Some(workers) = args.workers {
        builder = builder.with_worker_count(workers);
    }
    let manager = builder.build();

    if !quiet && !args.json {
        println!(
            "{} Copying {} item(s) to {}",
            style("→").green().bold(),
            sources.len(),
            style(destination.display()).cyan()
        );
    }

    let quiet = quiet || args.json;
    let request = CopyRequest::new(sources, destination).with_options(options);
    let mut snapshots = vec![run_task(&manager, request.clone(), quiet).await?];

    let conflicts = conflict_count(snapshots.last());
    if conflicts > 0 && !quiet && Term::stdout().is_term() {
        let overwrite = dialoguer::Confirm::new()
            .with_prompt(format!("{conflicts} destination file(s) already exist. Overwrite them?"))
            .default(false)
            .interact()
            .unwrap_or(false);
        if overwrite {
            let mut options = request.options.clone();
            options.overwrite = OverwritePolicy::Overwrite;
            snapshots.push(run_task(&manager, request.with_options(options), quiet).await?);
        }
    }

    manager.shutdown().await;

    let Some(last) = snapshots.last() else {
        return Ok(ExitCode::FAILURE);
    };
    let code = match last.state {
        TaskState::Completed => ExitCode::SUCCESS,
        TaskState::CompletedWithErrors => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    };

    if args.json {
        println!("{}", CopyResultJson::new(snapshots).to_json()?);
    } else if !quiet {
        display_task_summary(last);
    }
    Ok(code)
}

fn conflict_count(snapshot: Option<&TaskSnapshot>) -> usize {
    snapshot.map_or(0, |s| {
        s.errors
            .iter()
            .filter(|e| e.kind == ErrorKind::DestinationExists)
            .count()
    })
}

/// Submit one request and render it until it finishes
async fn run_task(manager: &TaskManager, request: CopyRequest, quiet: bool) -> Result<TaskSnapshot> {
    let mut updates = manager.subscribe();
    let id = manager.submit(request).await?;
    debug!(task_id = %id, "Submitted");

    let mut view = ProgressView::new(quiet);
    let mut interrupted = false;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(snapshot) = update else { break };
                if snapshot.id != id {
                    continue;
                }
                view.update(&snapshot);
                if snapshot.is_terminal() {
                    break;
                }
            }
            result = tokio::signal::ctrl_c(), if !interrupted => {
                result.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                view.display_warning("Cancelling, waiting for the current chunk to finish...");
                manager.control(id, ControlAction::Cancel).await?;
            }
        }
    }

    view.finish_and_clear();
    if updates.dropped() > 0 {
        debug!("Progress view skipped {} snapshots", updates.dropped());
    }
    Ok(manager.wait(id).await?)
}

fn config_command(config: &Config, default: bool, format: FormatArg) -> Result<()> {
    let (title, shown) = if default {
        ("Default configuration", Config::default())
    } else {
        ("Current configuration", config.clone())
    };
    println!("{} {}:", style("⚙").blue().bold(), title);
    if !default {
        match ConfigLoader::config_exists() {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# no configuration file found, using defaults"),
        }
    }
    println!("{}", ConfigLoader::render(&shown, Some(format.as_str()))?);
    Ok(())
}

fn device_command(config: &Config, path: &Path) {
    let resolver = device_resolver(&config.devices);
    let class = resolver.resolve_device_class(path);
    let advisor = advisor(config);

    println!(
        "{} Device for {}",
        style("🔍").blue().bold(),
        style(path.display()).cyan()
    );
    println!("  Device class: {}", style(class).green());
    println!(
        "  Buffer size: {}",
        style(format_bytes(advisor.size_for(class) as u64)).yellow()
    );
    match SystemSpaceProbe.available_space(path) {
        Some(bytes) => println!("  Free space: {}", style(format_bytes(bytes)).green()),
        None => println!("  Free space: {}", style("unknown").dim()),
    }
}
