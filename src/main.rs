use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use instwatch::config::{self, Config, load_config, load_config_from_path};
use instwatch::format::{render_family, render_summary, render_tree};
use instwatch::supervisor::{SuperviseOptions, supervise};
use instwatch::telemetry::{self, LogFormat};
use instwatch::{ProcessMonitor, summarize_processes, summarize_tree};

#[derive(Parser)]
#[command(
    name = "instwatch",
    about = "Resource monitoring and log capture for supervised instances"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic level: error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the process tree rooted at PID
    Tree(PollArgs),
    /// Print the flat list of PID and its descendants
    Family {
        #[command(flatten)]
        poll: PollArgs,

        /// Only report the root process
        #[arg(long, default_value_t = false)]
        no_children: bool,
    },
    /// Spawn a program and capture its output into a rotating log
    Run(RunArgs),
}

#[derive(Args)]
struct PollArgs {
    /// Root process id (defaults to this process)
    pid: Option<u32>,

    /// Number of polls; the first only seeds CPU samples.
    #[arg(long, default_value_t = 2)]
    samples: usize,

    /// Delay between polls in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Emit JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Instance name used for the log file (defaults to the program name)
    #[arg(long)]
    name: Option<String>,

    /// Directory for instance logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Maximum bytes per log file
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Number of rotated files to keep
    #[arg(long)]
    max_files: Option<usize>,

    /// Resource sampling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Program and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = load_config_for_cli(&cli);
    let format = LogFormat::parse(&config.logging.format).unwrap_or_default();
    telemetry::init_tracing(&config.logging.level, format);

    match cli.command {
        Command::Tree(poll) => print_tree(&config, &poll).await,
        Command::Family { poll, no_children } => {
            let include_children = config.monitor.include_children && !no_children;
            print_family(&config, &poll, include_children).await
        }
        Command::Run(args) => {
            let code = run_instance(&config, args).await?;
            std::process::exit(code);
        }
    }
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    config
}

fn poll_interval(config: &Config, override_ms: Option<u64>) -> Duration {
    Duration::from_millis(override_ms.unwrap_or(config.monitor.poll_interval_ms))
}

async fn poll_repeatedly<T>(
    config: &Config,
    poll: &PollArgs,
    mut sample: impl FnMut(&mut ProcessMonitor, u32) -> T,
) -> Result<(u32, T)> {
    if poll.samples == 0 {
        return Err(eyre!("--samples must be greater than 0"));
    }
    let pid = poll.pid.unwrap_or_else(std::process::id);
    let interval = poll_interval(config, poll.interval_ms);
    let mut monitor = ProcessMonitor::new();

    let mut last = sample(&mut monitor, pid);
    for _ in 1..poll.samples {
        tokio::time::sleep(interval).await;
        last = sample(&mut monitor, pid);
    }
    Ok((pid, last))
}

async fn print_tree(config: &Config, poll: &PollArgs) -> Result<()> {
    let (pid, tree) = poll_repeatedly(config, poll, |monitor, pid| monitor.process_tree(pid)).await?;
    if !tree.info.is_valid() {
        return Err(eyre!("process {pid} not found"));
    }
    let summary = summarize_tree(&tree);

    if poll.json {
        let body = serde_json::json!({
            "rootPid": pid,
            "timestamp": Utc::now(),
            "tree": tree,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print!("{}", render_tree(&tree));
        println!("{}", render_summary(&summary));
    }
    Ok(())
}

async fn print_family(config: &Config, poll: &PollArgs, include_children: bool) -> Result<()> {
    let (pid, family) = poll_repeatedly(config, poll, |monitor, pid| {
        monitor.process_family(pid, include_children)
    })
    .await?;
    if family.is_empty() {
        return Err(eyre!("process {pid} not found"));
    }
    let summary = summarize_processes(&family);

    if poll.json {
        let body = serde_json::json!({
            "rootPid": pid,
            "timestamp": Utc::now(),
            "processes": family,
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        print!("{}", render_family(&family));
        println!("{}", render_summary(&summary));
    }
    Ok(())
}

async fn run_instance(config: &Config, args: RunArgs) -> Result<i32> {
    let mut command = args.command.into_iter();
    let program = command
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| eyre!("no program given to run"))?;

    let name = args.name.unwrap_or_else(|| instance_name(&program));
    let mut logs = config::LogsConfig {
        dir: config.logs.dir.clone(),
        max_bytes: config.logs.max_bytes,
        max_files: config.logs.max_files,
    };
    if let Some(dir) = args.log_dir {
        logs.dir = dir;
    }
    if let Some(max_bytes) = args.max_bytes {
        logs.max_bytes = max_bytes;
    }
    if let Some(max_files) = args.max_files {
        logs.max_files = max_files;
    }

    let options = SuperviseOptions {
        program,
        args: command.collect(),
        log_path: logs.instance_log_path(&name),
        max_bytes: logs.effective_max_bytes(),
        max_files: logs.max_files,
        poll_interval: poll_interval(config, args.interval_ms),
        include_children: config.monitor.include_children,
    };
    let run = supervise(&options).await?;
    if let Some(summary) = &run.last_summary {
        eprintln!("{name}: {}", render_summary(summary));
    }

    // Killed by a signal: no code, report failure.
    Ok(run.status.code().unwrap_or(1))
}

fn instance_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("instance")
        .to_string()
}
