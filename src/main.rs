mod budget;
mod classifier;
mod config;
mod constraints;
mod error;
mod logging;
mod markdown;
mod metadata;
mod oplog;
mod orchestrator;
mod paths;
mod reminders;
mod reply;
mod session;
mod store;
mod strikes;
mod transcript;
mod types;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use config::Config;
use error::{FatalError, Result};
use orchestrator::{checkpoint, done, pending, recover, summary};
use paths::{Env, FocusPaths};
use session::Focus;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use types::Stdin;

#[derive(Debug, Parser)]
#[command(
    name = "focuskeeper",
    about = "Focus-session bookkeeping for coding-assistant hooks"
)]
struct Cli {
    /// Project directory; defaults to the event's cwd, then the current directory.
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Handle one hook event read from stdin (the default).
    Hook,
    /// Fold finished sessions out of the operation log.
    Checkpoint(CheckpointArgs),
    /// Recover conversation context after a restart.
    Recover(RecoverArgs),
    /// Close the focus session.
    Done(DoneArgs),
    /// Summarize the focus period.
    Summary(SummaryArgs),
    /// List or discard collected pending issues.
    Pending(PendingArgs),
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    #[arg(long, value_enum, default_value_t = checkpoint::Mode::Oldest)]
    mode: checkpoint::Mode,
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RecoverArgs {
    #[arg(long, conflicts_with = "session")]
    list: bool,
    #[arg(long, value_name = "N")]
    session: Option<usize>,
}

#[derive(Debug, Args)]
struct DoneArgs {
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct SummaryArgs {
    #[arg(long, value_enum, default_value_t = summary::Format::Json)]
    format: summary::Format,
}

#[derive(Debug, Args)]
struct PendingArgs {
    #[arg(long)]
    clear: bool,
}

/// What to print and how to exit.
struct Output {
    stdout: Option<String>,
    code: u8,
}

/// Hook payloads embed raw tool output, so invalid UTF-8 is replaced rather
/// than rejected.
fn read_stdin() -> Result<String> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .map_err(|e| FatalError::io("reading", "<stdin>", e))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = Env::from_process();
    // Flushes the log file when dropped at the end of main.
    let mut log_guard = None;

    let code = match run(cli, env, &mut log_guard) {
        Ok(output) => {
            if let Some(text) = output.stdout {
                println!("{text}");
            }
            output.code
        }
        Err(e) => {
            tracing::error!(error = %e, "invocation failed");
            println!("{}", e.to_block_json());
            2
        }
    };
    drop(log_guard);
    ExitCode::from(code)
}

fn run(
    cli: Cli,
    env: Env,
    log_guard: &mut Option<tracing_appender::non_blocking::WorkerGuard>,
) -> Result<Output> {
    let command = cli.command.unwrap_or(Command::Hook);

    // Hooks are read first: the event's cwd can locate the project.
    let stdin = match command {
        Command::Hook => Some(Stdin::parse(&read_stdin()?)),
        _ => None,
    };
    let event_cwd = match &stdin {
        Some(Stdin::Event(input)) => input
            .common()
            .map(|c| c.cwd.as_str())
            .filter(|cwd| !cwd.is_empty())
            .map(PathBuf::from),
        _ => None,
    };
    let start = match cli.project.or(event_cwd) {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|e| FatalError::io("reading", "current directory", e))?,
    };
    let launch_dir = start.canonicalize().unwrap_or_else(|_| start.clone());
    let project_root = paths::discover_project_root(&start);

    let config = Config::load(&project_root)?;
    let focus_paths = FocusPaths::new(config.focus_dir(&project_root, &env));
    *log_guard = logging::init(
        &focus_paths.logs(),
        &config.logging.level,
        env.log_filter.as_deref(),
    );
    tracing::info!(command = ?command, project = %project_root.display(), "focuskeeper started");

    let focus = Focus::new(project_root, config, env).launched_from(launch_dir);
    let report = match command {
        Command::Hook => {
            let stdin = stdin.unwrap_or(Stdin::Empty);
            let reply = focus.handle_hook(&stdin)?;
            let code = reply.exit_code() as u8;
            let stdout = match reply.into_output() {
                Some(output) => Some(serde_json::to_string(&output).context("serializing hook output")?),
                None => None,
            };
            return Ok(Output { stdout, code });
        }
        Command::Checkpoint(args) => {
            let outcome = checkpoint::run(&focus, args.mode, args.dry_run)?;
            checkpoint::render(&focus, &outcome, args.dry_run)
        }
        Command::Recover(args) => {
            let mode = match (args.list, args.session) {
                (_, Some(n)) => recover::Mode::Session(n),
                (true, None) => recover::Mode::List,
                (false, None) => recover::Mode::Auto,
            };
            recover::run(&focus, mode)?
        }
        Command::Done(args) => {
            let outcome = done::run(&focus, args.dry_run)?;
            done::render(outcome.as_ref(), args.dry_run)?
        }
        Command::Summary(args) => {
            let outcome = summary::run(&focus)?;
            summary::render(&focus, outcome.as_ref(), args.format)?
        }
        Command::Pending(args) => pending::run(&focus, args.clear)?,
    };
    Ok(Output {
        stdout: Some(report.text()),
        code: report.exit_code() as u8,
    })
}
