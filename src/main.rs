//! `pi-agent`: a thin CLI over the coordination core, one subcommand per
//! action-surface entry. Every subcommand builds an [`Action`]
//! and routes it through the same dispatcher tests exercise directly.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pi_messenger::action::{self, Action};
use pi_messenger::config::{self, PiConfig};
use pi_messenger::crew::CrewStore;
use pi_messenger::inbox::model::MailMessage;
use pi_messenger::inbox::watcher::Deliver;
use pi_messenger::paths::{CrewLayout, Layout};
use pi_messenger::Coordinator;

#[derive(Parser)]
#[command(name = "pi-agent", about = "Daemonless multi-agent coordination substrate")]
struct Cli {
    /// Override the mesh base directory (defaults to ~/.pi/agent/messenger).
    #[arg(long, env = "PI_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Join {
        #[arg(long, env = "PI_AGENT_NAME")]
        name: Option<String>,
        #[arg(long, default_value = "Agent")]
        base: String,
        #[arg(long, default_value = "default-session")]
        session_id: String,
    },
    Leave,
    Rename {
        new_name: String,
    },
    List {
        #[arg(long)]
        scope_to_folder: bool,
    },
    Whois {
        name: String,
    },
    Status,
    Send {
        to: String,
        text: String,
    },
    Broadcast {
        text: String,
    },
    Reserve {
        pattern: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Release {
        pattern: String,
    },
    Feed {
        #[arg(long)]
        limit: Option<usize>,
    },
    SetStatus {
        message: Option<String>,
    },
    Swarm {
        #[command(subcommand)]
        action: SwarmCommand,
    },
    Crew {
        #[command(subcommand)]
        action: CrewCommand,
    },
}

#[derive(Subcommand)]
enum SwarmCommand {
    Claim { spec: String, task_id: String, #[arg(long)] reason: Option<String> },
    Unclaim { spec: String, task_id: String },
    Complete { spec: String, task_id: String, #[arg(long)] notes: Option<String> },
}

#[derive(Subcommand)]
enum CrewCommand {
    Work {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long)]
        autonomous: bool,
    },
    TaskReset {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        task_id: String,
        #[arg(long)]
        cascade: bool,
    },
    Status {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

/// No-op delivery sink for CLI invocations: drained messages from a rename
/// are printed, not handed to a live callback (the CLI process is not a
/// long-running agent session).
struct PrintingSink;
impl Deliver for PrintingSink {
    fn deliver(&self, message: MailMessage) {
        println!("{}", serde_json::to_string(&message).unwrap_or_default());
    }
}

fn main() -> anyhow::Result<()> {
    let filter = std::env::var("PI_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let layout = match cli.home {
        Some(home) => Layout::new(home),
        None => Layout::resolve_default(),
    };
    let cfg = config::load(&layout, None);
    let coordinator = Coordinator::new(layout, cfg);
    let cwd = std::env::current_dir()?.display().to_string();

    let outcome = run_command(&coordinator, cli.command, &cwd)?;
    match outcome {
        Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        None => {}
    }
    Ok(())
}

fn run_command(coordinator: &Coordinator, command: Command, cwd: &str) -> anyhow::Result<Option<action::ActionOutcome>> {
    let action = match command {
        Command::Join { name, base, session_id } => {
            Action::Join { explicit_name: name, base_name: base, cwd: cwd.to_string(), session_id }
        }
        Command::Leave => Action::Leave,
        Command::Rename { new_name } => Action::Rename { new_name },
        Command::List { scope_to_folder } => {
            Action::List { scope_to_folder: scope_to_folder.then(|| cwd.to_string()) }
        }
        Command::Whois { name } => Action::Whois { name },
        Command::Status => Action::Status,
        Command::Send { to, text } => Action::Send { to, text, reply_to: None },
        Command::Broadcast { text } => Action::Broadcast { text },
        Command::Reserve { pattern, reason } => Action::Reserve { pattern, reason },
        Command::Release { pattern } => Action::Release { pattern },
        Command::Feed { limit } => Action::Feed { limit },
        Command::SetStatus { message } => Action::SetStatus { message },
        Command::Swarm { action } => match action {
            SwarmCommand::Claim { spec, task_id, reason } => Action::SwarmClaim { spec, task_id, reason },
            SwarmCommand::Unclaim { spec, task_id } => Action::SwarmUnclaim { spec, task_id },
            SwarmCommand::Complete { spec, task_id, notes } => Action::SwarmComplete { spec, task_id, notes },
        },
        Command::Crew { action } => return run_crew_command(coordinator, action),
    };

    let outcome = action::dispatch(coordinator, action, &PrintingSink)?;
    Ok(Some(outcome))
}

fn run_crew_command(coordinator: &Coordinator, action: CrewCommand) -> anyhow::Result<Option<action::ActionOutcome>> {
    match action {
        CrewCommand::Work { project_dir, autonomous } => {
            // Driving a wave requires a worker collaborator binding (spawning
            // and supervising an actual agent session), which is out of
            // scope for the core — the CLI can only expose the
            // scheduler's pure state transitions (task-reset, status).
            let _ = (CrewStore::new(CrewLayout::new(&project_dir)), coordinator.config().crew.clone());
            anyhow::bail!("crew work needs a Worker/Reviewer binding; integrate via pi_messenger::crew::Scheduler directly (autonomous={autonomous})");
        }
        CrewCommand::TaskReset { project_dir, task_id, cascade } => {
            let outcome = action::dispatch(
                coordinator,
                Action::CrewTaskReset { project_dir: project_dir.display().to_string(), task_id, cascade },
                &PrintingSink,
            )?;
            Ok(Some(outcome))
        }
        CrewCommand::Status { project_dir } => {
            let store = CrewStore::new(CrewLayout::new(&project_dir));
            let tasks = store.load_all_tasks();
            println!("{}", serde_json::to_string_pretty(&tasks.iter().map(task_summary).collect::<Vec<_>>())?);
            Ok(None)
        }
    }
}

fn task_summary(task: &pi_messenger::crew::Task) -> serde_json::Value {
    serde_json::json!({
        "id": task.id,
        "title": task.title,
        "status": task.status,
        "dependsOn": task.depends_on,
        "attemptCount": task.attempt_count,
    })
}
