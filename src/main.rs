//! `form-assistant` command line.
//!
//! Usage:
//!   form-assistant seed --file config/forms.sample.yaml
//!   form-assistant chat --user ana
//!   form-assistant chat --user ana --session s1 --form expense_claim
//!   form-assistant sessions --user ana --all
//!   form-assistant cleanup
//!
//! In `chat`, `/reload` drops cached form lists after a `seed` run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use form_assistant::agent_core::AssistantDatabase;
use form_assistant::config::{self, AppConfig};
use form_assistant::{build_app, init_tracing, resolve_db_path, session_manager, LogFormat, LogOptions};

#[derive(Parser)]
#[command(name = "form-assistant")]
#[command(about = "Conversational form-filling assistant", version)]
struct Cli {
    /// Config file (default: $FORM_ASSISTANT_CONFIG, then config/assistant.yaml)
    #[arg(long, global = true, env = config::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    /// Log to stderr instead of the rotating log file
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive conversation on stdin/stdout
    Chat {
        #[arg(long)]
        user: String,
        /// Resume (or create) this session id
        #[arg(long)]
        session: Option<String>,
        /// Start filling this form template directly
        #[arg(long)]
        form: Option<String>,
    },
    /// Load contexts and form templates from a YAML file
    Seed {
        #[arg(long)]
        file: PathBuf,
    },
    /// List a user's sessions
    Sessions {
        #[arg(long)]
        user: String,
        /// Include expired sessions
        #[arg(long)]
        all: bool,
    },
    /// Delete expired sessions
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(LogOptions {
        format: match cli.log_format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        },
        stderr: cli.log_stderr,
    })
    .context("failed to initialize logging")?;

    let (app_config, config_path) = config::load_or_default(cli.config.as_deref())?;
    tracing::debug!(
        config = ?config_path,
        log_file = ?log_file,
        "configuration resolved"
    );

    match cli.command {
        Command::Chat {
            user,
            session,
            form,
        } => chat(&app_config, &user, session, form).await,
        Command::Seed { file } => {
            let db = open_database(&app_config)?;
            let (contexts, forms) = db
                .seed_from_file(&file)
                .with_context(|| format!("failed to seed from {}", file.display()))?;
            println!("Seeded {contexts} contexts and {forms} forms.");
            Ok(())
        }
        Command::Sessions { user, all } => {
            let db = open_database(&app_config)?;
            let manager = session_manager(db, &app_config);
            let mut sessions = manager.user_sessions(&user, !all)?;
            sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
            if sessions.is_empty() {
                println!("No sessions for {user}.");
            }
            for s in sessions {
                println!(
                    "{}  {:<26} form={:<20} last_activity={}",
                    s.session_id,
                    s.state.as_str(),
                    s.form_id.as_deref().unwrap_or("-"),
                    s.last_activity.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Command::Cleanup => {
            let db = open_database(&app_config)?;
            let manager = session_manager(db, &app_config);
            let removed = manager.cleanup_expired(manager.cleanup_timeout())?;
            let stats = manager.session_stats()?;
            println!(
                "Removed {removed} expired sessions; {} remain ({} active).",
                stats.total, stats.active
            );
            Ok(())
        }
    }
}

fn open_database(config: &AppConfig) -> anyhow::Result<Arc<AssistantDatabase>> {
    let path = resolve_db_path(config);
    let db = AssistantDatabase::open(&path)
        .with_context(|| format!("failed to open database at {path}"))?;
    Ok(Arc::new(db))
}

async fn chat(
    config: &AppConfig,
    user: &str,
    session: Option<String>,
    form: Option<String>,
) -> anyhow::Result<()> {
    let app = build_app(config)?;
    if !app.model.health_check().await {
        tracing::warn!("model endpoint unreachable, replies will use keyword fallbacks");
        eprintln!("warning: the model endpoint is not reachable; answers may be less accurate.");
    }

    let sweeper = Arc::new(session_manager(app.database.clone(), config))
        .spawn_cleanup_task(config.assistant.cleanup_interval());

    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if let Some(form_id) = form.as_deref() {
        app.assistant
            .assign_form(user, &session_id, form_id)
            .with_context(|| format!("cannot start form {form_id}"))?;
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let greeting = app.assistant.handle_message(user, Some(&session_id), None).await?;
    stdout
        .write_all(format!("session {session_id}\n\n{}\n\n> ", greeting.response).as_bytes())
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if matches!(line, "quit" | "exit" | "/quit") {
            break;
        }
        if line == "/reload" {
            app.assistant.reload_forms();
            stdout.write_all(b"Form list reloaded.\n\n> ").await?;
            stdout.flush().await?;
            continue;
        }
        if line.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }
        let reply = match app.assistant.handle_message(user, Some(&session_id), Some(line)).await {
            Ok(reply) => reply.response,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "turn failed");
                format!("error: {e}")
            }
        };
        stdout.write_all(format!("\n{reply}\n\n> ").as_bytes()).await?;
        stdout.flush().await?;
    }

    sweeper.abort();
    stdout.write_all(b"\nbye\n").await?;
    Ok(())
}
