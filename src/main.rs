mod config;
mod confirm;
mod error;
mod history;
mod logging;
#[cfg(test)]
mod mock;
mod mode;
mod model;
mod orchestrator;
mod repl;
mod safety;
mod session;
mod shell;
mod term;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use config::{ConfigFile, ResolvedConfig};
use confirm::ChannelConfirmer;
use mode::AiMode;
use model::OllamaClient;
use orchestrator::DispatchOrchestrator;
use session::SessionState;
use shell::PtyShell;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "shellpilot",
    about = "A shell session with a local LLM co-pilot and a safety gate",
    long_about = None,
)]
struct Args {
    /// Profile to use from config file
    #[arg(short, long, env = "SHELLPILOT_PROFILE")]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "SHELLPILOT_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "SHELLPILOT_MODEL")]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "SHELLPILOT_API_KEY")]
    api_key: Option<String>,

    /// AI mode at startup: disabled, auto, dispatch, command, code
    #[arg(long, value_parser = parse_mode)]
    mode: Option<AiMode>,

    /// Shell to spawn (default: $SHELL, then /bin/bash)
    #[arg(long)]
    shell: Option<String>,

    /// Log at info level instead of warn
    #[arg(short, long)]
    verbose: bool,

    /// Write a default config file to ~/.config/shellpilot/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

fn parse_mode(s: &str) -> Result<AiMode, String> {
    AiMode::parse(s).ok_or_else(|| {
        let all: Vec<&str> = AiMode::ALL.iter().map(|m| m.as_str()).collect();
        format!("unknown mode '{s}' (expected one of: {})", all.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: shellpilot");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let log_path = logging::init(&config::data_dir(), args.verbose)?;

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
        args.api_key.as_deref(),
        args.mode,
        args.shell.as_deref(),
    );
    tracing::info!(
        profile = %resolved.profile_name,
        endpoint = %resolved.endpoint,
        model = %resolved.model,
        mode = %resolved.mode,
        log = %log_path.display(),
        "starting"
    );

    run_session(resolved).await
}

async fn run_session(resolved: ResolvedConfig) -> Result<()> {
    let gate = resolved.safety_gate()?;
    let geometry = resolved.geometry()?;

    let mut state = SessionState::from_launch_dir();
    state.update_size(geometry.cols, geometry.rows)?;
    state.set_theme(resolved.theme);
    state.set_syntax_highlighting(resolved.syntax_highlighting);

    let mut client = OllamaClient::new(resolved.endpoint.clone(), resolved.model.clone());
    if let Some(key) = &resolved.api_key {
        client.set_api_key(key.clone());
    }
    let (confirmer, confirms) = ChannelConfirmer::new();
    let (events_tx, events) = mpsc::unbounded_channel();

    let orchestrator = DispatchOrchestrator::new(
        Arc::new(PtyShell::new(resolved.shell.clone())),
        Arc::new(client),
        Arc::new(confirmer),
        events_tx,
    )
    .with_state(state)
    .with_mode(resolved.mode)
    .with_gate(gate)
    .with_config(resolved.orchestrator_config());

    println!("  shellpilot · {} · {}", resolved.profile_name, resolved.model);
    let (session, task) = orchestrator::spawn_session(orchestrator)
        .await
        .with_context(|| format!("Failed to start {}", resolved.shell))?;

    repl::run(session.clone(), events, confirms, resolved.mode).await?;
    session.terminate();

    let orchestrator = task.await.context("Session task panicked")?;
    tracing::info!(commands = orchestrator.history().len(), "session closed");
    Ok(())
}

fn print_profiles(file: &ConfigFile) {
    println!();
    println!("  Profiles");
    for name in file.profile_names() {
        let Some(p) = file.profiles.get(name) else { continue };
        let marker = if name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        println!("    mode      {}", p.mode.display_name());
        println!();
    }
}

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "shellpilot", &mut std::io::stdout());
    Ok(())
}
