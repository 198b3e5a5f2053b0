//! comitup-iptmgr command line
//!
//! # Usage
//!
//! ```bash
//! # Apply one transition (called from the state machine's hook)
//! comitup-iptmgr transition HOTSPOT start
//!
//! # Apply transitions read as "STATE ACTION" lines from stdin
//! comitup-iptmgr listen
//!
//! # Show what a transition would do, without touching the kernel
//! comitup-iptmgr plan CONNECTED start --ap uap0 --link wlan0 --route eth0 --mode router
//!
//! # Install the hotspot rules, wait for Enter, remove them
//! comitup-iptmgr demo
//! ```

use clap::{Parser, Subcommand};
use comitup_iptmgr::config::{self, Config, DEFAULT_CONFIG_PATH};
use comitup_iptmgr::core::catalog::RuleSetName;
use comitup_iptmgr::core::ledger::MemoryRuleTable;
use comitup_iptmgr::core::resolve::{Mode, StaticEnvironment};
use comitup_iptmgr::core::rule::DeviceRef;
use comitup_iptmgr::core::sync::{Action, OperatingState, RuleSynchronizer, changes_rules};
use comitup_iptmgr::{RuleTableGateway, audit};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncBufReadExt;

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "comitup-iptmgr")]
#[command(about = "Keeps iptables rules in line with the comitup connection state", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the rule changes for one state transition
    Transition {
        /// Operating state (HOTSPOT, CONNECTED, ...)
        state: String,
        /// Action (start, stop, ...)
        action: String,
    },
    /// Read "STATE ACTION" lines from stdin and apply each in order
    Listen,
    /// Dry-run a transition against an empty simulated rule table
    Plan {
        state: String,
        action: String,
        /// Access-point device
        #[arg(long, value_name = "DEV")]
        ap: String,
        /// Link (upstream) device
        #[arg(long, value_name = "DEV")]
        link: String,
        /// Default-route device
        #[arg(long, value_name = "DEV")]
        route: Option<String>,
        /// Operating mode (single or router)
        #[arg(long, default_value = "single")]
        mode: Mode,
    },
    /// Install the hotspot rules, wait for Enter, then remove them
    Demo,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn handle_cli(cli: Cli) -> CliResult {
    match cli.command {
        Commands::Transition { state, action } => {
            let config = config::load_config(&cli.config).await?;
            let sync = RuleSynchronizer::from_config(&config);
            let ok = run_transition(&sync, &config, &state, &action).await;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Listen => {
            let config = config::load_config(&cli.config).await?;
            listen(&config).await
        }
        Commands::Plan {
            state,
            action,
            ap,
            link,
            route,
            mode,
        } => {
            let env = StaticEnvironment::new(
                DeviceRef::new(link)?,
                DeviceRef::new(ap)?,
                route.map(DeviceRef::new).transpose()?,
                mode,
            );
            plan(env, &state, &action).await
        }
        Commands::Demo => {
            let config = config::load_config(&cli.config).await?;
            demo(&config).await
        }
    }
}

/// Applies one transition, logging (and auditing) the outcome.
async fn run_transition<G: RuleTableGateway>(
    sync: &RuleSynchronizer<G>,
    config: &Config,
    state: &str,
    action: &str,
) -> bool {
    let state = OperatingState::from_name(state);
    let action = Action::from_name(action);

    let result = sync.on_transition(state, action).await;
    if let Err(e) = &result {
        tracing::error!("Transition {state} {action} failed: {e}");
    }

    if config.enable_audit_log && changes_rules(state, action) {
        audit::log_transition(
            &state.to_string(),
            &action.to_string(),
            result.is_ok(),
            result.as_ref().err().map(ToString::to_string),
        )
        .await;
    }

    result.is_ok()
}

async fn listen(config: &Config) -> CliResult {
    let sync = RuleSynchronizer::from_config(config);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("Waiting for transitions on stdin");
    while let Some(line) = lines.next_line().await? {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (None, ..) => {}
            (Some(state), Some(action), None) => {
                run_transition(&sync, config, state, action).await;
            }
            _ => tracing::warn!("Ignoring malformed line: {line:?}"),
        }
    }

    tracing::info!("End of input");
    Ok(ExitCode::SUCCESS)
}

async fn plan(env: StaticEnvironment, state: &str, action: &str) -> CliResult {
    let sync = RuleSynchronizer::new(MemoryRuleTable::new(), env.clone(), env.clone(), env);
    let state = OperatingState::from_name(state);
    let action = Action::from_name(action);

    let result = sync.on_transition(state, action).await;

    let table = sync.gateway();
    let commands = table.command_lines();
    if commands.is_empty() {
        println!("No rule changes for {state} {action}");
    } else {
        println!("Commands:");
        for command in commands {
            println!("  {command}");
        }
        println!();
        println!("Resulting rules:");
        for line in table.dump() {
            println!("  {line}");
        }
    }

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn demo(config: &Config) -> CliResult {
    let sync = RuleSynchronizer::from_config(config);
    let devices = sync.resolve_devices()?;

    println!("Applying {} on {}", RuleSetName::StartHotspot, devices.ap);
    let failures = sync
        .apply_rule_set(RuleSetName::StartHotspot, &devices)
        .await;
    for failure in &failures {
        eprintln!("✗ {failure}");
    }
    if config.enable_audit_log {
        audit::log_demo_apply(&RuleSetName::StartHotspot.to_string(), failures.len()).await;
    }

    println!("Press Enter to remove the rules...");
    wait_for_enter().await?;

    println!("Applying {}", RuleSetName::EndHotspot);
    let teardown = sync.apply_rule_set(RuleSetName::EndHotspot, &devices).await;
    if config.enable_audit_log {
        audit::log_demo_apply(&RuleSetName::EndHotspot.to_string(), teardown.len()).await;
    }

    if failures.is_empty() {
        println!("✓ Done.");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Blocks until Enter is pressed, or a line (or EOF) arrives on piped stdin.
async fn wait_for_enter() -> std::io::Result<()> {
    use std::os::fd::AsFd;

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if !is_atty {
        let mut line = String::new();
        tokio::io::BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        return Ok(());
    }

    tokio::task::spawn_blocking(wait_for_enter_key)
        .await
        .map_err(std::io::Error::other)?
}

/// Raw-mode keypress wait; Ctrl-C and Esc also continue so the rules are removed.
fn wait_for_enter_key() -> std::io::Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyModifiers};

    crossterm::terminal::enable_raw_mode()?;

    let result = loop {
        match event::read() {
            Ok(Event::Key(key))
                if key.code == KeyCode::Enter
                    || key.code == KeyCode::Esc
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL)) =>
            {
                break Ok(());
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };

    // Always restore terminal to normal mode
    let _ = crossterm::terminal::disable_raw_mode();
    result
}
