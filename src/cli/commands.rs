//! CLI command definitions for debate-forge.
//!
//! `debate` runs one session and streams its events; `personas` prints the
//! catalog, including any personas loaded from YAML.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::debate::{
    DebateRequest, DebateSession, DebateSessionManager, ExecutionPolicy, ModelConfig,
    PersonaCatalog, PersonaSelection, StreamEvent,
};
use crate::llm::{LiteLlmClient, OpenRouterProvider, ProviderGateway, RateLimitBudget};

/// Model used for personas given without an explicit `provider:model`.
const DEFAULT_PERSONA_MODEL: &str = "openrouter:openai/gpt-4o";

/// Personas used when `--persona` is not given.
const DEFAULT_ROLES: [&str; 2] = ["analyst", "critic"];

/// Multi-agent debate runner.
#[derive(Parser)]
#[command(name = "debate-forge")]
#[command(about = "Run structured multi-persona LLM debates and synthesise a verdict")]
#[command(version)]
#[command(
    long_about = "debate-forge puts one question to several LLM personas over a fixed number of rounds, then asks a judge model for a structured verdict.\n\nExample usage:\n  debate-forge debate --query \"Should a retiree move savings into index funds?\" \\\n    --persona analyst=openrouter:openai/gpt-4o --persona critic=openrouter:anthropic/claude-sonnet-4 --rounds 2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a debate and stream its events.
    Debate(DebateArgs),

    /// List the available personas.
    Personas(PersonasArgs),
}

/// Arguments for `debate-forge debate`.
#[derive(Parser, Debug)]
pub struct DebateArgs {
    /// Question to debate (at least 10 characters).
    #[arg(short, long)]
    pub query: String,

    /// Persona as `role=provider:model`, or just `role`. Repeatable, order is speaking order.
    #[arg(short, long = "persona")]
    pub personas: Vec<String>,

    /// Number of debate rounds.
    #[arg(short, long, default_value = "2")]
    pub rounds: u32,

    /// Disable the fallback model for agent turns.
    #[arg(long)]
    pub no_fallback: bool,

    /// Run agents within a round concurrently. Agents then see prior rounds only.
    #[arg(long)]
    pub parallel: bool,

    /// Mark persona models as supporting native tool calls.
    #[arg(long)]
    pub tool_calls: bool,

    /// Judge model as `provider:model`. Overrides DEBATE_JUDGE_MODEL.
    #[arg(long)]
    pub judge_model: Option<String>,

    /// YAML file with extra or overriding personas.
    #[arg(long)]
    pub personas_file: Option<PathBuf>,

    /// Directory to save the finished session to, as `<id>.json`.
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Print events and the final session as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// OpenRouter API key.
    #[arg(long, env = "OPENROUTER_API_KEY")]
    pub api_key: Option<String>,
}

/// Arguments for `debate-forge personas`.
#[derive(Parser, Debug)]
pub struct PersonasArgs {
    /// YAML file with extra or overriding personas.
    #[arg(long)]
    pub personas_file: Option<PathBuf>,

    /// Print the catalog as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Debate(args) => run_debate_command(args).await,
        Commands::Personas(args) => run_personas_command(args),
    }
}

/// Parses `role=provider:model`. A bare `role` gets the default model.
pub fn parse_persona_spec(spec: &str) -> anyhow::Result<PersonaSelection> {
    let (role, model) = match spec.split_once('=') {
        Some((role, model)) => (role.trim(), model.trim()),
        None => (spec.trim(), DEFAULT_PERSONA_MODEL),
    };
    if role.is_empty() {
        anyhow::bail!("persona '{}' has no role", spec);
    }
    let model_config: ModelConfig = model
        .parse()
        .with_context(|| format!("invalid model in persona '{}'", spec))?;
    Ok(PersonaSelection::new(role, model_config))
}

// ============================================================================
// Debate Command Implementation
// ============================================================================

async fn run_debate_command(args: DebateArgs) -> anyhow::Result<()> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = &args.save_dir {
        config = config.with_session_dir(dir.clone());
    }
    if args.parallel {
        config = config.with_execution_policy(ExecutionPolicy::Parallel);
    }
    if let Some(judge) = &args.judge_model {
        let judge: ModelConfig = judge.parse().context("invalid --judge-model")?;
        config = config.with_judge_model(judge);
    }
    config.validate()?;

    let catalog = load_catalog(args.personas_file.as_ref())?;
    let gateway = build_gateway(&config, args.api_key.clone())?;

    let specs: Vec<String> = if args.personas.is_empty() {
        DEFAULT_ROLES.iter().map(|r| r.to_string()).collect()
    } else {
        args.personas.clone()
    };
    let mut request = DebateRequest::new(args.query.clone()).with_rounds(args.rounds);
    for spec in &specs {
        let mut selection = parse_persona_spec(spec)?;
        selection.model_config = selection.model_config.with_tool_calls(args.tool_calls);
        request.personas.push(selection);
    }
    if args.no_fallback {
        request = request.with_fallback(false);
    }

    info!(
        personas = request.personas.len(),
        rounds = request.rounds,
        policy = %config.execution_policy,
        judge = %config.judge_model,
        "Starting debate"
    );

    let manager = Arc::new(DebateSessionManager::new(Arc::new(gateway), catalog, config));
    let mut running = manager.spawn(request);

    let cancel = running.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling debate");
            cancel.cancel();
        }
    });

    while let Some(event) = running.events.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }

    let session = running.handle.await.context("debate task panicked")?;
    if args.json {
        println!("{}", serde_json::to_string(&session)?);
    } else {
        print_summary(&session);
    }
    Ok(())
}

fn load_catalog(personas_file: Option<&PathBuf>) -> anyhow::Result<PersonaCatalog> {
    let catalog = PersonaCatalog::builtin();
    match personas_file {
        Some(path) => {
            let extra = PersonaCatalog::from_yaml_file(path)
                .with_context(|| format!("failed to load personas from {}", path.display()))?;
            Ok(catalog.merge(extra))
        }
        None => Ok(catalog),
    }
}

/// Registers every provider that has credentials available.
///
/// `openrouter` needs an API key; `litellm` is added when `LITELLM_API_BASE` is set.
fn build_gateway(config: &EngineConfig, api_key: Option<String>) -> anyhow::Result<ProviderGateway> {
    let mut gateway = ProviderGateway::new()
        .with_budget(RateLimitBudget::shared(config.max_concurrent_per_model))
        .with_generation_params(config.temperature, config.max_tokens);

    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        let provider = OpenRouterProvider::new(key);
        info!(
            base_url = provider.base_url(),
            default_model = provider.default_model(),
            api_key = %provider.api_key_masked(),
            "Registered OpenRouter provider"
        );
        gateway.register("openrouter", Arc::new(provider));
    }
    if let Ok(client) = LiteLlmClient::from_env() {
        info!(
            api_base = client.api_base(),
            default_model = client.default_model(),
            has_api_key = client.has_api_key(),
            "Registered LiteLLM provider"
        );
        gateway.register("litellm", Arc::new(client));
    }

    if gateway.provider_ids().is_empty() {
        anyhow::bail!(
            "no LLM provider configured: set OPENROUTER_API_KEY (or --api-key) or LITELLM_API_BASE"
        );
    }
    Ok(gateway)
}

fn print_event(event: &StreamEvent) {
    match event {
        StreamEvent::RoundStarted {
            round,
            total_rounds,
            agent_count,
            ..
        } => {
            println!("\n=== Round {}/{} ({} agents) ===", round, total_rounds, agent_count);
        }
        StreamEvent::ModelCompleted {
            agent_name,
            agent_id,
            response_preview,
            duration_ms,
            fallback_used,
            error,
            ..
        } => {
            let marker = if *fallback_used { " [fallback]" } else { "" };
            match error {
                Some(error) => println!("- {} ({}): FAILED after {}ms: {}", agent_name, agent_id, duration_ms, error),
                None => println!(
                    "- {} ({}){} in {}ms: {}",
                    agent_name, agent_id, marker, duration_ms, response_preview
                ),
            }
        }
        StreamEvent::ComparisonCompleted {
            agreement_ratio,
            positions,
            ..
        } => {
            println!("\n=== Final positions (agreement {:.0}%) ===", agreement_ratio * 100.0);
            for position in positions {
                println!(
                    "- {} [{}]: {} ({:.2})",
                    position.agent_id, position.agent_role, position.action, position.confidence
                );
            }
        }
        StreamEvent::SynthesisCompleted { .. } => {}
        StreamEvent::Error { message, .. } => {
            eprintln!("Error: {}", message);
        }
    }
}

fn print_summary(session: &DebateSession) {
    println!("\n=== Verdict ({}) ===", session.status);
    let Some(verdict) = &session.verdict else {
        println!("No verdict.");
        return;
    };

    println!("{}", verdict.conclusion);
    println!("Confidence: {:.2}", verdict.confidence_score);
    if !verdict.agreement_points.is_empty() {
        println!("\nAgreement:");
        for point in &verdict.agreement_points {
            println!("  + {}", point);
        }
    }
    if !verdict.disagreement_points.is_empty() {
        println!("\nDisagreement:");
        for point in &verdict.disagreement_points {
            println!("  - {}", point);
        }
    }
    if !verdict.contributing_agents.is_empty() {
        let agents: Vec<&str> = verdict.contributing_agents.iter().map(String::as_str).collect();
        println!("\nContributors: {}", agents.join(", "));
    }
    println!("\nSession: {}", session.id);
}

// ============================================================================
// Personas Command Implementation
// ============================================================================

fn run_personas_command(args: PersonasArgs) -> anyhow::Result<()> {
    let catalog = load_catalog(args.personas_file.as_ref())?;

    if args.json {
        let personas: Vec<_> = catalog.iter().collect();
        println!("{}", serde_json::to_string_pretty(&personas)?);
        return Ok(());
    }

    for persona in catalog.iter() {
        let focus = if persona.focus_areas.is_empty() {
            String::new()
        } else {
            format!(" (focus: {})", persona.focus_areas.join(", "))
        };
        println!("{:<14} {}{}", persona.role.as_str(), persona.display_name, focus);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::PersonaRole;

    #[test]
    fn test_parse_persona_spec() {
        let selection = parse_persona_spec("critic=openrouter:anthropic/claude-sonnet-4").unwrap();
        assert_eq!(selection.role, PersonaRole::Critic);
        assert_eq!(selection.model_config.provider, "openrouter");
        assert_eq!(selection.model_config.model, "anthropic/claude-sonnet-4");

        let bare = parse_persona_spec("analyst").unwrap();
        assert_eq!(bare.model_config.to_string(), DEFAULT_PERSONA_MODEL);

        assert!(parse_persona_spec("=openrouter:x").is_err());
        assert!(parse_persona_spec("critic=nocolon").is_err());
    }

    #[test]
    fn test_cli_parses_debate_args() {
        let cli = Cli::try_parse_from([
            "debate-forge",
            "debate",
            "--query",
            "Should a retiree move savings into index funds?",
            "--persona",
            "analyst=openrouter:a",
            "--persona",
            "critic=openrouter:b",
            "--rounds",
            "3",
            "--no-fallback",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Debate(args) => {
                assert_eq!(args.personas.len(), 2);
                assert_eq!(args.rounds, 3);
                assert!(args.no_fallback);
                assert!(args.json);
            }
            Commands::Personas(_) => panic!("expected debate command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_build_gateway_requires_provider() {
        if std::env::var("LITELLM_API_BASE").is_ok() {
            return;
        }
        let config = EngineConfig::default();
        assert!(build_gateway(&config, None).is_err());
        let gateway = build_gateway(&config, Some("sk-test".to_string())).unwrap();
        assert!(gateway.has_provider("openrouter"));
    }
}
