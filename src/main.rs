use anyhow::{Context, Result};
use docflow::cli::commands::{document_from_pairs, RunCommand, ValidateCommand};
use docflow::cli::output::*;
use docflow::cli::{Cli, Command};
use docflow::core::{Document, PipelineDefinition};
use docflow::execution::{Engine, EngineConfig};
use serde_json::Value;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let definition = PipelineDefinition::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline definition {}", cmd.file))?;

    let system = Value::Object(document_from_pairs(&cmd.system));
    let engine = Engine::from_definition(definition, EngineConfig::new().with_system(system))
        .context("Failed to build pipeline")?;

    // Events go to stderr; stdout carries only the resulting document
    engine.add_event_handler(|event| eprintln!("{}", format_execution_event(&event)));

    let mut input = match &cmd.input {
        Some(path) => load_document(path)?,
        None => Document::new(),
    };
    input.extend(document_from_pairs(&cmd.field));

    let limit = Duration::from_secs(cmd.timeout_secs);
    match tokio::time::timeout(limit, engine.execute(input)).await {
        Ok(Ok(document)) => {
            let value = Value::Object(document);
            let json = if cmd.pretty {
                serde_json::to_string_pretty(&value)?
            } else {
                serde_json::to_string(&value)?
            };
            println!("{}", json);
            Ok(())
        }
        Ok(Err(e)) => {
            eprintln!("{} Pipeline {}", CROSS, style("failed").red());
            error!("{}", e);
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!(
                "{} Document did not finish within {}s; remaining steps are still waiting for data",
                WARN, cmd.timeout_secs
            );
            std::process::exit(2);
        }
    }
}

fn load_document(path: &str) -> Result<Document> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input document {}", path))?;
    match serde_json::from_str::<Value>(&content).context("Input document is not valid JSON")? {
        Value::Object(document) => Ok(document),
        other => anyhow::bail!("Input document must be a JSON object, got {}", other),
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineDefinition::from_file(&cmd.file).and_then(|definition| {
        Engine::from_definition(definition.clone(), EngineConfig::new())?;
        Ok(definition)
    });

    match result {
        Ok(definition) => {
            let root = &definition.root;
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(root.display_name()).bold());
            println!("  Steps: {}", style(root.leaf_count()).cyan());
            println!(
                "  Registers: {}",
                style(root.registered_keys().join(", ")).cyan()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&root.raw)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}
