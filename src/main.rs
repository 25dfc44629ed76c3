//! Stackwire CLI - run and validate stack programs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use stackwire::error::{FixSuggestion, StackError};
use stackwire::reference::StateBackend;
use stackwire::{
    ConfigFile, EngineSettings, ExportOutput, FileBackend, MemoryBackend, NodeOutcome,
    RunContext, RunReport, StackConfig, StackProgram,
};

#[derive(Parser)]
#[command(name = "stackwire")]
#[command(about = "Stackwire - compose infrastructure stacks from deferred values")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProgramArgs {
    /// Path to the stack program (YAML)
    program: PathBuf,

    /// JSON state file holding the outputs of deployed units
    #[arg(long)]
    state: Option<PathBuf>,

    /// TOML file with [config] and [engine] tables
    #[arg(long = "config-file")]
    config_file: Option<PathBuf>,

    /// Configuration option (repeatable)
    #[arg(short = 'c', long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Materialize a stack program and print its exports
    Run {
        #[command(flatten)]
        program: ProgramArgs,

        /// Maximum concurrent provider invocations
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Default provider timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Stop starting new nodes after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Print secret exports in clear text
        #[arg(long)]
        show_secrets: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Write the run's event log (JSON) to this file
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Build and validate the graph without invoking providers
    Validate {
        #[command(flatten)]
        program: ProgramArgs,
    },
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so `--json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            program,
            max_concurrency,
            timeout,
            fail_fast,
            show_secrets,
            json,
            events,
        } => {
            let overrides = SettingsOverrides {
                max_concurrency,
                timeout,
                fail_fast,
            };
            run_program(&program, overrides, show_secrets, json, events.as_deref()).await
        }
        Commands::Validate { program } => validate_program(&program).await.map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct SettingsOverrides {
    max_concurrency: Option<usize>,
    timeout: Option<u64>,
    fail_fast: bool,
}

/// Load the program and build its run context
///
/// Configuration priority: `-c` > env > config file > program defaults.
async fn prepare(
    args: &ProgramArgs,
    overrides: SettingsOverrides,
) -> Result<(StackProgram, RunContext), StackError> {
    let program = StackProgram::load(&args.program)?;

    let file = match &args.config_file {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let mut config = file.config;
    config.merge(StackConfig::from_env());
    for raw in &args.config {
        let (key, value) = StackConfig::parse_assignment(raw)?;
        config.set(key, value);
    }
    program.apply_defaults(&mut config);

    let mut settings: EngineSettings = file.engine;
    if let Some(max) = overrides.max_concurrency {
        settings = settings.with_max_concurrency(max);
    }
    if let Some(secs) = overrides.timeout {
        settings = settings.with_provider_timeout(Duration::from_secs(secs));
    }
    if overrides.fail_fast {
        settings = settings.with_fail_fast(true);
    }

    let backend: Arc<dyn StateBackend> = match &args.state {
        Some(path) => Arc::new(FileBackend::load(path).await?),
        None => Arc::new(MemoryBackend::new()),
    };

    let base_dir = args
        .program
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let registry = program.registry(base_dir)?;

    Ok((program, RunContext::new(config, settings, registry, backend)))
}

async fn run_program(
    args: &ProgramArgs,
    overrides: SettingsOverrides,
    show_secrets: bool,
    json: bool,
    events_path: Option<&Path>,
) -> Result<bool, StackError> {
    let (program, ctx) = prepare(args, overrides).await?;
    ctx.cancel_on_ctrl_c();

    let plan = program.plan(&ctx).await?;
    if !json {
        println!(
            "{} Running stack '{}' ({} nodes, {} omitted)\n",
            "→".cyan(),
            program.name.bold(),
            plan.graph.order().len(),
            plan.graph.omitted().count()
        );
    }

    let report = ctx.run(plan.graph, &plan.exports).await;

    if let Some(path) = events_path {
        let rendered = serde_json::to_string_pretty(&ctx.events().to_json()).map_err(|e| {
            StackError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        std::fs::write(path, rendered).map_err(|e| StackError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }

    if json {
        let rendered = serde_json::to_string_pretty(&report.to_json(show_secrets)).map_err(|e| {
            StackError::Io {
                path: "<stdout>".to_string(),
                reason: e.to_string(),
            }
        })?;
        println!("{rendered}");
    } else {
        print_report(&report, show_secrets);
    }

    Ok(report.all_succeeded())
}

fn print_report(report: &RunReport, show_secrets: bool) {
    for (name, outcome) in &report.nodes {
        match outcome {
            NodeOutcome::Succeeded { duration, .. } => {
                println!("  {} {} ({}ms)", "✓".green(), name, duration.as_millis())
            }
            NodeOutcome::Failed { error, .. } => {
                println!("  {} {} {}", "✗".red(), name, error.root_cause())
            }
            NodeOutcome::Skipped { cause } => println!(
                "  {} {} skipped: {}",
                "⊘".yellow(),
                name,
                cause.root_cause()
            ),
            NodeOutcome::Omitted { cause } if cause == name => {
                println!("  {} {} omitted", "○".dimmed(), name)
            }
            NodeOutcome::Omitted { cause } => {
                println!("  {} {} omitted (via '{}')", "○".dimmed(), name, cause)
            }
            NodeOutcome::Cancelled => println!("  {} {} cancelled", "⊘".yellow(), name),
        }
    }

    println!("\n{}", "Outputs:".cyan().bold());
    for (name, output) in report.outputs.iter() {
        let marker = if output.error().is_some() {
            "✗".red()
        } else if output.is_absent() {
            "○".dimmed()
        } else {
            "✓".green()
        };
        println!("  {} {}: {}", marker, name, render_export(output, show_secrets));
    }

    println!(
        "\n{} Run {} finished in {}ms",
        if report.all_succeeded() {
            "✓".green()
        } else {
            "✗".red()
        },
        report.run_id,
        report.duration.as_millis()
    );
}

fn render_export(output: &ExportOutput, show_secrets: bool) -> String {
    match output.reveal() {
        Some(value) if show_secrets && output.is_secret() => match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        _ => output.to_string(),
    }
}

async fn validate_program(args: &ProgramArgs) -> Result<(), StackError> {
    let (program, ctx) = prepare(args, SettingsOverrides::default()).await?;
    let plan = program.plan(&ctx).await?;

    println!("{} Stack '{}' is valid", "✓".green(), program.name);
    if let Some(description) = &program.description {
        println!("  {}", description.dimmed());
    }

    println!("  Order:");
    for (position, node) in plan.graph.scheduled().enumerate() {
        let deps: Vec<&str> = node
            .dependencies()
            .iter()
            .map(|d| plan.graph.node(*d).name())
            .collect();
        if deps.is_empty() {
            println!("    {}. {} [{}]", position + 1, node.name(), node.capability());
        } else {
            println!(
                "    {}. {} [{}] after {}",
                position + 1,
                node.name(),
                node.capability(),
                deps.join(", ")
            );
        }
    }

    let omitted: Vec<&str> = plan.graph.omitted().map(|n| n.name()).collect();
    if !omitted.is_empty() {
        println!("  Omitted: {}", omitted.join(", "));
    }
    println!("  Exports: {}", plan.exports.names().join(", "));

    Ok(())
}
