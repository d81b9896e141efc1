//! iac-autofix CLI
//!
//! Runs the remediation loop for the project in the current (or given)
//! directory, or one of its building blocks on its own.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use iac_autofix::{
    Action, Collaborators, CommandRunner, Credentials, GhCli, IacTool, Mode, OpenAiClient,
    RawConfig, RemediationConfig, RemediationOrchestrator, Result, SecretsManager, ShellRunner,
    TokioSleeper, ToolDetector, ToolOverride, Validate, Validator,
};

/// Exit code for configuration and credential errors.
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "iac-autofix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-healing remediation loop for failing IaC pipelines", long_about = None)]
struct Cli {
    /// Project directory (default: current directory)
    #[arg(long, env = "IAC_AUTOFIX_DIR", global = true)]
    dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "IAC_AUTOFIX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Write the remediation report as JSON to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Default)]
struct Settings {
    /// dry-run or apply
    #[arg(long, env = "IAC_AUTOFIX_MODE", global = true)]
    mode: Option<Mode>,

    #[arg(long, env = "IAC_AUTOFIX_ROLLBACK_ENABLED", global = true)]
    rollback_enabled: Option<bool>,

    #[arg(long, env = "IAC_AUTOFIX_AUTO_MERGE_ENABLED", global = true)]
    auto_merge_enabled: Option<bool>,

    /// "auto" or a tool name (terraform, pulumi, ansible, packer)
    #[arg(long, env = "IAC_AUTOFIX_TOOL", global = true)]
    tool_override: Option<String>,

    /// Retries allowed after the first fix attempt
    #[arg(long, env = "IAC_AUTOFIX_MAX_ATTEMPTS", global = true)]
    max_attempts: Option<u32>,

    #[arg(long, env = "IAC_AUTOFIX_BASE_BRANCH", global = true)]
    base_branch: Option<String>,

    #[arg(long, env = "IAC_AUTOFIX_BRANCH_PREFIX", global = true)]
    branch_prefix: Option<String>,

    /// Comma-separated AI models in priority order
    #[arg(long, env = "IAC_AUTOFIX_MODELS", value_delimiter = ',', global = true)]
    models: Option<Vec<String>>,

    #[arg(long, env = "OPENAI_API_BASE", global = true)]
    ai_api_base: Option<String>,

    #[arg(long, env = "IAC_AUTOFIX_SYSTEM_PROMPT", global = true, hide = true)]
    system_prompt: Option<String>,

    /// Run the tool's init command before validating
    #[arg(long, env = "IAC_AUTOFIX_RUN_INIT", global = true)]
    run_init: Option<bool>,

    /// Overall deadline for one fix request, in seconds
    #[arg(long, env = "IAC_AUTOFIX_FIX_TIMEOUT_SECS", global = true)]
    fix_timeout_secs: Option<u64>,

    /// Where to post the report: pr:<n> or issue:<n>
    #[arg(long, env = "IAC_AUTOFIX_NOTIFY_TARGET", global = true)]
    notify_target: Option<String>,

    /// Error output of the failing pipeline step
    #[arg(long, env = "IAC_AUTOFIX_DIAGNOSTIC", global = true, hide_env_values = true)]
    initial_diagnostic: Option<String>,

    #[arg(long, env = "GITHUB_RUN_ID", global = true)]
    run_id: Option<String>,
}

impl Settings {
    fn into_raw(self, project_dir: Option<PathBuf>) -> RawConfig {
        RawConfig {
            project_dir,
            mode: self.mode,
            rollback_enabled: self.rollback_enabled,
            auto_merge_enabled: self.auto_merge_enabled,
            tool_override: self.tool_override,
            max_attempts: self.max_attempts,
            base_branch: self.base_branch,
            branch_prefix: self.branch_prefix,
            models: self.models,
            ai_api_base: self.ai_api_base,
            system_prompt: self.system_prompt,
            run_init: self.run_init,
            fix_timeout_secs: self.fix_timeout_secs,
            notify_target: self.notify_target,
            initial_diagnostic: self.initial_diagnostic,
            run_id: self.run_id,
            commands: Default::default(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full remediation loop (default)
    Run,
    /// Print the detected IaC tool
    Detect,
    /// Validate the project once
    Validate,
    /// Run one action (install, init, format, validate, deploy) for the project's tool
    Exec {
        action: Action,
    },
    /// Print the resolved command table
    Commands,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so subcommand output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "iac-autofix failed");
            eprintln!("Error: {}", e);
            if e.is_fatal_precondition() {
                EXIT_CONFIG
            } else {
                1
            }
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref(), cli.settings.into_raw(cli.dir))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => remediate(config, cli.report).await,
        Commands::Detect => {
            let tool = resolve_tool(&config);
            println!("{}", tool);
            Ok(if tool.is_known() { 0 } else { 1 })
        }
        Commands::Validate => {
            let tool = resolve_tool(&config);
            if !tool.is_known() {
                eprintln!("No IaC tool detected in {}", config.project_dir.display());
                return Ok(1);
            }
            let runner = Arc::new(ShellRunner::new(config.project_dir.clone()));
            let outcome = Validator::new(runner, config.commands.clone())
                .with_init(config.run_init)
                .validate(tool)
                .await?;

            if outcome.passed {
                println!("{} validation passed", tool);
                Ok(0)
            } else {
                println!("{} validation failed (exit {})", tool, outcome.exit_code);
                if let Some(diagnostic) = outcome.diagnostic {
                    println!("{}", diagnostic);
                }
                Ok(1)
            }
        }
        Commands::Exec { action } => {
            let tool = resolve_tool(&config);
            if !tool.is_known() {
                eprintln!("No IaC tool detected in {}", config.project_dir.display());
                return Ok(1);
            }
            let Some(command) = config.commands.command(tool, action) else {
                tracing::info!(tool = %tool, action = %action, "no command configured, nothing to do");
                return Ok(0);
            };

            let output = ShellRunner::new(config.project_dir.clone())
                .run(command)
                .await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            Ok(output.exit_code)
        }
        Commands::Commands => {
            let tools = match resolve_tool(&config) {
                IacTool::Unknown => IacTool::KNOWN.to_vec(),
                tool => vec![tool],
            };
            for tool in tools {
                println!("[{}]", tool);
                for (action, command) in config.commands.commands_for(tool) {
                    println!("{:<9} {}", action.as_str(), command);
                }
                println!();
            }
            Ok(0)
        }
    }
}

/// Layers defaults, the config file and CLI/env settings, then points the
/// Ansible commands at the project's playbook.
fn load_config(path: Option<&PathBuf>, overrides: RawConfig) -> Result<RemediationConfig> {
    let mut raw = RawConfig::default();
    if let Some(path) = path {
        raw = raw.merge(RawConfig::load(path)?);
    }
    let mut config = raw.merge(overrides).resolve()?;
    if let Some(playbook) = ToolDetector::new(config.project_dir.clone()).ansible_playbook() {
        config.commands.use_ansible_playbook(&playbook);
    }

    for warning in config.validate().into_result()? {
        tracing::warn!(warning = %warning, "configuration warning");
    }
    Ok(config)
}

fn resolve_tool(config: &RemediationConfig) -> IacTool {
    match config.tool_override {
        ToolOverride::Tool(tool) => tool,
        ToolOverride::Auto => ToolDetector::new(config.project_dir.clone()).detect(),
    }
}

async fn remediate(config: RemediationConfig, report_path: Option<PathBuf>) -> Result<i32> {
    let mut secrets = SecretsManager::new();
    let credentials = Credentials::from_env(&mut secrets)?;

    let gh = Arc::new(
        GhCli::new(config.project_dir.clone()).with_token(credentials.vcs_token.clone()),
    );
    let collaborators = Collaborators {
        runner: Arc::new(ShellRunner::new(config.project_dir.clone())),
        completion: Arc::new(OpenAiClient::with_api_base(
            credentials.ai_api_key.clone(),
            config.ai_api_base.clone(),
        )),
        vcs: gh.clone(),
        sink: gh,
        sleeper: Arc::new(TokioSleeper),
    };

    let orchestrator = RemediationOrchestrator::new(config, collaborators, secrets);
    let report = orchestrator.run().await;

    println!(
        "{}: {} ({} attempt(s), branch {})",
        report.run_id,
        report.outcome.name(),
        report.attempts.len(),
        report.branch
    );

    if let Some(path) = report_path {
        std::fs::write(&path, report.to_json()?)?;
        tracing::info!(path = %path.display(), "report written");
    }

    Ok(report.exit_code())
}
