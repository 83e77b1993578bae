use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use mfw::cli::{Cli, Command, OutputFormat, Request};
use mfw::codec::Operation;
use mfw::control::ControlChannel;
use mfw::engine::{server, EngineConfig, Matcher, RuleStore};
use mfw::models::rule::Rule;
use mfw::policy::{parse_policy_file, validate_policy, PolicyFile, PolicyRule};
use mfw::state::RulesState;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const VIEW_HEADER: &str = "I/O  Version  \
    S_Addr                            S_Port \
    D_Addr                            D_Port Proto";

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args_os().len() == 1 {
        Cli::command().print_help()?;
        return Ok(());
    }

    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Serve { config, socket }) => serve(config.as_deref(), socket.clone()).await,
        None => {
            env_logger::init();
            run_request(&cli)
        }
    }
}

async fn serve(config_path: Option<&Path>, socket: Option<PathBuf>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(socket) = socket {
        config.socket_path = socket;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let store = Arc::new(RuleStore::with_capacity_limit(config.max_rules));
    let matcher = Matcher::new(store, config.policy);
    server::run(&config, matcher)
        .await
        .context("Engine stopped with an error")?;

    log::info!("Engine shut down");
    Ok(())
}

fn run_request(cli: &Cli) -> Result<()> {
    let request = cli.to_request()?;
    let mut channel = cli.channel();

    match request {
        Request::Submit { operation, rule } => {
            let result = match operation {
                Operation::Remove => RulesState::remove_rule(channel.as_mut(), &rule),
                _ => RulesState::add_rule(channel.as_mut(), &rule),
            };
            result.context("Failed to submit rule")?;
        }
        Request::Policy { operation, path } => {
            apply_policy_file(channel.as_mut(), &path, operation)?;
        }
        Request::View => {
            view_rules(channel.as_mut(), cli.format)?;
        }
    }

    Ok(())
}

fn apply_policy_file(
    channel: &mut dyn ControlChannel,
    policy_path: &Path,
    operation: Operation,
) -> Result<()> {
    println!("Reading policy file: {}", policy_path.display());

    let policy = parse_policy_file(policy_path)?;
    validate_policy(&policy)?;
    println!("Policy validation passed!");

    let applied = RulesState::apply_policy(channel, &policy, operation)
        .context("Failed to apply policy")?;

    let verb = match operation {
        Operation::Remove => "removed",
        _ => "added",
    };
    println!("Successfully {} {} rules!", verb, applied);
    Ok(())
}

fn view_rules(channel: &mut dyn ControlChannel, format: OutputFormat) -> Result<()> {
    let rules = RulesState::list_rules(channel).context("Failed to read rules")?;

    match format {
        OutputFormat::Table => print!("{}", render_table(&rules)),
        OutputFormat::Yaml => {
            let output = serde_yaml::to_string(&to_policy(&rules))
                .context("Failed to serialize rules to YAML")?;
            println!("{}", output);
        }
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(&to_policy(&rules))
                .context("Failed to serialize rules to JSON")?;
            println!("{}", output);
        }
    }

    Ok(())
}

fn render_table(rules: &[Rule]) -> String {
    let mut table = String::from(VIEW_HEADER);
    table.push('\n');
    for rule in rules {
        table.push_str(&rule.to_string());
        table.push('\n');
    }
    table
}

fn to_policy(rules: &[Rule]) -> PolicyFile {
    PolicyFile {
        rules: rules.iter().map(PolicyRule::from_rule).collect(),
    }
}
