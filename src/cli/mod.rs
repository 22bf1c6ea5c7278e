//! CLI commands for agentmesh using clap.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::agent::{handler_fn, request_handler_fn, Agent};
use crate::config::{get_settings_path, load_config, load_config_or_default, MessagingConfig};
use crate::protocol::envelope::{validate_message, Payload};
use crate::system::MessagingSystem;

/// agentmesh - in-process agent messaging core.
#[derive(Parser)]
#[command(name = "agentmesh")]
#[command(version)]
#[command(about = "agentmesh - wildcard pub/sub and correlated requests between agents", long_about = None)]
pub struct Commands {
    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run an in-process publish/subscribe and request/response scenario
    Demo {
        /// Number of subscribers to `order.*`
        #[arg(long, default_value_t = 12)]
        subscribers: usize,

        /// Make every K-th subscriber fail (0 disables)
        #[arg(long, default_value_t = 0)]
        fail_every: usize,

        /// Settings file (defaults to ~/.agentmesh/settings.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate an envelope JSON file ("-" reads stdin)
    Validate {
        path: PathBuf,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Check a settings file against the allowed ranges
    Validate {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Print the default settings file location
    Path,
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Demo {
                subscribers,
                fail_every,
                config,
            } => cmd_demo(*subscribers, *fail_every, config.as_deref()).await,
            Command::Validate { path } => cmd_validate(path),
            Command::Config(cmd) => cmd_config(cmd),
        }
    }
}

fn resolve_config(path: Option<&Path>) -> Result<MessagingConfig> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(load_config_or_default()),
    }
}

// Command implementations

async fn cmd_demo(subscribers: usize, fail_every: usize, config: Option<&Path>) -> Result<()> {
    let system = MessagingSystem::new(resolve_config(config)?)?;
    let publisher = system.create_messaging_agent()?;

    let mut listeners: Vec<Agent> = Vec::with_capacity(subscribers);
    for n in 1..=subscribers {
        let agent = system.create_messaging_agent()?;
        agent.subscribe("order.*")?;
        let failing = fail_every > 0 && n % fail_every == 0;
        agent.on_message(
            "order.*",
            handler_fn(move |envelope| async move {
                if failing {
                    anyhow::bail!("subscriber {} rejects {}", n, envelope.message_type());
                }
                Ok(())
            }),
        )?;
        listeners.push(agent);
    }

    println!("== publish order.created to {} subscribers", subscribers);
    let routed = publisher
        .publish_message("order.created", json!({"id": 1}))
        .await?;
    println!("{}", serde_json::to_string_pretty(&routed)?);

    println!("== request ping");
    let responder = system.create_messaging_agent()?;
    let responder_id = responder.id();
    responder.on_request(
        "ping",
        request_handler_fn(move |request| async move {
            let mut payload = Payload::new();
            payload.insert("pong".to_string(), json!(true));
            payload.insert("requestId".to_string(), json!(request.id()));
            payload.insert("responder".to_string(), json!(responder_id));
            Ok(payload)
        }),
    )?;
    let response = publisher
        .request_message(responder.id(), "ping", json!({}), None)
        .await?;
    println!("{}", serde_json::to_string_pretty(response.payload())?);

    println!("== stats");
    println!("{}", serde_json::to_string_pretty(&system.stats())?);

    for agent in listeners.iter().chain([&publisher, &responder]) {
        agent.destroy();
    }
    system.shutdown();
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };

    let candidate: serde_json::Value = serde_json::from_str(&content)?;
    match validate_message(&candidate) {
        Ok(envelope) => {
            println!("✓ valid {} envelope {}", envelope.kind(), envelope.id());
            Ok(())
        }
        Err(e) => {
            for violation in &e.violations {
                println!("✗ {}", violation);
            }
            Err(e.into())
        }
    }
}

fn cmd_config(cmd: &ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { path } => {
            let config = resolve_config(path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::Validate { path } => {
            let path = match path {
                Some(path) => path.clone(),
                None => get_settings_path()?,
            };
            load_config(&path)?;
            println!("✓ {} is valid", path.display());
        }
        ConfigCommand::Path => {
            println!("{}", get_settings_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_demo_flags() {
        let cli = Commands::try_parse_from(["agentmesh", "demo", "--subscribers", "3", "--fail-every", "2"])
            .unwrap();
        match cli.command {
            Command::Demo {
                subscribers,
                fail_every,
                config,
            } => {
                assert_eq!(subscribers, 3);
                assert_eq!(fail_every, 2);
                assert!(config.is_none());
            }
            _ => panic!("expected demo"),
        }
    }

    #[test]
    fn parses_config_subcommands() {
        let cli = Commands::try_parse_from(["agentmesh", "--json-logs", "config", "show"]).unwrap();
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show { path: None })));
    }

    #[tokio::test]
    async fn demo_runs_with_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"maxRetries": 0}"#).unwrap();
        cmd_demo(6, 3, Some(&path)).await.unwrap();
    }

    #[test]
    fn validate_reports_violations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelope.json");
        std::fs::write(&path, r#"{"id": "x"}"#).unwrap();
        assert!(cmd_validate(&path).is_err());
    }
}
