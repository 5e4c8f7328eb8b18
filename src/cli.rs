//! CLI argument definitions using clap with subcommand architecture

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::schema::{Credential, Notification, Priority};

/// Live notification client for the library backend
#[derive(Parser, Debug)]
#[command(name = "biblio-notify")]
#[command(about = "Watch and reconcile library notifications in real time")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Override the REST API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Override the notification channel URL
    #[arg(long, value_name = "URL", global = true)]
    pub channel_url: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Show connection lifecycle and debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream notifications until interrupted
    #[command(visible_alias = "w")]
    Watch(SessionArgs),

    /// Print unread notifications from a one-off snapshot
    #[command(visible_alias = "u")]
    Unread(SessionArgs),

    /// Show or initialize the configuration file
    Config(ConfigArgs),
}

/// Identity used to bind a session
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// User whose notifications to load
    #[arg(long, value_name = "ID")]
    pub user: String,

    /// Bearer token
    #[arg(long, env = "BIBLIO_NOTIFY_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl SessionArgs {
    pub fn credential(&self) -> Credential {
        Credential::bearer(self.token.clone())
    }
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Output format for notifications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    /// Config file path in effect
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(NotifyConfig::default_path)
    }

    /// Load the config file and apply command-line overrides
    pub fn resolve_config(&self) -> Result<NotifyConfig> {
        let mut config = match self.config_path() {
            Some(path) => NotifyConfig::load_from(&path)?,
            None => NotifyConfig::default(),
        };
        if let Some(url) = &self.api_url {
            config.server.api_url = url.clone();
        }
        if let Some(url) = &self.channel_url {
            config.server.channel_url = url.clone();
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(config)
    }
}

/// Render one notification for the terminal
pub fn format_notification(notification: &Notification, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string(notification).unwrap_or_default(),
        OutputFormat::Text => {
            let marker = if notification.is_read { ' ' } else { '*' };
            let priority = match notification.priority {
                Priority::High => "HIGH",
                Priority::Normal => "    ",
                Priority::Low => "low ",
            };
            let mut line = format!(
                "{} {} {:>6}  {}  {}",
                marker,
                priority,
                notification.id,
                notification.sent_at.format("%Y-%m-%d %H:%M"),
                notification.title
            );
            if !notification.message.is_empty() {
                line.push_str(": ");
                line.push_str(&notification.message);
            }
            line
        }
    }
}
