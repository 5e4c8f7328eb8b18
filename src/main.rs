//! biblio-notify CLI entry point

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{broadcast, watch};

use biblio_notify::cli::{format_notification, Commands, ConfigAction, SessionArgs};
use biblio_notify::{
    AuthState, Cli, ConnectionManager, EventDispatcher, NotificationApi, NotificationId, NotificationStore,
    NotifyConfig, NotifyError, RestNotificationApi, SessionBinding, SessionEvent, WsTransport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };
    init_tracing(&config);

    match run(&cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing(config: &NotifyConfig) {
    let directive = format!("biblio_notify={}", config.logging.level);
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| "biblio_notify=info".parse().expect("static directive")),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli, config: NotifyConfig) -> biblio_notify::Result<()> {
    match &cli.command {
        Commands::Watch(args) => run_watch(cli, config, args).await,
        Commands::Unread(args) => run_unread(cli, &config, args).await,
        Commands::Config(cfg) => run_config(cli, &config, &cfg.action),
    }
}

/// Bind a session and print changes until Ctrl-C
async fn run_watch(cli: &Cli, config: NotifyConfig, args: &SessionArgs) -> biblio_notify::Result<()> {
    let manager = ConnectionManager::new(
        Arc::new(WsTransport::new(config.server.channel_url.clone())),
        EventDispatcher::new(),
        config.reconnect.policy(),
    );
    let api = Arc::new(RestNotificationApi::new(config.server.api_url.clone()));
    let binding = SessionBinding::new(manager, api, &config.session);

    let store = binding.store();
    let mut changes = store.watch();
    let mut events = binding.events();

    let (auth_tx, auth_rx) = watch::channel(AuthState::Authenticated {
        user_id: args.user.clone(),
        credential: args.credential(),
    });
    let runner = {
        let binding = binding.clone();
        tokio::spawn(async move { binding.run(auth_rx).await })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut shown: HashSet<NotificationId> = HashSet::new();
    let mut last_unread: Option<u64> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                // Oldest first so the terminal reads top to bottom.
                for notification in state.notifications().iter().rev() {
                    if shown.insert(notification.id.clone()) {
                        println!("{}", format_notification(notification, cli.format));
                    }
                }
                if last_unread != Some(state.unread_count()) {
                    last_unread = Some(state.unread_count());
                    eprintln!("unread: {}", state.unread_count());
                }
            }

            event = events.recv() => {
                match event {
                    Ok(SessionEvent::SnapshotFailed { message }) => {
                        eprintln!("warning: could not load notifications: {}", message);
                    }
                    Ok(SessionEvent::LiveUpdatesUnavailable { message }) => {
                        eprintln!("warning: live updates unavailable: {}", message);
                    }
                    Ok(SessionEvent::Connection(state)) if cli.verbose => {
                        eprintln!("channel {}", state);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    auth_tx.send_replace(AuthState::Anonymous);
    drop(auth_tx);
    let _ = runner.await;
    Ok(())
}

/// One-off snapshot, unread entries only
async fn run_unread(cli: &Cli, config: &NotifyConfig, args: &SessionArgs) -> biblio_notify::Result<()> {
    let api = RestNotificationApi::new(config.server.api_url.clone());
    let credential = args.credential();
    let snapshot = api.fetch_for_user(&args.user, &credential).await?;

    let store = NotificationStore::default();
    store.seed(snapshot);
    for notification in store.unread_only() {
        println!("{}", format_notification(&notification, cli.format));
    }
    eprintln!("{} unread of {}", store.unread_count(), store.len());
    Ok(())
}

fn run_config(cli: &Cli, config: &NotifyConfig, action: &ConfigAction) -> biblio_notify::Result<()> {
    match action {
        ConfigAction::Show => {
            let text = toml::to_string_pretty(config).map_err(|e| NotifyError::ConfigError {
                message: e.to_string(),
            })?;
            print!("{}", text);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = cli.config_path().ok_or_else(|| NotifyError::ConfigError {
                message: "no config directory on this platform; pass --config".to_string(),
            })?;
            if path.exists() && !force {
                return Err(NotifyError::ConfigError {
                    message: format!("{} already exists (use --force)", path.display()),
                });
            }
            NotifyConfig::default().save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}
