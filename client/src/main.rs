use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use refractor_client::api::client::ApiClient;
use refractor_client::config::ClientConfig;
use refractor_client::engine::permissions::{
    MatchMode, Permissions, evaluate, evaluate_named, granted_flags, parse_flag, parse_mask,
};
use refractor_client::engine::reconciler::LiveState;
use refractor_client::live::connection::{CloseReason, LiveConnection};

#[derive(Parser)]
#[command(name = "refractor", version, about = "Refractor live feed client")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "refractor.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a snapshot, follow the live feed and log changes until Ctrl-C.
    Watch,
    /// Check a permission mask against one or more flags.
    Perms {
        /// Decimal permission mask, as carried on the user object.
        mask: String,
        /// Flag name from the table (repeatable).
        #[arg(long = "flag", required = true)]
        flags: Vec<String>,
        /// `all` or `any`.
        #[arg(long, default_value = "all")]
        mode: String,
    },
    /// Print the permission flag table.
    Flags,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Watch => watch(ClientConfig::load(&cli.config)?).await,
        Command::Perms { mask, flags, mode } => check_perms(&mask, &flags, &mode),
        Command::Flags => {
            for (name, flag) in Permissions::all().iter_names() {
                println!("{:>2}  {:<24} {}", flag.bits().trailing_zeros(), name, flag.bits());
            }
            Ok(())
        }
    }
}

fn check_perms(mask: &str, flags: &[String], mode: &str) -> Result<()> {
    let mask = parse_mask(Some(mask));
    let required = flags
        .iter()
        .map(|name| parse_flag(name).ok_or_else(|| anyhow!("unknown permission flag {name}")))
        .collect::<Result<Vec<_>>>()?;

    let granted = granted_flags(mask);
    if granted.is_empty() {
        println!("granted: (none)");
    } else {
        println!("granted: {}", granted.join(", "));
    }

    if evaluate_named(mask, &required, mode) {
        println!("allowed");
    } else {
        println!("denied");
    }
    Ok(())
}

async fn watch(config: ClientConfig) -> Result<()> {
    let api = ApiClient::new(&config.api.base_url, config.api_token())?;
    let (mut conn, handle) = LiveConnection::new(config.to_live_settings());

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, disconnecting");
            shutdown.disconnect();
        }
    });

    let Some(user) = handle.unless_disconnected(api.fetch_current_user()).await else {
        return Ok(());
    };
    let mask = match user {
        Ok(user) => {
            let mask = user.permissions();
            info!(user = %user.username, granted = ?granted_flags(mask), "authenticated");
            mask
        }
        Err(e) => {
            warn!(error = %e, "could not fetch current user, assuming no permissions");
            Permissions::empty()
        }
    };
    let show_chat = evaluate(mask, &[Permissions::VIEW_CHAT_RECORDS], MatchMode::All);

    let mut live = LiveState::new();
    if handle.unless_disconnected(load_snapshot(&api, &mut live)).await.is_none() {
        return Ok(());
    }

    loop {
        match conn.run(&mut live).await {
            Ok(CloseReason::Requested) => break,
            Ok(reason) => warn!(?reason, "live feed lost"),
            Err(e) => warn!(error = %e, "live feed error"),
        }
        log_summary(&live, show_chat);

        if handle.is_disconnect_requested() {
            break;
        }
        conn.mark_reconnecting();
        let delay = tokio::time::sleep(config.reconnect_delay());
        if handle.unless_disconnected(delay).await.is_none() {
            break;
        }

        // Events sent while we were away are not replayed.
        if handle.unless_disconnected(load_snapshot(&api, &mut live)).await.is_none() {
            break;
        }
    }

    log_summary(&live, show_chat);
    Ok(())
}

async fn load_snapshot(api: &ApiClient, live: &mut LiveState) {
    match api.fetch_servers().await {
        Ok(servers) => live.load_snapshot(servers),
        Err(e) => warn!(error = %e, "failed to load server snapshot, keeping previous state"),
    }
}

fn log_summary(live: &LiveState, show_chat: bool) {
    for srv in live.servers() {
        let players: Vec<&str> = srv.players().iter().map(|p| p.current_name.as_str()).collect();
        if show_chat {
            info!(
                server_id = srv.id,
                name = %srv.name,
                online = srv.online,
                ?players,
                chat_lines = live.chat_log(srv.id).len(),
                "server"
            );
        } else {
            info!(server_id = srv.id, name = %srv.name, online = srv.online, ?players, "server");
        }
    }
}
