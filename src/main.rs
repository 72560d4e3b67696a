//! EquityCompass command-line client
//!
//! Usage:
//!   equitycompass status
//!   equitycompass send-code <email>
//!   equitycompass login <email> [code]
//!   equitycompass logout
//!   equitycompass profile
//!   equitycompass nickname <name>
//!
//! `login` with a code verifies one sent by an earlier `send-code`. Without a
//! code it requests one and prompts for it on stdin.

use anyhow::{bail, Context, Result};
use equitycompass_client::{load_settings, AuthManager, AuthState, ClientSettings, User};
use log::info;
use std::io::{BufRead, Write};

const USAGE: &str = "usage: equitycompass <status|send-code <email>|login <email> [code]|logout|profile|nickname <name>>";

/// Info by default. Any `RUST_LOG` value raises the level to debug for every
/// module; its per-module directives are not honored.
fn init_logging(settings: &ClientSettings) {
    let log_level = std::env::var("RUST_LOG")
        .map(|_| log::LevelFilter::Debug)
        .unwrap_or(log::LevelFilter::Info);

    let log_file = settings
        .log_to_file
        .then(|| settings.resolved_data_dir())
        .flatten()
        .and_then(|dir| {
            std::fs::create_dir_all(&dir).ok()?;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("equitycompass.log"))
                .ok()
        });

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log_level).format_timestamp_millis();
    if let Some(file) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    // Fallback to stderr if file logging is off or failed
    builder.init();
}

fn print_user(user: &User) {
    println!("Signed in as {} (id {})", user.display_name(), user.id);
    println!("  Email: {}", user.email);
    if let Some(created) = user.created_at_utc() {
        println!("  Member since: {}", created.format("%Y-%m-%d"));
    }
    if let Some(plan) = &user.plan {
        println!(
            "  Plan: {:?}, remaining quota: {}{}",
            plan.plan_type,
            plan.remaining_quota,
            if plan.is_expired() { " (expired)" } else { "" }
        );
    }
}

fn read_code() -> Result<String> {
    print!("Verification code: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read verification code")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = load_settings();
    init_logging(&settings);
    info!("Starting EquityCompass client v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    let manager = AuthManager::from_settings(&settings)
        .await
        .context("Failed to initialize client")?;

    match (command, &args[1.min(args.len())..]) {
        ("status", _) => match manager.state() {
            AuthState::Authenticated(session) => print_user(&session.user),
            other => println!("Not signed in ({})", other.label()),
        },
        ("send-code", [email]) => {
            let dispatch = manager.send_verification_code(email).await?;
            println!("Verification code sent to {}", dispatch.email);
            if let Some(code) = dispatch.code {
                println!("  Debug code: {}", code);
            }
        }
        ("login", [email]) => {
            let dispatch = manager.send_verification_code(email).await?;
            println!("Verification code sent to {}", dispatch.email);
            let code = read_code()?;
            let user = manager.login(email, &code).await?;
            print_user(&user);
        }
        ("login", [email, code]) => {
            // Code came from a previous run
            manager.resume_pending_code(email)?;
            let user = manager.login(email, code).await?;
            print_user(&user);
        }
        ("logout", _) => {
            match manager.logout() {
                Some(notify) => {
                    // Let the best-effort notification finish before the runtime exits
                    let _ = notify.await;
                    println!("Signed out");
                }
                None => println!("Not signed in"),
            }
        }
        ("profile", _) => {
            let user = manager.fetch_profile().await?;
            print_user(&user);
        }
        ("nickname", [name]) => {
            let user = manager.update_nickname(name).await?;
            print_user(&user);
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
