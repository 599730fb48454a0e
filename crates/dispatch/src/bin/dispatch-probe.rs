//! Dispatch probe
//!
//! Submits one dispatch attempt and prints the outcome. Useful to check a
//! deployment's contract fleet and subscription endpoint end to end.
//!
//! Usage:
//!   cargo run --bin dispatch-probe -- "Ada Lovelace" "Question about my invoice"
//!   cargo run --bin dispatch-probe -- --in-memory "Ada Lovelace" "Hello"
//!
//! Configuration comes from `SUPPORTCHAT_*` environment variables (a `.env`
//! file is loaded if present). `--in-memory` needs no backend: it races three
//! seeded contracts, the first of which accepts after two seconds.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use supportchat_dispatch::{
    ChatDispatcher, DispatchConfig, InMemoryBackend, NoIpLookup, Outcome, SessionClock,
};
use supportchat_shared::{ContractRecord, VisitorForm};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Three active contracts, one per session, so every hour has an eligible one
fn seeded_backend() -> InMemoryBackend {
    let contracts = (1..=3)
        .map(|session| ContractRecord {
            id: Some(format!("demo-contract-{}", session)),
            session: Some(json!(session)),
            status: Some("active".to_string()),
            chat_miss_time: Some(json!(30)),
        })
        .collect();

    let mut backend = InMemoryBackend::new().with_contracts(contracts);
    for session in 1..=3 {
        backend = backend.accept_after(
            &format!("demo-contract-{}", session),
            Duration::from_secs(2),
        );
    }
    backend
}

async fn run() -> anyhow::Result<Outcome> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let in_memory = match args.iter().position(|arg| arg == "--in-memory") {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    };

    let (name, headline) = match args.as_slice() {
        [name, headline] => (name.clone(), headline.clone()),
        _ => anyhow::bail!("usage: dispatch-probe [--in-memory] <customer-name> <headline>"),
    };
    if name.trim().is_empty() || headline.trim().is_empty() {
        anyhow::bail!("customer name and headline must not be empty");
    }

    let dispatcher = if in_memory {
        ChatDispatcher::new(
            Arc::new(seeded_backend()),
            SessionClock::local(),
            Arc::new(NoIpLookup),
            DispatchConfig::default(),
        )
    } else {
        let config = DispatchConfig::from_env().context("Failed to load configuration")?;
        ChatDispatcher::from_config(config).context("Failed to create backend client")?
    };

    Ok(dispatcher.submit(VisitorForm::new(name, headline)).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(Outcome::Connected(active)) => {
            println!(
                "Connected: chat {} (contract {})",
                active.chat.id, active.contract.id
            );
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            println!("Outcome: {}", outcome);
            if let Some(message) = outcome.user_message() {
                println!("{}", message);
            }
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
