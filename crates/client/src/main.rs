//! Synonymer - command line front end for the client core.
//!
//! Reads its backend from `SYNONYMER_API_URL` and logs in with
//! `SYNONYMER_PASSWORD` when the stored session is not valid.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use synonymer_client::{AppContext, Level};
use synonymer_shared::{Explanation, ListParams, PushMessage, SynonymNuance};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "synonymer", version, about = "Look up Swedish synonyms and explanations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved words, ranked against QUERY when given
    Search { query: Option<String> },
    /// Show one explanation
    Show { id: String },
    /// Add a word and (optionally) wait for its explanation
    Add {
        word: String,
        #[arg(long)]
        wait: bool,
    },
    /// Generate a new explanation for a saved word
    Regenerate {
        id: String,
        #[arg(long)]
        wait: bool,
    },
    Delete { id: String },
    /// Explain the nuance between two saved words
    Compare { first: String, second: String },
    /// Print push events until interrupted
    Watch,
}

/// How long `--wait` waits for the backend to finish generating.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("synonymer_client=info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::from_env().context("failed to set up client")?;

    ensure_session(&ctx).await?;
    print_notifications(&ctx);

    match cli.command {
        Command::Search { query } => {
            let items = match query {
                Some(query) => ctx.explanations.search(&query).await?,
                None => {
                    ctx.explanations
                        .list(ListParams::new(0, ctx.config.page_size))
                        .await?
                        .items
                }
            };
            if items.is_empty() {
                println!("No words found");
            }
            for item in &items {
                println!("{}  {}", item.id, item.word);
            }
        }
        Command::Show { id } => {
            let explanation = ctx.explanations.detail(&id).await?;
            print_explanation(&explanation);
        }
        Command::Add { word, wait } => {
            let events = ctx.push.events();
            let created = ctx.explanations.create(&word).await?;
            println!("Added {} ({})", created.word, created.id);
            if wait {
                wait_for_ready(&ctx, events, &created.id).await?;
            }
        }
        Command::Regenerate { id, wait } => {
            let events = ctx.push.events();
            let updated = ctx.explanations.update(&id).await?;
            println!("Regenerating {}", updated.word);
            if wait {
                wait_for_ready(&ctx, events, &updated.id).await?;
            }
        }
        Command::Delete { id } => {
            ctx.explanations.delete(&id).await?;
            println!("Deleted {id}");
        }
        Command::Compare { first, second } => {
            let nuance = ctx.explanations.compare(&first, &second).await?;
            print_nuance(&nuance);
        }
        Command::Watch => {
            let mut events = ctx.push.events();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(message) => println!("{message:?}"),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "missed push events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }
    }

    ctx.push.close();
    Ok(())
}

async fn ensure_session(ctx: &AppContext) -> anyhow::Result<()> {
    if ctx.gate.check_auth().await {
        return Ok(());
    }

    let Ok(password) = std::env::var("SYNONYMER_PASSWORD") else {
        bail!("not logged in; set SYNONYMER_PASSWORD");
    };
    match ctx.gate.login(&password).await {
        Ok(true) => Ok(()),
        Ok(false) => bail!("login accepted but the session was not established"),
        Err(e) => bail!("login failed: {}", e.user_message()),
    }
}

fn print_notifications(ctx: &AppContext) {
    let mut notifications = ctx.notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match notification.level {
                Level::Info => eprintln!("{}", notification.message),
                Level::Error => eprintln!("error: {}", notification.message),
            }
        }
    });
}

async fn wait_for_ready(
    ctx: &AppContext,
    mut events: broadcast::Receiver<PushMessage>,
    id: &str,
) -> anyhow::Result<()> {
    let ready = async {
        loop {
            match events.recv().await {
                Ok(PushMessage::ExplanationReady { id: ready }) if ready == id => return Ok(()),
                Ok(PushMessage::ExplanationError { id: Some(failed), error }) if failed == id => {
                    bail!("generation failed: {error}")
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => bail!("push channel went away"),
            }
        }
    };

    tokio::time::timeout(GENERATION_TIMEOUT, ready)
        .await
        .context("timed out waiting for the explanation")??;

    let explanation = ctx.explanations.detail(id).await?;
    print_explanation(&explanation);
    Ok(())
}

fn print_explanation(explanation: &Explanation) {
    println!("{}", explanation.word);
    match explanation.current_entry() {
        Some(entry) => {
            println!("  {}", entry.explanation);
            if !entry.synonyms.is_empty() {
                println!("  Synonyms: {}", entry.synonyms.join(", "));
            }
        }
        None => println!("  (explanation is being generated)"),
    }
}

fn print_nuance(nuance: &SynonymNuance) {
    println!("{} / {}", nuance.word1, nuance.word2);
    println!("  {}", nuance.nuance_explanation);
    println!("  Context: {}", nuance.context_differences);
    println!(
        "  Formality: {:?}, emotional weight: {:?}",
        nuance.formality_level, nuance.emotional_weight
    );
    for example in &nuance.usage_examples {
        println!("  - {example}");
    }
}
