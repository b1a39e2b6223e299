use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;

use marathon::anthropic::AnthropicClient;
use marathon::cli::{Cli, Command};
use marathon::config::MarathonConfig;
use marathon::logging;
use marathon::orchestrator::{MarathonOrchestrator, OrchestratorSettings};
use marathon::reasoning::AnthropicReasoner;
use marathon::stage_data::FileStageData;
use marathon::store::{MemoryStore, ProcessStore};
use marathon::ui::{BatchProgress, Console};
use marathon::worker::{Worker, WorkerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MarathonConfig::load(&cli.config)?;
    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    logging::init(level, config.log_json);

    let store = Arc::new(
        MemoryStore::open(&config.state_path)
            .await
            .with_context(|| format!("opening {}", config.state_path.display()))?,
    );
    let client = AnthropicClient::new(config.api_key.clone(), config.reasoning_timeout())?;
    let reasoner = Arc::new(AnthropicReasoner::new(client, config.model.clone(), config.max_tokens));
    let orchestrator = Arc::new(MarathonOrchestrator::new(
        store.clone(),
        reasoner,
        Arc::new(FileStageData::new(&config.stage_data_dir)),
        OrchestratorSettings::from(&config),
    ));
    let console = Console::default();

    match cli.command {
        Command::Start { job, application } => {
            let process = orchestrator.start_marathon(&job, &application, Utc::now()).await?;
            console.started(&process);
        }
        Command::Worker { once } => {
            if config.api_key.is_empty() {
                bail!("no API key: set ANTHROPIC_API_KEY or api_key in {}", cli.config.display());
            }
            let worker = Worker::new(orchestrator, WorkerSettings::from(&config));
            if once {
                let progress = BatchProgress::start("Running one scheduler pass");
                let report = worker.run_batch(Utc::now()).await;
                progress.finish();
                console.batch_report(&report?);
            } else {
                let (tx, rx) = watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("interrupt received, finishing current batch");
                        let _ = tx.send(true);
                    }
                });
                worker.run(rx).await?;
            }
        }
        Command::Status => {
            console.process_table("Active marathons", &store.active().await?);
        }
        Command::Review => {
            console.process_table("Awaiting human review", &store.escalated().await?);
        }
        Command::History { id } => {
            if store.get(id).await?.is_none() {
                bail!("no process with id {id}");
            }
            let (decisions, events) = orchestrator.history(id).await?;
            console.history(&decisions, &events);
        }
        Command::Resume { id, note } => {
            let process = orchestrator.resume(id, &note, Utc::now()).await?;
            console.resumed(&process);
        }
    }

    Ok(())
}
