//! Command handlers dispatching parsed CLI commands against the
//! application.

// The CLI surface writes its results to stdout.
#![allow(clippy::print_stdout)]

use anyhow::Context;

use super::parser::{Cli, Commands};
use crate::app::App;
use crate::config::PipelineConfig;
use crate::gateway::HttpBackend;

/// Executes the parsed CLI.
///
/// # Errors
///
/// Returns an error when configuration, bootstrap, or the workflow fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut builder = PipelineConfig::builder().from_env();
    if let Some(dir) = cli.session_dir {
        builder = builder.session_dir(dir);
    }
    if let Some(url) = cli.base_url {
        builder = builder.base_url(url);
    }
    let config = builder.build().context("invalid configuration")?;

    match cli.command {
        Commands::Run { prompt, files } => {
            let app = App::bootstrap(config).await?;
            let mut user_files = Vec::with_capacity(files.len());
            for path in files {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let name = path
                    .file_name()
                    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
                user_files.push((name, content));
            }
            let coordinator = app.coordinator(user_files).await;
            coordinator.run(&prompt).await?;
            println!("workflow complete; results in {}", app.config.session_dir.display());
        }
        Commands::Resume => {
            let app = App::bootstrap(config).await?;
            let coordinator = app.coordinator(Vec::new()).await;
            if !coordinator.has_interrupted_workflow().await {
                println!("no interrupted workflow to resume");
                return Ok(());
            }
            let prompt = app.session.user_prompt().await;
            coordinator.run(&prompt).await?;
            println!("workflow complete");
        }
        Commands::Status => {
            let app = App::bootstrap(config).await?;
            let state = app.workflow.snapshot().await;
            println!("resumable:  {}", state.is_resumable());
            println!("tier:       {:?}", state.current_tier);
            println!("topic:      {:?}", state.current_topic_id);
            println!("paper:      {:?}", state.current_paper_id);
            println!("phase:      {:?}", state.paper_phase);
            println!("accepted:   {}", state.acceptance_count);
            println!("rejected:   {}", state.rejection_count);
            println!("papers:     {}", state.papers_completed_count);
            let stats = app.session.stats().await;
            if !stats.is_empty() {
                println!("--- session stats ---");
                let mut keys: Vec<_> = stats.keys().collect();
                keys.sort();
                for key in keys {
                    println!("{key}: {}", stats[key]);
                }
            }
        }
        Commands::Probe => {
            let backend =
                HttpBackend::new("primary", config.base_url.clone(), config.api_key.clone())?;
            let availability = backend.check_availability().await;
            if availability.available {
                println!("backend reachable at {}", config.base_url);
                if availability.models.is_empty() {
                    println!("no loaded models reported");
                } else {
                    println!("loaded models:");
                    for model in availability.models {
                        println!("  {model}");
                    }
                }
            } else {
                println!(
                    "backend unavailable: {}",
                    availability.error.unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                println!("refusing to clear session state without --yes");
                return Ok(());
            }
            let app = App::bootstrap(config).await?;
            app.workflow.clear().await?;
            app.engine.clear().await;
            println!("workflow state cleared");
        }
    }

    Ok(())
}
