use std::time::Duration;

use serde_json::json;

use jobba_api::{Server, ServerConfig};
use jobba_core::{Job, QueueOptions, TaskDescriptor};
use jobba_engine::MemoryEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    jobba_observability::init(config.log_format);
    config.validate()?;

    let server = Server::new(config, MemoryEngine::arc(), Vec::new(), demo_tasks()).await?;

    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

/// Tasks available out of the box.
fn demo_tasks() -> Vec<TaskDescriptor> {
    vec![
        TaskDescriptor::new("email", |job: Job| async move {
            let to = job.params()["to"].as_str().unwrap_or("nobody").to_string();
            job.info(["sending", to.as_str()]).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            job.progress(100.0).await?;
            Ok(json!({"sent": true, "to": to}))
        })
        .with_options(QueueOptions::default().with_concurrency(4)),
        TaskDescriptor::new("echo", |job: Job| async move {
            job.debug([job.params().clone()]).await?;
            Ok(job.params().clone())
        }),
    ]
}
