mod automation;
mod config;
mod context;
mod git;
mod job;
mod manifests;
mod objects;
mod registry;
mod server;
mod store;
mod update;

use crate::automation::Automation;
use crate::config::Config;
use crate::git::Repo;
use crate::job::{Queue, Worker, WorkerConfig};
use crate::manifests::Manifests;
use crate::registry::Cache;
use crate::server::ServerConfig;
use crate::store::Store;
use kube::Client;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!(?config, "Starting");

    let client = Client::try_default().await?;

    // live workloads

    let (store, runner) = Store::new(store::watch_all(client));

    // releases

    let manifests = Manifests::new(config.manifest_root());
    let repo = Repo::new(
        &config.repo_path,
        config.git_remote.clone(),
        &config.git_branch,
        config.git_author.clone(),
    );
    let registry = Cache::new(registry::Client::new(), config.registry_cache_ttl);
    let queue = Queue::default();

    let worker = Worker::new(
        queue.clone(),
        store.clone(),
        manifests.clone(),
        repo,
        registry.clone(),
        config.namespaces.clone(),
        WorkerConfig {
            timeout: config.job_timeout,
            heartbeat: config.job_heartbeat_interval,
        },
    );

    let (notifier, automation) = Automation::new(
        queue.clone(),
        store.clone(),
        manifests,
        registry,
        config.namespaces.clone(),
    )
    .run(config.automation_interval);

    // server

    info!("Binding to {}", config.bind_addr);

    let server = server::run(
        ServerConfig {
            bind_addr: config.bind_addr.clone(),
        },
        store,
        queue.clone(),
        notifier,
    );

    tokio::select! {
        result = server => result?,
        result = runner => result?,
        result = worker.run() => result?,
        result = automation => result?,
        result = job::reclaim(queue, config.job_stale_after) => result?,
    }

    Ok(())
}
