//! Entry point: parses configuration, opens the ledger, and spawns every
//! long-lived task (processor, elections, gateway reactor, client
//! server, alarm) the way the teacher's `Node::spawn_all` brings up a
//! fixed set of `LongLivedService`s over one runtime.

mod adapters;
mod alarm;
mod args;
mod client_server;
mod config;
mod election_feed;
mod gateway;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;

use args::Args;
use config::Config;

use lattice_election::Elections;
use lattice_processor::{Observers, Processor};
use lattice_query::{BlockCache, BlockWaiting, QueryScheduler, Subscriptions};
use lattice_store::{Backend, WeightCache, DB};

const OBSERVER_CHANNEL_CAPACITY: usize = 4096;

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "node exited with an error");
            ExitCode::from(3)
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = config
        .log_filter
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(Backend::create_or_open(&config.db_path));
    let weights = Arc::new(WeightCache::new());
    db.rebuild_weight_cache(&weights)?;
    tracing::info!(total_weight = %weights.total().0, "representative weight cache seeded from storage");

    let observers = Observers::new(OBSERVER_CHANNEL_CAPACITY);
    let queue = Arc::new(lattice_processor::ActionQueue::new());
    let scheduler = Arc::new(QueryScheduler::new());
    let cache = Arc::new(BlockCache::new());
    let waiting = Arc::new(BlockWaiting::new());
    let subscriptions = Arc::new(Subscriptions::new());
    let elections = Arc::new(Elections::new(Arc::clone(&weights), Arc::clone(&queue)));

    let processor = Arc::new(
        Processor::new(Arc::clone(&db), Arc::clone(&weights), observers.clone(), Arc::clone(&queue))
            .with_sync(Arc::new(adapters::SyncAdapter(Arc::clone(&scheduler))))
            .with_cache(Arc::new(adapters::CacheAdapter(Arc::clone(&cache))))
            .with_waiting(Arc::new(adapters::WaitingAdapter(Arc::clone(&waiting)))),
    );

    let gateway = Arc::new(gateway::GatewayReactor::new(
        config.gateway_url.clone(),
        Arc::clone(&queue),
        Arc::clone(&scheduler),
        Arc::clone(&cache),
    ));

    let client_server = Arc::new(client_server::ClientServer {
        listen_addr: config.client_listen_addr.clone(),
        db: Arc::clone(&db),
        observers: observers.clone(),
        subscriptions: Arc::clone(&subscriptions),
        queue: Arc::clone(&queue),
        processor: Arc::clone(&processor),
    });

    let online_weight = weights.total().0.min(u64::MAX as u128) as u64;

    let mut tasks = JoinSet::new();
    tasks.spawn(async move { processor.run().await });
    {
        let observers = observers.clone();
        let elections = Arc::clone(&elections);
        tasks.spawn(async move { election_feed::run(observers, elections).await });
    }
    tasks.spawn(async move { elections.run(online_weight).await });
    tasks.spawn(async move { gateway.run().await });
    tasks.spawn(async move {
        if let Err(err) = client_server.run().await {
            tracing::error!(%err, "client server stopped");
        }
    });
    tasks.spawn(async move { alarm::run(cache, waiting, subscriptions).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        result = tasks.join_next() => {
            if let Some(Err(err)) = result {
                tracing::error!(%err, "a long-lived task panicked");
            }
        }
    }

    tasks.shutdown().await;
    Ok(())
}
