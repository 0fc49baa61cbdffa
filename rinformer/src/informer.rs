use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use resources::{
    client::{ClientContext, HttpListWatcher},
    config::{AppConfig, InformerConfig},
    informer::{Informer, InformerFactory},
    objects::{namespace::Namespace, pod::Pod, Object},
};

use crate::{
    utils::{logging_handler, shutdown_signal},
    ResourceKind,
};

#[derive(Args)]
pub struct Arg {
    /// Kind of resource
    #[clap(arg_enum, default_value = "namespaces")]
    kind: ResourceKind,
    /// Seconds to wait for the initial sync
    #[clap(long, default_value_t = 10)]
    sync_timeout: u64,
    /// Resync period in seconds, overrides the config file
    #[clap(long)]
    resync: Option<u64>,
}

impl Arg {
    pub async fn handle(&self, config: &AppConfig) -> Result<()> {
        let context = ClientContext::new(config.cluster.clone());
        let informer_config = informer_config(config, self.resync);
        let timeout = Duration::from_secs(self.sync_timeout);
        match self.kind {
            ResourceKind::Namespaces => {
                run::<Namespace>(context, self.kind.path(), informer_config, timeout).await
            },
            ResourceKind::Pods => run::<Pod>(context, self.kind.path(), informer_config, timeout).await,
        }
    }
}

async fn run<T: Object>(
    context: ClientContext,
    resource: &str,
    config: InformerConfig,
    timeout: Duration,
) -> Result<()> {
    tracing::info!("Informer app started");
    let informer = Informer::new(HttpListWatcher::<T>::new(context, resource), config);
    informer.add_event_handler(logging_handler::<T>())?;
    informer.start()?;

    if !informer.wait_for_cache_sync(timeout).await? {
        informer.stop().await?;
        bail!("Timed out waiting for caches to sync");
    }
    tracing::info!("Cache synced, {} {} cached", informer.list()?.len(), resource);

    shutdown_signal().await;
    informer.stop().await?;
    Ok(())
}

#[derive(Args)]
pub struct SharedArg {
    /// Seconds to wait for the initial sync
    #[clap(long, default_value_t = 10)]
    sync_timeout: u64,
    /// Resync period in seconds, overrides the config file
    #[clap(long)]
    resync: Option<u64>,
}

impl SharedArg {
    pub async fn handle(&self, config: &AppConfig) -> Result<()> {
        tracing::info!("Shared Informer app started");
        let factory = InformerFactory::new(
            ClientContext::new(config.cluster.clone()),
            informer_config(config, self.resync),
        );
        factory.namespaces().add_event_handler(logging_handler())?;
        factory.pods().add_event_handler(logging_handler())?;
        // the same informer is handed out again, so both handlers share one cache
        factory.pods().add_event_handler(logging_handler())?;
        factory.start()?;

        if !factory
            .wait_for_cache_sync(Duration::from_secs(self.sync_timeout))
            .await?
        {
            factory.shutdown().await;
            bail!("Timed out waiting for caches to sync");
        }
        tracing::info!(
            "Caches synced, {} namespaces and {} pods cached",
            factory.namespaces().list()?.len(),
            factory.pods().list()?.len()
        );

        shutdown_signal().await;
        factory.shutdown().await;
        Ok(())
    }
}

fn informer_config(config: &AppConfig, resync: Option<u64>) -> InformerConfig {
    match resync {
        Some(secs) => config
            .informer
            .clone()
            .with_resync_period(Duration::from_secs(secs)),
        None => config.informer.clone(),
    }
}
