use std::time::Duration;

use anyhow::Result;
use clap::Args;
use futures_util::StreamExt;
use resources::{
    client::{ClientContext, HttpListWatcher},
    config::AppConfig,
    informer::{ListOptions, ListWatcher, WatchError},
    models::watch::WatchEvent,
    objects::pod::Pod,
};

#[derive(Args)]
pub struct Arg {
    /// Label selector of the pods to watch
    #[clap(short = 'l', long, default_value = "run=server")]
    selector: String,
    /// Namespace of the pods to watch
    #[clap(short, long, default_value = "default")]
    namespace: String,
    /// Seconds to keep watching
    #[clap(long, default_value_t = 60)]
    duration: u64,
}

impl Arg {
    pub async fn handle(&self, config: &AppConfig) -> Result<()> {
        let lw = HttpListWatcher::<Pod>::new(ClientContext::new(config.cluster.clone()), "pods");
        let options = ListOptions::default()
            .with_label_selector(&self.selector)
            .with_field_selector(&format!("metadata.namespace={}", self.namespace));
        let mut stream = lw.watch(&options, "").await?;

        let deadline = tokio::time::sleep(Duration::from_secs(self.duration));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = stream.next() => match event {
                    None => {
                        tracing::warn!("Api-server watch disconnect");
                        break;
                    },
                    Some(Ok(event)) => print_event(&event),
                    Some(Err(WatchError::Decode(e))) => tracing::warn!("Skipping malformed watch event: {}", e),
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }
}

fn print_event(event: &WatchEvent<Pod>) {
    match event {
        WatchEvent::Added { object } => {
            println!("Event: Added {} ({})", object.metadata.name, object.phase())
        },
        WatchEvent::Modified { object } => {
            println!("Event: Modified {} ({})", object.metadata.name, object.phase())
        },
        WatchEvent::Deleted { object } => println!("Event: Deleted {}", object.metadata.name),
        WatchEvent::Bookmark { .. } => {},
        WatchEvent::Error { status } => {
            tracing::warn!("Watch error {}: {}", status.code, status.message)
        },
    }
}
