use std::fmt::Display;

use anyhow::{Context, Result};
use clap::Args;
use resources::{
    client::{ClientContext, HttpListWatcher},
    config::AppConfig,
    informer::{ListWatcher, ObjectStore},
    objects::{namespace::Namespace, pod::Pod, Object},
};

use crate::ResourceKind;

#[derive(Args)]
pub struct Arg {
    /// Kind of resource
    #[clap(arg_enum)]
    kind: ResourceKind,
    /// Print the objects as JSON
    #[clap(long)]
    json: bool,
}

impl Arg {
    pub async fn handle(&self, config: &AppConfig) -> Result<()> {
        let context = ClientContext::new(config.cluster.clone());
        match self.kind {
            ResourceKind::Namespaces => {
                snapshot::<Namespace>(context, self.kind.path(), config, self.json).await
            },
            ResourceKind::Pods => {
                snapshot::<Pod>(context, self.kind.path(), config, self.json).await
            },
        }
    }
}

async fn snapshot<T: Object + Display>(
    context: ClientContext,
    resource: &str,
    config: &AppConfig,
    json: bool,
) -> Result<()> {
    let lw = HttpListWatcher::<T>::new(context, resource);
    let list = lw
        .list(&config.informer.list_options)
        .await
        .with_context(|| format!("Failed to list {}", resource))?;

    let store = ObjectStore::new();
    store.replace(list.items);

    let mut objects = store.list();
    objects.sort_by_key(|o| o.key());
    if json {
        println!("{}", serde_json::to_string_pretty(&objects)?);
        return Ok(());
    }
    println!("# {} {} at version {}", objects.len(), resource, list.resource_version);
    for object in objects {
        println!("{}\n", object);
    }
    Ok(())
}
