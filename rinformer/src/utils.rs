use anyhow::Error;
use resources::{informer::EventHandler, objects::Object};

pub fn logging_handler<T: Object>() -> EventHandler<T> {
    EventHandler::new()
        .on_add(|new: T| async move {
            tracing::info!("Adding: {} {}", new.kind(), new.key());
            Ok::<(), Error>(())
        })
        .on_update(|old: T, new: T| async move {
            tracing::info!(
                "Updating: {} {} ({} -> {})",
                new.kind(),
                new.key(),
                old.resource_version(),
                new.resource_version()
            );
            Ok::<(), Error>(())
        })
        .on_delete(|old: T| async move {
            tracing::info!("Deleting: {} {}", old.kind(), old.key());
            Ok::<(), Error>(())
        })
}

pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("Shutting Down");
}
