//! Service wiring
//!
//! Directory store + loopback host + alert engine. Host events come from an
//! input reader; alert events are logged as JSON.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use kxradar_common::alert::{run_alert_engine, AlertBus, AlertEvent};
use kxradar_common::host::LoopbackHost;
use kxradar_common::store::{BlobStore, DirStore};
use kxradar_common::tones::ToneSequence;
use tokio::io::AsyncBufRead;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::events::{feed_events, FeedStats};

/// Host subscriptions the alert engine holds (ride state + radar)
const ENGINE_LISTENERS: usize = 2;

/// Resolved runtime options
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub store_dir: PathBuf,
    pub stream_capacity: usize,
    pub event_capacity: usize,
}

/// What happened during one run
#[derive(Debug, Clone)]
pub struct ServiceReport {
    /// `None` if shutdown arrived before the input ended
    pub feed: Option<FeedStats>,
    /// Tone sequences dispatched to the host, oldest first
    pub dispatched: Vec<ToneSequence>,
    /// Alert events written to the log
    pub events_logged: usize,
}

/// Run until `shutdown` resolves
///
/// End of input does not stop the service; the engine keeps following
/// settings changes until shutdown.
pub async fn run_service<R, F>(options: ServiceOptions, input: R, shutdown: F) -> Result<ServiceReport>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let store = DirStore::open(&options.store_dir).with_context(|| {
        format!(
            "Failed to open settings store at {}",
            options.store_dir.display()
        )
    })?;
    info!("Settings store: {}", store.dir().display());
    let store: Arc<dyn BlobStore> = Arc::new(store);

    let host = Arc::new(LoopbackHost::new());
    let bus = AlertBus::new(options.event_capacity);
    let logger = tokio::spawn(log_alert_events(bus.subscribe()));
    let ride_acks = bus.subscribe();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut engine = tokio::spawn(run_alert_engine(
        store,
        Arc::clone(&host),
        bus,
        options.stream_capacity,
        async move {
            let _ = stop_rx.await;
        },
    ));

    // Events pushed before the engine has subscribed would be lost
    while host.consumer_count() < ENGINE_LISTENERS {
        if engine.is_finished() {
            (&mut engine)
                .await
                .context("Alert engine task failed")?
                .context("Alert engine failed to subscribe")?;
            anyhow::bail!("Alert engine exited during startup");
        }
        tokio::task::yield_now().await;
    }
    info!("Ready for host events");

    tokio::pin!(shutdown);
    let feed = tokio::select! {
        stats = feed_events(input, &host, Some(ride_acks)) => {
            let stats = stats.context("Failed to read host events")?;
            info!(
                "Input closed ({} events applied, {} rejected), waiting for shutdown",
                stats.applied, stats.rejected
            );
            Some(stats)
        }
        _ = &mut shutdown => None,
    };
    if feed.is_some() {
        shutdown.await;
    }

    let _ = stop_tx.send(());
    engine
        .await
        .context("Alert engine task failed")?
        .context("Alert engine failed")?;
    let events_logged = logger.await.context("Alert event logger failed")?;

    Ok(ServiceReport {
        feed,
        dispatched: host.dispatched(),
        events_logged,
    })
}

/// Log every alert event as one JSON line until the bus closes
async fn log_alert_events(mut events: broadcast::Receiver<AlertEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    info!("Alert event: {}", json);
                    logged += 1;
                }
                Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!("Alert event log lagged, skipped {} events", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
    logged
}
