//! Change stream adapter
//!
//! Gives the persisted settings and the host's push callbacks one shape: a
//! [`ChangeStream`], an infinite, non-restartable stream that is cancelled by
//! calling [`ChangeStream::cancel`] or by dropping it.
//!
//! Host listeners are registered exactly once when the stream is created and
//! unregistered exactly once when it is dropped, on every exit path. The host
//! callback never blocks: values go into a bounded broadcast ring that drops
//! the oldest entries when the consumer falls behind.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::host::{Callback, ListenerId, RadarHost, RideState, StreamState};
use crate::settings::{decode_or_default, Configuration, SchemaVersion};
use crate::store::BlobStore;

/// Default per-subscription buffer for host pushes
pub const DEFAULT_STREAM_CAPACITY: usize = 32;

/// Unregisters a host listener when dropped
struct ListenerGuard {
    host: Arc<dyn RadarHost>,
    id: ListenerId,
    source_name: String,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.host.remove_consumer(self.id);
        info!("Closed {} stream (listener {})", self.source_name, self.id);
    }
}

/// Cancelable stream of state updates
pub struct ChangeStream<T> {
    inner: BoxStream<'static, T>,
    _guard: Option<ListenerGuard>,
}

impl<T> ChangeStream<T> {
    fn new(inner: BoxStream<'static, T>, guard: Option<ListenerGuard>) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }

    /// Stop the stream and release its host listener, if any
    pub fn cancel(self) {}
}

impl<T> Stream for ChangeStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

/// Suppress items equal to the previously emitted one
pub fn distinct_until_changed<S, T>(stream: S) -> impl Stream<Item = T>
where
    S: Stream<Item = T> + Send + 'static,
    T: PartialEq + Clone + Send + 'static,
{
    async_stream::stream! {
        let mut stream = Box::pin(stream);
        let mut last: Option<T> = None;
        while let Some(item) = stream.next().await {
            if last.as_ref() == Some(&item) {
                continue;
            }
            last = Some(item.clone());
            yield item;
        }
    }
}

/// Live settings: decoded (or defaulted) on every store notification,
/// repeated values suppressed
pub fn settings_stream<S: BlobStore + ?Sized>(store: &S) -> ChangeStream<Configuration> {
    let key = SchemaVersion::CURRENT.storage_key();
    debug!("Subscribing to settings under '{}'", key);
    let decoded = store
        .changes(key)
        .map(|raw| decode_or_default(raw.as_deref()));
    ChangeStream::new(distinct_until_changed(decoded).boxed(), None)
}

/// Ride state pushes from the host
pub fn ride_state_stream(
    host: Arc<dyn RadarHost>,
    capacity: usize,
) -> Result<ChangeStream<RideState>, StreamError> {
    callback_stream(host, "ride_state", capacity, |host, callback| {
        host.add_ride_state_consumer(callback)
    })
}

/// Data stream pushes (e.g. radar readings) for `data_type_id`
pub fn data_stream(
    host: Arc<dyn RadarHost>,
    data_type_id: &str,
    capacity: usize,
) -> Result<ChangeStream<StreamState>, StreamError> {
    let id = data_type_id.to_string();
    callback_stream(host, data_type_id, capacity, move |host, callback| {
        host.add_data_consumer(&id, callback)
    })
}

fn callback_stream<T, R>(
    host: Arc<dyn RadarHost>,
    source_name: &str,
    capacity: usize,
    register: R,
) -> Result<ChangeStream<T>, StreamError>
where
    T: Clone + Send + 'static,
    R: FnOnce(&dyn RadarHost, Callback<T>) -> Result<ListenerId, StreamError>,
{
    let (tx, rx) = broadcast::channel(capacity.max(1));
    let callback: Callback<T> = Box::new(move |value| {
        // Err only once the stream is gone; late pushes are dropped
        let _ = tx.send(value);
    });

    let id = register(host.as_ref(), callback).map_err(|e| {
        warn!("Failed to open {} stream: {}", source_name, e);
        e
    })?;
    info!("Opened {} stream (listener {})", source_name, id);

    let name = source_name.to_string();
    let values = BroadcastStream::new(rx)
        .filter_map(move |result| {
            let name = name.clone();
            async move {
                match result {
                    Ok(value) => Some(value),
                    Err(BroadcastStreamRecvError::Lagged(dropped)) => {
                        warn!("{} stream consumer lagged, dropped {} values", name, dropped);
                        None
                    }
                }
            }
        })
        .boxed();

    let guard = ListenerGuard {
        host,
        id,
        source_name: source_name.to_string(),
    };
    Ok(ChangeStream::new(values, Some(guard)))
}
