// Download operations issued by the scheduler.
//
// Every operation holds a concurrency permit while its request runs and gives up as
// soon as its cancellation token fires.

use super::State;
use crate::downloader::ContentDownloader;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use hls::EntryLocation;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Initialization segment download, awaited by every segment of the binding.
pub(super) type InitFetch = Shared<BoxFuture<'static, Option<Bytes>>>;

pub(super) fn no_init() -> InitFetch {
    futures::future::ready(None).boxed().shared()
}

#[derive(Clone)]
pub(super) struct FetchContext {
    pub downloader: Arc<dyn ContentDownloader>,
    pub permits: Arc<Semaphore>,
    pub shared: Arc<Mutex<State>>,
}

impl FetchContext {
    async fn download(&self, location: &EntryLocation, token: &CancellationToken) -> Option<Bytes> {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            permit = self.permits.acquire() => permit.ok()?,
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            data = self.downloader.fetch_bytes(&location.url, location.byte_range.clone()) => data,
        }
    }

    /// Starts the initialization download right away; the result is shared.
    pub fn spawn_init(&self, location: Option<EntryLocation>, token: CancellationToken) -> InitFetch {
        let Some(location) = location else {
            return no_init();
        };

        let ctx = self.clone();
        let handle = tokio::spawn(async move {
            let data = ctx.download(&location, &token).await;
            if data.is_none() && !token.is_cancelled() {
                warn!(url = %location.url, "Initialization segment download failed");
            }
            data
        });

        async move { handle.await.ok().flatten() }.boxed().shared()
    }

    /// Downloads one segment after the initialization data is settled and stores it
    /// in the cache unless its window was cancelled meanwhile.
    pub async fn fetch_segment(
        self,
        index: usize,
        location: EntryLocation,
        init: InitFetch,
        token: CancellationToken,
    ) {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = init => {}
        }

        let Some(data) = self.download(&location, &token).await else {
            if !token.is_cancelled() {
                warn!(index, url = %location.url, "Segment download failed");
            }
            return;
        };

        let mut state = self.shared.lock();
        if token.is_cancelled() {
            trace!(index, "Dropping completion of a cancelled window");
            return;
        }
        trace!(index, size = data.len(), "Segment cached");
        state.cache.insert(index, data);
    }
}
