//! State stores: the persisted session files behind async interfaces.
//!
//! Every store exclusively owns its file behind a `tokio::sync::Mutex`;
//! callers acquire state only through these interfaces and never hold
//! store references across suspension points. Re-chunk hooks are typed
//! async function values fired OUTSIDE the store lock, so a hook that
//! re-acquires state through a separate path cannot deadlock.

pub mod decisions;
pub mod local_training;
pub mod outline;
pub mod paper;
pub mod rejection;
pub mod session;
pub mod shared_training;
pub mod workflow;

use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Async hook invoked with a store's full content after every write, used
/// to re-ingest the content into the retrieval engine at all configured
/// chunk sizes.
pub type RechunkHook = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`RechunkHook`].
pub fn rechunk_hook<F, Fut>(f: F) -> RechunkHook
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |content| Box::pin(f(content)))
}
