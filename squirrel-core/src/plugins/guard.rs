//! Panic and cancellation isolation for calls into plugin code

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use squirrel_plugin_api::{CancellationToken, PluginError};

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run synchronous plugin code, converting a panic into [`PluginError::Panicked`]
pub(crate) fn call_sync<T>(f: impl FnOnce() -> T) -> Result<T, PluginError> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|panic| PluginError::Panicked(panic_message(panic.as_ref())))
}

/// Await a plugin hook with panic isolation; cancellation wins over the hook
pub(crate) async fn call_async<T, F>(hook: F, cancel: &CancellationToken) -> Result<T, PluginError>
where
    F: Future<Output = Result<T, PluginError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PluginError::Cancelled),
        outcome = AssertUnwindSafe(hook).catch_unwind() => match outcome {
            Ok(result) => result,
            Err(panic) => Err(PluginError::Panicked(panic_message(panic.as_ref()))),
        },
    }
}
