//! The process-wide logger reference.

use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use tracing::Dispatch;

/// Installed logger. Reads are lock-free.
static CURRENT: LazyLock<ArcSwapOption<Dispatch>> = LazyLock::new(ArcSwapOption::empty);

/// Serializes every write to [`CURRENT`].
static REPLACE_LOCK: Mutex<()> = Mutex::new(());

/// Returns the current process-wide logger.
///
/// Falls back to the default dispatcher of the calling context when no
/// logger was installed with [`init`] or [`replace`].
pub fn current() -> Dispatch {
    match CURRENT.load_full() {
        Some(dispatch) => Dispatch::clone(&dispatch),
        None => tracing::dispatcher::get_default(Dispatch::clone),
    }
}

/// Installs `dispatch` as the process-wide logger for good.
pub fn init(dispatch: Dispatch) {
    let _guard = REPLACE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    CURRENT.store(Some(Arc::new(dispatch)));
}

/// Temporarily replaces the process-wide logger.
///
/// The previous logger comes back when the returned guard is dropped or
/// [`restored`] explicitly. Replacements and restores are serialized under
/// one lock so no update is lost.
///
/// ```rust
/// use conduit_server::logging;
/// use tracing::Dispatch;
/// use tracing::subscriber::NoSubscriber;
///
/// let restore = logging::replace(Dispatch::new(NoSubscriber::default()));
/// // every request handled here logs to nowhere
/// restore.restore();
/// ```
///
/// [`restored`]: RestoreLogger::restore
pub fn replace(dispatch: Dispatch) -> RestoreLogger {
    let _guard = REPLACE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = CURRENT.swap(Some(Arc::new(dispatch)));
    RestoreLogger {
        previous: Some(previous),
    }
}

/// Restores the logger that was current before a [`replace`].
#[must_use = "dropping the guard restores the previous logger immediately"]
#[derive(Debug)]
pub struct RestoreLogger {
    previous: Option<Option<Arc<Dispatch>>>,
}

impl RestoreLogger {
    /// Restores the previous logger now.
    pub fn restore(mut self) {
        self.put_back();
    }

    fn put_back(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _guard = REPLACE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            CURRENT.store(previous);
        }
    }
}

impl Drop for RestoreLogger {
    fn drop(&mut self) {
        self.put_back();
    }
}

#[cfg(test)]
mod tests {
    use tracing::subscriber::NoSubscriber;

    use super::*;
    use crate::test_utils::LOGGER_LOCK;

    fn installed() -> Option<*const Dispatch> {
        CURRENT.load_full().map(|dispatch| Arc::as_ptr(&dispatch))
    }

    #[tokio::test]
    async fn replace_and_restore() {
        let _serial = LOGGER_LOCK.lock().await;
        let before = installed();

        let outer = replace(Dispatch::new(NoSubscriber::default()));
        let first = installed();
        assert!(first.is_some());
        assert_ne!(first, before);

        let inner = replace(Dispatch::new(NoSubscriber::default()));
        let second = installed();
        assert_ne!(second, first);

        inner.restore();
        assert_eq!(installed(), first);

        drop(outer);
        assert_eq!(installed(), before);
    }

    #[tokio::test]
    async fn current_prefers_installed_logger() {
        let _serial = LOGGER_LOCK.lock().await;

        let _restore = replace(Dispatch::new(NoSubscriber::default()));
        assert!(current().is::<NoSubscriber>());
    }
}
