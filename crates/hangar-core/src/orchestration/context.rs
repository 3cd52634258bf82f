//! Per-operation working copy and transfer runtime.

use anyhow::Context;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::progress::{ProgressReporter, ProgressSink, ProgressTranslator};
use crate::store::Store;

/// Exclusive state of one mutating operation.
///
/// Owns a clone of the store and a current-thread runtime that hosts the
/// transfer. Both are dropped when the operation returns, whichever way it
/// returns.
pub(crate) struct OperationContext<S: Store> {
    store: S,
    runtime: Runtime,
}

impl<S: Store> OperationContext<S> {
    pub(crate) fn new(store: &S) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .context("Failed to start transfer runtime")
            .map_err(Error::store)?;
        Ok(Self {
            store: store.clone(),
            runtime,
        })
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Run `op` on a blocking task and forward its progress to `sink`.
    ///
    /// Ticks are translated here, on the caller's thread, so the sink never
    /// runs concurrently with itself or with the caller.
    pub(crate) fn transfer<T, F>(
        &self,
        sink: Option<&mut dyn ProgressSink>,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(S, ProgressReporter, CancellationToken) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let cancel = cancel.clone();

        self.runtime.block_on(async move {
            let (reporter, mut ticks) = match sink {
                Some(_) => {
                    let (reporter, rx) = ProgressReporter::channel();
                    (reporter, Some(rx))
                }
                None => (ProgressReporter::disabled(), None),
            };
            let task = tokio::task::spawn_blocking(move || op(store, reporter, cancel));

            // The reporter moves into the task, so the channel closes once
            // the task is done with it.
            if let (Some(sink), Some(rx)) = (sink, ticks.as_mut()) {
                let mut translator = ProgressTranslator::new();
                while let Some(tick) = rx.recv().await {
                    let update = translator.translate(&tick);
                    sink.on_progress(&update.status, update.percent, update.estimating);
                }
            }

            task.await
                .map_err(|err| Error::store(anyhow::anyhow!("Transfer task failed: {err}")))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::TransferProgress;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    #[test]
    fn test_progress_reaches_sink_in_order() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let ctx = OperationContext::new(&LocalStore::new(tmp.path(), true))
            .expect("context should start");

        let mut seen = Vec::new();
        let mut sink = |status: &str, percent: u32, _estimating: bool| {
            seen.push((status.to_string(), percent));
        };
        let value = ctx
            .transfer(Some(&mut sink), &CancellationToken::new(), |_store, reporter, _cancel| {
                for fetched in 1..=4 {
                    reporter.report(TransferProgress {
                        outstanding_fetches: 4 - fetched,
                        fetched,
                        requested: 4,
                        ..TransferProgress::default()
                    });
                }
                reporter.status("Deploying");
                Ok(7)
            })
            .expect("transfer should succeed");

        assert_eq!(value, 7);
        let percents: Vec<u32> = seen.iter().map(|(_, p)| *p).collect();
        assert_eq!(percents, vec![25, 50, 75, 75, 75]);
        assert_eq!(seen.last().map(|(s, _)| s.as_str()), Some("Deploying"));
    }

    #[test]
    fn test_errors_and_cancellation_pass_through() {
        let tmp = TempDir::new().expect("tempdir should succeed");
        let ctx = OperationContext::new(&LocalStore::new(tmp.path(), true))
            .expect("context should start");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctx
            .transfer(None, &cancel, |_store, _reporter, cancel| {
                crate::error::check_cancelled(&cancel)?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
