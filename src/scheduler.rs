//! Periodic background refresh of a [`VocabularyBuilder`].

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    builder::VocabularyBuilder,
    error::{Error, Result},
};

/// Handle to a running auto-update task.
///
/// Dropping the handle signals the task to stop after its current pass;
/// [`AutoUpdateHandle::shutdown`] also waits for it.
#[derive(Debug)]
pub struct AutoUpdateHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AutoUpdateHandle {
    /// Start refreshing `builder` every `update_interval_minutes`.
    ///
    /// Must be called from within a tokio runtime. Fails when auto-update
    /// is disabled in the builder's config.
    pub fn spawn(builder: Arc<VocabularyBuilder>) -> Result<Self> {
        if !builder.config().auto_update {
            return Err(Error::Config("auto update is disabled".to_string()));
        }
        let period = builder.config().update_interval();
        Ok(Self::spawn_with_interval(builder, period))
    }

    /// Start refreshing `builder` every `period`. The first pass runs one
    /// period after the call.
    pub fn spawn_with_interval(
        builder: Arc<VocabularyBuilder>,
        period: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + period,
                period,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(?period, "auto update started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let builder = Arc::clone(&builder);
                match tokio::task::spawn_blocking(move || builder.refresh()).await
                {
                    Ok(Ok(result)) if result.is_noop() => {
                        debug!("auto update: nothing changed");
                    }
                    Ok(Ok(result)) => info!(
                        added = result.added_files,
                        updated = result.updated_files,
                        deleted = result.deleted_files,
                        "auto update applied changes"
                    ),
                    Ok(Err(e)) => warn!(error = %e, "auto update failed"),
                    Err(e) => error!(error = %e, "auto update task panicked"),
                }
            }
            info!("auto update stopped");
        });

        Self {
            stop,
            task: Some(task),
        }
    }

    /// Stop the task and wait for an in-flight pass to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "auto update task ended abnormally");
        }
    }
}

impl Drop for AutoUpdateHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, data_dir::DataDir};

    fn builder(tmp: &tempfile::TempDir, auto_update: bool) -> Arc<VocabularyBuilder> {
        let data_dir = DataDir::at(tmp.path().join("data")).unwrap();
        let mut config = Config::new(&data_dir);
        config.auto_update = auto_update;
        Arc::new(VocabularyBuilder::new(config).unwrap())
    }

    #[tokio::test]
    async fn refuses_when_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let err = AutoUpdateHandle::spawn(builder(&tmp, false)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn refresh_picks_up_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let file = src.join("notes.md");
        std::fs::write(&file, "alpha").unwrap();

        let builder = builder(&tmp, true);
        builder.build_from_directory(&src, true).unwrap();
        std::fs::write(&file, "alpha omega").unwrap();

        let handle = AutoUpdateHandle::spawn_with_interval(
            Arc::clone(&builder),
            Duration::from_millis(20),
        );

        let mut seen = false;
        for _ in 0..200 {
            if builder.term_info("omega").is_some() {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        assert!(seen, "auto update never re-indexed the changed file");
    }

    #[tokio::test]
    async fn shutdown_returns_promptly() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = AutoUpdateHandle::spawn_with_interval(
            builder(&tmp, true),
            Duration::from_secs(3600),
        );
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
