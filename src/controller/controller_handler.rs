use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};

use super::types::Command;
use crate::configuration::config::Config;
use crate::configuration::types::StorageBackend;
use crate::ephemeral_store::{spawn_sweeper, EphemeralStore};
use crate::error_handling::types::*;
use crate::storage::{DatabaseStorage, FileStorage, ImageStorage, ImageSummary, MemoryStorage};

/// Wires the configuration to a storage backend and an [`EphemeralStore`],
/// then runs command line operations against it.
pub struct Controller {
    pub config: Config,
    store: Option<EphemeralStore>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self {
            config,
            store: None,
        })
    }

    async fn open_storage(&self) -> Result<Arc<dyn ImageStorage>, ControllerError> {
        let path = self.config.storage.path.as_ref();
        let storage: Arc<dyn ImageStorage> = match self.config.storage.backend {
            StorageBackend::Database => Arc::new(match path {
                Some(path) => DatabaseStorage::new_file(path).await?,
                None => DatabaseStorage::new().await?,
            }),
            StorageBackend::File => Arc::new(match path {
                Some(path) => FileStorage::new(path).await?,
                None => FileStorage::new_default().await?,
            }),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        debug!("Opened {:?} storage", self.config.storage.backend);
        Ok(storage)
    }

    /// The running store, started on first use.
    pub async fn store(&mut self) -> Result<EphemeralStore, ControllerError> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let storage = self.open_storage().await?;
        let store = EphemeralStore::start(storage, self.config.store_options())
            .await
            .map_err(|e| {
                error!("Unable to start the ephemeral store: {}", e);
                ControllerError::InitializationFailed(e.to_string())
            })?;
        self.store = Some(store.clone());
        Ok(store)
    }

    pub async fn run(&mut self, command: Command) -> Result<(), ControllerError> {
        let mut stdout = std::io::stdout();
        self.run_with_output(command, &mut stdout).await
    }

    /// Runs `command`, writing its human-readable result to `out`.
    pub async fn run_with_output<W: Write>(
        &mut self,
        command: Command,
        out: &mut W,
    ) -> Result<(), ControllerError> {
        let store = self.store().await?;
        match command {
            Command::Capture { file } => {
                let bytes = tokio::fs::read(&file).await?;
                let image = store.add_image(bytes).await?;
                info!("Captured {} from {}", image.id, file.display());
                writeln!(out, "{} expires {}", image.id, image.expires_at.to_rfc3339())?;
            }
            Command::List { json } => {
                let images = store.images();
                if json {
                    let summaries: Vec<ImageSummary> =
                        images.iter().map(|image| image.summary()).collect();
                    let rendered =
                        serde_json::to_string_pretty(&summaries).map_err(std::io::Error::from)?;
                    writeln!(out, "{}", rendered)?;
                } else {
                    let now = Utc::now();
                    for image in &images {
                        writeln!(
                            out,
                            "{}  {:>9} bytes  captured {}  {}s left",
                            image.id,
                            image.image_data.len(),
                            image.captured_at.to_rfc3339(),
                            image.remaining_time(now).num_seconds()
                        )?;
                    }
                }
            }
            Command::Sweep => {
                let removed = store.remove_expired_images().await;
                writeln!(out, "removed {} expired images", removed)?;
            }
            Command::Clear => {
                let cleared = store.clear_all().await;
                writeln!(out, "cleared {} images", cleared)?;
            }
            Command::Watch => self.watch(&store).await?,
        }
        Ok(())
    }

    async fn watch(&self, store: &EphemeralStore) -> Result<(), ControllerError> {
        let sweeper = spawn_sweeper(store.clone(), self.config.sweep_interval());
        let mut live = store.subscribe();
        info!("Watching {} live images, press Ctrl-C to stop", store.len());
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("Interrupted, stopping");
                    break;
                }
                changed = live.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let count = live.borrow_and_update().len();
                    info!("{} live images", count);
                }
            }
        }
        sweeper.stop().await;
        Ok(())
    }

    /// Releases the store. Durable rows stay for the next run.
    pub async fn shutdown(&mut self) {
        if let Some(store) = self.store.take() {
            store.release().await;
        }
    }
}
