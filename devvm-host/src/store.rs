//! Machine store: persisted machine records.
//!
//! Records live at `<root>/machines/<name>/config.json`. Loading a record
//! rebuilds its driver through the [`DriverRegistry`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use devvm_driver::{DriverKind, DriverRegistry, Machine, MachineRecord};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// File name of a persisted record inside its machine directory.
const RECORD_FILE: &str = "config.json";

/// Persistence of named machines.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Whether a record exists for `name`.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Load a record and rebuild its driver.
    async fn load(&self, name: &str) -> Result<Machine>;

    /// Persist a machine's record, refreshing the raw driver config first.
    async fn save(&self, machine: &mut Machine) -> Result<()>;

    /// Build an unsaved machine for a new record.
    async fn new_host(
        &self,
        name: &str,
        kind: DriverKind,
        raw_driver: serde_json::Value,
    ) -> Result<Machine>;

    /// Persist a new machine and invoke its driver's create.
    async fn create(&self, machine: &mut Machine) -> Result<()>;

    /// Delete a machine's record.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// Store keeping one JSON record per machine on disk.
pub struct FileStore {
    machines_dir: PathBuf,
    registry: Arc<DriverRegistry>,
}

impl FileStore {
    /// Create a store rooted at `root` (records go under `root/machines`).
    pub fn new(root: impl AsRef<Path>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            machines_dir: root.as_ref().join("machines"),
            registry,
        }
    }

    fn machine_dir(&self, name: &str) -> PathBuf {
        self.machines_dir.join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.machine_dir(name).join(RECORD_FILE)
    }

    fn bind_driver(&self, record: MachineRecord) -> Result<Machine> {
        let factory = self.registry.get(record.driver_name)?;
        let driver = factory.load(&record.name, &record.raw_driver)?;
        Ok(Machine::new(record, driver))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl MachineStore for FileStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let path = self.record_path(name);
        fs::try_exists(&path).await.map_err(io_error(&path))
    }

    #[instrument(skip(self))]
    async fn load(&self, name: &str) -> Result<Machine> {
        validate_name(name)?;
        let path = self.record_path(name);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        let record: MachineRecord = serde_json::from_str(&content)?;
        debug!(driver = %record.driver_name, "Loaded machine record");
        self.bind_driver(record)
    }

    #[instrument(skip(self, machine), fields(machine = %machine.name()))]
    async fn save(&self, machine: &mut Machine) -> Result<()> {
        validate_name(machine.name())?;
        machine.sync_raw_driver()?;

        let dir = self.machine_dir(machine.name());
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;

        let content = serde_json::to_vec_pretty(&machine.record)?;
        let path = self.record_path(machine.name());
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await.map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_error(&path))?;

        debug!(path = %path.display(), "Saved machine record");
        Ok(())
    }

    async fn new_host(
        &self,
        name: &str,
        kind: DriverKind,
        raw_driver: serde_json::Value,
    ) -> Result<Machine> {
        validate_name(name)?;
        self.bind_driver(MachineRecord::new(name, kind, raw_driver))
    }

    #[instrument(skip(self, machine), fields(machine = %machine.name(), driver = %machine.kind()))]
    async fn create(&self, machine: &mut Machine) -> Result<()> {
        if self.exists(machine.name()).await? {
            return Err(StoreError::AlreadyExists(machine.name().to_string()));
        }

        self.save(machine).await?;

        info!("Creating machine");
        machine.driver.create().await?;
        info!("Machine created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir = self.machine_dir(name);

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed machine record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(io_error(&dir)(e)),
        }
    }
}
