use std::sync::Arc;

use crate::config::LauncherConfig;
use crate::engine::connect_engine;
use crate::error::Error;
use crate::lifecycle::LifecycleManager;
use crate::lock::SessionLock;

/// Remove the session container. A missing container is not an error.
pub async fn run_down_command() -> anyhow::Result<()> {
    let settings = LauncherConfig::from_env()?;
    let engine = connect_engine().await.map_err(Error::from)?;

    let _lock = SessionLock::acquire(&settings.lock_dir, &settings.container_name).await?;
    let manager = LifecycleManager::new(Arc::new(engine), settings);

    if manager.remove().await.map_err(Error::from)? {
        println!("Removed container {}", manager.identity());
    } else {
        println!("No container named {}", manager.identity());
    }
    Ok(())
}
