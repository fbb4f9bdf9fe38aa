// src/commands/mod.rs
//! Command handlers for the reposync CLI

mod clean;
mod query;
mod repo;

pub use clean::cmd_clean;
pub use query::cmd_query;
pub use repo::{cmd_list, cmd_makecache};

use anyhow::{Context, Result};
use reposync::progress::{CliCallbacks, TransferCallbacks};
use reposync::repository::{GpgKeyring, HttpTransport, SyncContext};
use reposync::{Config, MainConfig};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Load the configuration file, applying command-line overrides
pub fn load_config(path: &Path, cachedir: Option<&Path>) -> Result<Config> {
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(dir) = cachedir {
        config.main.cachedir = dir.to_path_buf();
    } else if !nix::unistd::geteuid().is_root()
        && config.main.cachedir == config.main.system_cachedir
    {
        // Unprivileged users get their own cache, seeded from the system one
        if let Some(user_cache) = dirs::cache_dir() {
            config.main.cachedir = user_cache.join("reposync");
        }
    }
    Ok(config)
}

/// Production collaborators for a synchronization
pub fn sync_context(main: MainConfig) -> Result<Arc<SyncContext>> {
    let transport = HttpTransport::with_timeout(Duration::from_secs(main.timeout))?;
    let mut context = SyncContext::new(main, Arc::new(transport), Arc::new(GpgKeyring::new()));
    if std::io::stderr().is_terminal() {
        let callbacks: Arc<dyn TransferCallbacks> = Arc::new(CliCallbacks::new());
        context = context.with_callbacks(callbacks);
    }
    Ok(Arc::new(context))
}
