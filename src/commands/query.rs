// src/commands/query.rs
//! Package lookups against the loaded index

use super::sync_context;
use anyhow::Result;
use reposync::{Config, RepoSynchronizer};

/// Synchronize the enabled repositories, then print matching packages
pub fn cmd_query(config: Config, name: &str, provides: bool) -> Result<()> {
    let repos = config.repos.clone();
    let pool = RepoSynchronizer::new(sync_context(config.main)?).load(&repos)?;

    let found = if provides {
        pool.what_provides(name)
    } else {
        pool.find(name)
    };
    if found.is_empty() {
        println!("No package matches '{name}'");
        return Ok(());
    }

    for (repo, package) in found {
        println!("{:<50} {}", package.nevra(), repo);
        if !package.summary.is_empty() {
            println!("    {}", package.summary);
        }
    }
    Ok(())
}
