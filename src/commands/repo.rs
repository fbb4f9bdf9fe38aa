// src/commands/repo.rs
//! Repository synchronization and listing commands

use super::sync_context;
use anyhow::{Result, anyhow, bail};
use reposync::repository::{
    MetadataSource, Repo, RepoOutcome, RepoSynchronizer, Resolution, SyncReport,
};
use reposync::{Config, RepositoryConfig};
use serde_json::json;
use std::time::Duration;
use tracing::info;

fn select_repos(config: &Config, ids: &[String]) -> Result<Vec<RepositoryConfig>> {
    if ids.is_empty() {
        return Ok(config.repos.clone());
    }
    ids.iter()
        .map(|id| {
            config
                .repo(id)
                .cloned()
                .ok_or_else(|| anyhow!("Repository '{}' not found", id))
        })
        .collect()
}

fn outcome_json(outcome: &RepoOutcome) -> serde_json::Value {
    match outcome {
        RepoOutcome::Loaded {
            repo_id,
            resolution,
            attempt,
        } => json!({
            "repo": repo_id,
            "status": "loaded",
            "resolution": format!("{resolution:?}"),
            "attempt": format!("{attempt:?}"),
        }),
        RepoOutcome::Skipped(failure) | RepoOutcome::Failed(failure) => {
            let status = match outcome {
                RepoOutcome::Skipped(_) => "skipped",
                _ => "failed",
            };
            json!({
                "repo": failure.repo_id,
                "status": status,
                "stage": failure.stage.to_string(),
                "reason": failure.reason.to_string(),
                "error": failure.error.to_string(),
            })
        }
        RepoOutcome::Abandoned { repo_id } => json!({
            "repo": repo_id,
            "status": "abandoned",
        }),
    }
}

fn print_report(report: &SyncReport) {
    for outcome in &report.outcomes {
        match outcome {
            RepoOutcome::Loaded {
                repo_id, resolution, ..
            } => {
                let how = match resolution {
                    Resolution::CacheHit => "cache is current",
                    Resolution::InSync => "in sync with upstream",
                    Resolution::Downloaded => "downloaded",
                };
                let packages = report.index.repo(repo_id).map_or(0, |r| r.packages.len());
                println!("  {repo_id}: {how}, {packages} packages");
            }
            RepoOutcome::Skipped(failure) => {
                println!("  {}: skipped ({})", failure.repo_id, failure.reason)
            }
            RepoOutcome::Failed(failure) => {
                println!("  {}: FAILED ({})", failure.repo_id, failure.reason)
            }
            RepoOutcome::Abandoned { repo_id } => println!("  {repo_id}: not processed"),
        }
    }
}

/// Synchronize repositories and build the binary index cache
pub fn cmd_makecache(
    mut config: Config,
    ids: &[String],
    cacheonly: bool,
    refresh: bool,
    json: bool,
) -> Result<()> {
    if cacheonly {
        config.main.cacheonly = true;
    }
    let repos = select_repos(&config, ids)?;
    info!("Synchronizing {} repositories", repos.len());

    let synchronizer = RepoSynchronizer::new(sync_context(config.main)?).with_refresh(refresh);
    let report = synchronizer.synchronize(&repos)?;

    if json {
        let outcomes: Vec<_> = report.outcomes.iter().map(outcome_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "success": report.is_success(),
                "packages": report.index.package_count(),
                "repositories": outcomes,
            }))?
        );
    } else {
        print_report(&report);
    }

    if let Some(failure) = report.fatal() {
        bail!("{}", failure);
    }
    if !json {
        println!("Metadata cache created.");
    }
    Ok(())
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86400),
    }
}

/// List configured repositories with their cache state
pub fn cmd_list(config: &Config, all: bool) -> Result<()> {
    let repos: Vec<&RepositoryConfig> = if all {
        config.repos.iter().collect()
    } else {
        config.enabled_repos().collect()
    };
    if repos.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    let context = sync_context(config.main.clone())?;
    println!("Repositories:");
    for repo_config in repos {
        let enabled_mark = if repo_config.enabled { "[x]" } else { "[ ]" };
        let mut repo = Repo::new(repo_config.clone(), context.clone());
        let state = match repo.read_metadata_cache() {
            Ok(()) => {
                let changed = repo
                    .get_max_timestamp()
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!(
                    "updated {}, age {}{}",
                    changed,
                    repo.get_age().map_or("unknown".to_string(), format_age),
                    if repo.is_expired() { ", expired" } else { "" }
                )
            }
            Err(_) => "no cache".to_string(),
        };
        println!(
            "  {} {} ({}, priority: {}, {})",
            enabled_mark, repo_config.id, repo_config.name, repo_config.priority, state
        );
        if let Ok(source) = MetadataSource::of(repo_config) {
            println!("      {}: {}", source.kind, source.location);
        }
        println!("      cache: {}", repo.cache().path().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(Duration::from_secs(5)), "5s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m");
        assert_eq!(format_age(Duration::from_secs(7200)), "2h");
        assert_eq!(format_age(Duration::from_secs(3 * 86400)), "3d");
    }

    #[test]
    fn test_select_repos() {
        let config = Config::parse(
            r#"
[repos.fedora]
baseurl = "https://example.org/fedora"

[repos.updates]
baseurl = "https://example.org/updates"
"#,
        )
        .unwrap();
        assert_eq!(select_repos(&config, &[]).unwrap().len(), 2);
        let picked = select_repos(&config, &["updates".to_string()]).unwrap();
        assert_eq!(picked[0].id, "updates");
        assert!(select_repos(&config, &["missing".to_string()]).is_err());
    }
}
