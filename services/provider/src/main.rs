//! grantline provider entry point.
//!
//! # Purpose
//! Loads configuration, wires the policy store, and applies a manifest of
//! assignments. Exits non-zero when any declaration fails.
//!
//! # Usage
//! `grantline-provider [manifest.yaml]`; the manifest path falls back to
//! `GRANTLINE_MANIFEST`.
use anyhow::{Context, bail};
use provider::app::build_provider;
use provider::config::ProviderConfig;
use provider::manifest::{Action, Manifest, apply_manifest};
use provider::observability;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ProviderConfig::from_env_or_yaml().context("provider config")?;
    let metrics_handle = observability::init_observability("grantline-provider")?;
    if let Some(addr) = config.metrics_bind {
        tracing::info!(%addr, "serving metrics");
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(metrics_handle, addr).await {
                tracing::warn!(error = %err, "metrics server stopped");
            }
        });
    }

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.manifest.clone())
        .context("no manifest given; pass a path or set GRANTLINE_MANIFEST")?;
    let manifest = Manifest::from_path(&path)?;
    let provider = build_provider(&config)?;
    tracing::info!(
        backend = provider.backend_name(),
        manifest = %path.display(),
        assignments = manifest.assignments.len(),
        removals = manifest.removals.len(),
        "applying manifest"
    );

    let report = tokio::select! {
        report = apply_manifest(&provider.assignments, manifest) => report,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };
    tracing::info!(
        created = report.count(Action::Created),
        updated = report.count(Action::Updated),
        unchanged = report.count(Action::Unchanged),
        removed = report.count(Action::Removed),
        failed = report.failures.len(),
        "manifest applied"
    );
    if !report.is_success() {
        for failure in &report.failures {
            eprintln!("{} [{}]: {}", failure.id, failure.code, failure.message);
        }
        bail!("{} declaration(s) failed", report.failures.len());
    }
    Ok(())
}
