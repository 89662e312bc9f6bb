//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - scan: Discover plugins and list them with state and risk
//! - inspect: Show one plugin's descriptor
//! - verify: Run trust validation only
//! - load: Load, optionally invoke, and unload a plugin
//! - settings: Read or write a plugin's stored settings

use anyhow::{bail, Context, Result};
use serde_json::json;

use crate::lifecycle::{LifecycleManager, ScanReport};
use crate::registry::PluginSummary;
use crate::trust::TrustVerdict;
use sdk::errors::ErrorExt;
use sdk::{Invocation, MenuEntry, MenuItem, PluginDescriptor};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Scan the configured locations and list every plugin
pub async fn handle_scan(manager: &LifecycleManager, format: OutputFormat) -> Result<()> {
    let report = manager.scan().await;
    let summaries = manager.registry().summaries();

    match format {
        OutputFormat::Text => {
            println!("Installed Plugins:");
            println!();

            if summaries.is_empty() {
                println!("  (none)");
            }
            for summary in &summaries {
                print_summary(summary);
            }

            if !report.skipped.is_empty() {
                println!();
                println!("Skipped:");
                for error in &report.skipped {
                    println!("  {}", error);
                    println!("    hint: {}", error.user_hint());
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "plugins": summaries,
                "skipped": skipped_json(&report),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show one plugin's descriptor, state and risk
pub async fn handle_inspect(id: &str, manager: &LifecycleManager, format: OutputFormat) -> Result<()> {
    manager.scan().await;
    let descriptor = require_descriptor(manager, id)?;
    let summary = manager
        .registry()
        .summary(id)
        .with_context(|| format!("Plugin '{}' disappeared", id))?;

    match format {
        OutputFormat::Text => {
            println!("{} ({})", descriptor.name, descriptor.id);
            println!("  {:<14} {}", "Version:", descriptor.version);
            println!("  {:<14} {}", "Author:", descriptor.author);
            if !descriptor.description.is_empty() {
                println!("  {:<14} {}", "Description:", descriptor.description);
            }
            println!("  {:<14} {}", "Artifact:", descriptor.artifact);
            println!("  {:<14} {}", "Host:", descriptor.host);
            println!("  {:<14} {}", "Capabilities:", descriptor.capabilities);
            println!("  {:<14} [{}]", "Entitlements:", descriptor.entitlements.join(", "));
            println!(
                "  {:<14} {}",
                "Signed by:",
                descriptor.trust.signing_identity.as_deref().unwrap_or("-")
            );
            println!(
                "  {:<14} {}",
                "Team:",
                descriptor.trust.team_identifier.as_deref().unwrap_or("-")
            );
            println!(
                "  {:<14} {}",
                "Checksum:",
                descriptor
                    .trust
                    .checksum
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "  {:<14} {} (score {}: {})",
                "Risk:",
                summary.risk.level,
                summary.risk.score,
                summary.risk.factors.join(", ")
            );
            println!("  {:<14} {}", "State:", summary.state);
            if let Some(error) = &summary.last_error {
                println!("  {:<14} {}", "Last error:", error);
            }

            let actions = menu_actions(&descriptor);
            if !actions.is_empty() {
                println!("  Menu actions:");
                for (action_id, title) in actions {
                    println!("    {:<20} {}", action_id, title);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "id": descriptor.id,
                "name": descriptor.name,
                "version": descriptor.version,
                "author": descriptor.author,
                "description": descriptor.description,
                "artifact": descriptor.artifact,
                "host": descriptor.host.to_string(),
                "capabilities": descriptor.capabilities,
                "entitlements": descriptor.entitlements,
                "trust": {
                    "signing_identity": descriptor.trust.signing_identity,
                    "team_identifier": descriptor.trust.team_identifier,
                    "checksum": descriptor.trust.checksum.map(|c| c.to_string()),
                },
                "menu_actions": menu_actions(&descriptor)
                    .into_iter()
                    .map(|(id, title)| json!({ "id": id, "title": title }))
                    .collect::<Vec<_>>(),
                "state": summary.state,
                "risk": summary.risk,
                "last_error": summary.last_error,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run trust validation against the plugin's current files
pub async fn handle_verify(id: &str, manager: &LifecycleManager, format: OutputFormat) -> Result<()> {
    manager.scan().await;
    require_descriptor(manager, id)?;

    let verdict = manager.verify(id).await?;

    match format {
        OutputFormat::Text => match &verdict {
            TrustVerdict::Accepted => println!("✓ {} passed trust validation", id),
            TrustVerdict::Rejected { reason, detail } => {
                println!("✗ {} rejected at {} stage", id, reason.stage());
                println!("  reason: {}", reason);
                println!("  detail: {}", detail);
            }
        },
        OutputFormat::Json => {
            let output = match &verdict {
                TrustVerdict::Accepted => json!({ "id": id, "accepted": true }),
                TrustVerdict::Rejected { reason, detail } => json!({
                    "id": id,
                    "accepted": false,
                    "stage": reason.stage(),
                    "reason": reason,
                    "detail": detail,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if !verdict.is_accepted() {
        bail!("Plugin '{}' failed trust validation", id);
    }
    Ok(())
}

/// Load a plugin, deliver an optional invocation, then unload it
pub async fn handle_load(
    id: &str,
    invoke: Option<&str>,
    manager: &LifecycleManager,
    format: OutputFormat,
) -> Result<()> {
    manager.scan().await;
    require_descriptor(manager, id)?;

    let invocation = invoke
        .map(|raw| serde_json::from_str::<Invocation>(raw))
        .transpose()
        .context("Invalid --invoke JSON")?;

    if let Err(e) = manager.load(id).await {
        print_failure(format, id, "load", &e.to_string(), e.user_hint())?;
        bail!(e);
    }

    let output = match invocation {
        Some(invocation) => Some(manager.invoke(id, invocation).await),
        None => None,
    };

    let failures = manager.shutdown().await;

    match format {
        OutputFormat::Text => {
            println!("✓ {} loaded and unloaded", id);
            match &output {
                Some(Ok(result)) => {
                    println!("Output:");
                    println!("{}", serde_json::to_string_pretty(&result.data)?);
                    for artifact in &result.artifacts {
                        println!("  wrote {}", artifact.display());
                    }
                }
                Some(Err(e)) => {
                    println!("✗ invocation failed: {}", e);
                    println!("  hint: {}", e.user_hint());
                }
                None => {}
            }
            for failure in &failures {
                println!("⚠ {}", failure);
            }
        }
        OutputFormat::Json => {
            let invocation = output.as_ref().map(|result| match result {
                Ok(out) => json!({ "ok": true, "output": out }),
                Err(e) => json!({ "ok": false, "error": e.to_string() }),
            });
            let output = json!({
                "id": id,
                "loaded": true,
                "invocation": invocation,
                "teardown_errors": failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if let Some(Err(e)) = output {
        bail!(e);
    }
    Ok(())
}

/// Show, replace or remove a plugin's stored settings
pub async fn handle_settings(
    id: &str,
    set: Option<&str>,
    clear: bool,
    manager: &LifecycleManager,
    format: OutputFormat,
) -> Result<()> {
    manager.scan().await;
    require_descriptor(manager, id)?;
    let store = manager.config_store();

    if clear {
        store.remove(id)?;
        tracing::info!(plugin_id = %id, "Cleared plugin settings");
    } else if let Some(raw) = set {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("Settings must be valid JSON")?;
        store.put(id, &value)?;
        tracing::info!(plugin_id = %id, "Stored plugin settings");
    }

    let current = store.get(id)?;
    match format {
        OutputFormat::Text => match &current {
            Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
            None => println!("No settings stored for {}", id),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "id": id, "settings": current }))?
            );
        }
    }

    Ok(())
}

fn require_descriptor(
    manager: &LifecycleManager,
    id: &str,
) -> Result<std::sync::Arc<PluginDescriptor>> {
    match manager.registry().descriptor(id) {
        Some(descriptor) => Ok(descriptor),
        None => bail!(
            "Plugin '{}' not found in {} location(s)",
            id,
            manager.locations().len()
        ),
    }
}

fn print_summary(summary: &PluginSummary) {
    println!(
        "  {:<32} {:<10} {:<22} risk: {}",
        summary.id,
        summary.version.to_string(),
        summary.state.to_string(),
        summary.risk.level
    );
    if let Some(error) = &summary.last_error {
        println!("    last error: {}", error);
    }
}

fn print_failure(
    format: OutputFormat,
    id: &str,
    operation: &str,
    error: &str,
    hint: &str,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("✗ {} failed to {}: {}", id, operation, error);
            println!("  hint: {}", hint);
        }
        OutputFormat::Json => {
            let output = json!({ "id": id, "ok": false, "error": error, "hint": hint });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn skipped_json(report: &ScanReport) -> Vec<serde_json::Value> {
    report
        .skipped
        .iter()
        .map(|e| {
            json!({
                "path": e.path(),
                "error": e.to_string(),
                "hint": e.user_hint(),
            })
        })
        .collect()
}

/// Declared menu actions as (id, title), submenus flattened
fn menu_actions(descriptor: &PluginDescriptor) -> Vec<(String, String)> {
    let mut actions = Vec::new();
    for entry in &descriptor.menu {
        match entry {
            MenuEntry::Action(action) => actions.push((action.id.clone(), action.title.clone())),
            MenuEntry::Submenu { title, items } => {
                for item in items {
                    if let MenuItem::Action(action) = item {
                        actions.push((
                            action.id.clone(),
                            format!("{} › {}", title, action.title),
                        ));
                    }
                }
            }
            MenuEntry::Separator => {}
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_actions_flatten_submenus() {
        let descriptor = PluginDescriptor::parse(
            br#"
[plugin]
id = "menus"
name = "Menus"
version = "1.0.0"
author = "a"
artifact = "libmenus.so"
capabilities = ["ui-contribution"]

[host]
min = "1.0.0"

[[menu]]
type = "action"
id = "top"
title = "Top"

[[menu]]
type = "separator"

[[menu]]
type = "submenu"
title = "More"

[[menu.items]]
type = "action"
id = "nested"
title = "Nested"
"#,
        )
        .unwrap();

        let actions = menu_actions(&descriptor);
        assert_eq!(
            actions,
            vec![
                ("top".to_string(), "Top".to_string()),
                ("nested".to_string(), "More › Nested".to_string()),
            ]
        );
    }
}
