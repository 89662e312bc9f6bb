//! Example demonstrating the PluginModule trait
//!
//! This example implements a small document plugin and drives it the way the
//! host does: parse its manifest, initialize it with a context, invoke it and
//! tear it down.

use sdk::{
    Invocation, PluginContext, PluginDescriptor, PluginError, PluginModule, PluginOutput, Version,
};
use std::path::Path;

const MANIFEST: &str = r#"
[plugin]
id = "com.example.wordcount"
name = "Word Count"
version = "0.3.0"
author = "Example"
artifact = "libwordcount.so"
capabilities = ["document-processing", "ui-contribution"]

[host]
min = "0.1.0"

[[menu]]
type = "action"
id = "count"
title = "Count Words"
"#;

#[derive(Default)]
struct WordCount {
    min_length: usize,
}

impl WordCount {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace()
            .filter(|w| w.chars().count() >= self.min_length)
            .count()
    }
}

impl PluginModule for WordCount {
    fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        self.min_length = ctx
            .config
            .get("min_length")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as usize;
        println!("WordCount initialized for host {}", ctx.host_version);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), PluginError> {
        println!("WordCount shutting down");
        Ok(())
    }

    fn handle(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
        match invocation {
            Invocation::ProcessDocument { document, .. } => {
                let text = std::fs::read_to_string(&document)
                    .map_err(|e| PluginError::InvalidInput(e.to_string()))?;
                Ok(PluginOutput::json(serde_json::json!({
                    "words": self.count(&text),
                })))
            }
            Invocation::MenuAction { action_id } if action_id == "count" => {
                Ok(PluginOutput::text("Select a document to count"))
            }
            other => Err(PluginError::Unsupported(other.name().to_string())),
        }
    }
}

sdk::export_plugin!(WordCount);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = PluginDescriptor::parse(MANIFEST.as_bytes())?;
    println!(
        "Plugin {} v{} declares {}",
        descriptor.id, descriptor.version, descriptor.capabilities
    );

    let mut plugin = WordCount::default();
    let ctx = PluginContext::new(
        descriptor.id.clone(),
        Version::new(0, 1, 0),
        serde_json::json!({ "min_length": 3 }),
        std::env::temp_dir(),
    );
    plugin.init(&ctx)?;

    let sample = std::env::temp_dir().join("quire-wordcount-sample.txt");
    std::fs::write(&sample, "a quick brown fox jumps over the lazy dog")?;

    let output = plugin.handle(Invocation::ProcessDocument {
        document: sample.clone(),
        options: serde_json::Value::Null,
    })?;
    println!("Result: {}", output.data);

    let output = plugin.handle(Invocation::MenuAction {
        action_id: "count".to_string(),
    })?;
    println!("Menu: {}", output.data);

    plugin.teardown()?;
    std::fs::remove_file(Path::new(&sample))?;
    Ok(())
}
