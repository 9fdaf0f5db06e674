//! Offline rendering: hydrate a page, apply a state snapshot and any recorded
//! messages, serialize the result.

use crate::RenderArgs;
use anyhow::{bail, Context, Result};
use jrx_dom::inner_html;
use jrx_runtime::{Runtime, RuntimeConfig};
use serde_json::Value;
use std::fs;
use std::path::Path;

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub(crate) fn run(args: &RenderArgs, config: RuntimeConfig) -> Result<String> {
    let page = read(&args.page)?;
    let mut runtime = Runtime::from_html(&page, config).context("Invalid runtime config")?;
    runtime.hydrate();

    if let Some(path) = &args.state {
        let raw = read(path)?;
        let state: Value = serde_json::from_str(&raw)
            .with_context(|| format!("State file {} is not JSON", path.display()))?;
        let Value::Object(entries) = state else {
            bail!("State file {} must hold a JSON object", path.display());
        };
        log::debug!("Applying {} state keys", entries.len());
        for (key, value) in entries {
            runtime.apply_value(&key, value);
        }
    }

    for path in &args.messages {
        let raw = read(path)?;
        runtime
            .apply_message(&raw)
            .with_context(|| format!("Malformed message in {}", path.display()))?;
    }

    let root = if args.fragment {
        runtime.app_root()
    } else {
        runtime.document().root()
    };
    Ok(inner_html(runtime.document(), root))
}
