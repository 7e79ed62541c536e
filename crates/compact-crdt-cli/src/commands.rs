//! Subcommands operating on CBOR document files.
//!
//! Each command returns the text to print so it can be tested without
//! capturing stdout.

use crate::config::CliConfig;
use anyhow::{ensure, Context, Result};
use compact_crdt_core::{Document, Hlc, HlcClock, Path, SystemClock};
use compact_crdt_proto::{decode_diff, decode_document, encode_diff, encode_document};
use serde_json::{json, Value};
use std::fs;
use std::path::Path as FsPath;

/// Create an empty document file.
///
/// # Errors
///
/// Returns error if the file already exists or cannot be written.
pub fn init(config: &CliConfig, file: &FsPath) -> Result<String> {
    ensure!(!file.exists(), "{} already exists", file.display());
    let doc = Document::new(config.node_id.clone());
    save(&doc, file)?;
    Ok(format!("initialized {} as {}", file.display(), config.node_id))
}

/// Write a value. `raw` is parsed as JSON, falling back to a plain string.
///
/// # Errors
///
/// Returns error if the document cannot be loaded or saved, or the path is
/// empty.
pub fn set(config: &CliConfig, file: &FsPath, path: &str, raw: &str) -> Result<String> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let mut doc = load(config, file)?;
    let dot = doc.set(&Path::parse(path), value)?;
    save(&doc, file)?;
    Ok(dot.to_string())
}

/// Remove a key.
///
/// # Errors
///
/// Returns error if the document cannot be loaded or saved, or the path is
/// empty.
pub fn remove(config: &CliConfig, file: &FsPath, path: &str) -> Result<String> {
    let mut doc = load(config, file)?;
    let dot = doc.remove(&Path::parse(path))?;
    save(&doc, file)?;
    Ok(dot.to_string())
}

/// Add to a counter.
///
/// # Errors
///
/// Returns error if the document cannot be loaded or saved, or the path is
/// empty.
pub fn increment(config: &CliConfig, file: &FsPath, path: &str, amount: i64) -> Result<String> {
    let mut doc = load(config, file)?;
    let path = Path::parse(path);
    doc.increment(&path, amount)?;
    save(&doc, file)?;
    Ok(doc.get(&path).unwrap_or(Value::Null).to_string())
}

/// Print the document, or the value at `path`.
///
/// # Errors
///
/// Returns error if the document cannot be loaded or `path` is absent.
pub fn show(config: &CliConfig, file: &FsPath, path: Option<&str>) -> Result<String> {
    let doc = load(config, file)?;
    let path = path.map(Path::parse).unwrap_or_default();
    let value = doc
        .get(&path)
        .with_context(|| format!("No value at {path}"))?;
    render(config, &value)
}

/// Print the document's version vector as `node -> dot`.
///
/// # Errors
///
/// Returns error if the document cannot be loaded.
pub fn version_vector(config: &CliConfig, file: &FsPath) -> Result<String> {
    let doc = load(config, file)?;
    let vv: serde_json::Map<String, Value> = doc
        .version_vector()
        .dots()
        .map(|dot| (dot.node_id.to_string(), Value::String(dot.to_string())))
        .collect();
    render(config, &Value::Object(vv))
}

/// Write the diff of `file` against `remote`'s version vector to `out`.
///
/// # Errors
///
/// Returns error if either document cannot be loaded or `out` cannot be
/// written.
pub fn diff(config: &CliConfig, file: &FsPath, remote: &FsPath, out: &FsPath) -> Result<String> {
    let doc = load(config, file)?;
    let remote = load(config, remote)?;
    let diff = doc.diff_for(&remote.version_vector());
    let bytes = encode_diff(&diff)?;
    fs::write(out, bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(format!("{} ops", diff.len()))
}

/// Apply a diff file to a document in place.
///
/// # Errors
///
/// Returns error if either file cannot be read, the diff is invalid, or it
/// was made for a replica that has seen more than this one; the document is
/// not modified in that case.
pub fn apply(config: &CliConfig, file: &FsPath, diff_file: &FsPath) -> Result<String> {
    let bytes = fs::read(diff_file)
        .with_context(|| format!("Failed to read {}", diff_file.display()))?;
    let diff = decode_diff(&bytes).context("Invalid diff")?;
    let mut doc = load(config, file)?;
    let report = doc.apply(&diff)?;
    save(&doc, file)?;
    Ok(format!(
        "applied {}, suppressed {}",
        report.applied, report.suppressed
    ))
}

/// Issue a fresh dot, or parse `text` into its parts.
///
/// # Errors
///
/// Returns error if `text` is not a valid dot.
pub fn hlc(config: &CliConfig, text: Option<&str>) -> Result<String> {
    let Some(text) = text else {
        let mut clock = HlcClock::new(config.node_id.clone());
        return Ok(clock.tick().to_string());
    };
    let dot: Hlc = text.parse()?;
    render(
        config,
        &json!({
            "timestamp": dot.timestamp,
            "counter": dot.counter,
            "node_id": dot.node_id,
        }),
    )
}

fn load(config: &CliConfig, file: &FsPath) -> Result<Document<SystemClock>> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let root = decode_document(&bytes)
        .with_context(|| format!("Failed to decode {}", file.display()))?;
    tracing::debug!(file = %file.display(), node_id = %config.node_id, "Loaded document");
    Ok(Document::from_root(root, config.node_id.clone(), SystemClock))
}

fn save(doc: &Document<SystemClock>, file: &FsPath) -> Result<()> {
    let bytes = encode_document(doc.root())?;
    fs::write(file, bytes).with_context(|| format!("Failed to write {}", file.display()))
}

fn render(config: &CliConfig, value: &Value) -> Result<String> {
    let text = if config.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}
