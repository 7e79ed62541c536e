//! # Compact CRDT CLI
//!
//! File-based replica tool: each document lives in a CBOR file, and replicas
//! synchronize by exchanging diff files.

use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::CliConfig;

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let command = args[1].as_str();
    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let config = CliConfig::from_env()?;
    let rest = &args[2..];
    let output = match (command, rest) {
        ("init", [file]) => commands::init(&config, Path::new(file))?,
        ("set", [file, path, value]) => commands::set(&config, Path::new(file), path, value)?,
        ("rm", [file, path]) => commands::remove(&config, Path::new(file), path)?,
        ("incr", [file, path]) => commands::increment(&config, Path::new(file), path, 1)?,
        ("incr", [file, path, amount]) => {
            let amount = amount
                .parse()
                .with_context(|| format!("Invalid amount: {amount}"))?;
            commands::increment(&config, Path::new(file), path, amount)?
        }
        ("show", [file]) => commands::show(&config, Path::new(file), None)?,
        ("show", [file, path]) => commands::show(&config, Path::new(file), Some(path.as_str()))?,
        ("vv", [file]) => commands::version_vector(&config, Path::new(file))?,
        ("diff", [file, remote, out]) => {
            commands::diff(&config, Path::new(file), Path::new(remote), Path::new(out))?
        }
        ("apply", [file, diff]) => commands::apply(&config, Path::new(file), Path::new(diff))?,
        ("hlc", []) => commands::hlc(&config, None)?,
        ("hlc", [text]) => commands::hlc(&config, Some(text.as_str()))?,
        (
            "init" | "set" | "rm" | "incr" | "show" | "vv" | "diff" | "apply" | "hlc",
            _,
        ) => {
            eprintln!("Wrong arguments for {command}");
            print_help();
            std::process::exit(1);
        }
        (cmd, _) => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    };

    println!("{output}");
    Ok(())
}

fn print_help() {
    println!(
        r#"Compact CRDT CLI

USAGE:
    compact-crdt <COMMAND> [ARGS]

COMMANDS:
    init <doc>                    Create an empty document file
    set <doc> <path> <json>       Write a value (non-JSON input is stored as a string)
    rm <doc> <path>               Remove a key
    incr <doc> <path> [amount]    Add to a counter (default 1)
    show <doc> [path]             Print the document or one value as JSON
    vv <doc>                      Print the document's version vector
    diff <doc> <remote> <out>     Write what <remote> is missing from <doc>
    apply <doc> <diff>            Apply a diff file in place
    hlc [dot]                     Issue a fresh dot, or parse one
    help                          Show this help message

ENVIRONMENT:
    COMPACT_CRDT_NODE_ID          Replica identity (random if unset)
    COMPACT_CRDT_PRETTY           Pretty-print JSON output (1/true)
    RUST_LOG                      Log filter (default: warn)

EXAMPLES:
    compact-crdt init alice.cbor
    compact-crdt set alice.cbor user.name '"Alice"'
    compact-crdt diff alice.cbor bob.cbor alice-to-bob.diff
    compact-crdt apply bob.cbor alice-to-bob.diff
"#
    );
}
