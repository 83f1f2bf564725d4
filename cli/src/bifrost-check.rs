//! # bifrost-check
//!
//! Validates a provider configuration and dry-runs a parser against a data
//! file without touching any container. Records go to stdout, one per line,
//! and per-record errors to stderr. Exits non-zero when the configuration is
//! invalid or the file cannot be decoded at all.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueHint};

use lib_bifrost::configs::BifrostConfig;
use lib_bifrost::parser::is_whole_buffer_failure;
use lib_bifrost::{ParserKind, Value};

#[derive(Parser, Debug)]
#[clap(
    name = "bifrost-check",
    version,
    author = "ckir",
    about = "Validates a bifrost config and dry-runs a parser over a data file."
)]
struct Cli {
    /// Provider configuration file to validate.
    #[clap(long, short = 'c', env = "BIFROST_CONFIG", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Data file to parse. Defaults to the path of --streamer.
    #[clap(long, short = 'f', value_hint = ValueHint::FilePath)]
    file: Option<PathBuf>,

    /// Take parser, user data and path from this streamer of --config.
    #[clap(long, short = 's')]
    streamer: Option<String>,

    /// Parser to use: kv_lines, json_lines or json_document.
    #[clap(long, short = 'p', value_parser = parse_parser_kind)]
    parser: Option<ParserKind>,

    /// Parser context as a JSON document.
    #[clap(long, short = 'u')]
    user_data: Option<String>,

    /// Print only the summary.
    #[clap(long, short = 'q')]
    quiet: bool,
}

fn parse_parser_kind(raw: &str) -> Result<ParserKind, String> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| format!("unknown parser '{}'", raw))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => {
            let config = BifrostConfig::from_file(path)
                .with_context(|| format!("checking {}", path.display()))?;
            println!(
                "config ok: provider '{}', {} streamer(s)",
                config.provider.name,
                config.streamers.len()
            );
            Some(config)
        }
        None => None,
    };

    let streamer_cfg = match (&args.streamer, &config) {
        (Some(name), Some(config)) => Some(
            config
                .streamers
                .iter()
                .find(|s| &s.name == name)
                .with_context(|| format!("no streamer named '{}' in the config", name))?
                .clone(),
        ),
        (Some(_), None) => bail!("--streamer needs --config"),
        _ => None,
    };

    let file = args
        .file
        .clone()
        .or_else(|| streamer_cfg.as_ref().map(|s| s.path.clone()));
    let Some(file) = file else {
        if config.is_none() {
            bail!("nothing to do: pass --config and/or --file");
        }
        return Ok(());
    };

    let kind = args
        .parser
        .or(streamer_cfg.as_ref().map(|s| s.parser))
        .unwrap_or_default();
    let user_data = match &args.user_data {
        Some(text) => serde_json::from_str(text).context("--user-data is not valid JSON")?,
        None => streamer_cfg
            .as_ref()
            .map(|s| s.user_data.clone())
            .unwrap_or(Value::Null),
    };

    let raw = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let results = kind.build().parse(&raw, &user_data);

    if is_whole_buffer_failure(&results) {
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            eprintln!("error: {}", err);
        }
        bail!("{} could not be parsed as {:?}", file.display(), kind);
    }

    let mut records = 0usize;
    let mut errors = 0usize;
    for result in &results {
        match result {
            Ok(record) => {
                records += 1;
                if !args.quiet {
                    println!("{:?}\t{}\t{}", record.mode, record.key, record.value);
                }
            }
            Err(err) => {
                errors += 1;
                eprintln!("skipped: {}", err);
            }
        }
    }
    println!(
        "{}: {} record(s), {} error(s) with {:?}",
        file.display(),
        records,
        errors,
        kind
    );
    Ok(())
}
