use std::path::PathBuf;
use std::time::Instant;

use env_logger::Env;
use fileevents::generator::{self, DEFAULT_FANOUTS};
use fileevents::util::format_count;
use pico_args::Arguments;
use serde::Serialize;

const USAGE: &str = "\
Usage: genfile [-h] [--fanouts LIST] [--snapshot PATH] [BASE]
    Creates a nested fixture tree under BASE (default: tmp).
    Every leaf directory receives 20 empty files.

    --fanouts LIST   Comma separated fan-out per level (default: 30,10,10,3)
    --snapshot PATH  Writes a JSON summary of the run to PATH
";

#[derive(Serialize)]
struct Snapshot {
    base: String,
    fanouts: Vec<usize>,
    files_created: usize,
    files_on_disk: u64,
    dirs_on_disk: u64,
    elapsed_ms: u128,
}

fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(""))
        .format_timestamp_secs()
        .try_init();

    if let Err(err) = run() {
        eprintln!("genfile: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return Ok(());
    }

    let fanouts = args
        .opt_value_from_fn("--fanouts", generator::parse_fanouts)
        .map_err(|e| e.to_string())?
        .unwrap_or_else(|| DEFAULT_FANOUTS.to_vec());
    let snapshot_path: Option<PathBuf> = args
        .opt_value_from_str("--snapshot")
        .map_err(|e| e.to_string())?;
    let base_arg: Option<String> = args.opt_free_from_str().map_err(|e| e.to_string())?;
    let leftover = args.finish();
    if !leftover.is_empty() {
        return Err("unexpected positional arguments".into());
    }

    let base = match base_arg {
        Some(raw) => PathBuf::from(expand_path(&raw)?),
        None => PathBuf::from("tmp"),
    };

    let start = Instant::now();
    let files = generator::generate(&base, &fanouts).map_err(|err| err.to_string())?;
    let elapsed = start.elapsed();

    println!(
        "Created {} files in {:?}",
        format_count(files.len()),
        elapsed
    );

    let summary = if files.is_empty() {
        generator::TreeSummary::default()
    } else {
        generator::summarize(&base).map_err(|err| err.to_string())?
    };
    if summary.files < files.len() as u64 {
        return Err(format!(
            "expected at least {} files under {}, found {}",
            files.len(),
            base.display(),
            summary.files
        ));
    }

    if let Some(path) = snapshot_path {
        let snapshot = Snapshot {
            base: base.display().to_string(),
            fanouts,
            files_created: files.len(),
            files_on_disk: summary.files,
            dirs_on_disk: summary.dirs,
            elapsed_ms: elapsed.as_millis(),
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(|err| err.to_string())?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| err.to_string())?;
            }
        }
        std::fs::write(&path, json).map_err(|err| err.to_string())?;
        println!("Snapshot written to {}", path.display());
    }

    Ok(())
}

fn expand_path(raw: &str) -> Result<String, String> {
    shellexpand::full(raw)
        .map(|cow| cow.into_owned())
        .map_err(|err| err.to_string())
}
