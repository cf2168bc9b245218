use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use env_logger::Env;
use fileevents::events::{EventMask, FileEvent};
use fileevents::util::format_event_time;
use fileevents::watcher::{FileEventSystem, FileEventsConfig};
use pico_args::Arguments;
use shellexpand::full;

const USAGE: &str = "\
Usage: fileevents [-h] [--mask LIST] [--poll SECS] [--json] [--verbose] [<paths>]
    Monitors one or more paths for file events.
    If no paths are specified, it monitors the current directory.

    -h, --help     Prints this message
    --mask LIST    Comma separated event kinds: created, removed, renamed,
                   modified, attribute, all (default: all)
    --poll SECS    Poll interval for the polling backend (default: 2)
    --json         Prints one JSON object per event
    --verbose      Logs every delivered event
";

fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(""))
        .format_timestamp_secs()
        .try_init();

    if let Err(err) = run() {
        eprintln!("fileevents: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = Arguments::from_env();

    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return Ok(());
    }

    let mask = args
        .opt_value_from_fn("--mask", EventMask::parse)
        .map_err(|err| err.to_string())?
        .unwrap_or(EventMask::ALL);
    let poll_secs: Option<u64> = args
        .opt_value_from_str("--poll")
        .map_err(|err| err.to_string())?;
    let json = args.contains("--json");
    let verbose = args.contains("--verbose");

    let mut raw_paths = Vec::new();
    while let Some(raw) = args
        .opt_free_from_str::<String>()
        .map_err(|err| err.to_string())?
    {
        raw_paths.push(raw);
    }

    let leftover = args.finish();
    if !leftover.is_empty() {
        let extras: Vec<String> = leftover
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        return Err(format!("unexpected arguments: {}", extras.join(" ")));
    }

    if raw_paths.is_empty() {
        raw_paths.push(".".to_string());
    }

    let mut paths = Vec::with_capacity(raw_paths.len());
    for raw in &raw_paths {
        let expanded = full(raw.as_str()).map_err(|err| err.to_string())?;
        let path = PathBuf::from(expanded.as_ref());
        if !path.exists() {
            return Err(format!("Path does not exist: '{}'", path.display()));
        }
        paths.push(path);
    }

    let mut config = FileEventsConfig {
        verbose,
        ..FileEventsConfig::default()
    };
    if let Some(secs) = poll_secs {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || running_clone.store(false, Ordering::SeqCst))
        .map_err(|err| format!("failed to install signal handler: {err}"))?;

    let mut system = FileEventSystem::init(config).map_err(|err| err.to_string())?;
    for path in &paths {
        system
            .add_watch(path, mask)
            .map_err(|err| format!("Failed to watch path: '{}': {err}", path.display()))?;
    }

    while running.load(Ordering::SeqCst) {
        match system.recv_timeout(Duration::from_millis(250)) {
            Ok(Some(event)) => print_event(&event, json)?,
            Ok(None) => {}
            Err(err) => return Err(err.to_string()),
        }
    }

    system.close();
    Ok(())
}

fn print_event(event: &FileEvent, json: bool) -> Result<(), String> {
    if json {
        let line = serde_json::to_string(event).map_err(|err| err.to_string())?;
        println!("{line}");
    } else {
        println!(
            "{} {} {}",
            format_event_time(event.timestamp),
            event.path.display(),
            event.flags
        );
    }
    Ok(())
}
