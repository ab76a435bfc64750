use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use macrotape::capture::NullCapture;
use macrotape::hook::RdevHook;
use macrotape::inject::RdevInjector;
use macrotape::{
    ActivatorSignal, EventStore, MacroActivator, MemoryStore, Recorder, RecorderConfig,
};

#[derive(Parser)]
#[command(name = "macrotape", version, about = "Record, inspect and replay desktop macros")]
struct Cli {
    /// Macro file (JSON).
    #[arg(short, long, default_value = "macros.json", global = true)]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a macro; press Enter to stop.
    Record {
        /// Id to store the recording under.
        #[arg(short, long)]
        id: i64,

        /// Trailing events to drop on stop (the stop gesture itself).
        #[arg(long, default_value_t = 1)]
        discard_tail: usize,

        /// Ignore mouse input.
        #[arg(long)]
        no_mouse: bool,

        /// Ignore keyboard input.
        #[arg(long)]
        no_keyboard: bool,
    },
    /// Replay a stored macro.
    Play {
        #[arg(short, long)]
        id: i64,
    },
    /// List stored macros, or print one macro's events.
    Show {
        #[arg(short, long)]
        id: Option<i64>,

        /// Print events as JSON instead of the one-line summaries.
        #[arg(long)]
        json: bool,
    },
}

fn load_store(path: &PathBuf) -> Result<MemoryStore> {
    if path.exists() {
        MemoryStore::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(MemoryStore::new())
    }
}

fn record(file: &PathBuf, id: i64, discard_tail: usize, no_mouse: bool, no_keyboard: bool) -> Result<()> {
    let store = Arc::new(load_store(file)?);
    let config = RecorderConfig {
        record_mouse: !no_mouse,
        record_keyboard: !no_keyboard,
        discard_tail,
        ..RecorderConfig::default()
    };
    let hook = Arc::new(RdevHook::new(false, true));
    let recorder = Recorder::new(
        hook,
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(NullCapture),
        config,
    );

    recorder.start()?;
    print!("Recording macro {id}; press Enter to stop... ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let events = recorder.stop()?;
    recorder.shutdown();
    if events.is_empty() {
        bail!("nothing was recorded");
    }
    info!(events = events.len(), "recorded");

    store.put_macro(id, events);
    store.save_to_file(file)?;
    println!("Saved macro {id} to {}", file.display());
    Ok(())
}

fn play(file: &PathBuf, id: i64) -> Result<()> {
    let store = Arc::new(load_store(file)?);
    let events = store.events_for_macro(id)?;
    if events.is_empty() {
        bail!("macro {id} is empty");
    }

    let injector = Arc::new(RdevInjector::default());
    let activator = MacroActivator::new(injector, Arc::clone(&store) as Arc<dyn EventStore>);
    let signals = activator.run_macro(events)?;
    for signal in signals {
        match signal {
            ActivatorSignal::Activating(event) => println!("  {event}"),
            ActivatorSignal::Stopped { error: None } => println!("Done."),
            ActivatorSignal::Stopped { error: Some(e) } => bail!("replay failed: {e}"),
        }
    }
    Ok(())
}

fn show(file: &PathBuf, id: Option<i64>, json: bool) -> Result<()> {
    let store = load_store(file)?;
    match id {
        Some(id) => {
            let events = store.events_for_macro(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for event in events {
                    println!("{event}");
                }
            }
        }
        None => {
            let ids = store.macro_ids();
            if ids.is_empty() {
                println!("No macros in {}", file.display());
            }
            for id in ids {
                let count = store
                    .num_events_for_macro(id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|_| "?".into());
                println!("macro {id}: {count} events");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Record {
            id,
            discard_tail,
            no_mouse,
            no_keyboard,
        } => record(&cli.file, id, discard_tail, no_mouse, no_keyboard),
        Command::Play { id } => play(&cli.file, id),
        Command::Show { id, json } => show(&cli.file, id, json),
    }
}
