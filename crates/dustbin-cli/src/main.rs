mod commands;
mod logging;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::bail;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use dustbin_core::{address, TrashEngine};
use tracing::error;

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut engine = match TrashEngine::from_environment() {
        Ok(engine) => engine,
        Err(err) => {
            error!("Error setting up trash engine: {}", err);
            process::exit(1);
        }
    };
    if let Err(err) = engine.init() {
        error!("Error initializing trash directories: {}", err);
        process::exit(1);
    }

    let args = Cli::parse();

    match args.command {
        Some(Commands::List) => {
            run_list(&mut engine);
        }
        Some(Commands::Put { paths }) => {
            if let Err(err) = run_put(&mut engine, &paths) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Restore { address }) => {
            if let Err(err) = run_restore(&mut engine, &address) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Delete { address }) => {
            if let Err(err) = run_delete(&mut engine, &address) {
                error!("Error: {}", err);
                process::exit(1);
            }
        }
        Some(Commands::Empty) => {
            match prompt_confirm(
                "Permanently delete EVERYTHING in the trash?",
                Some(false),
            ) {
                Ok(true) => {
                    if let Err(err) = engine.empty_trash() {
                        error!("Error emptying trash: {}", err);
                        process::exit(1);
                    }
                    println!("Trash emptied");
                }
                _ => {
                    process::exit(0);
                }
            }
        }
        Some(Commands::Size) => {
            run_size(&mut engine);
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", engine.limits());
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_list(engine: &mut TrashEngine) {
    let mut items = engine.list();
    items.sort_by(|a, b| a.deletion_date.cmp(&b.deletion_date));

    for item in items {
        let addr = address::encode(item.trash_id, &item.file_id, &item.relative_path);
        let date = item
            .deletion_date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "????-??-?? ??:??:??".to_string());
        println!(
            "{}  {}  {}",
            date.dimmed(),
            addr.cyan(),
            item.orig_path.display()
        );
    }
}

fn run_put(engine: &mut TrashEngine, paths: &[PathBuf]) -> anyhow::Result<()> {
    if paths.is_empty() {
        bail!("no paths given");
    }
    for path in paths {
        let abs = absolute_path(path)?;
        let item = engine.trash(&abs)?;
        println!(
            "{} -> {}",
            abs.display(),
            address::encode(item.trash_id, &item.file_id, "").cyan()
        );
    }
    Ok(())
}

fn run_restore(engine: &mut TrashEngine, raw: &str) -> anyhow::Result<()> {
    let addr = address::decode(raw)?;
    if !addr.relative_path.is_empty() {
        bail!("only whole items can be restored; address a top-level id");
    }
    let dest = engine.restore(addr.trash_id, &addr.file_id)?;
    println!("Restored to {}", dest.display().to_string().green());
    Ok(())
}

fn run_delete(engine: &mut TrashEngine, raw: &str) -> anyhow::Result<()> {
    let addr = address::decode(raw)?;
    engine.del(addr.trash_id, &addr.file_id, &addr.relative_path)?;
    println!("Deleted {}", raw.red());
    Ok(())
}

fn run_size(engine: &mut TrashEngine) {
    for (id, root) in engine.trash_directories() {
        let used = match engine.trash_size(id) {
            Ok(used) => format!("{} bytes", used).yellow().to_string(),
            Err(err) => format!("unreadable ({})", err),
        };
        let capacity = match engine.partition_usage(id) {
            Ok(usage) => format!(
                "{} of {} bytes free",
                usage.available_bytes, usage.total_bytes
            ),
            Err(err) => format!("unreadable ({})", err),
        };
        println!("[{}] {}: {}, {}", id, root.display(), used, capacity);
    }
}

fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
