use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use crate::cancel::CancelToken;
use crate::cleanup;
use crate::config::Config;
use crate::dupes;
use crate::import;
use crate::mappings::Mappings;
use crate::prefer;
use crate::progress::{ProgressFn, ScanProgress};
use crate::scanner::{self, ScanOptions};
use crate::store::Store;

#[derive(Parser, Debug)]
#[command(
    name = "romman",
    version,
    about = "Content-addressed ROM library manager"
)]
pub struct Cli {
    /// Database path (falls back to ROMMAN_DB, then ./romman.sqlite)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import DAT catalogue files
    Import {
        /// DAT files to import
        #[arg(required = true, value_name = "DAT")]
        dats: Vec<PathBuf>,
    },
    /// Manage registered libraries
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Scan a library: discover, hash, and match its files
    Scan {
        library: String,
        /// Hash worker count (defaults to the logical CPU count)
        #[arg(long)]
        workers: Option<usize>,
        /// Rows per store transaction
        #[arg(long)]
        batch_size: Option<usize>,
        /// Single-threaded scanning
        #[arg(long)]
        sequential: bool,
    },
    /// Per-release report for a library's system
    Status {
        library: String,
        /// Only preferred releases that are present (the 1G1R set)
        #[arg(long = "1g1r")]
        one_game_one_rom: bool,
    },
    /// Pick one preferred release per base title
    Prefer {
        system: String,
        /// Region priority, best first (default: Europe,World,USA,Japan)
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,
    },
    /// List duplicate groups in a library
    Dupes { library: String },
    /// Write a duplicate-cleanup plan
    Plan {
        library: String,
        /// Base directory duplicates are moved under
        #[arg(long, value_name = "DIR")]
        quarantine: PathBuf,
        /// Plan file to write
        #[arg(long, value_name = "FILE", default_value = "cleanup-plan.json")]
        out: PathBuf,
    },
    /// Execute a previously written cleanup plan
    Execute {
        plan: PathBuf,
        /// Simulate without touching the filesystem
        #[arg(long)]
        dry_run: bool,
    },
    /// List known systems
    Systems,
}

#[derive(Subcommand, Debug)]
pub enum LibraryCommand {
    /// Register a directory as a library
    Add {
        name: String,
        root: PathBuf,
        /// System short name; inferred from the directory name if omitted
        #[arg(long)]
        system: Option<String>,
    },
    /// List libraries with match counts
    List,
    /// Unregister a library and forget its scans
    Remove { name: String },
}

pub fn run(cli: Cli, cancel: CancelToken) -> anyhow::Result<()> {
    let mappings = Mappings::load()?;

    match cli.command {
        Command::Import { dats } => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let mut store = Store::open(&config.db_path)?;
            let mut results = Vec::new();
            for dat in &dats {
                let result = import::import(&mut store, &mappings, dat, &cancel)
                    .with_context(|| format!("importing {}", dat.display()))?;
                results.push(result);
            }
            print_json(&results)
        }
        Command::Library(command) => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let mut store = Store::open(&config.db_path)?;
            run_library(&mut store, &mappings, command)
        }
        Command::Scan {
            library,
            workers,
            batch_size,
            sequential,
        } => {
            let config = Config::resolve(cli.db, None, workers, batch_size, sequential)?;
            let mut store = Store::open(&config.db_path)?;
            let options = ScanOptions::from(&config);

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template(
                    "{prefix} [{bar:40}] {pos:>6}/{len:<6} {elapsed_precise}",
                )
                .expect("static template")
                .progress_chars("=> "),
            );
            bar.set_prefix("SCAN");
            let sink_bar = bar.clone();
            let sink = move |p: ScanProgress| {
                sink_bar.set_length(p.total_files);
                sink_bar.set_position(p.files_scanned);
            };
            let result = scanner::scan(
                &mut store,
                &library,
                &options,
                Some(&sink as &ProgressFn),
                &cancel,
            );
            bar.finish_and_clear();
            print_json(&result?)
        }
        Command::Status {
            library,
            one_game_one_rom,
        } => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let store = Store::open(&config.db_path)?;
            let lib = store.get_library(&library)?;
            let statuses = if one_game_one_rom {
                store.preferred_matched(lib.id)?
            } else {
                store.release_statuses(lib.system_id, lib.id)?
            };
            print_json(&statuses)
        }
        Command::Prefer { system, regions } => {
            let config = Config::resolve(cli.db, regions, None, None, false)?;
            let mut store = Store::open(&config.db_path)?;
            let row = store
                .find_system(&system)?
                .ok_or_else(|| crate::error::Error::not_found("system", &system))?;
            let outcome = prefer::select_preferred(&mut store, row.id, &config.region_priority)?;
            print_json(&outcome)
        }
        Command::Dupes { library } => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let store = Store::open(&config.db_path)?;
            let lib = store.get_library(&library)?;
            let groups = dupes::find_duplicates(&store, &lib)?;
            print_json(&groups)
        }
        Command::Plan {
            library,
            quarantine,
            out,
        } => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let store = Store::open(&config.db_path)?;
            let plan = cleanup::generate_plan(&store, &library, &quarantine)?;
            cleanup::save_plan(&plan, &out)?;
            print_json(&json!({
                "plan_file": out,
                "summary": plan.summary,
            }))
        }
        Command::Execute { plan, dry_run } => {
            let plan = cleanup::load_plan(&plan)?;
            let result = cleanup::execute_plan(&plan, dry_run);
            print_json(&result)
        }
        Command::Systems => {
            let config = Config::resolve(cli.db, None, None, None, false)?;
            let store = Store::open(&config.db_path)?;
            let mut systems = Vec::new();
            for s in store.list_systems()? {
                let sources: Vec<_> = store
                    .sources_for_system(s.id)?
                    .into_iter()
                    .map(|src| {
                        json!({
                            "kind": src.kind,
                            "priority": src.priority,
                            "path": src.path,
                        })
                    })
                    .collect();
                systems.push(json!({
                    "short_name": s.short_name,
                    "display_name": s.display_name,
                    "dat_name": s.dat_name,
                    "dat_version": s.dat_version,
                    "sources": sources,
                }));
            }
            print_json(&systems)
        }
    }
}

fn run_library(
    store: &mut Store,
    mappings: &Mappings,
    command: LibraryCommand,
) -> anyhow::Result<()> {
    match command {
        LibraryCommand::Add { name, root, system } => {
            let root = root
                .canonicalize()
                .with_context(|| format!("library root {}", root.display()))?;
            let short = match system {
                Some(short) => short,
                None => mappings.system_for_directory(&root).ok_or_else(|| {
                    crate::error::Error::Config(format!(
                        "cannot infer a system from {}; pass --system",
                        root.display()
                    ))
                })?,
            };
            let system_row = match store.find_system(&short)? {
                Some(row) => row,
                None => store.create_system(&short)?,
            };
            let library = store.create_library(&name, &root, system_row.id)?;
            print_json(&json!({
                "name": library.name,
                "root_path": library.root_path,
                "system": system_row.short_name,
            }))
        }
        LibraryCommand::List => {
            let summaries = store.library_summaries()?;
            print_json(&summaries)
        }
        LibraryCommand::Remove { name } => {
            store.remove_library(&name)?;
            print_json(&json!({ "removed": name }))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
