//! Command-line interface for the LIFT lexicon importer.
//!
//! Imports LIFT files into a local lexicon database, looks entries up by
//! headword, and manages the database file.

use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lift_rs::{
    EntryView, ImportOptions, ImportReport, Lexicon, LexiconOptions, MergeStyle,
    error::Result,
    progress::{ProgressCallback, ProgressUpdate},
};
use log::{LevelFilter, error, info};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "LIFT lexicon import CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a custom database file (optional)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Set verbosity level (use -v, -vv, or -vvv for increasing verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a LIFT file into the lexicon
    Import {
        /// The .lift file to import
        file: PathBuf,
        /// How incoming data is reconciled: keep-old, keep-only-new (replace-all) or combine
        #[arg(long, default_value_t = MergeStyle::Combine)]
        merge_style: MergeStyle,
        /// Directory that receives copies of referenced audio files
        #[arg(long)]
        media_dir: Option<PathBuf>,
        /// Discard the existing lexicon before importing
        #[arg(long, default_value_t = false)]
        force_reset: bool,
    },
    /// Show entries, senses and relations for a headword
    Show {
        /// The headword to look up
        headword: String,
    },
    /// Show object counts per kind
    Stats,
    /// Delete the lexicon database
    ClearDb,
}

/// Sets up logging based on verbosity level.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter(None, log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

/// Creates a progress callback that draws one bar per stage.
fn create_progress_callback(
    multi_progress: MultiProgress,
    progress_bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
) -> ProgressCallback {
    Box::new(move |update: ProgressUpdate| {
        let Ok(mut bars) = progress_bars.lock() else {
            return true;
        };

        if !bars.contains_key(&update.stage_description) {
            let pb = multi_progress.add(ProgressBar::new(update.total_items.unwrap_or(0)));
            let style_template = if update.total_items.is_some() {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}"
            } else {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {spinner} {msg}"
            };
            if let Ok(style) = ProgressStyle::default_bar().template(style_template) {
                pb.set_style(style.progress_chars("##-"));
            }
            pb.set_prefix(update.stage_description.clone());
            pb.enable_steady_tick(Duration::from_millis(100));
            bars.insert(update.stage_description.clone(), pb);
        }
        if let Some(pb) = bars.get(&update.stage_description) {
            pb.set_position(update.current_item);
            if let Some(msg) = update.message {
                pb.set_message(msg);
            }
            if let Some(total) = update.total_items {
                if update.current_item >= total {
                    pb.finish_and_clear();
                }
            }
        }
        true
    })
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    error!("{}: {}", context, e);
    eprintln!("{}", format!("{}: {}", context, e).red());
    std::process::exit(1);
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Import {
            file,
            merge_style,
            media_dir,
            force_reset,
        } => {
            let lexicon = Lexicon::open(LexiconOptions {
                db_path: cli.db_path,
                force_reset,
            })
            .unwrap_or_else(|e| fail("Error opening lexicon", e));
            let options = ImportOptions {
                merge_style,
                source_dir: None,
                media_dir,
            };
            handle_import(&lexicon, file, options).await;
        }
        Commands::Show { headword } => {
            let lexicon = open_existing(cli.db_path);
            if let Err(e) = handle_show(&lexicon, &headword) {
                fail(&format!("Error looking up '{}'", headword), e);
            }
        }
        Commands::Stats => {
            let lexicon = open_existing(cli.db_path);
            if let Err(e) = handle_stats(&lexicon) {
                fail("Error reading statistics", e);
            }
        }
        Commands::ClearDb => {
            info!("Clearing database...");
            match Lexicon::clear_database(cli.db_path) {
                Ok(_) => println!("{}", "Database cleared successfully.".green()),
                Err(e) => fail("Error clearing database", e),
            }
        }
    }

    Ok(())
}

fn open_existing(db_path: Option<PathBuf>) -> Lexicon {
    Lexicon::open(LexiconOptions {
        db_path,
        force_reset: false,
    })
    .unwrap_or_else(|e| fail("Error opening lexicon", e))
}

/// Runs an import with progress bars and prints the report.
async fn handle_import(lexicon: &Lexicon, file: PathBuf, options: ImportOptions) {
    info!("Importing {:?} ({})", file, options.merge_style);
    let multi_progress = MultiProgress::new();
    let progress_bars = Arc::new(Mutex::new(HashMap::<String, ProgressBar>::new()));
    let callback = create_progress_callback(multi_progress.clone(), progress_bars.clone());

    let result = lexicon.import_file(&file, options, Some(callback)).await;

    // Clean up progress bars
    if let Ok(bars) = progress_bars.lock() {
        for (_, pb) in bars.iter() {
            pb.finish_and_clear();
        }
    }
    drop(multi_progress);
    std::io::stdout().flush().ok();

    match result {
        Ok(report) => print_report(&report),
        Err(e) => fail(&format!("Error importing {}", file.display()), e),
    }
}

fn print_report(report: &ImportReport) {
    let headline = format!(
        "{} entries created, {} deleted, {} senses created",
        report.entries_created, report.entries_deleted, report.senses_created
    );
    if report.cancelled {
        println!("{} ({})", "Import cancelled; nothing was saved.".yellow(), headline);
        return;
    }
    println!("{} {}", "Import complete:".green().bold(), headline);
    if report.has_problems() {
        println!(
            "{}",
            format!("{} problems were found:", report.problem_count()).yellow()
        );
        print!("{}", report);
    } else {
        println!("Finished in {:.2?}.", report.elapsed);
    }
}

fn handle_show(lexicon: &Lexicon, headword: &str) -> Result<()> {
    let entries = lexicon.lookup_headword(headword)?;
    if entries.is_empty() {
        println!("No entries found for '{}'.", headword.yellow());
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &EntryView) {
    match &entry.lift_id {
        Some(id) => println!("\n{} {}", entry.headword.bold().cyan(), format!("({})", id).dimmed()),
        None => println!("\n{}", entry.headword.bold().cyan()),
    }
    for (i, sense) in entry.senses.iter().enumerate() {
        let pos = sense
            .part_of_speech
            .as_deref()
            .map(|p| format!(" {}", p.italic()))
            .unwrap_or_default();
        println!("  {}{}", (i + 1).to_string().bold(), pos);
        for (ws, text) in &sense.gloss {
            println!("     {} {}", format!("[{}]", ws).dimmed(), text);
        }
        for (ws, text) in &sense.definition {
            println!("     {} {}", format!("[{}]", ws).dimmed(), text.italic());
        }
    }
    for relation in &entry.relations {
        println!(
            "  {}: {}",
            relation.relation_type.magenta(),
            relation.targets.join(", ").green()
        );
    }
}

fn handle_stats(lexicon: &Lexicon) -> Result<()> {
    let stats = lexicon.stats()?;
    if stats.is_empty() {
        println!("The lexicon at {} is empty.", lexicon.db_path().display());
        return Ok(());
    }
    println!("{}", lexicon.db_path().display().to_string().dimmed());
    for (kind, count) in stats {
        println!("  {:>18} {}", kind.to_string().cyan(), count);
    }
    Ok(())
}
