use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;
use serde::Serialize;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use romforge_core::container::{ContainerKind, discover_pool};
use romforge_core::dat::{self, DatFormat};
use romforge_core::db::OfflineStore;
use romforge_core::merge::{self, MergeMode};
use romforge_core::model::GameDatabase;
use romforge_core::profile::ScanProfile;
use romforge_core::services::{
    CancellationToken, CreateOptions, CreateResults, DatabaseCreator, OperationStatus, Progress, ProgressSink,
    RebuildEngine, RebuildOptions, RebuildResults, ScanEngine, ScanOptions, ScanResults,
};

#[derive(Parser)]
#[command(name = "romforge")]
#[command(about = "ROM collection manager - DAT-driven scanning, merging and rebuilding")]
struct Cli {
    /// Show verbose progress (current file, phase summaries)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Emit progress events as JSON instead of interactive text
    #[arg(long, global = true, default_value_t = false)]
    progress_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a DAT against folders and indexed offline disks
    Scan {
        /// DAT file (Logiqx XML or ClrMamePro)
        dat: PathBuf,

        /// Folder to include in the pool (repeatable)
        #[arg(long = "folder", short = 'f')]
        folders: Vec<PathBuf>,

        /// Indexed offline disk to include in the pool (repeatable)
        #[arg(long = "offline")]
        offline_disks: Vec<String>,

        /// Scan profile (default: ~/.config/romforge/profile.toml if present)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Set layout: split, non-merge, merge, merge-child-folder
        #[arg(long, default_value = "split")]
        mode: String,

        /// Hash every candidate again even when checksums are known
        #[arg(long)]
        force: bool,

        /// Trust CRC32 values reported by archives
        #[arg(long)]
        use_reported_crc: bool,

        /// List every matched, misnamed, missing and unused file
        #[arg(long)]
        details: bool,
    },
    /// Copy matching files from a source folder into per-game containers
    Rebuild {
        /// DAT file (Logiqx XML or ClrMamePro)
        dat: PathBuf,

        #[arg(long)]
        source: PathBuf,

        #[arg(long)]
        target: PathBuf,

        /// Target container type: zip, 7z or folder
        #[arg(long = "type", default_value = "zip")]
        container: String,

        /// Move incomplete games here
        #[arg(long)]
        incomplete: Option<PathBuf>,

        /// Set layout: split, non-merge, merge, merge-child-folder
        #[arg(long, default_value = "split")]
        mode: String,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        use_reported_crc: bool,

        /// Delete source files once they have been rebuilt
        #[arg(long)]
        remove_source: bool,

        /// Look for missing .cue sheets in these folders (repeatable)
        #[arg(long = "cue-folder")]
        cue_folders: Vec<PathBuf>,

        /// Show every rebuilt, failed and unused file
        #[arg(long)]
        details: bool,
    },
    /// Build a DAT describing the games already in a folder
    Create {
        /// Folder whose subfolders and archives are games
        source: PathBuf,

        #[arg(long, short = 'o')]
        output: PathBuf,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Output format: xml or clrmame
        #[arg(long, default_value = "xml")]
        format: String,
    },
    /// Rewrite a DAT in another set layout
    Merge {
        dat: PathBuf,

        /// Set layout: split, non-merge, merge, merge-child-folder
        #[arg(long)]
        mode: String,

        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Output format: xml or clrmame
        #[arg(long, default_value = "xml")]
        format: String,
    },
    /// Re-export a DAT in the other format
    Convert {
        dat: PathBuf,

        #[arg(long, short = 'o')]
        output: PathBuf,

        /// Output format: xml or clrmame
        #[arg(long)]
        format: String,
    },
    /// Record the files of a mounted disk for later offline scans
    IndexDisk {
        /// Name the disk is recorded under
        name: String,

        /// Mount point or folder to index
        path: PathBuf,

        /// Hash every file while indexing
        #[arg(long)]
        hash: bool,
    },
    /// List indexed offline disks
    Disks {
        /// Forget an indexed disk
        #[arg(long)]
        remove: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let verbose = cli.verbose;
    let progress_sink = CliProgressSink::new(cli.progress_json, verbose);

    match cli.command {
        Commands::Scan {
            dat,
            folders,
            offline_disks,
            profile,
            mode,
            force,
            use_reported_crc,
            details,
        } => {
            let mut profile = match profile {
                Some(path) => ScanProfile::load(&path)
                    .with_context(|| format!("Failed to load profile {}", path.display()))?,
                None => ScanProfile::load_default()?.unwrap_or_default(),
            };
            profile.folders.extend(folders);
            profile.offline_disks.extend(offline_disks);
            profile.force_recompute |= force;
            profile.use_reported_crc |= use_reported_crc;
            cmd_scan(&dat, &profile, &mode, details, &progress_sink)
        }
        Commands::Rebuild {
            dat,
            source,
            target,
            container,
            incomplete,
            mode,
            force,
            use_reported_crc,
            remove_source,
            cue_folders,
            details,
        } => {
            let kind: ContainerKind = container.parse()?;
            let mut options = RebuildOptions::new(source, target, kind);
            options.incomplete_target = incomplete;
            options.force_recompute = force;
            options.use_reported_crc = use_reported_crc;
            options.remove_source = remove_source;
            options.find_missing_cue_files = !cue_folders.is_empty();
            options.cue_folders = cue_folders;
            cmd_rebuild(&dat, options, &mode, details, &progress_sink)
        }
        Commands::Create {
            source,
            output,
            name,
            description,
            author,
            format,
        } => {
            let options = CreateOptions {
                source,
                name: name.unwrap_or_default(),
                description: description.unwrap_or_default(),
                author: author.unwrap_or_default(),
            };
            cmd_create(options, &output, &format, &progress_sink)
        }
        Commands::Merge {
            dat,
            mode,
            output,
            format,
        } => cmd_merge(&dat, &mode, &output, &format),
        Commands::Convert { dat, output, format } => cmd_convert(&dat, &output, &format),
        Commands::IndexDisk { name, path, hash } => cmd_index_disk(&name, &path, hash, verbose),
        Commands::Disks { remove } => cmd_disks(remove.as_deref()),
    }
}

/// Load a DAT and lay it out in `mode`.
fn load_dat(path: &Path, mode: &str) -> Result<GameDatabase> {
    let mode: MergeMode = mode.parse()?;
    let db = dat::load_database(path).with_context(|| format!("Failed to load DAT {}", path.display()))?;
    eprintln!(
        "Loaded {}: {} games, {} roms",
        if db.header.name.is_empty() { "DAT" } else { db.header.name.as_str() },
        db.game_count(),
        db.rom_count()
    );
    Ok(merge::transform(&db, mode)?)
}

fn cmd_scan(dat: &Path, profile: &ScanProfile, mode: &str, details: bool, progress_sink: &CliProgressSink) -> Result<()> {
    if profile.folders.is_empty() && profile.offline_disks.is_empty() {
        bail!("Nothing to scan: pass --folder or --offline, or list them in a profile");
    }

    let db = load_dat(dat, mode)?;
    let pool = if profile.offline_disks.is_empty() {
        romforge_core::services::scan::collect_pool(&profile.folders, Vec::new())?
    } else {
        let store = OfflineStore::open_default().context("Failed to open offline disk index")?;
        profile.collect_pool(&store)?
    };
    eprintln!("Scanning {} files...", pool.len());

    let options: ScanOptions = profile.scan_options();
    let results = run_engine("scan", progress_sink, move |sink: ChannelSink<ScanResults>, cancel| {
        ScanEngine::new(options, sink).with_cancellation(cancel).scan(&db, pool)
    })?;

    print_scan_summary(&results, details);
    Ok(())
}

fn cmd_rebuild(
    dat: &Path,
    options: RebuildOptions,
    mode: &str,
    details: bool,
    progress_sink: &CliProgressSink,
) -> Result<()> {
    let db = load_dat(dat, mode)?;
    eprintln!(
        "Rebuilding {} into {} as {}...",
        options.source.display(),
        options.target.display(),
        options.target_kind
    );

    let results = run_engine("rebuild", progress_sink, move |sink: ChannelSink<RebuildResults>, cancel| {
        RebuildEngine::new(options, sink)?
            .with_cancellation(cancel)
            .rebuild(&db)
    })?;

    print_rebuild_summary(&results, details);
    Ok(())
}

fn cmd_create(options: CreateOptions, output: &Path, format: &str, progress_sink: &CliProgressSink) -> Result<()> {
    let format: DatFormat = format.parse()?;
    eprintln!("Creating DAT from {}...", options.source.display());

    let db = run_engine("create", progress_sink, move |sink: ChannelSink<CreateResults>, cancel| {
        DatabaseCreator::new(options, sink)?.with_cancellation(cancel).create()
    })?;

    dat::save_database(&db, output, format).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Created: {}", output.display());
    println!("  Games: {}", db.game_count());
    println!("  Roms:  {}", db.rom_count());
    Ok(())
}

fn cmd_merge(dat: &Path, mode: &str, output: &Path, format: &str) -> Result<()> {
    let format: DatFormat = format.parse()?;
    let db = load_dat(dat, mode)?;
    dat::save_database(&db, output, format).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} ({} games, {} roms)", output.display(), db.game_count(), db.rom_count());
    Ok(())
}

fn cmd_convert(dat: &Path, output: &Path, format: &str) -> Result<()> {
    let format: DatFormat = format.parse()?;
    let db = dat::load_database(dat).with_context(|| format!("Failed to load DAT {}", dat.display()))?;
    dat::save_database(&db, output, format).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Converted {} to {} ({} games)", dat.display(), format, db.game_count());
    Ok(())
}

fn cmd_index_disk(name: &str, path: &Path, hash: bool, verbose: bool) -> Result<()> {
    let discovery = discover_pool(path, true).with_context(|| format!("Failed to index {}", path.display()))?;
    for (container, error) in &discovery.failures {
        eprintln!("  Skipped {}: {}", container.display(), error);
    }

    let mut files = discovery.files;
    if hash {
        let total = files.len();
        for (i, file) in files.iter_mut().enumerate() {
            if verbose {
                eprint!("\r\x1b[2K  [{:>6}/{:>6}] {}", i + 1, total, file.display_path());
                let _ = io::stderr().flush();
            }
            if let Err(e) = file.container_kind.container().calculate_checksums(file, false) {
                log::warn!("Could not hash {}: {}", file.display_path(), e);
            }
        }
        if verbose {
            eprintln!();
        }
    }

    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    let mut store = OfflineStore::open_default().context("Failed to open offline disk index")?;
    store.record_disk(name, &files)?;

    println!("Indexed disk: {}", name);
    println!("  Files: {}", files.len());
    println!("  Size:  {}", format_bytes(total_bytes as i64));
    Ok(())
}

fn cmd_disks(remove: Option<&str>) -> Result<()> {
    let store = OfflineStore::open_default().context("Failed to open offline disk index")?;

    if let Some(name) = remove {
        if store.remove_disk(name)? {
            println!("Removed disk: {}", name);
        } else {
            bail!("No indexed disk named '{}'", name);
        }
        return Ok(());
    }

    let disks = store.list_disks()?;
    if disks.is_empty() {
        println!("No offline disks indexed. Use 'romforge index-disk' to add one.");
        return Ok(());
    }
    println!("{:<30} {:>10}  Indexed", "Disk", "Files");
    println!("{}", "-".repeat(64));
    for disk in disks {
        println!("{:<30} {:>10}  {}", truncate_string(&disk.name, 30), disk.file_count, disk.indexed_at);
    }
    Ok(())
}

fn print_scan_summary(results: &ScanResults, details: bool) {
    println!();
    println!("Scan Results");
    println!("============");
    println!("  Matched:      {:>8}", results.matched.len());
    println!("  Wrong named:  {:>8}", results.wrong_named.len());
    println!("  Missing:      {:>8}", results.missing.len());
    println!("  Unused files: {:>8}", results.unused.len());

    if !details {
        if !results.wrong_named.is_empty() || !results.missing.is_empty() {
            println!();
            println!("Use --details to list individual files.");
        }
        return;
    }

    if !results.wrong_named.is_empty() {
        println!();
        println!("Wrong named:");
        for m in &results.wrong_named {
            println!("  {} / {}  <-  {}", m.game, m.rom_name, m.file.display_path());
        }
    }
    if !results.missing.is_empty() {
        println!();
        println!("Missing:");
        for m in &results.missing {
            println!("  {} / {}", m.game, m.rom_name);
        }
    }
    if !results.unused.is_empty() {
        println!();
        println!("Unused:");
        for f in &results.unused {
            println!("  {}", f.display_path());
        }
    }
}

fn print_rebuild_summary(results: &RebuildResults, details: bool) {
    let written = results.rebuilt.iter().filter(|r| r.written).count();
    let complete = results.games.iter().filter(|g| g.complete).count();

    println!();
    println!("Rebuild Results");
    println!("===============");
    println!("  Written:          {:>8}", written);
    println!("  Already present:  {:>8}", results.rebuilt.len() - written);
    println!("  Failed:           {:>8}", results.failed.len());
    println!("  Unused files:     {:>8}", results.unused.len());
    println!("  Sources removed:  {:>8}", results.removed.len());
    println!("  Games complete:   {:>8} of {}", complete, results.games.len());

    for failure in &results.failed {
        eprintln!("  Failed {} -> {} / {}: {}", failure.source, failure.game, failure.rom_name, failure.error);
    }

    if !details {
        return;
    }
    if !results.rebuilt.is_empty() {
        println!();
        println!("Rebuilt:");
        for r in &results.rebuilt {
            println!("  {} -> {} / {}", r.source, r.game, r.rom_name);
        }
    }
    let incomplete: Vec<_> = results.games.iter().filter(|g| !g.complete).collect();
    if !incomplete.is_empty() {
        println!();
        println!("Incomplete:");
        for g in incomplete {
            println!("  {}  ({})", g.game, g.target.display());
        }
    }
    if !results.unused.is_empty() {
        println!();
        println!("Unused:");
        for f in &results.unused {
            println!("  {}", f.display_path());
        }
    }
}

/// Relays engine events from the worker thread to the display loop.
struct ChannelSink<R>(Sender<Progress<R>>);

impl<R: Send + 'static> ProgressSink<Progress<R>> for ChannelSink<R> {
    fn emit(&self, event: Progress<R>) {
        // The display loop only goes away after the worker has finished.
        let _ = self.0.send(event);
    }
}

/// Run an engine on a worker thread and render its events until it finishes.
///
/// In interactive mode pressing Enter requests cancellation.
fn run_engine<R, T, F>(stream: &'static str, progress_sink: &CliProgressSink, work: F) -> Result<T>
where
    R: Serialize + Send + 'static,
    T: Send + 'static,
    F: FnOnce(ChannelSink<R>, CancellationToken) -> romforge_core::Result<T> + Send + 'static,
{
    let cancel = CancellationToken::new();
    if !progress_sink.is_json() {
        eprintln!("  Press Enter to stop gracefully...");
        let token = cancel.clone();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut handle = stdin.lock();
            let mut line = String::new();
            let _ = handle.read_line(&mut line);
            token.cancel();
        });
    }

    let (tx, rx) = crossbeam_channel::unbounded::<Progress<R>>();
    let worker = {
        let cancel = cancel.clone();
        thread::spawn(move || work(ChannelSink(tx), cancel))
    };

    for event in rx.iter() {
        progress_sink.render(stream, &event);
    }

    let outcome = worker.join().map_err(|_| anyhow!("{} worker panicked", stream))?;
    match outcome {
        Err(e) if e.is_canceled() => bail!("{} canceled", stream),
        other => Ok(other?),
    }
}

#[derive(Clone)]
struct CliProgressSink {
    json: bool,
    verbose: bool,
    stderr: Arc<Mutex<()>>,
}

impl CliProgressSink {
    fn new(json: bool, verbose: bool) -> Self {
        Self {
            json,
            verbose,
            stderr: Arc::new(Mutex::new(())),
        }
    }

    fn is_json(&self) -> bool {
        self.json
    }

    fn emit_json<T: Serialize>(&self, stream: &str, event: &T) {
        let _guard = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        match serde_json::to_string(&json!({ "stream": stream, "event": event })) {
            Ok(line) => eprintln!("{}", line),
            Err(err) => eprintln!("{{\"stream\":\"logger\",\"error\":\"{}\"}}", err),
        }
    }

    fn render<R: Serialize>(&self, stream: &str, event: &Progress<R>) {
        if self.json {
            self.emit_json(stream, event);
            return;
        }

        let _guard = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        match event.status {
            OperationStatus::Completed => eprintln!("\r\x1b[2K  {} done", progress_bar(100.0, 30)),
            OperationStatus::Canceled => eprintln!("\r\x1b[2K  Canceled at {:.1}%", event.percent),
            status => {
                let current = match (&event.current, self.verbose) {
                    (Some(current), true) => truncate_string(current, 50),
                    _ => String::new(),
                };
                eprint!(
                    "\r\x1b[2K  {} {:>5.1}%  {:<10} {}",
                    progress_bar(event.percent, 30),
                    event.percent,
                    status_label(status),
                    current
                );
                let _ = io::stderr().flush();
            }
        }
    }
}

fn status_label(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Hashing => "hashing",
        OperationStatus::Scanning => "scanning",
        OperationStatus::Rebuilding => "rebuilding",
        OperationStatus::Creating => "creating",
        OperationStatus::Completed => "done",
        OperationStatus::Canceled => "canceled",
    }
}

fn progress_bar(pct: f64, width: usize) -> String {
    let filled = ((pct / 100.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn format_bytes(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
