use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vfscan_core::{open_run, AddressGlob, ScanConfig, ScannerRegistry, VirtualAddress};

#[derive(Parser, Debug)]
#[command(name = "vfscan", version, about = "vfscan - Recursive Forensic Evidence Scanner")]
struct Cli {
	/// More log output (-v debug, -vv trace)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Scan an evidence file or directory
	Scan {
		/// Image file or directory of evidence files
		evidence: PathBuf,
		/// Scanners to run, comma separated ("all" for the default set)
		#[arg(long, value_delimiter = ',', default_value = "all")]
		scanners: Vec<String>,
		/// Scan database (defaults to ~/.vfscan/<evidence>.db)
		#[arg(long)]
		db: Option<PathBuf>,
		/// JSON configuration file
		#[arg(long)]
		config: Option<PathBuf>,
		/// Worker threads (defaults to one per core)
		#[arg(long)]
		workers: Option<usize>,
		/// Append run log events to this file as JSON lines
		#[arg(long)]
		log: Option<PathBuf>,
		/// Print the run summary as JSON
		#[arg(long)]
		json: bool,
	},
	/// Forget a scanner's results so the next scan runs it again
	Reset {
		evidence: PathBuf,
		/// Scanner to reset
		#[arg(long)]
		scanner: String,
		/// Address pattern, `*` matches any run of characters
		#[arg(long, default_value = "*")]
		glob: String,
		#[arg(long)]
		db: Option<PathBuf>,
	},
	/// List registered scanners
	Scanners,
	/// List entries below an address (roots when omitted)
	Ls {
		evidence: PathBuf,
		address: Option<String>,
		#[arg(long)]
		db: Option<PathBuf>,
	},
}

fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
		0 => EnvFilter::new("vfscan=info,vfscan_core=info"),
		1 => EnvFilter::new("vfscan=debug,vfscan_core=debug"),
		_ => EnvFilter::new("trace"),
	});

	let subscriber = tracing_subscriber::registry().with(filter).with(
		fmt::layer()
			.with_writer(std::io::stderr)
			.with_target(true)
			.compact(),
	);
	let _ = tracing::subscriber::set_global_default(subscriber);
}

fn progress_bar() -> Option<Arc<ProgressBar>> {
	if !atty::is(atty::Stream::Stderr) {
		return None;
	}
	let pb = ProgressBar::new(0);
	pb.set_style(
		ProgressStyle::default_bar()
			.template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} roots ({eta})")
			.unwrap_or_else(|_| ProgressStyle::default_bar())
			.progress_chars("#>-"),
	);
	Some(Arc::new(pb))
}

fn scan(
	evidence: &Path,
	scanners: &[String],
	db: Option<&Path>,
	config: Option<&Path>,
	workers: Option<usize>,
	log: Option<&Path>,
	json: bool,
) -> Result<()> {
	let mut config = match config {
		Some(path) => ScanConfig::load(path)?,
		None => ScanConfig::default(),
	};
	if workers.is_some() {
		config.workers = workers;
	}

	let mut run = open_run(evidence, db, config, log)?;
	let bar = progress_bar();
	if let Some(pb) = &bar {
		let pb = pb.clone();
		run.set_progress_callback(move |progress| {
			pb.set_length(progress.roots_total as u64);
			pb.set_position(progress.roots_done as u64);
			pb.set_message(progress.address);
		});
	}

	if !json {
		println!("🔍 Scanning {}", evidence.display());
	}
	let summary = run.scan(scanners)?;
	if let Some(pb) = &bar {
		pb.finish_and_clear();
	}

	if json {
		println!("{}", serde_json::to_string_pretty(&summary)?);
		return Ok(());
	}

	println!("✅ Scan completed");
	println!("📊 Run ID: {}", summary.run_id);
	println!("🧩 Scanners: {}", summary.scanners.join(", "));
	println!("📁 Roots: {}", summary.roots);
	println!("📈 Files scanned: {}", summary.files_scanned);
	println!("⏭️  Files skipped: {}", summary.files_skipped);
	println!("📦 Members added: {} ({} failed)", summary.members_added, summary.members_failed);
	println!("✂️  Carved: {}", summary.carved);
	println!("⏱️  Duration: {} ms", summary.duration_ms);
	if summary.events.is_empty() {
		println!("🟢 No problems logged");
	} else {
		println!("⚠️  Logged events:");
		for (kind, count) in &summary.events {
			println!("   {:?}: {}", kind, count);
		}
	}
	Ok(())
}

fn reset(evidence: &Path, scanner: &str, glob: &str, db: Option<&Path>) -> Result<()> {
	let glob = AddressGlob::new(glob)?;
	let run = open_run(evidence, db, ScanConfig::default(), None)?;
	let summary = run.reset(scanner, &glob)?;
	println!("🧹 Reset {} on {}", scanner, glob.as_str());
	println!("   Completion records removed: {}", summary.completions);
	println!("   Results removed: {}", summary.side_effects);
	Ok(())
}

fn list_scanners() {
	let registry = ScannerRegistry::builtin();
	println!("🧩 Registered scanners:");
	for d in registry.descriptors() {
		let default = if d.enabled_by_default { "default" } else { "opt-in" };
		println!("   {:<14} {:<9} {:>4}  {:<8} {}", d.name, d.kind, d.order, default, d.description);
		if !d.depends.is_empty() {
			println!("   {:<14} depends on {}", "", d.depends.join(", "));
		}
	}
}

fn list_entries(evidence: &Path, address: Option<&str>, db: Option<&Path>) -> Result<()> {
	let parent = address
		.map(|a| VirtualAddress::parse(a).with_context(|| format!("Bad address {}", a)))
		.transpose()?;
	let run = open_run(evidence, db, ScanConfig::default(), None)?;
	let store = run.context().store();

	let entries = store.children(parent.as_ref())?;
	if entries.is_empty() {
		println!("❌ No entries below {}", address.unwrap_or("the evidence root"));
		return Ok(());
	}
	for entry in entries {
		println!("{:<24} {:<9} {:>12}  {}", entry.address, entry.kind, entry.size, entry.full_path());
		for attr in store.attributes(&entry.address)? {
			println!("{:<24}   {}.{} = {}", "", attr.scanner, attr.key, attr.value);
		}
	}
	Ok(())
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	match cli.command {
		Commands::Scan { evidence, scanners, db, config, workers, log, json } => {
			scan(&evidence, &scanners, db.as_deref(), config.as_deref(), workers, log.as_deref(), json)?;
		}
		Commands::Reset { evidence, scanner, glob, db } => {
			reset(&evidence, &scanner, &glob, db.as_deref())?;
		}
		Commands::Scanners => list_scanners(),
		Commands::Ls { evidence, address, db } => {
			list_entries(&evidence, address.as_deref(), db.as_deref())?;
		}
	}
	Ok(())
}
