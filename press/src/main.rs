use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use press_format::{ExtractOptions, PressReader, PressWriter, RewriteRule};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;
use tracing::debug;

#[derive(Debug)]
struct ParseRewriteError(String);

impl std::error::Error for ParseRewriteError {}

impl std::fmt::Display for ParseRewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rewrite rules take the form from=to: {}", self.0)
    }
}

fn parse_rewrite(src: &str) -> std::result::Result<RewriteRule, ParseRewriteError> {
    let mut parts = src.splitn(2, '=');
    match (parts.next(), parts.next()) {
        (Some(from), Some(to)) if !from.is_empty() => Ok(RewriteRule::new(from, to)),
        _ => Err(ParseRewriteError(src.to_string())),
    }
}

use structopt::clap::AppSettings::*;

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "c", visible_alias = "create", about = "Create a new archive")]
    Create {
        #[structopt(
            name = "pressfile",
            parse(from_os_str),
            help = "Path to the .press archive"
        )]
        path: PathBuf,

        #[structopt(
            name = "files",
            parse(from_os_str),
            help = "Files and directories to add to the archive"
        )]
        files: Vec<PathBuf>,
    },

    #[structopt(name = "i", visible_alias = "info", about = "Show totals for an archive")]
    Info {
        #[structopt(
            name = "pressfile",
            parse(from_os_str),
            help = "Path to the .press archive"
        )]
        path: PathBuf,
    },

    #[structopt(name = "l", visible_alias = "list", about = "List entries of an archive")]
    List {
        #[structopt(
            name = "pressfile",
            parse(from_os_str),
            help = "Path to the .press archive"
        )]
        path: PathBuf,
    },

    #[structopt(
        name = "x",
        visible_alias = "extract",
        about = "Extract entries from an archive"
    )]
    Extract {
        #[structopt(
            short,
            long,
            parse(from_os_str),
            default_value = ".",
            help = "Directory to extract into"
        )]
        output: PathBuf,

        #[structopt(
            short,
            long,
            number_of_values = 1,
            help = "Entry path prefixes to skip"
        )]
        exclude: Vec<String>,

        #[structopt(
            short,
            long,
            parse(try_from_str = parse_rewrite),
            number_of_values = 1,
            help = "Relocate entries under a prefix [from=to]"
        )]
        rewrite: Vec<RewriteRule>,

        #[structopt(short, long, help = "Pause cleanly after this many seconds")]
        budget: Option<u64>,

        #[structopt(
            short,
            long,
            parse(from_os_str),
            help = "Progress file consulted and updated for resumable runs"
        )]
        state: Option<PathBuf>,

        #[structopt(
            name = "pressfile",
            parse(from_os_str),
            help = "Path to the .press archive"
        )]
        path: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "press",
    about = "Create, inspect and resumably extract press archives.",
    settings = &[SubcommandRequiredElseHelp, DisableHelpSubcommand, VersionlessSubcommands],
    usage = "press (c|i|l|x) [FLAGS|OPTIONS] <pressfile> [files]..."
)]
struct CliOpts {
    #[structopt(short, long, help = "Show verbose output", global = true)]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Commands,
}

/// Extraction progress as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    archive_offset: u64,
    entry_offset: u64,
    processed_bytes: u64,
    total_bytes: u64,
    total_entries: u64,
    completed: bool,
}

fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("cannot read state file {}", path.display()))?;
    let checkpoint = serde_json::from_str(&data)
        .with_context(|| format!("cannot parse state file {}", path.display()))?;
    Ok(Some(checkpoint))
}

fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let data = serde_json::to_string(checkpoint)?;
    fs::write(path, data).with_context(|| format!("cannot write state file {}", path.display()))?;
    Ok(())
}

fn percentage(processed: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    (processed as u128 * 100 / total as u128).min(100) as u64
}

#[inline(always)]
fn time(mtime: u64) -> String {
    let datetime: chrono::DateTime<chrono::Utc> =
        (std::time::UNIX_EPOCH + std::time::Duration::new(mtime, 0)).into();
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Directory field for an entry, from the parent components of its input
/// path. Archives carry forward slashes on every platform.
fn archive_dir(file: &Path) -> Result<String> {
    let parent = match file.parent() {
        Some(parent) => parent,
        None => return Ok(String::new()),
    };

    let mut parts = Vec::new();
    for component in parent.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => bail!("non-unicode path: {}", file.display()),
            },
            Component::CurDir => {}
            _ => bail!("archive paths must be relative: {}", file.display()),
        }
    }

    Ok(parts.join("/"))
}

fn insert_path(writer: &mut PressWriter, file: &Path, verbose: bool) -> Result<()> {
    let name = match file.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => bail!("non-unicode file name: {}", file.display()),
    };
    let dir = archive_dir(file)?;

    if verbose {
        println!("{}", file.display());
    }

    writer.append_file(file, &name, &dir)?;
    Ok(())
}

fn create(path: PathBuf, files: Vec<PathBuf>, verbose: bool) -> Result<()> {
    if files.contains(&path) {
        eprintln!("Cowardly refusing to archive self; aborting.");
        std::process::exit(1);
    }

    let mut writer = PressWriter::create(&path)?;

    for file_path in files.into_iter() {
        if file_path.is_dir() {
            for entry in jwalk::WalkDir::new(&file_path).sort(true) {
                let entry = entry?;
                let entry_path = entry.path();
                if !entry_path.is_file() {
                    continue;
                }
                if entry_path.file_name() == path.file_name() && is_same_file(&entry_path, &path) {
                    // Never archive the archive.
                    continue;
                }
                insert_path(&mut writer, &entry_path, verbose)?;
            }
        } else {
            insert_path(&mut writer, &file_path, verbose)?;
        }
    }

    writer.finish()?;
    Ok(())
}

fn list(path: PathBuf) -> Result<()> {
    use humansize::{file_size_opts as options, FileSize};

    let mut reader = PressReader::open(&path)?;
    let entries = reader.entries()?;

    println!("Length         Modified               Path");
    println!("-------------  ---------------------  --------");
    for entry in entries.iter() {
        let length = entry.size.file_size(options::BINARY).unwrap();
        println!("{:>13}  {:<21}  {}", length, time(entry.mtime), entry.path);
    }

    reader.close()?;
    Ok(())
}

fn info(path: PathBuf) -> Result<()> {
    use humansize::{file_size_opts as options, FileSize};

    let on_disk = fs::metadata(&path)
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();

    let mut reader = PressReader::open(&path)?;
    let totals = reader.totals()?;

    println!("Path:          {}", path.display());
    println!("Entries:       {}", totals.entries);
    println!(
        "Content size:  {}",
        totals.bytes.file_size(options::BINARY).unwrap()
    );
    println!(
        "Archive size:  {}",
        on_disk.file_size(options::BINARY).unwrap()
    );

    reader.close()?;
    Ok(())
}

fn extract(
    path: PathBuf,
    output: PathBuf,
    exclude: Vec<String>,
    rewrite: Vec<RewriteRule>,
    budget: Option<u64>,
    state: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let mut reader = PressReader::open(&path)?;

    let previous = match state.as_deref() {
        Some(state) => load_checkpoint(state)?,
        None => None,
    };

    let mut checkpoint = match previous {
        Some(c) if !c.completed => {
            debug!(
                archive_offset = c.archive_offset,
                entry_offset = c.entry_offset,
                "resuming from checkpoint"
            );
            c
        }
        _ => {
            let totals = reader.totals()?;
            Checkpoint {
                archive_offset: 0,
                entry_offset: 0,
                processed_bytes: 0,
                total_bytes: totals.bytes,
                total_entries: totals.entries,
                completed: false,
            }
        }
    };

    reader.seek(checkpoint.archive_offset)?;

    let run_budget = budget.map(Duration::from_secs);
    let started = Instant::now();

    let mut options = ExtractOptions {
        exclude,
        rewrite,
        ..ExtractOptions::default()
    };

    while !reader.is_finished() {
        if let Some(run_budget) = run_budget {
            match run_budget.checked_sub(started.elapsed()) {
                Some(left) => options.time_budget = Some(left),
                None => break,
            }
        }

        let step = reader.extract_next(&output, &options, checkpoint.entry_offset)?;

        checkpoint.archive_offset = step.archive_offset;
        checkpoint.entry_offset = if step.completed { 0 } else { step.entry_offset };
        checkpoint.processed_bytes += step.bytes_written;
        checkpoint.completed = reader.is_finished();

        if let Some(state) = state.as_deref() {
            save_checkpoint(state, &checkpoint)?;
        }

        if verbose {
            if let Some(entry) = step.entry.as_ref() {
                println!("{}", entry.path);
            }
        }
        println!(
            "{}%",
            percentage(checkpoint.processed_bytes, checkpoint.total_bytes)
        );

        if !step.completed {
            break;
        }
    }

    reader.close()?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = CliOpts::from_iter(wild::args_os());

    let result = match opts.cmd {
        Commands::Create { path, files } => create(path, files, opts.verbose),
        Commands::Info { path } => info(path),
        Commands::List { path } => list(path),
        Commands::Extract {
            path,
            output,
            exclude,
            rewrite,
            budget,
            state,
        } => extract(
            path,
            output,
            exclude,
            rewrite,
            budget,
            state,
            opts.verbose,
        ),
    };

    if let Err(e) = result {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_clamps_and_pins_empty_totals() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(5, 10), 50);
        assert_eq!(percentage(10, 10), 100);
        assert_eq!(percentage(12, 10), 100);
        assert_eq!(percentage(u64::MAX / 2, u64::MAX), 49);
    }

    #[test]
    fn rewrite_rules_parse_from_pairs() {
        let rule = parse_rewrite("old=new").unwrap();
        assert_eq!(rule.from, "old");
        assert_eq!(rule.to, "new");

        let rule = parse_rewrite("old=").unwrap();
        assert_eq!(rule.to, "");

        assert!(parse_rewrite("plain").is_err());
        assert!(parse_rewrite("=to").is_err());
    }

    #[test]
    fn archive_dir_joins_parent_components() {
        assert_eq!(archive_dir(Path::new("a.txt")).unwrap(), "");
        assert_eq!(archive_dir(Path::new("site/a.txt")).unwrap(), "site");
        assert_eq!(
            archive_dir(Path::new("./site/sub/a.txt")).unwrap(),
            "site/sub"
        );
        assert!(archive_dir(Path::new("/abs/a.txt")).is_err());
    }
}
