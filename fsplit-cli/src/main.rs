use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use fsplit_core::split::{parts_for_part_size, DEFAULT_BUFFER_SIZE};
use fsplit_core::units::{format_bytes, parse_size};
use fsplit_core::{
    discover, merge, verify, MergeOptions, Progress, SplitConfig, SplitMetadata, Splitter,
};

/// Descriptors with more parts than this get a one-line summary in `info`.
const PART_TABLE_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "fsplit", version, about = "Split files into verified parts and merge them back")]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Split a file into N parts plus a .split_metadata descriptor
    #[command(group(ArgGroup::new("count").required(true).args(["parts", "part_size"])))]
    Split {
        input: PathBuf,
        outdir: PathBuf,
        #[arg(long, value_parser = clap::value_parser!(u32).range(2..))]
        parts: Option<u32>,
        /// Target part size (e.g. 64K, 10M, 2G); the last part takes the remainder
        #[arg(long)]
        part_size: Option<String>,
        /// Name prefix for parts and descriptor (default: input file name)
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer_size: usize,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Check every part listed in a descriptor
    Verify {
        metadata: PathBuf,
        /// Directory holding the parts (default: the descriptor's directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Rebuild the original file from its parts
    Merge {
        metadata: PathBuf,
        output: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Skip the per-part check before merging (the whole-file hash is still checked)
        #[arg(long, default_value_t = false)]
        skip_verify: bool,
        #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer_size: usize,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// List descriptors found in a directory
    List { dir: PathBuf },
    /// Show what a descriptor describes
    Info { metadata: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Cmd::Split { input, outdir, parts, part_size, prefix, buffer_size, progress } => {
            split(&input, &outdir, parts, part_size.as_deref(), prefix, buffer_size, progress)?
        }
        Cmd::Verify { metadata, dir } => verify_cmd(&metadata, dir)?,
        Cmd::Merge { metadata, output, dir, overwrite, skip_verify, buffer_size, progress } => {
            let opts = MergeOptions { buffer_size, overwrite };
            merge_cmd(&metadata, &output, dir, &opts, skip_verify, progress)?
        }
        Cmd::List { dir } => list(&dir)?,
        Cmd::Info { metadata } => info(&metadata)?,
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parts_dir_for(metadata: &Path, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| match metadata.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    })
}

fn load(metadata: &Path) -> Result<SplitMetadata> {
    SplitMetadata::read(metadata).with_context(|| format!("load {}", metadata.display()))
}

fn split(
    input: &Path,
    outdir: &Path,
    parts: Option<u32>,
    part_size: Option<&str>,
    prefix: Option<String>,
    buffer_size: usize,
    show_progress: bool,
) -> Result<()> {
    let part_count = match (parts, part_size) {
        (Some(n), _) => n,
        (None, Some(spec)) => {
            let total = std::fs::metadata(input)
                .with_context(|| format!("stat {}", input.display()))?
                .len();
            parts_for_part_size(total, parse_size(spec)?)?
        }
        (None, None) => bail!("either --parts or --part-size is required"),
    };
    let prefix = match prefix {
        Some(p) => p,
        None => input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", input.display()))?,
    };
    let cfg = SplitConfig { part_count, name_prefix: prefix.clone(), buffer_size };

    let prog = Progress::new(show_progress);
    prog.start();
    let res = Splitter::split_file(input, outdir, &cfg, &prog);
    prog.stop();
    let md = res.with_context(|| format!("split {}", input.display()))?;

    for p in md.parts() {
        eprintln!("  part {:>3}  {:<32} {:>12}", p.part_number, p.file_name, format_bytes(p.size));
    }
    eprintln!(
        "Split {} ({}) into {} parts under {}",
        md.original_file_name(),
        format_bytes(md.original_size()),
        md.parts().len(),
        outdir.display()
    );
    println!("{}", outdir.join(fsplit_core::metadata::metadata_file_name(&prefix)).display());
    Ok(())
}

fn verify_cmd(metadata: &Path, dir: Option<PathBuf>) -> Result<()> {
    let md = load(metadata)?;
    let dir = parts_dir_for(metadata, dir);
    let report = verify(&dir, &md, &Progress::default())?;
    eprintln!(
        "Parts ok={}, missing={}, corrupted={}",
        report.parts_ok,
        report.missing.len(),
        report.corrupted.len()
    );
    println!("{report}");
    if !report.is_pass() {
        bail!("verification failed for {}", metadata.display());
    }
    Ok(())
}

fn merge_cmd(
    metadata: &Path,
    output: &Path,
    dir: Option<PathBuf>,
    opts: &MergeOptions,
    skip_verify: bool,
    show_progress: bool,
) -> Result<()> {
    let md = load(metadata)?;
    let dir = parts_dir_for(metadata, dir);
    let prog = Progress::new(show_progress);
    prog.start();
    let res = (|| -> Result<_> {
        if !skip_verify {
            let report = verify(&dir, &md, &prog)?;
            if !report.is_pass() {
                eprintln!("{report}");
                bail!("parts failed verification; not merging");
            }
        }
        Ok(merge(&dir, &md, output, opts, &prog)?)
    })();
    prog.stop();
    let outcome = res.with_context(|| format!("merge {}", metadata.display()))?;
    eprintln!(
        "Merged {} ({}) sha256={}",
        md.original_file_name(),
        format_bytes(outcome.bytes_written),
        outcome.hash
    );
    println!("OK");
    Ok(())
}

fn list(dir: &Path) -> Result<()> {
    let found = discover(dir)?;
    if found.is_empty() {
        bail!("no metadata file found under {}", dir.display());
    }
    for path in found {
        match SplitMetadata::read(&path) {
            Ok(md) => println!(
                "{}\t{}\t{}\t{} parts",
                path.display(),
                md.original_file_name(),
                format_bytes(md.original_size()),
                md.parts().len()
            ),
            Err(e) => eprintln!("{}: unreadable ({e})", path.display()),
        }
    }
    Ok(())
}

fn info(metadata: &Path) -> Result<()> {
    let md = load(metadata)?;
    let hash = md.original_hash();
    println!("Name:  {}", md.original_file_name());
    println!("Size:  {} ({} bytes)", format_bytes(md.original_size()), md.original_size());
    println!("Parts: {}", md.parts().len());
    println!("Hash:  {}...", &hash[..16]);
    if md.parts().len() <= PART_TABLE_LIMIT {
        println!("Parts details:");
        for p in md.parts() {
            let size = format_bytes(p.size);
            println!("  Part {:<3} {:<32} {:>12}", p.part_number, p.file_name, size);
        }
    } else {
        println!("  {} parts ready to merge", md.parts().len());
    }
    Ok(())
}
