use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{IoResultExt, Result, SplitError};
use crate::hashing::RollingHash;
use crate::metadata::{PartDescriptor, SplitMetadata, METADATA_JSON_SUFFIX, METADATA_SUFFIX};
use crate::path_safety::resolve_part;
use crate::progress::Progress;
use crate::split::DEFAULT_BUFFER_SIZE;

#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub buffer_size: usize,
    /// Replace an existing output file instead of refusing.
    pub overwrite: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { buffer_size: DEFAULT_BUFFER_SIZE, overwrite: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub bytes_written: u64,
    pub hash: String,
}

fn open_part(parts_dir: &Path, part: &PartDescriptor) -> Result<File> {
    let path = resolve_part(parts_dir, &part.file_name)?;
    match File::open(&path) {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SplitError::MissingPart {
            part_number: part.part_number,
            file_name: part.file_name.clone(),
        }),
        Err(e) => Err(SplitError::io(format!("open {}", path.display()), e)),
    }
}

/// Concatenate the parts of `md`, in part-number order, into `sink` and
/// check the result against the recorded whole-file hash.
///
/// On error the sink may hold a prefix of the output; discarding it is up
/// to the caller. [`merge`] does that for file outputs.
pub fn merge_into<W: Write>(
    parts_dir: &Path,
    md: &SplitMetadata,
    sink: &mut W,
    opts: &MergeOptions,
    progress: &Progress,
) -> Result<MergeOutcome> {
    if opts.buffer_size == 0 {
        return Err(SplitError::InvalidArgument("buffer size must be non-zero".into()));
    }
    progress.set_stage("Merging");
    progress.reset_bytes(md.original_size());

    let mut ordered: Vec<&PartDescriptor> = md.parts().iter().collect();
    ordered.sort_by_key(|p| p.part_number);

    let mut buf = vec![0u8; opts.buffer_size];
    let mut whole = RollingHash::new();
    for part in ordered {
        progress.checkpoint()?;
        progress.set_current(&part.file_name);
        let mut f = open_part(parts_dir, part)?;
        let before = whole.bytes();
        loop {
            progress.checkpoint()?;
            let n = match f.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SplitError::io(format!("read {}", part.file_name), e)),
            };
            sink.write_all(&buf[..n])
                .map_err(|e| SplitError::io("write merged output", e))?;
            whole.update(&buf[..n]);
            progress.add_bytes(n as u64);
        }
        debug!(
            part = part.part_number,
            file = %part.file_name,
            bytes = whole.bytes() - before,
            "part appended"
        );
    }
    sink.flush().map_err(|e| SplitError::io("flush merged output", e))?;

    let bytes_written = whole.bytes();
    let hash = whole.finish_hex();
    if hash != md.original_hash() {
        return Err(SplitError::IntegrityFailure {
            subject: format!("merged {} ({bytes_written} bytes)", md.original_file_name()),
            expected: md.original_hash().to_string(),
            actual: hash,
        });
    }
    progress.finish();
    Ok(MergeOutcome { bytes_written, hash })
}

fn refuse_input_as_output(parts_dir: &Path, md: &SplitMetadata, output: &Path) -> Result<()> {
    let refuse = |what: String| {
        Err(SplitError::InvalidArgument(format!("output {} is {what}", output.display())))
    };
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let (Ok(dir), Ok(out_dir), Some(name)) =
        (fs::canonicalize(parts_dir), fs::canonicalize(parent), output.file_name())
    {
        let name = name.to_string_lossy();
        if dir == out_dir {
            if let Some(part) = md.parts().iter().find(|p| p.file_name == name) {
                return refuse(format!("part {} of the input", part.part_number));
            }
            if name.ends_with(METADATA_SUFFIX) || name.ends_with(METADATA_JSON_SUFFIX) {
                return refuse("a split descriptor".to_string());
            }
        }
    }
    // symlinks and other aliases of a part
    let Ok(out) = fs::canonicalize(output) else {
        return Ok(());
    };
    for part in md.parts() {
        if let Ok(p) = fs::canonicalize(parts_dir.join(&part.file_name)) {
            if p == out {
                return refuse(format!("part {} of the input", part.part_number));
            }
        }
    }
    Ok(())
}

/// Rebuild the original file at `output`. The output is removed again on
/// any failure (missing part, I/O error, cancellation or hash mismatch), so
/// a file left at `output` is always a verified reconstruction. `output`
/// may not name one of the inputs: a listed part or a descriptor inside
/// `parts_dir`.
pub fn merge(
    parts_dir: &Path,
    md: &SplitMetadata,
    output: &Path,
    opts: &MergeOptions,
    progress: &Progress,
) -> Result<MergeOutcome> {
    info!(
        dir = %parts_dir.display(),
        output = %output.display(),
        parts = md.parts().len(),
        "merging"
    );
    refuse_input_as_output(parts_dir, md, output)?;

    let mut oo = OpenOptions::new();
    oo.write(true);
    if opts.overwrite {
        oo.create(true).truncate(true);
    } else {
        oo.create_new(true);
    }
    let mut out = match oo.open(output) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(SplitError::InvalidArgument(format!(
                "output {} already exists",
                output.display()
            )));
        }
        Err(e) => return Err(SplitError::io(format!("create {}", output.display()), e)),
    };

    let res = merge_into(parts_dir, md, &mut out, opts, progress)
        .and_then(|outcome| out.sync_all().at("sync", output).map(|_| outcome));
    drop(out);
    match res {
        Ok(outcome) => {
            info!(output = %output.display(), bytes = outcome.bytes_written, "merge verified");
            Ok(outcome)
        }
        Err(e) => {
            warn!(output = %output.display(), error = %e, "merge failed, removing output");
            if let Err(rm) = fs::remove_file(output) {
                warn!(output = %output.display(), error = %rm, "could not remove output");
            }
            Err(e)
        }
    }
}
