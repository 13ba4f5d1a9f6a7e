use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, SplitError};
use crate::hashing::hash_reader;
use crate::metadata::{PartDescriptor, SplitMetadata};
use crate::path_safety::resolve_part;
use crate::progress::Progress;
use crate::split::DEFAULT_BUFFER_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartIssue {
    pub part_number: u32,
    pub file_name: String,
}

impl From<&PartDescriptor> for PartIssue {
    fn from(p: &PartDescriptor) -> Self {
        Self { part_number: p.part_number, file_name: p.file_name.clone() }
    }
}

impl fmt::Display for PartIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Part {} ({})", self.part_number, self.file_name)
    }
}

/// Outcome of checking every part listed in a descriptor. Both lists are
/// in ascending part order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub parts_ok: usize,
    pub missing: Vec<PartIssue>,
    /// Content differs from the recorded hash (a length mismatch counts).
    pub corrupted: Vec<PartIssue>,
}

impl VerifyReport {
    pub fn is_pass(&self) -> bool {
        self.missing.is_empty() && self.corrupted.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass() {
            return write!(f, "OK");
        }
        let mut first = true;
        for (title, list) in [
            ("Missing parts:", &self.missing),
            ("Corrupted parts (hash mismatch):", &self.corrupted),
        ] {
            if list.is_empty() {
                continue;
            }
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{title}")?;
            for issue in list {
                write!(f, "\n  {issue}")?;
            }
        }
        Ok(())
    }
}

enum Probe {
    Missing(String),
    WrongSize(u64),
    Digest(String),
}

enum ReadFail {
    Io(io::Error),
    Cancelled,
}

impl From<io::Error> for ReadFail {
    fn from(e: io::Error) -> Self {
        ReadFail::Io(e)
    }
}

fn probe(parts_dir: &Path, part: &PartDescriptor, progress: &Progress) -> Result<Probe> {
    let path = match resolve_part(parts_dir, &part.file_name) {
        Ok(p) => p,
        Err(e) => return Ok(Probe::Missing(e.to_string())),
    };
    let f = match File::open(&path) {
        Ok(f) => f,
        Err(e) => return Ok(Probe::Missing(e.to_string())),
    };
    match f.metadata() {
        Ok(m) if !m.is_file() => return Ok(Probe::Missing("not a regular file".into())),
        Ok(m) if m.len() != part.size => {
            progress.add_bytes(part.size);
            return Ok(Probe::WrongSize(m.len()));
        }
        Ok(_) => {}
        Err(e) => return Ok(Probe::Missing(e.to_string())),
    }
    let res = hash_reader(f, DEFAULT_BUFFER_SIZE, |chunk| {
        if progress.is_cancelled() {
            return Err(ReadFail::Cancelled);
        }
        progress.add_bytes(chunk.len() as u64);
        Ok(())
    });
    match res {
        Ok((hex, _)) => Ok(Probe::Digest(hex)),
        Err(ReadFail::Io(e)) => Ok(Probe::Missing(e.to_string())),
        Err(ReadFail::Cancelled) => Err(SplitError::Cancelled),
    }
}

/// Check that every part in `md` exists under `parts_dir` and hashes to its
/// recorded digest. Problems are collected, not raised: the only error is
/// cancellation. An unreadable part is reported as missing.
pub fn verify(parts_dir: &Path, md: &SplitMetadata, progress: &Progress) -> Result<VerifyReport> {
    info!(dir = %parts_dir.display(), parts = md.parts().len(), "verifying parts");
    progress.set_stage("Verifying");
    progress.reset_bytes(md.original_size());

    let mut ordered: Vec<&PartDescriptor> = md.parts().iter().collect();
    ordered.sort_by_key(|p| p.part_number);

    let mut report = VerifyReport::default();
    for part in ordered {
        progress.checkpoint()?;
        progress.set_current(&part.file_name);
        match probe(parts_dir, part, progress)? {
            Probe::Missing(why) => {
                warn!(
                    part = part.part_number,
                    file = %part.file_name,
                    reason = %why,
                    "part missing"
                );
                report.missing.push(part.into());
            }
            Probe::WrongSize(len) => {
                warn!(
                    part = part.part_number,
                    file = %part.file_name,
                    expected = part.size,
                    actual = len,
                    "part size differs"
                );
                report.corrupted.push(part.into());
            }
            Probe::Digest(actual) if actual != part.hash => {
                warn!(
                    part = part.part_number,
                    file = %part.file_name,
                    expected = %part.hash,
                    actual = %actual,
                    "part corrupted"
                );
                report.corrupted.push(part.into());
            }
            Probe::Digest(_) => {
                debug!(part = part.part_number, file = %part.file_name, "part ok");
                report.parts_ok += 1;
            }
        }
    }
    progress.finish();
    info!(
        ok = report.parts_ok,
        missing = report.missing.len(),
        corrupted = report.corrupted.len(),
        "verification finished"
    );
    Ok(report)
}
