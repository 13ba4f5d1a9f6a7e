use std::cmp::min;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{IoResultExt, Result, SplitError};
use crate::hashing::RollingHash;
use crate::metadata::{
    metadata_file_name, part_file_name, remove_descriptors, MetadataBuilder, SplitMetadata,
};
use crate::path_safety::validate_part_name;
use crate::progress::Progress;

/// Read/write buffer used when the caller does not pick one.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// Fewest parts a split may produce.
pub const MIN_PARTS: u32 = 2;

#[derive(Clone, Debug)]
pub struct SplitConfig {
    pub part_count: u32,
    /// Part files are `{name_prefix}.part{n}`, the descriptor
    /// `{name_prefix}.split_metadata`.
    pub name_prefix: String,
    pub buffer_size: usize,
}

impl SplitConfig {
    pub fn new(part_count: u32, name_prefix: impl Into<String>) -> Self {
        Self { part_count, name_prefix: name_prefix.into(), buffer_size: DEFAULT_BUFFER_SIZE }
    }

    fn check(&self) -> Result<()> {
        if self.part_count < MIN_PARTS {
            return Err(SplitError::InvalidArgument(format!(
                "part count must be at least {MIN_PARTS}, got {}",
                self.part_count
            )));
        }
        if self.buffer_size == 0 {
            return Err(SplitError::InvalidArgument("buffer size must be non-zero".into()));
        }
        if self.name_prefix.is_empty() {
            return Err(SplitError::InvalidArgument("name prefix must not be empty".into()));
        }
        for name in [part_file_name(&self.name_prefix, 1), metadata_file_name(&self.name_prefix)] {
            validate_part_name(&name).map_err(SplitError::InvalidArgument)?;
        }
        Ok(())
    }
}

/// Part count that keeps every part except the last at `part_size` bytes,
/// never below [`MIN_PARTS`].
pub fn parts_for_part_size(total: u64, part_size: u64) -> Result<u32> {
    if part_size == 0 {
        return Err(SplitError::InvalidArgument("part size must be non-zero".into()));
    }
    let n = total.div_ceil(part_size).max(u64::from(MIN_PARTS));
    u32::try_from(n)
        .map_err(|_| SplitError::InvalidArgument(format!("{n} parts is too many")))
}

/// Target size of each part: `total / count` each, with the remainder
/// added to the last part.
pub fn plan_part_sizes(total: u64, part_count: u32) -> Result<Vec<u64>> {
    if part_count < MIN_PARTS {
        return Err(SplitError::InvalidArgument(format!(
            "part count must be at least {MIN_PARTS}, got {part_count}"
        )));
    }
    let count = u64::from(part_count);
    let base = total / count;
    let remainder = total % count;
    let mut sizes = vec![base; part_count as usize];
    if let Some(last) = sizes.last_mut() {
        *last += remainder;
    }
    Ok(sizes)
}

/// Bytes read from the source but not yet routed to a part. A read can
/// straddle a part boundary; whatever the current part could not take is
/// handed to the next one before the source is read again.
struct Carry {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Carry {
    fn new(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity], offset: 0, len: 0 }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn pending(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.offset += n;
        self.len -= n;
        if self.len == 0 {
            self.offset = 0;
        }
    }

    /// Refill from `src`; only valid once everything pending was consumed.
    /// Returns 0 at end of input.
    fn refill<R: Read>(&mut self, src: &mut R) -> io::Result<usize> {
        debug_assert!(self.is_empty());
        loop {
            match src.read(&mut self.buf) {
                Ok(n) => {
                    self.offset = 0;
                    self.len = n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct Splitter;

impl Splitter {
    /// Split the file at `input` into `dest`, naming the descriptor's
    /// `originalFileName` after the input's file name.
    pub fn split_file(
        input: &Path,
        dest: &Path,
        cfg: &SplitConfig,
        progress: &Progress,
    ) -> Result<SplitMetadata> {
        let f = File::open(input).map_err(|e| {
            SplitError::InvalidArgument(format!("cannot open source {}: {e}", input.display()))
        })?;
        let meta = f.metadata().at("stat", input)?;
        if !meta.is_file() {
            return Err(SplitError::InvalidArgument(format!(
                "source {} is not a regular file",
                input.display()
            )));
        }
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        Self::split(f, meta.len(), &name, dest, cfg, progress)
    }

    /// Read `source` once, front to back, into `cfg.part_count` part files
    /// under `dest`, then persist the descriptor. `total_size` must be the
    /// exact length of `source`; a short or long source is an error and
    /// leaves no descriptor behind.
    pub fn split<R: Read>(
        mut source: R,
        total_size: u64,
        original_name: &str,
        dest: &Path,
        cfg: &SplitConfig,
        progress: &Progress,
    ) -> Result<SplitMetadata> {
        cfg.check()?;
        let plan = plan_part_sizes(total_size, cfg.part_count)?;
        fs::create_dir_all(dest).at("create dir", dest)?;
        // parts are rewritten in place, so an older descriptor for this
        // prefix stops describing them from here on
        remove_descriptors(dest, &cfg.name_prefix)?;
        info!(
            source = original_name,
            total_size,
            parts = cfg.part_count,
            dest = %dest.display(),
            "splitting"
        );

        progress.set_stage("Splitting");
        progress.reset_bytes(total_size);

        let mut carry = Carry::new(cfg.buffer_size);
        let mut whole = RollingHash::new();
        let mut builder = MetadataBuilder::new(original_name, total_size, &cfg.name_prefix);
        let src_label = Path::new(original_name);

        for target in plan {
            let n = builder.parts_recorded() as u32 + 1;
            let name = part_file_name(&cfg.name_prefix, n);
            let path = dest.join(&name);
            progress.set_current(&name);

            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .at("create", &path)?;
            let mut part_hash = RollingHash::new();
            let mut written = 0u64;

            while written < target {
                progress.checkpoint()?;
                if carry.is_empty() && carry.refill(&mut source).at("read", src_label)? == 0 {
                    return Err(SplitError::io(
                        format!("read {original_name}"),
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("source ended after {} of {total_size} bytes", whole.bytes()),
                        ),
                    ));
                }
                let take = min(carry.len as u64, target - written) as usize;
                let chunk = &carry.pending()[..take];
                out.write_all(chunk).at("write", &path)?;
                part_hash.update(chunk);
                whole.update(chunk);
                carry.consume(take);
                written += take as u64;
                progress.add_bytes(take as u64);
            }

            out.sync_all().at("sync", &path)?;
            drop(out);
            let hash = part_hash.finish_hex();
            debug!(part = n, file = %name, size = written, hash = %hash, "part written");
            builder.push_part(written, hash);
        }

        if !carry.is_empty() || carry.refill(&mut source).at("read", src_label)? > 0 {
            return Err(SplitError::InvalidArgument(format!(
                "source {original_name} is longer than the declared {total_size} bytes"
            )));
        }

        let md = builder.finish(whole.finish_hex())?;
        let meta_path = md.write_atomic(dest, &cfg.name_prefix)?;
        progress.finish();
        info!(metadata = %meta_path.display(), hash = md.original_hash(), "split complete");
        Ok(md)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_hex;

    #[test]
    fn remainder_lands_on_last_part() {
        assert_eq!(
            plan_part_sizes(10_000_000, 3).unwrap(),
            vec![3_333_333, 3_333_333, 3_333_334]
        );
        assert_eq!(plan_part_sizes(6 << 20, 2).unwrap(), vec![3 << 20, 3 << 20]);
        assert_eq!(plan_part_sizes(2, 5).unwrap(), vec![0, 0, 0, 0, 2]);
        assert_eq!(plan_part_sizes(0, 2).unwrap(), vec![0, 0]);
        assert!(plan_part_sizes(100, 1).is_err());
        assert!(plan_part_sizes(100, 0).is_err());
    }

    #[test]
    fn part_count_from_part_size() {
        assert_eq!(parts_for_part_size(10 << 20, 4 << 20).unwrap(), 3);
        assert_eq!(parts_for_part_size(8 << 20, 4 << 20).unwrap(), 2);
        assert_eq!(parts_for_part_size(100, 1000).unwrap(), 2);
        assert!(parts_for_part_size(100, 0).is_err());
    }

    #[test]
    fn carry_hands_leftover_to_next_part() {
        let mut src: &[u8] = b"abcdefg";
        let mut c = Carry::new(5);
        assert_eq!(c.refill(&mut src).unwrap(), 5);
        assert_eq!(c.pending(), b"abcde");
        c.consume(3);
        assert_eq!(c.pending(), b"de");
        c.consume(2);
        assert!(c.is_empty());
        assert_eq!(c.refill(&mut src).unwrap(), 2);
        assert_eq!(c.pending(), b"fg");
        c.consume(2);
        assert_eq!(c.refill(&mut src).unwrap(), 0);
    }

    #[test]
    fn tiny_buffer_straddles_every_boundary() {
        let td = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0u8..=22).collect();
        let cfg = SplitConfig { part_count: 4, name_prefix: "d".into(), buffer_size: 4 };
        let md =
            Splitter::split(&data[..], 23, "d", td.path(), &cfg, &Progress::default()).unwrap();

        let sizes: Vec<u64> = md.parts().iter().map(|p| p.size).collect();
        assert_eq!(sizes, [5, 5, 5, 8]);
        let mut joined = Vec::new();
        for p in md.parts() {
            let bytes = fs::read(td.path().join(&p.file_name)).unwrap();
            assert_eq!(sha256_hex(&bytes), p.hash);
            joined.extend(bytes);
        }
        assert_eq!(joined, data);
        assert_eq!(md.original_hash(), sha256_hex(&data));
    }

    #[test]
    fn short_and_long_sources_leave_no_descriptor() {
        let td = tempfile::tempdir().unwrap();
        let cfg = SplitConfig::new(2, "s");
        let err = Splitter::split(&[1u8; 10][..], 11, "s", td.path(), &cfg, &Progress::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
        let err = Splitter::split(&[1u8; 12][..], 11, "s", td.path(), &cfg, &Progress::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
        assert!(!td.path().join("s.split_metadata").exists());
    }

    #[test]
    fn failed_resplit_drops_the_old_descriptor() {
        let td = tempfile::tempdir().unwrap();
        let cfg = SplitConfig::new(2, "p");
        let first = vec![3u8; 10_000];
        Splitter::split(&first[..], 10_000, "p", td.path(), &cfg, &Progress::default()).unwrap();
        let meta = td.path().join("p.split_metadata");
        assert!(meta.exists());
        fs::write(td.path().join("p.split_metadata.json"), b"{}").unwrap();

        // same prefix, source shorter than declared: parts get rewritten, then the split fails
        let second = vec![4u8; 7_000];
        let err = Splitter::split(&second[..], 10_000, "p", td.path(), &cfg, &Progress::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::IoFailure);
        assert!(!meta.exists());
        assert!(!td.path().join("p.split_metadata.json").exists());
        assert!(crate::metadata::discover(td.path()).unwrap().is_empty());
    }

    #[test]
    fn prefix_with_separator_rejected() {
        let td = tempfile::tempdir().unwrap();
        let cfg = SplitConfig::new(2, "../up");
        let err = Splitter::split(&[0u8; 4][..], 4, "x", td.path(), &cfg, &Progress::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
