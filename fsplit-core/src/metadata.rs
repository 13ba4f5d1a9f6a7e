//! The split descriptor: what was split, into which parts, with which hashes.
//!
//! A [`SplitMetadata`] value only exists once it has passed validation,
//! either because [`MetadataBuilder::finish`] assembled it from a completed
//! split or because [`SplitMetadata::from_json`] checked a document read from
//! disk. Its fields are read-only after that.

use crate::error::{IoResultExt, Result, SplitError};
use crate::hashing::is_sha256_hex;
use crate::path_safety::validate_part_name;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Descriptor format version written and accepted by this build.
pub const METADATA_VERSION: u32 = 1;
/// Suffix of descriptor files produced by the splitter.
pub const METADATA_SUFFIX: &str = ".split_metadata";
/// Alternate suffix left behind by storage layers that append a MIME extension.
pub const METADATA_JSON_SUFFIX: &str = ".split_metadata.json";
/// Separator between prefix and 1-based part index in part file names.
pub const PART_INFIX: &str = ".part";

/// `{prefix}.part{n}`
pub fn part_file_name(prefix: &str, n: u32) -> String {
    format!("{prefix}{PART_INFIX}{n}")
}

/// `{prefix}.split_metadata`
pub fn metadata_file_name(prefix: &str) -> String {
    format!("{prefix}{METADATA_SUFFIX}")
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartDescriptor {
    pub part_number: u32,
    pub file_name: String,
    pub size: u64,
    pub hash: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SplitMetadata {
    version: u32,
    original_file_name: String,
    original_size: u64,
    original_hash: String,
    parts: Vec<PartDescriptor>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl SplitMetadata {
    pub fn version(&self) -> u32 {
        self.version
    }
    pub fn original_file_name(&self) -> &str {
        &self.original_file_name
    }
    pub fn original_size(&self) -> u64 {
        self.original_size
    }
    pub fn original_hash(&self) -> &str {
        &self.original_hash
    }
    /// Parts in merge order (`part_number` 1, 2, ...).
    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    /// Parse and validate a descriptor document. The version is checked
    /// before anything else so a newer layout is never half-interpreted.
    pub fn from_json(text: &str) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_str(text)?;
        if probe.version != METADATA_VERSION {
            return Err(SplitError::UnsupportedVersion {
                found: probe.version,
                supported: METADATA_VERSION,
            });
        }
        let md: SplitMetadata = serde_json::from_str(text)?;
        md.validate()?;
        Ok(md)
    }

    /// Pretty JSON with 4-space indentation.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, fmt);
        self.serialize(&mut ser)?;
        // serde_json only ever emits UTF-8
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at("read metadata", path)?;
        Self::from_json(&text)
    }

    /// Write `{prefix}.split_metadata` into `dir` via a synced temporary
    /// file and a rename, so the final name never holds a partial document.
    pub fn write_atomic(&self, dir: &Path, prefix: &str) -> Result<PathBuf> {
        let body = self.to_json_pretty()?;
        let final_path = dir.join(metadata_file_name(prefix));
        let tmp_path = dir.join(format!(".{}.tmp", metadata_file_name(prefix)));
        let res = (|| -> Result<()> {
            let mut f = File::create(&tmp_path).at("create", &tmp_path)?;
            f.write_all(body.as_bytes()).at("write", &tmp_path)?;
            f.sync_all().at("sync", &tmp_path)?;
            fs::rename(&tmp_path, &final_path).at("rename into", &final_path)
        })();
        if res.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        res.map(|_| final_path)
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(SplitError::InvalidDescriptor(msg));
        if !is_sha256_hex(&self.original_hash) {
            return bad(format!(
                "originalHash is not a sha-256 hex digest: {:?}",
                self.original_hash
            ));
        }
        if self.parts.is_empty() {
            return bad("descriptor lists no parts".to_string());
        }
        let mut names = HashSet::new();
        let mut sum = 0u64;
        for (i, p) in self.parts.iter().enumerate() {
            let expect = i as u64 + 1;
            if u64::from(p.part_number) != expect {
                return bad(format!(
                    "part numbers must run 1..={} in order; entry {} has partNumber {}",
                    self.parts.len(),
                    expect,
                    p.part_number
                ));
            }
            validate_part_name(&p.file_name).map_err(SplitError::InvalidDescriptor)?;
            if !names.insert(p.file_name.as_str()) {
                return bad(format!("fileName {:?} listed twice", p.file_name));
            }
            if !is_sha256_hex(&p.hash) {
                return bad(format!("part {} hash is not a sha-256 hex digest", p.part_number));
            }
            sum = match sum.checked_add(p.size) {
                Some(s) => s,
                None => return bad("part sizes overflow".to_string()),
            };
        }
        if sum != self.original_size {
            return bad(format!(
                "part sizes sum to {sum} but originalSize is {}",
                self.original_size
            ));
        }
        Ok(())
    }
}

/// Accumulates part descriptors during a split; only [`finish`] yields a
/// [`SplitMetadata`].
///
/// [`finish`]: MetadataBuilder::finish
#[derive(Debug)]
pub struct MetadataBuilder {
    original_file_name: String,
    original_size: u64,
    prefix: String,
    parts: Vec<PartDescriptor>,
}

impl MetadataBuilder {
    pub fn new(original_file_name: &str, original_size: u64, prefix: &str) -> Self {
        Self {
            original_file_name: original_file_name.to_string(),
            original_size,
            prefix: prefix.to_string(),
            parts: Vec::new(),
        }
    }

    /// Record the next part; numbering and naming follow push order.
    pub fn push_part(&mut self, size: u64, hash: String) {
        let n = self.parts.len() as u32 + 1;
        self.parts.push(PartDescriptor {
            part_number: n,
            file_name: part_file_name(&self.prefix, n),
            size,
            hash,
        });
    }

    pub fn parts_recorded(&self) -> usize {
        self.parts.len()
    }

    pub fn finish(self, original_hash: String) -> Result<SplitMetadata> {
        let md = SplitMetadata {
            version: METADATA_VERSION,
            original_file_name: self.original_file_name,
            original_size: self.original_size,
            original_hash,
            parts: self.parts,
        };
        md.validate()?;
        Ok(md)
    }
}

/// Delete `{prefix}.split_metadata` and its `.json` variant from `dir`, if present.
pub fn remove_descriptors(dir: &Path, prefix: &str) -> Result<()> {
    for name in [metadata_file_name(prefix), format!("{prefix}{METADATA_JSON_SUFFIX}")] {
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale descriptor"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SplitError::io(format!("remove {}", path.display()), e)),
        }
    }
    Ok(())
}

/// Descriptor files directly inside `dir`, sorted by name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for ent in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let ent = ent.map_err(|e| {
            let msg = format!("list {}", dir.display());
            SplitError::io(msg, e.into())
        })?;
        if !ent.file_type().is_file() {
            continue;
        }
        let is_descriptor = {
            let name = ent.file_name().to_string_lossy();
            name.ends_with(METADATA_SUFFIX) || name.ends_with(METADATA_JSON_SUFFIX)
        };
        if is_descriptor {
            found.push(ent.into_path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_hex;

    fn sample() -> SplitMetadata {
        let mut b = MetadataBuilder::new("movie.mkv", 5, "movie.mkv");
        b.push_part(2, sha256_hex(b"ab"));
        b.push_part(3, sha256_hex(b"cde"));
        b.finish(sha256_hex(b"abcde")).unwrap()
    }

    fn sample_value() -> serde_json::Value {
        serde_json::from_str(&sample().to_json_pretty().unwrap()).unwrap()
    }

    #[test]
    fn builder_numbers_and_names_parts() {
        let md = sample();
        assert_eq!(md.version(), 1);
        let names: Vec<_> = md.parts().iter().map(|p| p.file_name.as_str()).collect();
        assert_eq!(names, ["movie.mkv.part1", "movie.mkv.part2"]);
        assert_eq!(md.parts()[1].part_number, 2);
    }

    #[test]
    fn builder_rejects_size_mismatch() {
        let mut b = MetadataBuilder::new("x", 10, "x");
        b.push_part(4, sha256_hex(b"1"));
        b.push_part(4, sha256_hex(b"2"));
        let err = b.finish(sha256_hex(b"3")).unwrap_err();
        assert!(err.to_string().contains("sum to 8"), "{err}");
    }

    #[test]
    fn json_uses_camel_case_and_four_space_indent() {
        let text = sample().to_json_pretty().unwrap();
        assert!(text.contains("\n    \"originalFileName\": \"movie.mkv\""));
        assert!(text.contains("\"partNumber\": 1"));
        assert!(text.contains("\"originalSize\": 5"));
        assert_eq!(SplitMetadata::from_json(&text).unwrap(), sample());
    }

    #[test]
    fn newer_version_rejected_before_field_checks() {
        let text = r#"{"version": 2, "somethingElse": true}"#;
        match SplitMetadata::from_json(text) {
            Err(SplitError::UnsupportedVersion { found: 2, supported: 1 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn gaps_and_bad_names_rejected() {
        let mut v = sample_value();
        v["parts"][1]["partNumber"] = 3.into();
        assert!(SplitMetadata::from_json(&v.to_string()).is_err());

        let mut v = sample_value();
        v["parts"][0]["fileName"] = "../../etc/passwd".into();
        let err = SplitMetadata::from_json(&v.to_string()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidDescriptor);

        let mut v = sample_value();
        v["parts"][1]["fileName"] = "movie.mkv.part1".into();
        assert!(SplitMetadata::from_json(&v.to_string()).is_err());
    }

    #[test]
    fn atomic_write_leaves_no_temp() {
        let td = tempfile::tempdir().unwrap();
        let path = sample().write_atomic(td.path(), "movie.mkv").unwrap();
        assert_eq!(path, td.path().join("movie.mkv.split_metadata"));
        let names: Vec<_> = fs::read_dir(td.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["movie.mkv.split_metadata"]);
        assert_eq!(SplitMetadata::read(&path).unwrap(), sample());
    }
}
