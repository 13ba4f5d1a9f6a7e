//! Human-readable byte sizes.

use crate::error::{Result, SplitError};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Parse `"4096"`, `"64K"`, `"10M"`, `"2G"` (an optional trailing `B` and
/// lowercase are accepted). Multipliers are powers of 1024.
pub fn parse_size(spec: &str) -> Result<u64> {
    let s = spec.trim().to_uppercase();
    let s = s.strip_suffix('B').filter(|r| !r.is_empty()).unwrap_or(&s);
    let (num, mul) = if let Some(n) = s.strip_suffix('K') {
        (n, 1u64 << 10)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1 << 20)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1 << 30)
    } else if let Some(n) = s.strip_suffix('T') {
        (n, 1 << 40)
    } else {
        (s, 1)
    };
    let v: u64 = num
        .trim()
        .parse()
        .map_err(|_| SplitError::InvalidArgument(format!("bad size {spec:?}")))?;
    v.checked_mul(mul)
        .ok_or_else(|| SplitError::InvalidArgument(format!("size {spec:?} overflows")))
}

/// `"0 B"`, `"512.0 B"`, `"9.5 MB"`: one decimal, 1024-based.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
