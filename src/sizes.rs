//! Size formatting and parsing
//!
//! Converts between byte counts and human-friendly strings. Two unit
//! families are supported: SI (KB = 1000 bytes) and binary (KiB = 1024
//! bytes). Partition math elsewhere is always in exact bytes; these
//! helpers exist only at the presentation and config-parsing edges.

use crate::error::{InstallerError, Result};

/// SI unit suffixes, index = power of 1000.
const SI_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Binary unit suffixes, index = power of 1024.
const BINARY_UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

fn format_with_base(
    size: u64,
    base: f64,
    units: &[&str; 6],
    forced_unit: Option<&str>,
    precision: Option<usize>,
) -> Result<String> {
    let mut value = size as f64;
    let mut idx = 0;

    if let Some(unit) = forced_unit {
        idx = units
            .iter()
            .position(|u| u.eq_ignore_ascii_case(unit))
            .ok_or_else(|| InstallerError::storage(format!("unknown size unit: {}", unit)))?;
        value /= base.powi(idx as i32);
    } else {
        while value >= base && idx < units.len() - 1 {
            value /= base;
            idx += 1;
        }
    }

    let prec = precision.unwrap_or(if idx == 0 { 0 } else { 2 });
    let mut text = format!("{:.*}", prec, value);
    // Drop trailing zeros so 1.50GB prints as 1.5GB and 2.00GB as 2GB.
    if precision.is_none() && text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }

    Ok(format!("{}{}", text, units[idx]))
}

/// Format a byte count using SI units (1000-based), picking the largest
/// unit that keeps the value at or above 1.
pub fn human_readable(size: u64) -> String {
    // Infallible: no forced unit to reject.
    format_with_base(size, 1000.0, &SI_UNITS, None, None)
        .unwrap_or_else(|_| format!("{}B", size))
}

/// Format a byte count using binary units (1024-based).
pub fn human_readable_binary(size: u64) -> String {
    format_with_base(size, 1024.0, &BINARY_UNITS, None, None)
        .unwrap_or_else(|_| format!("{}B", size))
}

/// Format with a caller-chosen SI unit and decimal precision.
pub fn human_readable_as(size: u64, unit: &str, precision: usize) -> Result<String> {
    format_with_base(size, 1000.0, &SI_UNITS, Some(unit), Some(precision))
}

/// Format with a caller-chosen binary unit and decimal precision.
pub fn human_readable_binary_as(size: u64, unit: &str, precision: usize) -> Result<String> {
    format_with_base(size, 1024.0, &BINARY_UNITS, Some(unit), Some(precision))
}

/// Parse a volume size string into bytes.
///
/// Accepts a decimal value followed by an optional unit: single-letter
/// SI shorthands (`512M`, `12g`, `1t`), full SI units (`512MB`), binary
/// units (`1.5GiB`), or a bare byte count (`1048576`). Unit matching is
/// case-insensitive. Fractional byte results are rounded down.
pub fn parse_volume_size(input: &str) -> Result<u64> {
    let text = input.trim();
    if text.is_empty() {
        return Err(InstallerError::storage("empty size string"));
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (num_str, unit_str) = text.split_at(split);

    let value: f64 = num_str
        .parse()
        .map_err(|_| InstallerError::storage(format!("invalid size value: {}", input)))?;

    let unit = unit_str.trim().to_ascii_lowercase();
    let multiplier: f64 = match unit.as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1000.0,
        "m" | "mb" => 1000.0_f64.powi(2),
        "g" | "gb" => 1000.0_f64.powi(3),
        "t" | "tb" => 1000.0_f64.powi(4),
        "p" | "pb" => 1000.0_f64.powi(5),
        "kib" => 1024.0,
        "mib" => 1024.0_f64.powi(2),
        "gib" => 1024.0_f64.powi(3),
        "tib" => 1024.0_f64.powi(4),
        "pib" => 1024.0_f64.powi(5),
        _ => {
            return Err(InstallerError::storage(format!(
                "unknown size unit: {}",
                unit_str
            )))
        }
    };

    let bytes = value * multiplier;
    if bytes < 0.0 || !bytes.is_finite() {
        return Err(InstallerError::storage(format!(
            "size out of range: {}",
            input
        )));
    }

    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_picks_unit() {
        assert_eq!(human_readable(0), "0B");
        assert_eq!(human_readable(999), "999B");
        assert_eq!(human_readable(1000), "1KB");
        assert_eq!(human_readable(1_500_000), "1.5MB");
        assert_eq!(human_readable(2_000_000_000), "2GB");
    }

    #[test]
    fn test_human_readable_binary() {
        assert_eq!(human_readable_binary(1024), "1KiB");
        assert_eq!(human_readable_binary(1536), "1.5KiB");
        assert_eq!(human_readable_binary(1 << 30), "1GiB");
    }

    #[test]
    fn test_forced_unit_and_precision() {
        assert_eq!(human_readable_as(1_500_000, "MB", 1).unwrap(), "1.5MB");
        assert_eq!(human_readable_as(1_500_000, "KB", 0).unwrap(), "1500KB");
        assert_eq!(
            human_readable_binary_as(1 << 20, "KiB", 0).unwrap(),
            "1024KiB"
        );
        assert!(human_readable_as(1, "XB", 0).is_err());
    }

    #[test]
    fn test_parse_volume_size_shorthand() {
        assert_eq!(parse_volume_size("150M").unwrap(), 150_000_000);
        assert_eq!(parse_volume_size("12G").unwrap(), 12_000_000_000);
        assert_eq!(parse_volume_size("1t").unwrap(), 1_000_000_000_000);
        assert_eq!(parse_volume_size("512").unwrap(), 512);
        assert_eq!(parse_volume_size("512b").unwrap(), 512);
    }

    #[test]
    fn test_parse_volume_size_binary_and_fractional() {
        assert_eq!(parse_volume_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_volume_size("1.5GiB").unwrap(), 1_610_612_736);
        assert_eq!(parse_volume_size("2.5MB").unwrap(), 2_500_000);
    }

    #[test]
    fn test_parse_volume_size_rejects_garbage() {
        assert!(parse_volume_size("").is_err());
        assert!(parse_volume_size("abc").is_err());
        assert!(parse_volume_size("12X").is_err());
        assert!(parse_volume_size("12 quarts").is_err());
    }

    #[test]
    fn test_parse_round_trips_format() {
        for size in [1000u64, 150_000_000, 2_000_000_000] {
            let text = human_readable(size);
            assert_eq!(parse_volume_size(&text).unwrap(), size);
        }
    }
}
