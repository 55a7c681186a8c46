use std::path::Path;

/// Remove a file if it exists; a missing file is not an error
pub fn remove_file<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    match std::fs::remove_file(path.as_ref()) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Format duration as human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Scientific notation with a signed two-digit exponent, e.g. `1.0e-03`
pub fn format_sci(value: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => raw,
    }
}

/// Memory usage utilities
pub mod memory {
    /// Bytes per gibibyte
    pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    /// Peak resident memory of the process (the NdArray device is host memory)
    #[cfg(target_os = "linux")]
    pub fn peak_usage() -> Option<usize> {
        status_field("VmHWM:")
    }

    #[cfg(target_os = "linux")]
    fn status_field(key: &str) -> Option<usize> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find(|line| line.starts_with(key))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<usize>().ok())
            .map(|kb| kb * 1024)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn peak_usage() -> Option<usize> {
        None
    }

    /// Peak usage in GiB, zero when the platform does not report it
    pub fn peak_gib() -> f64 {
        peak_usage().map(|b| b as f64 / GIB).unwrap_or(0.0)
    }
}

/// Random number utilities
pub mod random {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Create RNG with fixed seed
    pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }
}

/// Validation utilities
pub mod validation {
    use crate::error::{HarnessError, Result};

    /// Validate that value is in range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        name: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(HarnessError::InvalidConfig(format!(
                "{} must be between {} and {}, got {}",
                name, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that value is positive
    pub fn positive<T: PartialOrd + Default + std::fmt::Display>(value: T, name: &str) -> Result<()> {
        if value <= T::default() {
            return Err(HarnessError::InvalidConfig(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30.0s");
        assert_eq!(format_duration(90.0), "1.5m");
        assert_eq!(format_duration(3600.0), "1.0h");
    }

    #[test]
    fn test_format_sci() {
        assert_eq!(format_sci(1e-3, 1), "1.0e-03");
        assert_eq!(format_sci(0.00049, 1), "4.9e-04");
        assert_eq!(format_sci(123456.0, 2), "1.23e+05");
        assert_eq!(format_sci(0.0, 2), "0.00e+00");
    }

    #[test]
    fn test_peak_usage_is_reported_in_gib() {
        if let Some(peak) = memory::peak_usage() {
            assert!(peak > 0);
            // The high-water mark only grows
            assert!(memory::peak_gib() >= peak as f64 / memory::GIB);
        }
        assert!(memory::peak_gib() >= 0.0);
    }

    #[test]
    fn test_remove_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");

        // Missing file is fine
        remove_file(&path).unwrap();

        std::fs::write(&path, "stale").unwrap();
        remove_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_validation() {
        assert!(validation::in_range(0.5, 0.0, 1.0, "value").is_ok());
        assert!(validation::in_range(1.5, 0.0, 1.0, "value").is_err());

        assert!(validation::positive(1.0, "value").is_ok());
        assert!(validation::positive(0.0, "value").is_err());
        assert!(validation::positive(0usize, "max_epochs").is_err());
    }
}
