//! Display formatting shared by the panel, the ring and the CLI.
//!
//! Status text, progress counters and byte sizes all go through this module
//! so every surface shows them identically.

/// Format a capture progress pair as `completed/total`.
///
/// # Examples
/// ```
/// use postshot_types::formatting::format_progress;
/// assert_eq!(format_progress(3, 7), "3/7");
/// assert_eq!(format_progress(0, 0), "0/0");
/// ```
pub fn format_progress(completed: usize, total: usize) -> String {
    format!("{}/{}", completed, total)
}

/// Format a byte count with a binary unit suffix.
///
/// # Examples
/// ```
/// use postshot_types::formatting::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(2048), "2.0 KiB");
/// assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
/// ```
pub fn format_bytes(n: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let value = n as f64;
    if value >= MIB {
        format!("{:.1} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{} B", n)
    }
}

/// Truncate a label to `max_chars`, adding "..." if truncated.
///
/// # Examples
/// ```
/// use postshot_types::formatting::truncate_label;
/// assert_eq!(truncate_label("short", 10), "short");
/// assert_eq!(truncate_label("this is a very long name", 10), "this is...");
/// ```
pub fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let truncated: String = label.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_progress() {
        assert_eq!(format_progress(1, 1), "1/1");
        assert_eq!(format_progress(12, 40), "12/40");
    }

    #[test]
    fn test_truncate_exact_length() {
        assert_eq!(truncate_label("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_label("", 3), "");
    }

    #[test]
    fn test_format_bytes_boundaries() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
    }
}
