//! Human-readable byte sizes for status lines.

const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];

/// Format a byte count with decimal (SI) units, one fractional digit.
pub fn format_size(bytes: u64) -> String {
    if bytes == 1 {
        return "1 byte".to_string();
    }
    if bytes < 1000 {
        return format!("{bytes} bytes");
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}
