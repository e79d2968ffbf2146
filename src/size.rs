//! Byte size strings in both directions

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Parse a size string like "1GB", "500MB", "100KB" into bytes
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (num_part, multiplier) = if let Some(n) = s.strip_suffix("TB") {
        (n, 1024u64.pow(4))
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1024u64.pow(3))
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024u64.pow(2))
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    num_part
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

/// Human readable size, e.g. `1.5 MB`
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
