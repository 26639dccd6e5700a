const KIB: f64 = 1024.0;

pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB && unit < UNITS.len() - 1 {
        value /= KIB;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

pub fn gb_to_bytes(gb: u64) -> u64 {
    gb.saturating_mul(BYTES_PER_GB)
}

pub fn format_percent(percent: f64) -> String {
    format!("{:.2}%", percent)
}
