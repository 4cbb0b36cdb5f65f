//! Resource quantity parsing (`250m`, `512Mi`, `1.5`, `12345n`)

use regex::Regex;

const QUANTITY_PATTERN: &str =
    r"^([+-]?(?:\d+(?:\.\d*)?|\.\d+))(Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E|[eE][+-]?\d+)?$";

/// Parse a quantity string into base units (cores or bytes)
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let pattern = Regex::new(QUANTITY_PATTERN).ok()?;
    let caps = pattern.captures(raw.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;

    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        None => 1.0,
        Some("n") => 1e-9,
        Some("u") => 1e-6,
        Some("m") => 1e-3,
        Some("k") => 1e3,
        Some("M") => 1e6,
        Some("G") => 1e9,
        Some("T") => 1e12,
        Some("P") => 1e15,
        Some("E") => 1e18,
        Some("Ki") => 1024.0,
        Some("Mi") => 1024f64.powi(2),
        Some("Gi") => 1024f64.powi(3),
        Some("Ti") => 1024f64.powi(4),
        Some("Pi") => 1024f64.powi(5),
        Some("Ei") => 1024f64.powi(6),
        Some(exp) => 10f64.powi(exp[1..].parse::<i32>().ok()?),
    };

    Some(number * multiplier)
}

/// Whether the string is a well-formed, non-negative quantity
pub fn is_valid_quantity(raw: &str) -> bool {
    matches!(parse_quantity(raw), Some(v) if v >= 0.0)
}

/// CPU quantity in millicores
pub fn cpu_millicores(raw: &str) -> Option<u64> {
    parse_quantity(raw).map(|cores| (cores * 1000.0).round().max(0.0) as u64)
}

/// Memory quantity in bytes
pub fn memory_bytes(raw: &str) -> Option<u64> {
    parse_quantity(raw).map(|bytes| bytes.round().max(0.0) as u64)
}
