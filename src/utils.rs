use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "30s", "5m", "250ms" or "1m30s".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
///
/// Units may be chained ("1h30m", "2m15s"); each segment needs a unit.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let value_str = &rest[..digits_end];
        let value = match u64::from_str(value_str) {
            Ok(v) => v,
            Err(_) => {
                return Err(format!(
                    "Invalid numeric value in duration: '{}'",
                    s
                ))
            }
        };

        let after_value = &rest[digits_end..];
        if after_value.is_empty() {
            return Err(format!(
                "Unknown duration unit in '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                s
            ));
        }

        let unit_end = after_value
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(after_value.len());
        let unit = &after_value[..unit_end];

        let secs = |per_unit: u64| value.checked_mul(per_unit).map(Duration::from_secs);
        let segment = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => secs(1),
            "m" => secs(60),
            "h" => secs(60 * 60),
            "d" => secs(24 * 60 * 60),
            _ => {
                return Err(format!(
                    "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                    unit
                ))
            }
        };

        total = segment
            .and_then(|segment| total.checked_add(segment))
            .ok_or_else(|| format!("Duration '{}' is too large", s))?;
        rest = &after_value[unit_end..];
    }

    Ok(total)
}

/// Formats a duration the way run files write them ("5m", "1m30s", "250ms").
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let mut secs = duration.as_secs();
    let millis = duration.subsec_millis();
    let mut out = String::new();

    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    if secs > 0 {
        out.push_str(&format!("{}s", secs));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }

    out
}
