// src/utils/human.rs

const UNITS: [(f64, &str); 4] = [
    (1e12, "T"),
    (1e9, "B"),
    (1e6, "M"),
    (1e3, "K"),
];

/// Short human-readable count: `999`, `1.2K`, `3.4M`.
pub fn readable_count(count: i64) -> String {
    let sign = if count < 0 { "-" } else { "" };
    let value = count.unsigned_abs() as f64;

    for (i, (scale, suffix)) in UNITS.iter().enumerate() {
        if value < *scale {
            continue;
        }
        let scaled = (value / scale * 10.0).round() / 10.0;
        // 999_950 rounds to 1000.0K; promote to the next unit instead.
        if scaled >= 1000.0 && i > 0 {
            let (next_scale, next_suffix) = UNITS[i - 1];
            return format!("{sign}{}{next_suffix}", trim_decimal((value / next_scale * 10.0).round() / 10.0));
        }
        return format!("{sign}{}{suffix}", trim_decimal(scaled));
    }

    count.to_string()
}

fn trim_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}
