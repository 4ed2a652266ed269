//! Resource quantities (`500m`, `1Gi`, `1e3`) compared by value, since the
//! API server rewrites them into canonical form

use serde_json::{Map, Value};

fn suffix_exponent(suffix: &str) -> Option<(u32, i32)> {
    // (binary shift, decimal exponent)
    Some(match suffix {
        "" => (0, 0),
        "n" => (0, -9),
        "u" => (0, -6),
        "m" => (0, -3),
        "k" => (0, 3),
        "M" => (0, 6),
        "G" => (0, 9),
        "T" => (0, 12),
        "P" => (0, 15),
        "E" => (0, 18),
        "Ki" => (10, 0),
        "Mi" => (20, 0),
        "Gi" => (30, 0),
        "Ti" => (40, 0),
        "Pi" => (50, 0),
        "Ei" => (60, 0),
        _ => return None,
    })
}

/// Parse a quantity into `(mantissa, exponent)` with `value = mantissa * 10^exponent`
/// and no trailing zeros in the mantissa
pub fn parse(text: &str) -> Option<(i128, i32)> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);

    let (shift, mut exponent) = match suffix.strip_prefix(['e', 'E']) {
        Some(exp) if !exp.is_empty() => (0, exp.parse::<i32>().ok()?),
        _ => suffix_exponent(suffix)?,
    };

    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let mut mantissa: i128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        let digit = c.to_digit(10)?;
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(digit))?;
    }
    exponent -= i32::try_from(fraction.len()).ok()?;
    mantissa = mantissa.checked_mul(1i128.checked_shl(shift)?)?;
    if negative {
        mantissa = -mantissa;
    }

    if mantissa == 0 {
        return Some((0, 0));
    }
    while mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    Some((mantissa, exponent))
}

/// Same quantity, however it is written
pub fn equivalent(a: &str, b: &str) -> bool {
    a == b || matches!((parse(a), parse(b)), (Some(x), Some(y)) if x == y)
}

/// Maps with the same keys whose values are equivalent quantities
pub fn maps_equivalent(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter().all(|(key, av)| match (av, b.get(key)) {
            (Value::String(x), Some(Value::String(y))) => equivalent(x, y),
            (x, Some(y)) => x == y,
            (_, None) => false,
        })
}
