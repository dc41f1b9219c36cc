//! Kubernetes resource quantity arithmetic
//!
//! Quantities are normalized to integer milli-units so that `"1"`, `"1000m"`
//! and `"0.001k"` compare equal and can be summed without floating point.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::Error;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, i32); 7] = [
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Parse a quantity string (e.g. "500m", "2", "1.5Gi", "1e3") into milli-units.
///
/// Fractions below one milli-unit round up, matching the API server.
pub fn parse_milli(qty: &str) -> Result<i128, Error> {
    let qty = qty.trim();
    let invalid = || Error::validation(format!("invalid quantity '{}'", qty));

    let (negative, unsigned) = match qty.as_bytes().first() {
        Some(b'-') => (true, &qty[1..]),
        Some(b'+') => (false, &qty[1..]),
        Some(_) => (false, qty),
        None => return Err(invalid()),
    };

    let number_len = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_len);
    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return Err(invalid());
    }

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{}{}", whole, fraction);
    let mantissa: i128 = digits.parse().map_err(|_| invalid())?;
    let fraction_len = i32::try_from(fraction.len()).map_err(|_| invalid())?;
    let mut exp10 = 3 - fraction_len;
    let mut exp2 = 0u32;

    if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        exp2 = *shift;
    } else if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        exp10 = exp10.checked_add(*exp).ok_or_else(invalid)?;
    } else if let Some(exp) = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
    {
        let exp = exp.parse::<i32>().map_err(|_| invalid())?;
        exp10 = exp10.checked_add(exp).ok_or_else(invalid)?;
    } else if !suffix.is_empty() {
        return Err(invalid());
    }

    let mut value = mantissa
        .checked_mul(1i128.checked_shl(exp2).ok_or_else(invalid)?)
        .ok_or_else(invalid)?;
    if exp10 >= 0 {
        let scale = 10i128.checked_pow(exp10 as u32).ok_or_else(invalid)?;
        value = value.checked_mul(scale).ok_or_else(invalid)?;
    } else {
        // Anything smaller than 10^-38 milli rounds up to one milli-unit
        value = match 10i128.checked_pow(exp10.unsigned_abs()) {
            Some(scale) => value / scale + i128::from(value % scale != 0),
            None => i128::from(value != 0),
        };
    }

    Ok(if negative { -value } else { value })
}

/// Format milli-units as a canonical quantity ("2", "1500m")
pub fn from_milli(milli: i128) -> Quantity {
    if milli % 1000 == 0 {
        Quantity((milli / 1000).to_string())
    } else {
        Quantity(format!("{}m", milli))
    }
}

/// Compare two quantities by value.
///
/// Unparseable quantities fall back to string comparison.
pub fn quantity_eq(a: &Quantity, b: &Quantity) -> bool {
    match (parse_milli(&a.0), parse_milli(&b.0)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.0 == b.0,
    }
}

/// Compare two resource maps by key set and quantity value
pub fn resource_map_eq(a: &BTreeMap<String, Quantity>, b: &BTreeMap<String, Quantity>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(name, qa)| b.get(name).is_some_and(|qb| quantity_eq(qa, qb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", 1000)]
    #[case("500m", 500)]
    #[case("1.5", 1500)]
    #[case("0.1", 100)]
    #[case("2k", 2_000_000)]
    #[case("1Ki", 1_024_000)]
    #[case("1Gi", 1_073_741_824_000)]
    #[case("1e3", 1_000_000)]
    #[case("1E", 1_000_000_000_000_000_000_000)]
    #[case("-2", -2000)]
    #[case("0.0001", 1)]
    #[case("1e-2147483648", 1)]
    #[case("0e-50", 0)]
    fn parses_quantities(#[case] input: &str, #[case] expected: i128) {
        assert_eq!(parse_milli(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("1.2.3")]
    #[case("10Xi")]
    #[case(".")]
    #[case("1e2147483647")]
    #[case("1e99")]
    #[case("99999999999999999999999999999999999999999")]
    fn rejects_invalid_quantities(#[case] input: &str) {
        assert!(parse_milli(input).is_err());
    }

    #[test]
    fn formats_whole_and_fractional_values() {
        assert_eq!(from_milli(2000).0, "2");
        assert_eq!(from_milli(1500).0, "1500m");
        assert_eq!(from_milli(0).0, "0");
    }

    #[test]
    fn equal_values_with_different_spellings_compare_equal() {
        assert!(quantity_eq(
            &Quantity("1".to_string()),
            &Quantity("1000m".to_string())
        ));
        assert!(!quantity_eq(
            &Quantity("1".to_string()),
            &Quantity("1001m".to_string())
        ));
    }

    #[test]
    fn resource_maps_compare_by_value() {
        let a = BTreeMap::from([
            ("cpu".to_string(), Quantity("2".to_string())),
            ("memory".to_string(), Quantity("1Gi".to_string())),
        ]);
        let b = BTreeMap::from([
            ("memory".to_string(), Quantity("1024Mi".to_string())),
            ("cpu".to_string(), Quantity("2000m".to_string())),
        ]);
        assert!(resource_map_eq(&a, &b));

        let mut c = b.clone();
        c.remove("memory");
        assert!(!resource_map_eq(&a, &c));
    }
}
