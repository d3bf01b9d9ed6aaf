use regex::Regex;
use std::sync::LazyLock;

static PRICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,.]*").expect("price pattern is valid"));

/// Parses the first number out of scraped price text such as `"₹1,234.50"`,
/// `"Rs. 499"` or `"1.234,50 €"`.
///
/// When both `.` and `,` appear, whichever comes last is the decimal
/// separator. A lone comma followed by one or two digits is a decimal comma;
/// any other comma is a grouping separator, which covers Indian grouping
/// (`1,23,456`) as well as western grouping. A single `.` with no comma is
/// always a decimal point, so `"1.299 €"` reads as `1.299`; repeated dots
/// are grouping separators.
pub fn parse_price(text: &str) -> Option<f64> {
    let token = PRICE_TOKEN
        .find(text)?
        .as_str()
        .trim_end_matches(['.', ',']);

    let normalized = match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = token.len() - comma - 1;
            if token.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (Some(_), None) if token.matches('.').count() > 1 => token.replace('.', ""),
        _ => token.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|price| price.is_finite())
}

/// A watcher or track fires when the new price reaches the target and beats
/// every price it was already notified about.
pub fn should_notify(new_price: f64, target_price: f64, last_notified_price: Option<f64>) -> bool {
    new_price <= target_price && last_notified_price.map_or(true, |last| new_price < last)
}

pub fn format_rupees(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("₹{:.0}", price)
    } else {
        format!("₹{:.2}", price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_currency_and_grouping_variants() {
        let cases = [
            ("₹1,234.50", 1234.5),
            ("₹ 1,299.", 1299.0),
            ("Rs. 499", 499.0),
            ("$19.99", 19.99),
            ("₹1,23,456", 123456.0),
            ("1,234,567.89", 1234567.89),
            ("1.234,50 €", 1234.5),
            ("1.234.567,89", 1234567.89),
            ("12,5", 12.5),
            ("1,299", 1299.0),
            ("1.299.000", 1299000.0),
            ("Now ₹799 (20% off)", 799.0),
            ("  42  ", 42.0),
        ];

        for (text, expected) in cases {
            assert_eq!(parse_price(text), Some(expected), "{text:?}");
        }
    }

    #[test]
    fn lone_dot_is_a_decimal_point() {
        assert_eq!(parse_price("1.299 €"), Some(1.299));
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price("₹0.5"), Some(0.5));
    }

    #[test]
    fn returns_none_without_digits() {
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("Currently unavailable"), None);
        assert_eq!(parse_price("₹"), None);
    }

    #[test]
    fn notifies_only_at_or_below_target() {
        assert!(should_notify(999.0, 1000.0, None));
        assert!(should_notify(1000.0, 1000.0, None));
        assert!(!should_notify(1000.01, 1000.0, None));
    }

    #[test]
    fn notifies_only_when_beating_last_notified_price() {
        assert!(should_notify(900.0, 1000.0, Some(950.0)));
        assert!(!should_notify(950.0, 1000.0, Some(950.0)));
        assert!(!should_notify(960.0, 1000.0, Some(950.0)));
        assert!(!should_notify(1200.0, 1000.0, Some(1500.0)));
    }

    #[test]
    fn formats_rupees() {
        assert_eq!(format_rupees(1299.0), "₹1299");
        assert_eq!(format_rupees(1234.5), "₹1234.50");
    }
}
