//! Per-capture anonymization rules.

use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

static URL_HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^/]*").unwrap());

const MASK: &str = "***";
const LOOPBACK: &str = "127.0.0.1";
const PLACEHOLDER_ORIGIN: &str = "http://example.com";

/// Relative jitter applied by [`AnonymizeRule::Slightly`].
const JITTER: f64 = 0.2;

/// How a captured span is rewritten when a line is anonymized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizeRule {
    #[default]
    Keep,
    /// Replace the whole value.
    Mask,
    /// Jitter numbers by up to ±20%, keeping their order of magnitude.
    Slightly,
    /// Replace an IP address with the loopback address.
    Ip,
    /// Replace a URL's scheme and host, keeping its path.
    Url,
}

impl AnonymizeRule {
    /// Rewrites one captured value.
    pub fn apply<R: Rng + ?Sized>(self, raw: &str, rng: &mut R) -> String {
        match self {
            Self::Keep => raw.to_string(),
            Self::Mask => MASK.to_string(),
            Self::Ip => LOOPBACK.to_string(),
            Self::Url => URL_HOST_RE.replace(raw, PLACEHOLDER_ORIGIN).into_owned(),
            Self::Slightly => jitter(raw, rng),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn jitter<R: Rng + ?Sized>(raw: &str, rng: &mut R) -> String {
    let factor = 1.0 + rng.random_range(-JITTER..=JITTER);
    if let Ok(int) = raw.parse::<i64>() {
        return (((int as f64) * factor).round() as i64).to_string();
    }
    if let Ok(float) = raw.parse::<f64>() {
        let decimals = raw.split_once('.').map_or(0, |(_, frac)| frac.len());
        return format!("{:.*}", decimals, float * factor);
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn fixed_rules() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(AnonymizeRule::Keep.apply("10.0.0.1", &mut rng), "10.0.0.1");
        assert_eq!(AnonymizeRule::Mask.apply("secret", &mut rng), "***");
        assert_eq!(AnonymizeRule::Ip.apply("10.0.0.1", &mut rng), "127.0.0.1");
        assert_eq!(
            AnonymizeRule::Url.apply("https://shop.internal:8080/cart?id=3", &mut rng),
            "http://example.com/cart?id=3"
        );
        assert_eq!(AnonymizeRule::Url.apply("/relative", &mut rng), "/relative");
    }

    #[test]
    fn slightly_stays_within_twenty_percent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let out: i64 = AnonymizeRule::Slightly
                .apply("1000", &mut rng)
                .parse()
                .unwrap();
            assert!((800..=1200).contains(&out), "{out}");
        }
    }

    #[test]
    fn slightly_keeps_decimal_places() {
        let mut rng = StdRng::seed_from_u64(7);
        let out = AnonymizeRule::Slightly.apply("12.50", &mut rng);
        let (_, frac) = out.split_once('.').unwrap();
        assert_eq!(frac.len(), 2);
        let value: f64 = out.parse().unwrap();
        assert!((10.0..=15.0).contains(&value));
        assert_eq!(AnonymizeRule::Slightly.apply("n/a", &mut rng), "n/a");
    }
}
