use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// Number of fractional digits carried by every money amount.
pub const MONEY_SCALE: u32 = 2;

/// Most fractional digits a decimal string may carry (rust_decimal's limit).
const MAX_PARSE_SCALE: u32 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("invalid money format: {0}")]
    InvalidFormat(String),

    #[error("too many decimal places: provided {provided}, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("amount too large, would overflow")]
    Overflow,

    #[error("rate must be strictly positive")]
    NonPositiveRate,
}

/// Exact fixed-point money amount, always held at [`MONEY_SCALE`] fractional digits.
///
/// Money is signed so callers can validate the result of a subtraction, but
/// arithmetic is only available through checked methods: nothing here wraps,
/// saturates or rounds behind the caller's back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::from_parts(0, 0, 0, false, MONEY_SCALE));

    /// Build from an integer number of minor units. Example: 5000 -> 50.00
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, MONEY_SCALE))
    }

    /// Accept a decimal only if it is representable at money scale without rounding.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: MONEY_SCALE,
            });
        }
        let mut value = normalized;
        value.rescale(MONEY_SCALE);
        Ok(Money(value))
    }

    /// Explicitly round an arbitrary-precision decimal to money scale (half to even).
    pub fn round_from(value: Decimal) -> Self {
        let mut value =
            value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
        value.rescale(MONEY_SCALE);
        Money(value)
    }

    /// Parse a decimal string. Example: "50" -> 50.00, "12.5" -> 12.50, "0.001" -> error
    pub fn parse(input: &str) -> Result<Self, MoneyError> {
        let value = parse_decimal(input)?;
        Self::from_decimal(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        Self::exact(self.0.checked_add(other.0))
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        Self::exact(self.0.checked_sub(other.0))
    }

    // rust_decimal trades scale for range near the top of its mantissa;
    // a result that lost fractional digits is an overflow, not a value.
    fn exact(result: Option<Decimal>) -> Result<Money, MoneyError> {
        match result {
            Some(value) if value.scale() == MONEY_SCALE => Ok(Money(value)),
            _ => Err(MoneyError::Overflow),
        }
    }

    /// Exact product with a rate; the result keeps full precision.
    pub fn checked_mul_rate(self, rate: Rate) -> Result<Decimal, MoneyError> {
        self.0.checked_mul(rate.0).ok_or(MoneyError::Overflow)
    }

    /// Rescale between two currencies quoted against a common base:
    /// `self * (target / source)`, rounded once at the end.
    pub fn convert(self, source: Rate, target: Rate) -> Result<Money, MoneyError> {
        // Multiply before dividing so the only inexact step is the final division.
        let scaled = self.checked_mul_rate(target)?;
        let converted = scaled.checked_div(source.0).ok_or(MoneyError::Overflow)?;
        Ok(Money::round_from(converted))
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Money::parse(&raw).map_err(de::Error::custom)
    }
}

/// Exchange rate of a currency against a common base. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(Decimal);

impl Rate {
    pub const ONE: Rate = Rate(Decimal::ONE);

    pub fn new(value: Decimal) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NonPositiveRate);
        }
        Ok(Rate(value.normalize()))
    }

    pub fn parse(input: &str) -> Result<Self, MoneyError> {
        Rate::new(parse_decimal(input)?)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// Rate tables arrive either as strings or as JSON numbers; numbers go through
// their shortest round-trip text form so no binary noise reaches the decimal.
impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RateVisitor;

        impl de::Visitor<'_> for RateVisitor {
            type Value = Rate;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a positive decimal rate as a string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Rate, E> {
                Rate::parse(v).map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Rate, E> {
                Rate::parse(&v.to_string()).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Rate, E> {
                Rate::new(Decimal::from(v)).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Rate, E> {
                Rate::new(Decimal::from(v)).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RateVisitor)
    }
}

fn parse_decimal(input: &str) -> Result<Decimal, MoneyError> {
    let input = input.trim();
    let digits = input.strip_prefix('-').unwrap_or(input);

    let mut parts = digits.split('.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    if parts.next().is_some() {
        return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
    }
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(input.to_string()));
    }
    if let Some(frac) = frac {
        if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyError::InvalidFormat(input.to_string()));
        }
    }

    // Decimal::from_str rounds digits it cannot hold; count them up front.
    let significant = frac.map_or(0, |f| f.trim_end_matches('0').len()) as u32;
    if significant > MAX_PARSE_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: significant,
            max: MAX_PARSE_SCALE,
        });
    }

    let value = Decimal::from_str(input).map_err(|_| MoneyError::Overflow)?;
    let kept = value.normalize().scale();
    if kept < significant {
        return Err(MoneyError::PrecisionOverflow {
            provided: significant,
            max: kept,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_money() {
        assert_eq!(Money::parse("50.00"), Ok(Money::from_cents(5000)));
        assert_eq!(Money::parse("50"), Ok(Money::from_cents(5000)));
        assert_eq!(Money::parse("12.5"), Ok(Money::from_cents(1250)));
        assert_eq!(Money::parse("0.01"), Ok(Money::from_cents(1)));
        assert_eq!(Money::parse("-40.10"), Ok(Money::from_cents(-4010)));
        // Trailing zeros beyond the scale are not extra precision
        assert_eq!(Money::parse("1.500"), Ok(Money::from_cents(150)));
    }

    #[test]
    fn test_parse_money_rejects_extra_precision() {
        assert_eq!(
            Money::parse("100.999"),
            Err(MoneyError::PrecisionOverflow {
                provided: 3,
                max: 2
            })
        );
    }

    #[test]
    fn test_parse_never_rounds_long_fractions() {
        assert_eq!(
            Money::parse("1.0000000000000000000000000000001"),
            Err(MoneyError::PrecisionOverflow {
                provided: 31,
                max: 28
            })
        );
        assert!(matches!(
            Money::parse("1.00000000000000000000000000001"),
            Err(MoneyError::PrecisionOverflow { provided: 29, .. })
        ));
        assert!(Money::parse("99999999999999999999999999.995").is_err());
        assert!(matches!(
            Rate::parse("1650.00000000000000000000000000000001"),
            Err(MoneyError::PrecisionOverflow { .. })
        ));
        // Trailing zeros are not precision
        assert_eq!(
            Money::parse("2.500000000000"),
            Ok(Money::from_cents(250))
        );
    }

    #[test]
    fn test_parse_money_invalid() {
        assert!(Money::parse("abc").is_err());
        assert!(Money::parse("12.34.56").is_err());
        assert!(Money::parse(".50").is_err());
        assert!(Money::parse("5.").is_err());
        assert!(Money::parse("").is_err());
        assert!(Money::parse("1e5").is_err());
        assert!(Money::parse("+5").is_err());
    }

    #[test]
    fn test_display_keeps_scale() {
        assert_eq!(Money::from_cents(5000).to_string(), "50.00");
        assert_eq!(Money::from_cents(1).to_string(), "0.01");
        assert_eq!(Money::ZERO.to_string(), "0.00");
        assert_eq!(Money::from_cents(-1).to_string(), "-0.01");
    }

    #[test]
    fn test_string_roundtrip_is_exact() {
        for raw in ["0.00", "60.00", "40.05", "-3.10", "79228162514264337593543950.33"] {
            let money = Money::parse(raw).unwrap();
            let reparsed = Money::parse(&money.to_string()).unwrap();
            assert_eq!(money, reparsed);
            assert_eq!(money.as_decimal().scale(), reparsed.as_decimal().scale());
            assert_eq!(money.to_string(), raw);
        }
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::from_cents(10000);
        let b = Money::from_cents(4000);
        assert_eq!(a.checked_sub(b), Ok(Money::from_cents(6000)));
        assert_eq!(a.checked_add(b), Ok(Money::from_cents(14000)));
        assert!(b.checked_sub(a).unwrap().is_negative());
    }

    #[test]
    fn test_add_overflow_is_an_error() {
        let max = Money::parse("792281625142643375935439503.35").unwrap();
        assert_eq!(max.checked_add(max), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_convert_rounds_once_half_even() {
        let one = Rate::parse("1").unwrap();
        let two = Rate::parse("2").unwrap();
        let three = Rate::parse("3").unwrap();

        assert_eq!(
            Money::from_cents(10000).convert(three, one),
            Ok(Money::from_cents(3333))
        );
        // 0.125 -> 0.12, 0.375 -> 0.38
        assert_eq!(
            Money::from_cents(25).convert(two, one),
            Ok(Money::from_cents(12))
        );
        assert_eq!(
            Money::from_cents(75).convert(two, one),
            Ok(Money::from_cents(38))
        );
    }

    #[test]
    fn test_convert_same_rate_is_identity() {
        let balance = Money::parse("1234.56").unwrap();
        let rate = Rate::parse("1650.123456").unwrap();
        assert_eq!(balance.convert(rate, rate), Ok(balance));
    }

    #[test]
    fn test_rate_must_be_positive() {
        assert_eq!(Rate::parse("0"), Err(MoneyError::NonPositiveRate));
        assert_eq!(Rate::parse("-1.2"), Err(MoneyError::NonPositiveRate));
        assert!(Rate::parse("0.000001").is_ok());
    }

    #[test]
    fn test_rate_deserializes_from_number_and_string() {
        let from_number: Rate = serde_json::from_str("1.08").unwrap();
        let from_string: Rate = serde_json::from_str("\"1.08\"").unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.to_string(), "1.08");
    }

    #[test]
    fn test_money_serde_as_string() {
        let json = serde_json::to_string(&Money::from_cents(4000)).unwrap();
        assert_eq!(json, "\"40.00\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_cents(4000));
    }
}
