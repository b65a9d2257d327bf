use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An on-chain integer amount together with the decimals of its asset.
///
/// Display rescales to a human-readable decimal string; arithmetic and
/// comparisons stay on the raw integer so nothing is lost to rounding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: BigUint,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: BigUint, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self::new(BigUint::from(0u8), decimals)
    }

    /// Parse a user-entered decimal string (e.g. `"12.5"`) into scaled units.
    pub fn parse(input: &str, decimals: u8) -> Result<Self, Error> {
        parse_units(input, decimals).map(|raw| Self::new(raw, decimals))
    }

    pub fn is_zero(&self) -> bool {
        self.raw == BigUint::from(0u8)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_units(&self.raw, self.decimals))
    }
}

/// Scale a decimal string by `10^decimals`.
///
/// Rejects empty input, signs, exponents and more fractional digits than the
/// asset carries.
pub fn parse_units(input: &str, decimals: u8) -> Result<BigUint, Error> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::InvalidAmount("empty amount".to_string()));
    }

    let (integer_part, fraction_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };

    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(Error::InvalidAmount(format!("not a number: {s}")));
    }
    let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if !all_digits(integer_part) || !all_digits(fraction_part) {
        return Err(Error::InvalidAmount(format!("not a number: {s}")));
    }
    if fraction_part.len() > decimals as usize {
        return Err(Error::InvalidAmount(format!(
            "{s} has more than {decimals} decimal places"
        )));
    }

    let mut digits = String::with_capacity(integer_part.len() + decimals as usize);
    digits.push_str(integer_part);
    digits.push_str(fraction_part);
    digits.extend(std::iter::repeat_n('0', decimals as usize - fraction_part.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(BigUint::from(0u8));
    }
    BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| Error::InvalidAmount(format!("not a number: {s}")))
}

/// Format a scaled integer with `decimals` decimal places, trimming trailing zeros.
///
/// Whole amounts print without a fraction (`1`), except zero which prints as
/// `0.0` whenever `decimals` is non-zero.
pub fn format_units(amount: &BigUint, decimals: u8) -> String {
    let digits = amount.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    match fraction.trim_end_matches('0') {
        "" if digits == "0" => "0.0".to_string(),
        "" => whole.to_string(),
        fraction => format!("{whole}.{fraction}"),
    }
}

/// `10^decimals` as a big integer.
pub fn unit(decimals: u8) -> BigUint {
    BigUint::from(10u8).pow(decimals as u32)
}
