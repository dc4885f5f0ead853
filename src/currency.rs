use std::collections::HashMap;

use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::Scale;

/// Static exchange-rate table keyed by (from, to) pairs.
///
/// Rates are pure multiplicative factors; the table is mutable only between
/// runs via [`CurrencyConverter::set_rate`].
pub struct CurrencyConverter {
    rates: HashMap<(String, String), Decimal>,
}

impl Default for CurrencyConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrencyConverter {
    pub fn new() -> Self {
        let mut rates = HashMap::new();
        let table: &[(&str, &str, &str)] = &[
            ("GBP", "USD", "1.27"),
            ("GBP", "EUR", "1.17"),
            ("USD", "GBP", "0.79"),
            ("USD", "EUR", "0.92"),
            ("EUR", "GBP", "0.85"),
            ("EUR", "USD", "1.09"),
            ("GBP", "GBP", "1.0"),
            ("USD", "USD", "1.0"),
            ("EUR", "EUR", "1.0"),
        ];
        for (from, to, rate) in table {
            rates.insert(
                (from.to_string(), to.to_string()),
                rate.parse().expect("static rate must parse"),
            );
        }
        Self { rates }
    }

    pub fn set_rate(&mut self, from: &str, to: &str, rate: Decimal) {
        self.rates
            .insert((from.to_uppercase(), to.to_uppercase()), rate);
    }

    /// Convert between currencies, or `None` when the pair is missing.
    pub fn convert(&self, amount: Decimal, from: &str, to: &str) -> Option<Decimal> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();

        if from == to {
            return Some(amount);
        }

        match self.rates.get(&(from.clone(), to.clone())) {
            Some(rate) => Some(amount * rate),
            None => {
                warn!("exchange rate not available for {from}->{to}");
                None
            }
        }
    }

    /// Convert to the base currency, returning the original amount when no
    /// rate is available.
    pub fn normalize_to_base(&self, amount: Decimal, currency: &str, base: &str) -> Decimal {
        self.convert(amount, currency, base).unwrap_or(amount)
    }
}

/// Scale parsing, detection and conversion.
pub struct ScaleConverter;

impl ScaleConverter {
    /// Resolve a scale string or alias. Unknown strings fall back to
    /// [`Scale::Actual`] with a warning.
    pub fn normalize_scale(scale: &str) -> Scale {
        let lowered = scale.trim().to_lowercase();
        match lowered.as_str() {
            "actual" => Scale::Actual,
            "thousands" | "thousand" | "k" | "000s" => Scale::Thousands,
            "millions" | "million" | "m" | "mn" | "000,000s" => Scale::Millions,
            "billions" | "billion" | "b" | "bn" => Scale::Billions,
            _ => {
                warn!("unknown scale {scale:?}, treating as actual");
                Scale::Actual
            }
        }
    }

    pub fn convert(amount: Decimal, from: Scale, to: Scale) -> Decimal {
        if from == to {
            return amount;
        }
        amount * from.multiplier() / to.multiplier()
    }

    pub fn to_actual(amount: Decimal, scale: Scale) -> Decimal {
        Self::convert(amount, scale, Scale::Actual)
    }

    pub fn from_actual(amount: Decimal, to: Scale) -> Decimal {
        Self::convert(amount, Scale::Actual, to)
    }

    /// Detect a scale marker in text, defaulting to [`Scale::Actual`].
    pub fn detect_scale(text: &str) -> Scale {
        let lowered = text.to_lowercase();
        let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

        if contains_any(&["million", "£m", "$m", "€m", "(m)"]) {
            Scale::Millions
        } else if contains_any(&["thousand", "£k", "$k", "€k", "(k)", "000s"]) {
            Scale::Thousands
        } else if contains_any(&["billion", "£b", "$b", "€b", "(b)"]) {
            Scale::Billions
        } else {
            Scale::Actual
        }
    }
}

/// Detects the currency of a text snippet.
pub struct CurrencyDetector;

impl CurrencyDetector {
    const SYMBOLS: [(&'static str, &'static str); 4] =
        [("£", "GBP"), ("$", "USD"), ("€", "EUR"), ("¥", "JPY")];
    const CODES: [&'static str; 7] = ["GBP", "USD", "EUR", "JPY", "CHF", "CAD", "AUD"];
    const WORDS: [(&'static str, &'static str); 5] = [
        ("sterling", "GBP"),
        ("pounds", "GBP"),
        ("dollars", "USD"),
        ("euros", "EUR"),
        ("euro", "EUR"),
    ];

    pub fn detect(text: &str) -> Option<String> {
        for (symbol, code) in Self::SYMBOLS {
            if text.contains(symbol) {
                return Some(code.to_string());
            }
        }

        let upper = text.to_uppercase();
        for code in Self::CODES {
            if upper.contains(code) {
                return Some(code.to_string());
            }
        }

        let lower = text.to_lowercase();
        for (word, code) in Self::WORDS {
            if lower.contains(word) {
                return Some(code.to_string());
            }
        }

        None
    }
}

/// Record of a value after currency and scale normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedValue {
    pub value: Decimal,
    pub currency: String,
    pub scale: Scale,
    pub original_value: Decimal,
    pub original_currency: String,
    pub original_scale: Scale,
    pub currency_converted: bool,
    pub scale_converted: bool,
}

/// Combined currency + scale normalizer targeting a configured base pair.
pub struct ValueNormalizer {
    base_currency: String,
    base_scale: Scale,
    currency_converter: CurrencyConverter,
}

impl ValueNormalizer {
    pub fn new(base_currency: &str, base_scale: Scale) -> Self {
        Self {
            base_currency: base_currency.to_uppercase(),
            base_scale,
            currency_converter: CurrencyConverter::new(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn base_scale(&self) -> Scale {
        self.base_scale
    }

    pub fn currency_converter_mut(&mut self) -> &mut CurrencyConverter {
        &mut self.currency_converter
    }

    /// Express an amount in the base (currency, scale) pair, recording the
    /// originals.
    pub fn normalize_value(&self, amount: Decimal, currency: &str, scale: Scale) -> NormalizedValue {
        let currency = currency.to_uppercase();
        let in_base_currency =
            self.currency_converter
                .normalize_to_base(amount, &currency, &self.base_currency);
        let in_base_scale = ScaleConverter::convert(in_base_currency, scale, self.base_scale);

        debug!(
            "normalized {amount} {currency} ({scale}) -> {in_base_scale} {} ({})",
            self.base_currency, self.base_scale
        );

        NormalizedValue {
            value: in_base_scale,
            currency: self.base_currency.clone(),
            scale: self.base_scale,
            original_value: amount,
            original_currency: currency.clone(),
            original_scale: scale,
            currency_converted: currency != self.base_currency,
            scale_converted: scale != self.base_scale,
        }
    }
}
