//! Price index payload and the row derived from it

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Currencies quoted by the price index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
}

impl Currency {
    /// Column order of the rates in a persisted row.
    pub const PERSISTED_ORDER: [Currency; 3] = [Currency::Usd, Currency::Eur, Currency::Gbp];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
        }
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One quote inside the index payload.
///
/// `rate` is the display string sent by the source (`"42,000.1200"`); only
/// `rate_value` is used for anything numeric.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateQuote {
    pub code: String,
    pub symbol: String,
    pub rate: String,
    pub description: String,
    #[serde(rename = "rate_float")]
    pub rate_value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservedAt {
    pub updated: String,
    #[serde(rename = "updatedISO")]
    pub updated_iso: String,
    #[serde(rename = "updateduk", alias = "updatedUK")]
    pub updated_uk: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Rates {
    #[serde(rename = "USD")]
    pub usd: RateQuote,
    #[serde(rename = "GBP")]
    pub gbp: RateQuote,
    #[serde(rename = "EUR")]
    pub eur: RateQuote,
}

impl Rates {
    pub fn quote(&self, currency: Currency) -> &RateQuote {
        match currency {
            Currency::Usd => &self.usd,
            Currency::Gbp => &self.gbp,
            Currency::Eur => &self.eur,
        }
    }
}

/// Decoded payload of a single poll.
///
/// Decoding is lax: unknown fields are ignored and missing ones take their
/// zero value, so a payload with nothing recognisable decodes to
/// `PriceSnapshot::default()`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PriceSnapshot {
    pub time: ObservedAt,
    pub disclaimer: String,
    #[serde(rename = "chartName")]
    pub chart_name: String,
    #[serde(rename = "bpi")]
    pub rates: Rates,
}

impl PriceSnapshot {
    /// True when the payload carried no usable update time.
    pub fn is_empty(&self) -> bool {
        self.time.updated_iso.trim().is_empty()
    }
}

/// `(timestamp, usd_rate, eur_rate, gbp_rate)` as appended to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    pub timestamp: String,
    pub usd_rate: f64,
    pub eur_rate: f64,
    pub gbp_rate: f64,
}

impl PersistedRow {
    pub fn new(timestamp: String, snapshot: &PriceSnapshot) -> Self {
        let rates = &snapshot.rates;
        Self {
            timestamp,
            usd_rate: rates.quote(Currency::Usd).rate_value,
            eur_rate: rates.quote(Currency::Eur).rate_value,
            gbp_rate: rates.quote(Currency::Gbp).rate_value,
        }
    }

    /// Rates in `Currency::PERSISTED_ORDER`.
    pub fn rates(&self) -> [f64; 3] {
        [self.usd_rate, self.eur_rate, self.gbp_rate]
    }
}
