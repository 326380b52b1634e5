//! Market capability set injected into calibration and pricing entry points
//! instead of a globally registered config object (see `spec.md` §9 design
//! note 1: "Polymorphism of market spec").

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Premium quoting convention for a given symbol's market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PremiumConvention {
    /// Crypto-style inverse markets: premiums are quoted in units of the
    /// underlying and must be divided by the forward to reach base premium.
    CryptoQuote,
    /// Linear markets: quoted premium already equals base premium.
    LinearBase,
}

/// Capability set describing a single underlying's market. Injected
/// explicitly into every calibration/pricing call rather than looked up
/// from a global registry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MarketSpec {
    pub symbol: String,
    pub premium_convention: PremiumConvention,
    pub min_tick: f64,
    pub max_premium: Option<f64>,
}

impl MarketSpec {
    pub fn new(symbol: impl Into<String>, premium_convention: PremiumConvention, min_tick: f64) -> Self {
        Self {
            symbol: symbol.into(),
            premium_convention,
            min_tick,
            max_premium: None,
        }
    }

    /// Converts a base-denominated premium to the market's quoted
    /// convention. For `CryptoQuote` markets, quoted premium = base / F.
    pub fn from_base_to_quoted(&self, base_premium: f64, forward: f64) -> f64 {
        match self.premium_convention {
            PremiumConvention::CryptoQuote => base_premium / forward,
            PremiumConvention::LinearBase => base_premium,
        }
    }

    /// Converts a quoted premium back to base-denominated premium.
    pub fn from_quoted_to_base(&self, quoted_premium: f64, forward: f64) -> f64 {
        match self.premium_convention {
            PremiumConvention::CryptoQuote => quoted_premium * forward,
            PremiumConvention::LinearBase => quoted_premium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_quote_roundtrips() {
        let spec = MarketSpec::new("BTC", PremiumConvention::CryptoQuote, 5e-5);
        let base = 534.0;
        let f = 97000.0;
        let quoted = spec.from_base_to_quoted(base, f);
        let back = spec.from_quoted_to_base(quoted, f);
        assert!((back - base).abs() < 1e-8);
    }

    #[test]
    fn linear_base_is_identity() {
        let spec = MarketSpec::new("ES", PremiumConvention::LinearBase, 0.25);
        let base = 12.5;
        assert_eq!(spec.from_base_to_quoted(base, 4500.0), base);
        assert_eq!(spec.from_quoted_to_base(base, 4500.0), base);
    }
}
