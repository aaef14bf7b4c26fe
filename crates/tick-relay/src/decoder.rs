//! Raw payload → [`Tick`] decoding.
//!
//! Decoders are pure: no state, no I/O. A failure is reported per message and
//! the caller moves on to the next one.

use tick_core::error::DecodeError;
use tick_core::{Tick, time_util};

use crate::json_util::{parse_str_f64, str_field, unwrap_envelope};

/// Turns one raw upstream payload into a validated tick.
pub trait TickDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> Result<Tick, DecodeError>;
}

/// Decoder for flat JSON objects carrying a symbol and a price field.
///
/// Defaults match the Binance trade stream (`{"e":"trade","s":"BTCUSDT","p":"50000.00",...}`).
#[derive(Debug, Clone)]
pub struct JsonTickDecoder {
    symbol_field: String,
    price_field: String,
}

impl JsonTickDecoder {
    pub fn new(symbol_field: impl Into<String>, price_field: impl Into<String>) -> Self {
        Self {
            symbol_field: symbol_field.into(),
            price_field: price_field.into(),
        }
    }

    /// Decode with an explicit observation time.
    pub fn decode_at(&self, raw: &str, observed_at_us: u64) -> Result<Tick, DecodeError> {
        let v: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let v = unwrap_envelope(&v);

        let symbol = str_field(v, &self.symbol_field).ok_or(DecodeError::MissingField("symbol"))?;
        if symbol.trim().is_empty() {
            return Err(DecodeError::EmptySymbol);
        }

        let raw_price = v.get(&self.price_field).ok_or(DecodeError::MissingField("price"))?;
        let price = parse_str_f64(Some(raw_price))
            .filter(|p| p.is_finite())
            .ok_or_else(|| DecodeError::InvalidPrice(raw_price.to_string()))?;

        Ok(Tick::new(symbol, price, observed_at_us))
    }
}

impl Default for JsonTickDecoder {
    fn default() -> Self {
        Self::new("s", "p")
    }
}

impl TickDecoder for JsonTickDecoder {
    fn decode(&self, raw: &str) -> Result<Tick, DecodeError> {
        self.decode_at(raw, time_util::now_us())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_trade() {
        let json = r#"{"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"50000.10","q":"0.001","T":1672515782136,"m":true}"#;
        let tick = JsonTickDecoder::default().decode_at(json, 7).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert!((tick.price - 50000.10).abs() < 1e-9);
        assert_eq!(tick.observed_at_us, 7);
    }

    #[test]
    fn numeric_price_accepted() {
        let tick = JsonTickDecoder::default().decode(r#"{"s":"ETHUSDT","p":3000}"#).unwrap();
        assert_eq!(tick.price, 3000.0);
    }

    #[test]
    fn combined_stream_envelope() {
        let json = r#"{"stream":"btcusdt@trade","data":{"s":"BTCUSDT","p":"1.5"}}"#;
        let tick = JsonTickDecoder::default().decode(json).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
    }

    #[test]
    fn subscription_ack_is_missing_symbol() {
        let err = JsonTickDecoder::default().decode(r#"{"result":null,"id":1}"#).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("symbol"));
    }

    #[test]
    fn rejects_bad_payloads() {
        let d = JsonTickDecoder::default();
        assert!(matches!(d.decode("not json"), Err(DecodeError::Malformed(_))));
        assert_eq!(d.decode(r#"{"s":"","p":"1"}"#), Err(DecodeError::EmptySymbol));
        assert_eq!(d.decode(r#"{"s":"BTCUSDT"}"#), Err(DecodeError::MissingField("price")));
        assert!(matches!(d.decode(r#"{"s":"BTCUSDT","p":"abc"}"#), Err(DecodeError::InvalidPrice(_))));
        assert!(matches!(d.decode(r#"{"s":"BTCUSDT","p":"NaN"}"#), Err(DecodeError::InvalidPrice(_))));
        assert!(matches!(d.decode(r#"{"s":7,"p":"1"}"#), Err(DecodeError::MissingField("symbol"))));
    }

    #[test]
    fn custom_fields() {
        let d = JsonTickDecoder::new("symbol", "last");
        let tick = d.decode(r#"{"symbol":"SOLUSDT","last":"150.25"}"#).unwrap();
        assert_eq!(tick.symbol, "SOLUSDT");
        assert_eq!(tick.price, 150.25);
    }
}
