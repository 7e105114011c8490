// src/services/instruments.rs
use crate::models::Instrument;

/// Fixed, ordered set of tracked indices. Iteration order is the batch order.
#[derive(Debug, Clone)]
pub struct InstrumentRegistry {
    instruments: Vec<Instrument>,
}

impl InstrumentRegistry {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self { instruments }
    }

    /// The four mainland indices the service tracks by default.
    pub fn default_indices() -> Self {
        let entry = |code: &str, name: &str, symbol: &str, market: &str| Instrument {
            code: code.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            market: market.to_string(),
        };

        Self::new(vec![
            entry("sh000001", "SSE Composite", "000001.SS", "Shanghai Stock Exchange"),
            entry("sz399001", "SZSE Component", "399001.SZ", "Shenzhen Stock Exchange"),
            entry("sz399006", "ChiNext", "399006.SZ", "Shenzhen Stock Exchange"),
            entry("sh000688", "STAR 50", "000688.SS", "Shanghai Stock Exchange"),
        ])
    }

    pub fn get(&self, code: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
