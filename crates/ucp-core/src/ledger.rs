//! Token ledger
//!
//! Running accumulator of language-model usage for one run. Only
//! token-metering capabilities write to it; everything else reads
//! snapshots.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenLedger {
    input_tokens: u64,
    output_tokens: u64,
    calls: u64,
    saved_tokens: u64,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed language-model call
    pub fn record_call(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.calls = self.calls.saturating_add(1);
    }

    /// Record a call served from the intra-run cache
    ///
    /// Does not count as a call; `saved` is the original call's input plus
    /// output tokens.
    pub fn record_cache_hit(&mut self, saved: u64) {
        self.saved_tokens = self.saved_tokens.saturating_add(saved);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let total_tokens = self.input_tokens.saturating_add(self.output_tokens);
        LedgerSnapshot {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens,
            calls: self.calls,
            saved_tokens: self.saved_tokens,
            efficiency_percent: efficiency_percent(total_tokens, self.saved_tokens),
        }
    }
}

/// `saved / (total + saved) * 100`, rounded to two decimals; 0 when idle
fn efficiency_percent(total_tokens: u64, saved_tokens: u64) -> f64 {
    let denominator = total_tokens.saturating_add(saved_tokens);
    if denominator == 0 {
        return 0.0;
    }
    let raw = saved_tokens as f64 / denominator as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Point-in-time view of a `TokenLedger`, embedded in receipts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
    pub saved_tokens: u64,
    pub efficiency_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ledger() {
        let snapshot = TokenLedger::new().snapshot();
        assert_eq!(snapshot.total_tokens, 0);
        assert_eq!(snapshot.calls, 0);
        assert_eq!(snapshot.efficiency_percent, 0.0);
    }

    #[test]
    fn test_record_call_accumulates() {
        let mut ledger = TokenLedger::new();
        ledger.record_call(100, 40);
        ledger.record_call(10, 5);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.input_tokens, 110);
        assert_eq!(snapshot.output_tokens, 45);
        assert_eq!(snapshot.total_tokens, 155);
        assert_eq!(snapshot.calls, 2);
    }

    #[test]
    fn test_efficiency_with_cache_hits() {
        let mut ledger = TokenLedger::new();
        ledger.record_call(60, 40);
        ledger.record_cache_hit(100);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.calls, 1);
        assert_eq!(snapshot.saved_tokens, 100);
        assert_eq!(snapshot.efficiency_percent, 50.0);
    }

    #[test]
    fn test_efficiency_rounding() {
        assert_eq!(efficiency_percent(2, 1), 33.33);
    }
}
