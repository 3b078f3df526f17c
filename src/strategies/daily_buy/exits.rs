//! Exit rules: protective stop / liquidation margin and the exit confirmation gate

/// Prefix of the exit reason raised by the protective stop
pub const PROTECTIVE_STOP_PREFIX: &str = "custom_stop_loss_";

/// Exit is forced once price comes within this multiple of liquidation
pub const LIQUIDATION_MARGIN: f64 = 1.1;

/// Protective exit reason when `rate` is at or below the stop or within the
/// liquidation margin, `None` otherwise
pub fn protective_exit(stop: f64, liquidation_price: Option<f64>, rate: f64) -> Option<String> {
    let below_stop = rate <= stop;
    let near_liquidation = liquidation_price
        .map(|liq| rate <= liq * LIQUIDATION_MARGIN)
        .unwrap_or(false);

    if below_stop || near_liquidation {
        Some(format!("{}{}", PROTECTIVE_STOP_PREFIX, stop))
    } else {
        None
    }
}

/// Family of a proposed exit reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Forced or manually triggered by the operator
    Forced,
    /// The strategy's exit signal
    Technical,
    TrailingOrRoi,
    Other,
}

impl ExitKind {
    pub fn classify(reason: &str, technical_tag: &str) -> Self {
        if reason.contains("force") || reason.contains("trigger") {
            ExitKind::Forced
        } else if reason.contains(technical_tag) {
            ExitKind::Technical
        } else if reason.contains("trailing") || reason.contains("roi") {
            ExitKind::TrailingOrRoi
        } else {
            ExitKind::Other
        }
    }

    /// Whether an exit of this kind at `profit_ratio` goes through
    pub fn allows(self, profit_ratio: f64, min_profit: f64) -> bool {
        match self {
            ExitKind::Forced => true,
            ExitKind::Technical | ExitKind::TrailingOrRoi => profit_ratio >= min_profit,
            ExitKind::Other => false,
        }
    }
}
