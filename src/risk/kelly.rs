/// Win/loss statistics over recent closed trades
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeStats {
    pub trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64, // positive magnitude
}

impl TradeStats {
    /// Build from realized P&L values; zero counts as a loss-free scratch
    pub fn from_pnls(pnls: &[f64]) -> Self {
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).map(f64::abs).collect();

        let mean = |xs: &[f64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<f64>() / xs.len() as f64
            }
        };

        Self {
            trades: pnls.len(),
            win_rate: if pnls.is_empty() {
                0.0
            } else {
                wins.len() as f64 / pnls.len() as f64
            },
            avg_win: mean(&wins),
            avg_loss: mean(&losses),
        }
    }

    /// Full Kelly fraction `W - (1 - W) / R` with `R = avg_win / avg_loss`
    ///
    /// Zero or negative means there is no edge to size into.
    pub fn kelly(&self) -> f64 {
        if self.trades == 0 {
            return 0.0;
        }
        if self.avg_win <= 0.0 {
            return -1.0;
        }
        if self.avg_loss <= 0.0 {
            return self.win_rate;
        }
        let payoff = self.avg_win / self.avg_loss;
        self.win_rate - (1.0 - self.win_rate) / payoff
    }
}
