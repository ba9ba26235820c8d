// Append-only trade log and equity snapshots
//
// One JSON object per line in `trades.jsonl` / `equity.jsonl`, so the files
// survive partial writes and load straight into a spreadsheet or dataframe.
// Memory holds only the most recent records; the files are the full history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::models::{Position, Side};
use crate::Result;

const TRADES_FILE: &str = "trades.jsonl";
const EQUITY_FILE: &str = "equity.jsonl";
const DEFAULT_RETAIN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeEvent {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub event: TradeEvent,
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
}

impl TradeRecord {
    pub fn opened(position: &Position) -> Self {
        Self {
            event: TradeEvent::Open,
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            side: position.side,
            volume: position.volume,
            entry_price: position.entry_price,
            exit_price: None,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            opened_at: position.opened_at,
            closed_at: None,
            realized_pnl: None,
        }
    }

    /// Close record from the last observation of a position
    pub fn closed(position: &Position, closed_at: DateTime<Utc>) -> Self {
        Self {
            event: TradeEvent::Close,
            exit_price: Some(position.current_price),
            closed_at: Some(closed_at),
            realized_pnl: Some(position.profit),
            ..Self::opened(position)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub equity: f64,
    pub open_positions: usize,
}

pub struct TradeJournal {
    dir: Option<PathBuf>,
    retain: usize,
    trades: VecDeque<TradeRecord>,
    equity: VecDeque<EquitySnapshot>,
}

impl TradeJournal {
    /// Journal backed by `dir`; the newest existing records are loaded
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_retention(dir, DEFAULT_RETAIN)
    }

    pub fn open_with_retention(dir: impl AsRef<Path>, retain: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let retain = retain.max(1);

        let trades = read_lines(&dir.join(TRADES_FILE), retain)?;
        let equity = read_lines(&dir.join(EQUITY_FILE), retain)?;

        tracing::info!(
            "📒 Journal at {} ({} trade records, {} equity snapshots in memory)",
            dir.display(),
            trades.len(),
            equity.len()
        );

        Ok(Self {
            dir: Some(dir),
            retain,
            trades,
            equity,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            dir: None,
            retain: DEFAULT_RETAIN,
            trades: VecDeque::new(),
            equity: VecDeque::new(),
        }
    }

    /// Cap on records of each kind held in memory
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        trim(&mut self.trades, self.retain);
        trim(&mut self.equity, self.retain);
        self
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let json = serde_json::to_string(record)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(file))?;
        writeln!(handle, "{json}")?;
        handle.flush()?;
        Ok(())
    }

    pub fn record_trade(&mut self, record: TradeRecord) -> Result<()> {
        self.append(TRADES_FILE, &record)?;
        self.trades.push_back(record);
        trim(&mut self.trades, self.retain);
        Ok(())
    }

    pub fn record_equity(&mut self, snapshot: EquitySnapshot) -> Result<()> {
        self.append(EQUITY_FILE, &snapshot)?;
        self.equity.push_back(snapshot);
        trim(&mut self.equity, self.retain);
        Ok(())
    }

    /// Most recent trade records, oldest first
    pub fn trades(&self) -> &VecDeque<TradeRecord> {
        &self.trades
    }

    pub fn equity(&self) -> &VecDeque<EquitySnapshot> {
        &self.equity
    }

    /// Realized P&L of the last `n` closed trades, oldest first
    pub fn recent_pnls(&self, n: usize) -> Vec<f64> {
        let mut pnls: Vec<f64> = self
            .trades
            .iter()
            .rev()
            .filter(|t| t.event == TradeEvent::Close)
            .filter_map(|t| t.realized_pnl)
            .take(n)
            .collect();
        pnls.reverse();
        pnls
    }
}

fn trim<T>(records: &mut VecDeque<T>, retain: usize) {
    while records.len() > retain {
        records.pop_front();
    }
}

/// Read the last `retain` records of a JSONL file, skipping malformed lines
fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path, retain: usize) -> Result<VecDeque<T>> {
    if !path.exists() {
        return Ok(VecDeque::new());
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = VecDeque::with_capacity(retain.min(DEFAULT_RETAIN));
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => {
                records.push_back(record);
                trim(&mut records, retain);
            }
            Err(e) => tracing::warn!("Skipping malformed line {} in {}: {}", n + 1, path.display(), e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn position(ticket: u64, profit: f64) -> Position {
        Position {
            ticket,
            symbol: "EUR/USD".to_string(),
            side: Side::Buy,
            volume: 0.1,
            entry_price: 1.1,
            stop_loss: 1.09,
            take_profit: 1.12,
            current_price: 1.1 + profit / 10_000.0,
            profit,
            opened_at: Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let closed_at = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();

        {
            let mut journal = TradeJournal::open(dir.path()).unwrap();
            journal.record_trade(TradeRecord::opened(&position(1, 0.0))).unwrap();
            journal.record_trade(TradeRecord::closed(&position(1, 25.0), closed_at)).unwrap();
            journal
                .record_equity(EquitySnapshot {
                    timestamp: closed_at,
                    balance: 10_025.0,
                    equity: 10_025.0,
                    open_positions: 0,
                })
                .unwrap();
        }

        let journal = TradeJournal::open(dir.path()).unwrap();
        assert_eq!(journal.trades().len(), 2);
        assert_eq!(journal.trades()[1].realized_pnl, Some(25.0));
        assert_eq!(journal.trades()[1].closed_at, Some(closed_at));
        assert_eq!(journal.equity().len(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = TradeJournal::open(dir.path()).unwrap();
        journal.record_trade(TradeRecord::opened(&position(7, 0.0))).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(TRADES_FILE))
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        let reopened = TradeJournal::open(dir.path()).unwrap();
        assert_eq!(reopened.trades().len(), 1);
    }

    #[test]
    fn test_recent_pnls_only_closed_trades() {
        let mut journal = TradeJournal::in_memory();
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();
        for (ticket, pnl) in [(1, 10.0), (2, -5.0), (3, 7.5)] {
            journal.record_trade(TradeRecord::opened(&position(ticket, 0.0))).unwrap();
            journal.record_trade(TradeRecord::closed(&position(ticket, pnl), at)).unwrap();
        }

        assert_eq!(journal.recent_pnls(2), vec![-5.0, 7.5]);
        assert_eq!(journal.recent_pnls(10).len(), 3);
    }

    #[test]
    fn test_memory_keeps_newest_records_files_keep_all() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 14, 0, 0).unwrap();
        let mut journal = TradeJournal::open_with_retention(dir.path(), 4).unwrap();

        for ticket in 1..=5 {
            journal.record_trade(TradeRecord::opened(&position(ticket, 0.0))).unwrap();
            journal
                .record_trade(TradeRecord::closed(&position(ticket, ticket as f64), at))
                .unwrap();
        }

        assert_eq!(journal.trades().len(), 4);
        assert_eq!(journal.trades()[0].ticket, 4);
        assert_eq!(journal.recent_pnls(10), vec![4.0, 5.0]);

        let contents = fs::read_to_string(dir.path().join(TRADES_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 10);

        let reopened = TradeJournal::open_with_retention(dir.path(), 3).unwrap();
        assert_eq!(reopened.trades().len(), 3);
        assert_eq!(reopened.trades().back().unwrap().ticket, 5);
    }
}
