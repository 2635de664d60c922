use common::types::Trade;
use std::collections::BTreeSet;

/// Newest trade timestamp fetched so far plus the ids seen at exactly that second.
///
/// Lets a pass recognise boundary trades it already fetched even after their ids
/// have been evicted from the seen set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchCheckpoint {
    last_ts: Option<i64>,
    ids_at_last_ts: BTreeSet<String>,
}

impl FetchCheckpoint {
    pub fn new(last_ts: Option<i64>, ids_at_last_ts: BTreeSet<String>) -> Self {
        Self {
            last_ts,
            ids_at_last_ts,
        }
    }

    pub fn last_ts(&self) -> Option<i64> {
        self.last_ts
    }

    pub fn ids_at_last_ts(&self) -> &BTreeSet<String> {
        &self.ids_at_last_ts
    }

    pub fn already_fetched(&self, trade: &Trade) -> bool {
        match self.last_ts {
            Some(last) if trade.timestamp < last => true,
            Some(last) if trade.timestamp == last => self.ids_at_last_ts.contains(&trade.trade_id),
            _ => false,
        }
    }

    /// Move the checkpoint forward to the newest trade in `fetched`.
    pub fn advance(&mut self, fetched: &[Trade]) {
        let Some(max_ts) = fetched.iter().map(|t| t.timestamp).max() else {
            return;
        };
        let at_max = fetched
            .iter()
            .filter(|t| t.timestamp == max_ts)
            .map(|t| t.trade_id.clone());
        let previous = self.last_ts;
        match previous {
            Some(last) if max_ts < last => {}
            Some(last) if max_ts == last => self.ids_at_last_ts.extend(at_max),
            _ => {
                self.last_ts = Some(max_ts);
                self.ids_at_last_ts = at_max.collect();
            }
        }
    }
}
