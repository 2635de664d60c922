//! Deduplication and cooldown gate.

use crate::scoring::market_rubric::EventType;
use crate::state::WatchState;
use common::types::Trade;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First time this trade id is processed.
    New,
    /// Id already in the seen set.
    Seen,
    /// At or behind the fetch checkpoint; the seen set is left untouched.
    AlreadyFetched,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Seen => "seen",
            Self::AlreadyFetched => "already_fetched",
        }
    }
}

/// Decide whether `trade` gets processed, inserting its id into the seen set
/// when it does.
pub fn admit(state: &mut WatchState, trade: &Trade) -> Admission {
    if state.checkpoint().already_fetched(trade) {
        return Admission::AlreadyFetched;
    }
    if state.seen().contains(&trade.trade_id) {
        return Admission::Seen;
    }
    state.seen_mut().insert(trade.trade_id.clone());
    Admission::New
}

pub fn trade_key(trade: &Trade) -> String {
    format!("{}:{}", trade.proxy_wallet, trade.condition_id)
}

pub fn market_key(event_type: EventType, condition_id: &str) -> String {
    format!("{}:{condition_id}", event_type.as_str())
}

/// Fire under `key` if its cooldown has elapsed; firing records `now`.
pub fn try_fire(state: &mut WatchState, key: &str, now: i64, cooldown_seconds: i64) -> bool {
    if !state.cooldowns().ready(key, now, cooldown_seconds) {
        return false;
    }
    state.cooldowns_mut().mark(key, now);
    true
}
