use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set of processed trade ids, capped by evicting the oldest.
#[derive(Debug, Clone)]
pub struct SeenTradeSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    cap: usize,
}

impl SeenTradeSet {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Rebuild from persisted ids (oldest first). Duplicates are ignored and
    /// only the newest `cap` ids survive.
    pub fn from_ids<I>(ids: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = Self::new(cap);
        for id in ids {
            set.insert(id);
        }
        set
    }

    pub fn contains(&self, trade_id: &str) -> bool {
        self.ids.contains(trade_id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, trade_id: String) -> bool {
        if self.ids.contains(&trade_id) {
            return false;
        }
        self.ids.insert(trade_id.clone());
        self.order.push_back(trade_id);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
