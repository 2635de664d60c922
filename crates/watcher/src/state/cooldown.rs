use std::collections::BTreeMap;

/// Alert key -> epoch seconds of the last alert under that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownLedger {
    last_alert: BTreeMap<String, i64>,
}

impl CooldownLedger {
    pub fn ready(&self, key: &str, now: i64, cooldown_seconds: i64) -> bool {
        self.last_alert
            .get(key)
            .is_none_or(|last| now - last >= cooldown_seconds)
    }

    pub fn mark(&mut self, key: &str, now: i64) {
        self.last_alert.insert(key.to_string(), now);
    }

    pub fn prune(&mut self, cutoff: i64) {
        self.last_alert.retain(|_, ts| *ts >= cutoff);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.last_alert.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.last_alert.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alert.is_empty()
    }
}

impl FromIterator<(String, i64)> for CooldownLedger {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self {
            last_alert: iter.into_iter().collect(),
        }
    }
}
