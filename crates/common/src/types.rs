use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[default]
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Trade from Data API /trades, exactly as the API shaped it.
///
/// Every field is optional and numeric fields accept numbers or numeric strings;
/// anything else deserializes to `None` instead of failing the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTrade {
    /// Filled by [`ApiTrade::from_value`] from the raw item before typed parsing.
    #[serde(skip)]
    pub trade_id: String,
    #[serde(rename = "proxyWallet", default, deserialize_with = "de_lenient_string")]
    pub proxy_wallet: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub side: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub asset: Option<String>,
    #[serde(rename = "conditionId", default, deserialize_with = "de_lenient_string")]
    pub condition_id: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub slug: Option<String>,
    #[serde(rename = "eventSlug", default, deserialize_with = "de_lenient_string")]
    pub event_slug: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub outcome: Option<String>,
    #[serde(rename = "outcomeIndex", default, deserialize_with = "de_lenient_i64")]
    pub outcome_index: Option<i64>,
    #[serde(
        rename = "transactionHash",
        default,
        deserialize_with = "de_lenient_string"
    )]
    pub transaction_hash: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub pseudonym: Option<String>,
}

/// Market from Gamma API /markets.
///
/// `outcomes` and `outcomePrices` arrive as JSON-encoded strings on most
/// responses and as plain arrays on some; both are kept as raw values here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "conditionId", default, deserialize_with = "de_lenient_string")]
    pub condition_id: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub slug: Option<String>,
    #[serde(rename = "liquidityNum", default, deserialize_with = "de_lenient_f64")]
    pub liquidity_num: Option<f64>,
    #[serde(rename = "volume24hr", default, deserialize_with = "de_lenient_f64")]
    pub volume_24hr: Option<f64>,
    #[serde(default)]
    pub outcomes: Option<serde_json::Value>,
    #[serde(rename = "outcomePrices", default)]
    pub outcome_prices: Option<serde_json::Value>,
}

/// A single observed trade. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub proxy_wallet: String,
    pub side: Side,
    pub asset: String,
    pub condition_id: String,
    pub size: f64,
    pub price: f64,
    pub timestamp: i64,
    pub title: String,
    pub slug: String,
    pub event_slug: String,
    pub outcome: String,
    pub outcome_index: Option<i64>,
    pub transaction_hash: String,
    pub name: Option<String>,
    pub pseudonym: Option<String>,
}

impl Trade {
    /// Dollar exposure proxy: size x price, never negative.
    pub fn notional(&self) -> f64 {
        let n = self.size * self.price;
        if n.is_finite() {
            n.max(0.0)
        } else {
            0.0
        }
    }

    /// Name to show for the wallet: pseudonym, then display name, then address.
    pub fn display_ident(&self) -> &str {
        self.pseudonym
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.proxy_wallet)
    }
}

/// Fields hashed into the trade id, in order.
const TRADE_ID_FIELDS: [&str; 6] = [
    "transactionHash",
    "asset",
    "outcomeIndex",
    "side",
    "proxyWallet",
    "timestamp",
];

/// Text of a raw field as it is hashed into the trade id. A missing key is
/// empty and `null` is `None`, so ids match state written by earlier watchers.
fn id_text(v: Option<&serde_json::Value>) -> String {
    match v {
        None => String::new(),
        Some(serde_json::Value::Null) => "None".to_string(),
        Some(serde_json::Value::Bool(true)) => "True".to_string(),
        Some(serde_json::Value::Bool(false)) => "False".to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Content-derived id that is identical every time the same fill is refetched.
/// Hashes the upstream text of each field, not its parsed value.
pub fn stable_trade_id(item: &serde_json::Map<String, serde_json::Value>) -> String {
    let joined = TRADE_ID_FIELDS
        .iter()
        .map(|key| id_text(item.get(*key)))
        .collect::<Vec<_>>()
        .join("|");
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Outcome indexes below zero mean "unknown" upstream and in older state.
pub fn known_outcome(outcome_index: Option<i64>) -> Option<i64> {
    outcome_index.filter(|i| *i >= 0)
}

impl ApiTrade {
    /// Parse one `/trades` item. Non-objects yield `None`.
    pub fn from_value(item: serde_json::Value) -> Option<Self> {
        let trade_id = stable_trade_id(item.as_object()?);
        let mut api: Self = serde_json::from_value(item).ok()?;
        api.trade_id = trade_id;
        Some(api)
    }
}

impl From<ApiTrade> for Trade {
    fn from(t: ApiTrade) -> Self {
        Self {
            trade_id: t.trade_id,
            proxy_wallet: t.proxy_wallet.unwrap_or_default(),
            side: t
                .side
                .as_deref()
                .and_then(Side::from_str_loose)
                .unwrap_or_default(),
            asset: t.asset.unwrap_or_default(),
            condition_id: t.condition_id.unwrap_or_default(),
            size: t.size.filter(|s| s.is_finite()).unwrap_or(0.0).max(0.0),
            price: t.price.filter(|p| p.is_finite()).unwrap_or(0.0),
            timestamp: t.timestamp.unwrap_or(0),
            title: t.title.unwrap_or_default(),
            slug: t.slug.unwrap_or_default(),
            event_slug: t.event_slug.unwrap_or_default(),
            outcome: t.outcome.unwrap_or_default(),
            outcome_index: known_outcome(t.outcome_index),
            transaction_hash: t.transaction_hash.unwrap_or_default(),
            name: t.name.filter(|s| !s.is_empty()),
            pseudonym: t.pseudonym.filter(|s| !s.is_empty()),
        }
    }
}

/// Cached market snapshot. Identity is `condition_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub liquidity_num: Option<f64>,
    pub volume24hr: Option<f64>,
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<f64>,
}

impl Market {
    pub fn from_gamma(m: GammaMarket, requested_condition_id: &str) -> Self {
        Self {
            condition_id: m
                .condition_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| requested_condition_id.to_string()),
            question: m.question.unwrap_or_default(),
            slug: m.slug.unwrap_or_default(),
            liquidity_num: non_negative(m.liquidity_num),
            volume24hr: non_negative(m.volume_24hr),
            outcomes: decode_list(m.outcomes.as_ref())
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            outcome_prices: decode_list(m.outcome_prices.as_ref())
                .iter()
                .filter_map(value_as_f64)
                .collect(),
        }
    }
}

fn non_negative(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x >= 0.0)
}

/// Accepts either a JSON array or a string holding a JSON array.
fn decode_list(raw: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    match raw {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(serde_json::Value::String(s)) => {
            serde_json::from_str::<Vec<serde_json::Value>>(s).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Numeric view of a JSON value: numbers as-is, numeric strings parsed.
pub fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    let x = match v {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    x.is_finite().then_some(x)
}

/// Integer view of a JSON value. Floats with no fractional part are accepted.
pub fn value_as_i64(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(value_as_f64))
}

fn de_lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(v.as_ref().and_then(value_as_i64))
}

fn de_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
