use anyhow::Result;
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        // busy_timeout via the rusqlite API: SQLite retries for up to 30s when a
        // second watcher process holds the write lock.
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        migrate_wallets_trades_total(&self.conn).map_err(anyhow::Error::from)?;
        migrate_market_events_direction_columns(&self.conn).map_err(anyhow::Error::from)?;
        Ok(())
    }
}

fn has_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> std::result::Result<bool, rusqlite::Error> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name=?2",
        rusqlite::params![table, column],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// Early databases only derived the lifetime trade count from retained events.
fn migrate_wallets_trades_total(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    if !has_column(conn, "wallets", "trades_total")? {
        conn.execute(
            "ALTER TABLE wallets ADD COLUMN trades_total INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

/// Add outcome/side to market events (older rows stay NULL = unknown).
fn migrate_market_events_direction_columns(
    conn: &Connection,
) -> std::result::Result<(), rusqlite::Error> {
    if !has_column(conn, "market_events", "outcome_index")? {
        conn.execute("ALTER TABLE market_events ADD COLUMN outcome_index INTEGER", [])?;
    }
    if !has_column(conn, "market_events", "side")? {
        conn.execute("ALTER TABLE market_events ADD COLUMN side TEXT", [])?;
    }
    Ok(())
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS wallets (
    address        TEXT PRIMARY KEY,
    first_seen_ts  INTEGER,
    last_seen_ts   INTEGER
);

CREATE TABLE IF NOT EXISTS wallet_events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    address   TEXT NOT NULL,
    ts        INTEGER NOT NULL,
    market_id TEXT NOT NULL,
    notional  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_wallet_events_address ON wallet_events(address, id);

CREATE TABLE IF NOT EXISTS wallet_markets (
    address   TEXT NOT NULL,
    position  INTEGER NOT NULL,
    market_id TEXT NOT NULL,
    PRIMARY KEY (address, market_id)
);

CREATE TABLE IF NOT EXISTS markets (
    condition_id        TEXT PRIMARY KEY,
    question            TEXT NOT NULL,
    slug                TEXT NOT NULL,
    liquidity_num       REAL,
    volume24hr          REAL,
    outcomes_json       TEXT NOT NULL,
    outcome_prices_json TEXT NOT NULL,
    updated_ts          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS market_events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id TEXT NOT NULL,
    ts        INTEGER NOT NULL,
    wallet    TEXT NOT NULL,
    price     REAL NOT NULL,
    notional  REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_market_events_market ON market_events(market_id, id);

CREATE TABLE IF NOT EXISTS seen_trades (
    seq      INTEGER PRIMARY KEY,
    trade_id TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS alert_cooldowns (
    alert_key     TEXT PRIMARY KEY,
    last_alert_ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS state_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(db: &Database, table: &str) -> Vec<String> {
        db.conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .unwrap()
            .query_map([table], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();

        let tables: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();

        for name in [
            "wallets",
            "wallet_events",
            "wallet_markets",
            "markets",
            "market_events",
            "seen_trades",
            "alert_cooldowns",
            "state_meta",
        ] {
            assert!(
                tables.contains(&name.to_string()),
                "missing table {name}; got {tables:?}"
            );
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap(); // second call must not fail
    }

    #[test]
    fn test_migrations_add_columns_to_old_tables() {
        let db = Database::open(":memory:").unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE wallets (address TEXT PRIMARY KEY, first_seen_ts INTEGER, last_seen_ts INTEGER);
                 CREATE TABLE market_events (id INTEGER PRIMARY KEY AUTOINCREMENT, market_id TEXT NOT NULL,
                     ts INTEGER NOT NULL, wallet TEXT NOT NULL, price REAL NOT NULL, notional REAL NOT NULL);
                 INSERT INTO market_events (market_id, ts, wallet, price, notional) VALUES ('m', 1, 'w', 0.5, 100.0);",
            )
            .unwrap();
        db.run_migrations().unwrap();

        assert!(columns(&db, "wallets").contains(&"trades_total".to_string()));
        let cols = columns(&db, "market_events");
        assert!(cols.contains(&"outcome_index".to_string()));
        assert!(cols.contains(&"side".to_string()));

        let (outcome, side): (Option<i64>, Option<String>) = db
            .conn
            .query_row("SELECT outcome_index, side FROM market_events", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(side, None);
    }
}
