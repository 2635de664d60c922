use common::db::Database;

#[test]
fn file_backed_database_uses_wal_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let path = path.to_str().unwrap();

    {
        let db = Database::open(path).unwrap();
        db.run_migrations().unwrap();
        let mode: String = db
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        db.conn
            .execute(
                "INSERT INTO alert_cooldowns (alert_key, last_alert_ts) VALUES ('0xw:0xm', 1700000000)",
                [],
            )
            .unwrap();
    }

    let db = Database::open(path).unwrap();
    db.run_migrations().unwrap();
    let ts: i64 = db
        .conn
        .query_row(
            "SELECT last_alert_ts FROM alert_cooldowns WHERE alert_key = '0xw:0xm'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(ts, 1_700_000_000);
}
