use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (verifications)");
        conn.execute_batch(
            "
            CREATE TABLE verifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id       INTEGER NOT NULL,
                sender_type     TEXT NOT NULL,
                recipient_id    INTEGER NOT NULL,
                recipient_type  TEXT NOT NULL,
                message         TEXT,
                status          TEXT NOT NULL DEFAULT 'pending'
                                CHECK (status IN ('pending', 'accepted', 'denied', 'blocked')),
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_verifications_sender
                ON verifications(sender_type, sender_id, status);

            CREATE INDEX idx_verifications_recipient
                ON verifications(recipient_type, recipient_id, status);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (verification groups)");
        conn.execute_batch(
            "
            ALTER TABLE verifications ADD COLUMN group_slug TEXT;

            CREATE TABLE verification_groups (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                verification_id INTEGER NOT NULL REFERENCES verifications(id) ON DELETE CASCADE,
                group_id        INTEGER NOT NULL,
                verifier_id     INTEGER NOT NULL,
                verifier_type   TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(verification_id, group_id, verifier_id, verifier_type)
            );

            CREATE INDEX idx_verification_groups_group
                ON verification_groups(group_id, verification_id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
