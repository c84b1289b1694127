//! SQL schema for the roster SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per identity and axis, so deny and allow can never coexist.
CREATE TABLE IF NOT EXISTS rules (
    uid          INTEGER NOT NULL,
    axis         TEXT NOT NULL,   -- 'weekday' | 'date' | 'time_of_day'
    mode         TEXT NOT NULL,   -- 'deny' | 'allow'
    values_json  TEXT NOT NULL,   -- JSON array in the axis's value shape
    updated_at   TEXT NOT NULL,   -- ISO 8601 UTC
    PRIMARY KEY (uid, axis)
);

-- Saved directory records of identities removed from the terminal.
CREATE TABLE IF NOT EXISTS snapshots (
    uid          INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    privilege    INTEGER NOT NULL,
    password     TEXT NOT NULL,
    group_id     TEXT NOT NULL,   -- '' means no group
    user_id      TEXT NOT NULL,
    card         INTEGER NOT NULL,
    tag          TEXT NOT NULL,   -- 'manual' | 'rule_driven'
    captured_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS punches (
    uid        INTEGER NOT NULL,
    timestamp  TEXT NOT NULL,     -- 'YYYY-MM-DD HH:MM:SS', terminal-local
    kind       INTEGER NOT NULL,
    status     INTEGER NOT NULL,
    PRIMARY KEY (uid, timestamp)
);

CREATE INDEX IF NOT EXISTS punches_timestamp_idx ON punches(timestamp);

PRAGMA user_version = 1;
";
