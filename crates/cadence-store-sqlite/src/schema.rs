//! SQL schema for the Cadence SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Series are never deleted; cancelled and completed are terminal states.
CREATE TABLE IF NOT EXISTS series (
    series_id             TEXT PRIMARY KEY,
    customer_id           TEXT NOT NULL,
    staff_id              TEXT NOT NULL,
    service_id            TEXT NOT NULL,
    starts_at             TEXT NOT NULL,   -- local wall-clock, no offset
    timezone              TEXT NOT NULL,
    duration_minutes      INTEGER NOT NULL,
    deposit_minor         INTEGER NOT NULL,
    payment_json          TEXT NOT NULL,
    pattern_json          TEXT NOT NULL,
    state                 TEXT NOT NULL,   -- 'active' | 'paused' | 'completed' | 'cancelled'
    -- Counters only ever change through in-place increments.
    completed_count       INTEGER NOT NULL DEFAULT 0,
    skipped_count         INTEGER NOT NULL DEFAULT 0,
    cancelled_count       INTEGER NOT NULL DEFAULT 0,
    planned_count         INTEGER,
    last_materialized_seq INTEGER NOT NULL DEFAULT 0,
    exhausted             INTEGER NOT NULL DEFAULT 0,
    next_occurrence_at    TEXT,
    notes                 TEXT,
    tags                  TEXT NOT NULL DEFAULT '[]',
    revision              INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS occurrences (
    occurrence_id       TEXT PRIMARY KEY,
    series_id           TEXT NOT NULL REFERENCES series(series_id),
    sequence            INTEGER NOT NULL,
    scheduled_at        TEXT NOT NULL,
    actual_at           TEXT,
    state               TEXT NOT NULL,
    amount_minor        INTEGER NOT NULL,
    payment_status      TEXT NOT NULL,
    payment_reference   TEXT,
    staff_override      TEXT,
    conflict            INTEGER NOT NULL DEFAULT 0,
    conflicting_booking TEXT,
    reschedule_count    INTEGER NOT NULL DEFAULT 0,
    reminder_sent_at    TEXT,
    transition_count    INTEGER NOT NULL DEFAULT 0,
    revision            INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    UNIQUE (series_id, sequence)
);

-- Strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS occurrence_transitions (
    occurrence_id  TEXT NOT NULL REFERENCES occurrences(occurrence_id),
    transition_seq INTEGER NOT NULL,
    from_state     TEXT,
    to_state       TEXT NOT NULL,
    actor          TEXT NOT NULL,   -- JSON-encoded Actor
    at             TEXT NOT NULL,
    note           TEXT,
    PRIMARY KEY (occurrence_id, transition_seq)
);

CREATE TABLE IF NOT EXISTS payment_outbox (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    target_kind  TEXT NOT NULL,   -- 'series' | 'occurrence'
    target_id    TEXT NOT NULL,
    amount_minor INTEGER NOT NULL,
    currency     TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS series_state_idx        ON series(state);
CREATE INDEX IF NOT EXISTS occurrences_series_idx  ON occurrences(series_id);
CREATE INDEX IF NOT EXISTS occurrences_start_idx   ON occurrences(scheduled_at);
CREATE INDEX IF NOT EXISTS occurrences_staff_idx   ON occurrences(staff_override);
CREATE INDEX IF NOT EXISTS outbox_status_idx       ON payment_outbox(status);

PRAGMA user_version = 1;
";
