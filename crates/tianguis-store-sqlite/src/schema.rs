//! SQL schema for the Tianguis SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! the `PRAGMA user_version` number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS runs (
    run_id      TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    product_id    INTEGER PRIMARY KEY,
    brand         TEXT NOT NULL,
    model         TEXT NOT NULL,
    color_variant TEXT,
    ram_variant   TEXT,
    rom_variant   TEXT,
    variant_rank  INTEGER,
    os            TEXT,
    condition     TEXT NOT NULL DEFAULT 'new',  -- 'new' | 'used'
    search_query  TEXT NOT NULL,
    is_active     INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS retailers (
    retailer_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    retailer_name TEXT NOT NULL UNIQUE,
    tier          TEXT NOT NULL,   -- 'VERIFIED' | 'ACTIVE' | 'SUSPICIOUS' | 'UNKNOWN'
    created_at    TEXT NOT NULL
);

-- Observations are never deleted. The validator writes classification, the
-- scorer writes the hot fields; no other column is ever updated.
CREATE TABLE IF NOT EXISTS prices (
    price_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id         TEXT NOT NULL REFERENCES runs(run_id),
    product_id     INTEGER,
    retailer_id    INTEGER,
    price          REAL,
    currency       TEXT NOT NULL,
    classification TEXT NOT NULL DEFAULT 'unclassified',
    is_hot         INTEGER NOT NULL DEFAULT 0,
    hotness_score  REAL,
    source_url     TEXT,
    recorded_at    TEXT NOT NULL
);

-- Rebuilt from scratch every reconcile cycle; only ever holds one run.
CREATE TABLE IF NOT EXISTS projection (
    price_id      INTEGER PRIMARY KEY,
    run_id        TEXT NOT NULL,
    product_id    INTEGER NOT NULL,
    retailer_id   INTEGER NOT NULL,
    price         REAL NOT NULL,
    product_url   TEXT,
    is_hot        INTEGER NOT NULL DEFAULT 0,
    hotness_score REAL,
    brand         TEXT NOT NULL,
    model         TEXT NOT NULL,
    color_variant TEXT,
    ram_variant   TEXT,
    rom_variant   TEXT,
    variant_rank  INTEGER,
    os            TEXT,
    retailer_name TEXT NOT NULL,
    UNIQUE (run_id, product_id, retailer_id, price)
);

CREATE INDEX IF NOT EXISTS prices_run_idx       ON prices(run_id, price_id);
CREATE INDEX IF NOT EXISTS prices_class_idx     ON prices(run_id, classification);
CREATE INDEX IF NOT EXISTS prices_scan_idx      ON prices(run_id, product_id, retailer_id, price, price_id);
CREATE INDEX IF NOT EXISTS projection_run_idx   ON projection(run_id);

PRAGMA user_version = 1;
";
