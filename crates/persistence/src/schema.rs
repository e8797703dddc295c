//! Database schema definitions

/// SQL to create all tables
/// NOTE: timestamps are RFC 3339 TEXT in UTC
pub const CREATE_TABLES: &str = r#"
-- One row per screening run, successful or not
CREATE TABLE IF NOT EXISTS screen_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    market TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    universe_size INTEGER NOT NULL DEFAULT 0,
    scored INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    output_path TEXT,
    table_digest TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Per-symbol result of a run (scored, or skipped with a reason)
CREATE TABLE IF NOT EXISTS symbol_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES screen_runs(run_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    ticker TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    detail TEXT,
    alpha_score INTEGER,
    data_source TEXT
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_runs_market ON screen_runs(market, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_outcomes_run ON symbol_outcomes(run_id, position);
CREATE INDEX IF NOT EXISTS idx_outcomes_ticker ON symbol_outcomes(ticker)
"#;

/// Additive migrations for databases created by earlier versions
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE screen_runs ADD COLUMN lookback_days INTEGER",
    "ALTER TABLE screen_runs ADD COLUMN fundamentals_enabled INTEGER NOT NULL DEFAULT 0",
];
