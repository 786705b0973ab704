/// Schema for the local durable store.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Process-wide values such as the device identity
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Checklist submissions waiting to be pushed
CREATE TABLE IF NOT EXISTS submissions (
    id TEXT PRIMARY KEY,
    vehicle_id TEXT NOT NULL,
    template_id TEXT NOT NULL,
    operator_id TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    status TEXT NOT NULL,
    items TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);

-- Photos attached to a submission (preserves order)
CREATE TABLE IF NOT EXISTS submission_photos (
    submission_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (submission_id, position),
    FOREIGN KEY (submission_id) REFERENCES submissions(id) ON DELETE CASCADE
);

-- Cached read responses
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT NOT NULL,
    version TEXT NOT NULL,
    description TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (cache_key, version)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_version ON cache_entries(version);
"#;
