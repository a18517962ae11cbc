/// Schema for the offline queue and the response cache.
pub const SCHEMA: &str = r#"
-- Mutations that failed to reach the network, replayed in id order.
-- AUTOINCREMENT keeps ids from being reused after the newest row is deleted.
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    body TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Named cache generations
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    installed_at TEXT
);

-- Response snapshots keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, request_hash)
);
"#;
