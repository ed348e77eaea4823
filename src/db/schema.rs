/// Schema for the local store. Applied on every open.
pub const SCHEMA: &str = r#"
-- Server-confirmed entities, keyed by server id
CREATE TABLE IF NOT EXISTS entities (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Pending mutations. AUTOINCREMENT keeps sequence numbers from being reused.
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Local placeholder id -> server id, filled while draining
CREATE TABLE IF NOT EXISTS id_map (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Versioned static asset caches
CREATE TABLE IF NOT EXISTS asset_caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS asset_cache (
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    final_url TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url_hash),
    FOREIGN KEY (cache_name) REFERENCES asset_caches(name) ON DELETE CASCADE
);
"#;
