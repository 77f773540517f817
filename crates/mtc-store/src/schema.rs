//! Table definitions
//!
//! Timestamps are Unix milliseconds. Enums are stored by their protocol
//! spelling (`CONDITION`, `FAULT`, ...).

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS connections (
    device_id        TEXT PRIMARY KEY,
    address          TEXT NOT NULL,
    port             INTEGER NOT NULL,
    physical_address TEXT,
    device_name      TEXT,
    enabled          INTEGER NOT NULL,
    interval_ms      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    device_id      TEXT NOT NULL,
    instance_id    INTEGER NOT NULL,
    sender         TEXT NOT NULL,
    version        TEXT NOT NULL,
    buffer_size    INTEGER NOT NULL,
    test_indicator INTEGER NOT NULL,
    timestamp      INTEGER NOT NULL,
    PRIMARY KEY (device_id, instance_id)
);

CREATE TABLE IF NOT EXISTS devices (
    device_id         TEXT PRIMARY KEY,
    agent_instance_id INTEGER NOT NULL,
    id                TEXT NOT NULL,
    name              TEXT NOT NULL,
    uuid              TEXT,
    manufacturer      TEXT,
    model             TEXT,
    serial_number     TEXT,
    station           TEXT,
    description       TEXT,
    iso841_class      TEXT,
    sample_interval   REAL
);

CREATE TABLE IF NOT EXISTS components (
    device_id         TEXT NOT NULL,
    agent_instance_id INTEGER NOT NULL,
    id                TEXT NOT NULL,
    type              TEXT NOT NULL,
    name              TEXT,
    uuid              TEXT,
    native_name       TEXT,
    parent_id         TEXT NOT NULL,
    parent_type       TEXT NOT NULL,
    PRIMARY KEY (device_id, id)
);

CREATE TABLE IF NOT EXISTS data_items (
    device_id         TEXT NOT NULL,
    agent_instance_id INTEGER NOT NULL,
    id                TEXT NOT NULL,
    name              TEXT,
    category          TEXT NOT NULL,
    type              TEXT NOT NULL,
    sub_type          TEXT,
    units             TEXT,
    native_units      TEXT,
    representation    TEXT,
    parent_id         TEXT NOT NULL,
    parent_type       TEXT NOT NULL,
    PRIMARY KEY (device_id, id)
);

CREATE TABLE IF NOT EXISTS samples (
    device_id         TEXT NOT NULL,
    id                TEXT NOT NULL,
    agent_instance_id INTEGER NOT NULL,
    sequence          INTEGER NOT NULL,
    timestamp         INTEGER NOT NULL,
    value             TEXT NOT NULL,
    condition         TEXT,
    PRIMARY KEY (device_id, id, timestamp)
);

CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp);
";
