use std::sync::Mutex;

use log::{Level, Log, Metadata, Record};
use rusqlite::{Connection, OptionalExtension};

/// The slice of the management server schema the 4.4.2 → 4.5.0 step touches,
/// as it looks before the upgrade.
pub const CLOUD_SCHEMA_442_SQL: &str = r#"
CREATE TABLE version (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    version     TEXT NOT NULL UNIQUE,
    updated     TEXT NOT NULL,
    step        TEXT NOT NULL
);

CREATE TABLE cluster (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT,
    hypervisor_type TEXT,
    removed         TEXT
);

CREATE TABLE vm_template (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    type            TEXT,
    hypervisor_type TEXT,
    url             TEXT,
    checksum        TEXT,
    removed         TEXT
);

CREATE TABLE vm_instance (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    type            TEXT NOT NULL,
    hypervisor_type TEXT,
    vm_template_id  INTEGER
);

CREATE TABLE configuration (
    name        TEXT PRIMARY KEY,
    category    TEXT NOT NULL DEFAULT 'Advanced',
    value       TEXT,
    description TEXT
);

CREATE TABLE service_offering (
    id          INTEGER PRIMARY KEY,
    name        TEXT,
    vm_type     TEXT,
    ram_size    INTEGER
);

CREATE TABLE storage_pool (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT,
    uuid    TEXT
);
CREATE UNIQUE INDEX id_2 ON storage_pool (id, uuid);

CREATE TABLE async_job (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    status  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE async_job_join_map (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id      INTEGER NOT NULL,
    join_job_id INTEGER NOT NULL,
    CONSTRAINT fk_async_job_join_map__job_id FOREIGN KEY (job_id) REFERENCES async_job (id) ON DELETE CASCADE,
    CONSTRAINT fk_async_job_join_map__join_job_id FOREIGN KEY (join_job_id) REFERENCES async_job (id)
);
CREATE INDEX i_async_job_join_map__join_job_id ON async_job_join_map (join_job_id);

INSERT INTO version (version, updated, step) VALUES ('4.4.2', '2014-11-01 00:00:00', 'Complete');

INSERT INTO configuration (name, value) VALUES
    ('router.template.xen', 'SystemVM Template (XenServer)'),
    ('router.template.vmware', 'SystemVM Template (vSphere)'),
    ('router.template.kvm', 'SystemVM Template (KVM)');

INSERT INTO async_job (id) VALUES (1), (2);
INSERT INTO async_job_join_map (job_id, join_job_id) VALUES (1, 2);
"#;

pub fn cloud_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    create_cloud_schema(&conn);
    conn
}

pub fn create_cloud_schema(conn: &Connection) {
    conn.execute_batch(CLOUD_SCHEMA_442_SQL).unwrap();
}

pub fn query_i64(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// `None` for both a missing row and a NULL value.
pub fn query_opt_string(conn: &Connection, sql: &str) -> Option<String> {
    conn.query_row(sql, [], |row| row.get::<_, Option<String>>(0))
        .optional()
        .unwrap()
        .flatten()
}

/// A logger that keeps every record it is handed, for asserting on what a
/// step reported.
#[derive(Default)]
pub struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
    sources: Mutex<Vec<RecordSource>>,
}

/// Where a captured record says it came from.
#[derive(Debug, Clone)]
pub struct RecordSource {
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl CapturingLogger {
    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.lock().unwrap().clone()
    }

    pub fn sources(&self) -> Vec<RecordSource> {
        self.sources.lock().unwrap().clone()
    }

    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
        self.sources.lock().unwrap().push(RecordSource {
            module_path: record.module_path().map(str::to_owned),
            file: record.file().map(str::to_owned),
            line: record.line(),
        });
    }

    fn flush(&self) {}
}
