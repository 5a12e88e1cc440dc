use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use swarm_core::error::{Result, SwarmError};
use swarm_core::graph::{ShadowQuery, Term, Triple, TriplePattern};
use swarm_core::traits::GraphStore;
use swarm_core::types::Namespace;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS triples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        namespace TEXT NOT NULL,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object_kind TEXT NOT NULL,
        object_value TEXT NOT NULL,
        UNIQUE(namespace, subject, predicate, object_kind, object_value)
    );

    CREATE INDEX IF NOT EXISTS idx_triples_subject
        ON triples(namespace, subject);

    CREATE INDEX IF NOT EXISTS idx_triples_predicate
        ON triples(namespace, predicate, object_value);";

// One existence query: an active event with no strictly later clearing event.
const ASK_ACTIVE_SQL: &str = "SELECT EXISTS (
        SELECT 1 FROM triples e
        JOIN triples s ON s.namespace = e.namespace AND s.subject = e.subject
            AND s.predicate = ?3 AND s.object_kind = 'literal' AND s.object_value = ?4
        JOIN triples t ON t.namespace = e.namespace AND t.subject = e.subject
            AND t.predicate = ?5 AND t.object_kind = 'literal'
        WHERE e.namespace = ?1 AND e.predicate = ?2
            AND e.object_kind = ?6 AND e.object_value = ?7
            AND NOT EXISTS (
                SELECT 1 FROM triples e2
                JOIN triples s2 ON s2.namespace = e2.namespace AND s2.subject = e2.subject
                    AND s2.predicate = ?3 AND s2.object_kind = 'literal' AND s2.object_value = ?8
                JOIN triples t2 ON t2.namespace = e2.namespace AND t2.subject = e2.subject
                    AND t2.predicate = ?5 AND t2.object_kind = 'literal'
                WHERE e2.namespace = ?1 AND e2.predicate = ?2
                    AND e2.object_kind = ?6 AND e2.object_value = ?7
                    AND t2.object_value > t.object_value
            )
    )";

fn db_err(e: impl std::fmt::Display) -> SwarmError {
    SwarmError::Store(e.to_string())
}

fn term_from(kind: &str, value: String) -> Term {
    match kind {
        "iri" => Term::Iri(value),
        _ => Term::Literal(value),
    }
}

/// SQLite-backed graph store. One table, partitioned by a namespace column.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SwarmError::Store(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // WAL lets several processes poll the same graph.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite graph store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteGraphStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn ingest(&self, namespace: &Namespace, triples: Vec<Triple>) -> BoxFuture<'_, Result<()>> {
        let namespace = namespace.0.clone();
        Box::pin(async move {
            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT OR IGNORE INTO triples
                            (namespace, subject, predicate, object_kind, object_value)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(db_err)?;
                for t in &triples {
                    stmt.execute(params![
                        namespace,
                        t.subject,
                        t.predicate,
                        t.object.kind(),
                        t.object.as_str()
                    ])
                    .map_err(db_err)?;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
    }

    fn query(
        &self,
        namespace: &Namespace,
        pattern: TriplePattern,
    ) -> BoxFuture<'_, Result<Vec<Triple>>> {
        let namespace = namespace.0.clone();
        Box::pin(async move {
            let mut sql = String::from(
                "SELECT subject, predicate, object_kind, object_value FROM triples WHERE namespace = ?1",
            );
            let mut args: Vec<String> = vec![namespace];
            if let Some(subject) = pattern.subject {
                args.push(subject);
                sql.push_str(&format!(" AND subject = ?{}", args.len()));
            }
            if let Some(predicate) = pattern.predicate {
                args.push(predicate);
                sql.push_str(&format!(" AND predicate = ?{}", args.len()));
            }
            if let Some(object) = pattern.object {
                args.push(object.kind().to_string());
                sql.push_str(&format!(" AND object_kind = ?{}", args.len()));
                args.push(object.as_str().to_string());
                sql.push_str(&format!(" AND object_value = ?{}", args.len()));
            }
            sql.push_str(" ORDER BY id");

            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    let subject: String = row.get(0)?;
                    let predicate: String = row.get(1)?;
                    let kind: String = row.get(2)?;
                    let value: String = row.get(3)?;
                    Ok(Triple::new(subject, predicate, term_from(&kind, value)))
                })
                .map_err(db_err)?;

            let triples = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(triples)
        })
    }

    fn ask_active(&self, namespace: &Namespace, query: ShadowQuery) -> BoxFuture<'_, Result<bool>> {
        let namespace = namespace.0.clone();
        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            conn.query_row(
                ASK_ACTIVE_SQL,
                params![
                    namespace,
                    query.scope_predicate,
                    query.state_predicate,
                    query.active,
                    query.time_predicate,
                    query.scope_object.kind(),
                    query.scope_object.as_str(),
                    query.clearing,
                ],
                |row| row.get::<_, bool>(0),
            )
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halt_query() -> ShadowQuery {
        ShadowQuery {
            scope_predicate: "type".into(),
            scope_object: Term::iri("StatusChangeEvent"),
            state_predicate: "newStatus".into(),
            time_predicate: "at".into(),
            active: "HALTED".into(),
            clearing: "OPERATIONAL".into(),
        }
    }

    fn event(id: &str, state: &str, at: &str) -> Vec<Triple> {
        vec![
            Triple::iri(id, "type", "StatusChangeEvent"),
            Triple::literal(id, "newStatus", state),
            Triple::literal(id, "at", at),
        ]
    }

    #[tokio::test]
    async fn test_ingest_and_query() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ns = Namespace::new("session-1");
        store
            .ingest(
                &ns,
                vec![
                    Triple::iri("agent", "hasPermission", "WriteCode"),
                    Triple::literal("agent", "status", "IDLE"),
                    Triple::literal("agent", "status", "IDLE"),
                ],
            )
            .await
            .unwrap();

        let all = store.query(&ns, TriplePattern::any()).await.unwrap();
        assert_eq!(all.len(), 2);

        let iri_only = store
            .query(&ns, TriplePattern::any().object(Term::iri("WriteCode")))
            .await
            .unwrap();
        assert_eq!(iri_only.len(), 1);

        let as_literal = store
            .query(&ns, TriplePattern::any().object(Term::literal("WriteCode")))
            .await
            .unwrap();
        assert!(as_literal.is_empty());

        let other = store
            .query(&Namespace::new("session-2"), TriplePattern::any())
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_ask_active_in_sql() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let ns = Namespace::default();
        assert!(!store.ask_active(&ns, halt_query()).await.unwrap());

        store
            .ingest(&ns, event("e1", "HALTED", "2026-01-01T00:00:01.000000000Z"))
            .await
            .unwrap();
        assert!(store.ask_active(&ns, halt_query()).await.unwrap());

        store
            .ingest(&ns, event("e2", "OPERATIONAL", "2026-01-01T00:00:02.000000000Z"))
            .await
            .unwrap();
        assert!(!store.ask_active(&ns, halt_query()).await.unwrap());

        store
            .ingest(&ns, event("e3", "HALTED", "2026-01-01T00:00:03.000000000Z"))
            .await
            .unwrap();
        assert!(store.ask_active(&ns, halt_query()).await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.db");
        let ns = Namespace::default();
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store
                .ingest(&ns, vec![Triple::literal("swarm", "currentTurn", "2")])
                .await
                .unwrap();
        }
        let store = SqliteGraphStore::open(&path).unwrap();
        assert!(store
            .exists(&ns, TriplePattern::any().predicate("currentTurn"))
            .await
            .unwrap());
    }
}
