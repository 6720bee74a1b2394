// Aggregate store: SQLite tables for ingested responses and mapping rules, plus the
// current metric set per (user, run, scope, scope value).
//
// One row per key is enforced by a UNIQUE index. Each recalculation writes all of a
// run's sets in one IMMEDIATE transaction, so a failed write leaves the previous
// sets untouched and the next run repairs everything.

use crate::error::BrandscopeError;
use crate::source::ResponseSource;
use crate::types::{
    AggregatedMetricSet, BrandMetricSummary, DateRange, RunKey, Scope, ScopeKey,
    ScoredResponse, UrlMappingRule,
};
use crate::util::{parse_store_timestamp, store_timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scored_responses (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  run_id TEXT NOT NULL,
  status TEXT NOT NULL,
  tested_at TEXT NOT NULL,
  body_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_responses_run ON scored_responses(user_id, run_id, id);

CREATE TABLE IF NOT EXISTS url_mapping_rules (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  run_id TEXT NOT NULL,
  source TEXT NOT NULL,
  target TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metric_sets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id TEXT NOT NULL,
  run_id TEXT NOT NULL,
  scope TEXT NOT NULL,
  scope_value TEXT NOT NULL,
  range_start TEXT NOT NULL,
  range_end TEXT NOT NULL,
  total_prompts INTEGER NOT NULL,
  total_brands INTEGER NOT NULL,
  brands_json TEXT NOT NULL,
  fingerprint TEXT NOT NULL DEFAULT '',
  last_calculated TEXT NOT NULL
);
"#;

// Keep the most recently calculated row of each key (highest id on equal timestamps).
const RECONCILE_SQL: &str = r#"
DELETE FROM metric_sets WHERE id IN (
  SELECT id FROM (
    SELECT id, ROW_NUMBER() OVER (
      PARTITION BY user_id, run_id, scope, scope_value
      ORDER BY last_calculated DESC, id DESC
    ) AS rn
    FROM metric_sets
  ) WHERE rn > 1
)
"#;

const UNIQUE_KEY_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS ux_metric_sets_key
  ON metric_sets(user_id, run_id, scope, scope_value);
"#;

const SET_COLUMNS: &str = "scope, scope_value, range_start, range_end, total_prompts, \
     total_brands, brands_json, last_calculated, user_id, run_id";

pub struct AggregateStore {
    conn: Mutex<Connection>,
    run_locks: Mutex<HashMap<RunKey, Arc<Mutex<()>>>>,
}

impl AggregateStore {
    /// Open (or create) the database file, reconcile legacy duplicates, ensure schema.
    pub fn open(path: &Path) -> Result<Self, BrandscopeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, BrandscopeError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BrandscopeError> {
        conn.execute_batch(SCHEMA)?;
        let removed = conn.execute(RECONCILE_SQL, [])?;
        if removed > 0 {
            warn!(removed, "removed stale duplicate metric sets");
        }
        conn.execute_batch(UNIQUE_KEY_INDEX)?;
        Ok(Self {
            conn: Mutex::new(conn),
            run_locks: Mutex::new(HashMap::new()),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, BrandscopeError> {
        self.conn
            .lock()
            .map_err(|_| BrandscopeError::Store("connection lock poisoned".to_string()))
    }

    /// Lock shared by every recalculation of `run` in this process.
    pub fn run_lock(&self, run: &RunKey) -> Result<Arc<Mutex<()>>, BrandscopeError> {
        let mut locks = self
            .run_locks
            .lock()
            .map_err(|_| BrandscopeError::Store("run lock table poisoned".to_string()))?;
        Ok(locks.entry(run.clone()).or_default().clone())
    }

    // ── Ingestion ──

    pub fn ingest_responses(&self, responses: &[ScoredResponse]) -> Result<usize, BrandscopeError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO scored_responses (id, user_id, run_id, status, tested_at, body_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                  user_id=excluded.user_id,
                  run_id=excluded.run_id,
                  status=excluded.status,
                  tested_at=excluded.tested_at,
                  body_json=excluded.body_json
                "#,
            )?;
            for r in responses {
                let body = serde_json::to_string(r)?;
                stmt.execute(params![
                    r.id,
                    r.user_id,
                    r.run_id,
                    r.status.to_string(),
                    store_timestamp(r.tested_at),
                    body
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = responses.len(), "ingested responses");
        Ok(responses.len())
    }

    pub fn ingest_rules(&self, rules: &[UrlMappingRule]) -> Result<usize, BrandscopeError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO url_mapping_rules (id, user_id, run_id, source, target)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                  user_id=excluded.user_id,
                  run_id=excluded.run_id,
                  source=excluded.source,
                  target=excluded.target
                "#,
            )?;
            for rule in rules {
                stmt.execute(params![rule.id, rule.user_id, rule.run_id, rule.source, rule.target])?;
            }
        }
        tx.commit()?;
        debug!(rows = rules.len(), "ingested mapping rules");
        Ok(rules.len())
    }

    // ── Metric sets ──

    /// Upsert every set of one recalculation pass and retire keys of the same run
    /// that the pass did not produce. All or nothing. Returns rows retired.
    pub fn replace_run_sets(
        &self,
        run: &RunKey,
        sets: &[AggregatedMetricSet],
        fingerprint: &str,
    ) -> Result<usize, BrandscopeError> {
        if let Some(stray) = sets.iter().find(|s| s.run_key() != *run) {
            return Err(BrandscopeError::Validation(format!(
                "set {} belongs to {}, not {}",
                stray.scope_key(),
                stray.run_key(),
                run
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO metric_sets (
                  user_id, run_id, scope, scope_value, range_start, range_end,
                  total_prompts, total_brands, brands_json, fingerprint, last_calculated
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(user_id, run_id, scope, scope_value) DO UPDATE SET
                  range_start=excluded.range_start,
                  range_end=excluded.range_end,
                  total_prompts=excluded.total_prompts,
                  total_brands=excluded.total_brands,
                  brands_json=excluded.brands_json,
                  fingerprint=excluded.fingerprint,
                  last_calculated=excluded.last_calculated
                "#,
            )?;
            for set in sets {
                let brands_json = serde_json::to_string(&set.brands)?;
                upsert.execute(params![
                    set.user_id,
                    set.run_id,
                    set.scope.as_str(),
                    set.scope_value,
                    store_timestamp(set.date_range.start),
                    store_timestamp(set.date_range.end),
                    set.total_prompts as i64,
                    set.total_brands as i64,
                    brands_json,
                    fingerprint,
                    store_timestamp(set.last_calculated)
                ])?;
            }
        }

        let produced: HashSet<(&str, &str)> = sets
            .iter()
            .map(|s| (s.scope.as_str(), s.scope_value.as_str()))
            .collect();
        let existing: Vec<(i64, String, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, scope, scope_value FROM metric_sets WHERE user_id = ?1 AND run_id = ?2")?;
            let rows = stmt.query_map(params![run.user_id, run.run_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut retired = 0;
        for (id, scope, value) in existing {
            if !produced.contains(&(scope.as_str(), value.as_str())) {
                retired += tx.execute("DELETE FROM metric_sets WHERE id = ?1", params![id])?;
            }
        }

        tx.commit()?;
        info!(run = %run, written = sets.len(), retired, "metric sets replaced");
        Ok(retired)
    }

    /// Current set for one key; the most recently calculated row wins.
    pub fn load_set(
        &self,
        run: &RunKey,
        key: &ScopeKey,
    ) -> Result<Option<AggregatedMetricSet>, BrandscopeError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM metric_sets \
             WHERE user_id = ?1 AND run_id = ?2 AND scope = ?3 AND scope_value = ?4 \
             ORDER BY last_calculated DESC, id DESC LIMIT 1",
            SET_COLUMNS
        );
        let raw = conn
            .query_row(
                &sql,
                params![run.user_id, run.run_id, key.scope().as_str(), key.value()],
                StoredSet::from_row,
            )
            .optional()?;
        raw.map(StoredSet::into_set).transpose()
    }

    /// Current sets of a run, optionally one scope only, ordered by scope key.
    pub fn load_sets(
        &self,
        run: &RunKey,
        scope: Option<Scope>,
    ) -> Result<Vec<AggregatedMetricSet>, BrandscopeError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM metric_sets \
             WHERE user_id = ?1 AND run_id = ?2 AND (?3 IS NULL OR scope = ?3) \
             ORDER BY last_calculated DESC, id DESC",
            SET_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![run.user_id, run.run_id, scope.map(|s| s.as_str())],
            StoredSet::from_row,
        )?;

        let mut current: BTreeMap<ScopeKey, AggregatedMetricSet> = BTreeMap::new();
        for raw in rows {
            let set = raw?.into_set()?;
            current.entry(set.scope_key()).or_insert(set);
        }
        Ok(current.into_values().collect())
    }

    /// Distinct input fingerprints stored for a run.
    pub fn fingerprints(&self, run: &RunKey) -> Result<Vec<String>, BrandscopeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT fingerprint FROM metric_sets \
             WHERE user_id = ?1 AND run_id = ?2 ORDER BY fingerprint",
        )?;
        let rows = stmt.query_map(params![run.user_id, run.run_id], |row| row.get(0))?;
        let fingerprints = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(fingerprints)
    }

    /// Delete every stored set of a run.
    pub fn retire_run(&self, run: &RunKey) -> Result<usize, BrandscopeError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM metric_sets WHERE user_id = ?1 AND run_id = ?2",
            params![run.user_id, run.run_id],
        )?;
        info!(run = %run, removed, "retired metric sets");
        Ok(removed)
    }
}

impl ResponseSource for AggregateStore {
    fn response_batch(
        &self,
        run: &RunKey,
        range: Option<&DateRange>,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredResponse>, BrandscopeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT body_json FROM scored_responses
            WHERE user_id = ?1 AND run_id = ?2 AND status = 'completed'
              AND (?3 IS NULL OR tested_at >= ?3)
              AND (?4 IS NULL OR tested_at <= ?4)
              AND (?5 IS NULL OR id > ?5)
            ORDER BY id
            LIMIT ?6
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                run.user_id,
                run.run_id,
                range.map(|r| store_timestamp(r.start)),
                range.map(|r| store_timestamp(r.end)),
                after_id,
                limit as i64
            ],
            |row| row.get::<_, String>(0),
        )?;
        let responses = rows
            .map(|body| -> Result<ScoredResponse, BrandscopeError> {
                Ok(serde_json::from_str(&body?)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(responses)
    }

    fn mapping_rules(&self, run: &RunKey) -> Result<Vec<UrlMappingRule>, BrandscopeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, run_id, source, target FROM url_mapping_rules \
             WHERE user_id = ?1 AND run_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run.user_id, run.run_id], |row| {
            Ok(UrlMappingRule {
                id: row.get(0)?,
                user_id: row.get(1)?,
                run_id: row.get(2)?,
                source: row.get(3)?,
                target: row.get(4)?,
            })
        })?;
        let rules = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

/// A metric_sets row before its text columns are parsed
struct StoredSet {
    scope: String,
    scope_value: String,
    range_start: String,
    range_end: String,
    total_prompts: i64,
    total_brands: i64,
    brands_json: String,
    last_calculated: String,
    user_id: String,
    run_id: String,
}

impl StoredSet {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scope: row.get(0)?,
            scope_value: row.get(1)?,
            range_start: row.get(2)?,
            range_end: row.get(3)?,
            total_prompts: row.get(4)?,
            total_brands: row.get(5)?,
            brands_json: row.get(6)?,
            last_calculated: row.get(7)?,
            user_id: row.get(8)?,
            run_id: row.get(9)?,
        })
    }

    fn into_set(self) -> Result<AggregatedMetricSet, BrandscopeError> {
        let brands: Vec<BrandMetricSummary> = serde_json::from_str(&self.brands_json)?;
        Ok(AggregatedMetricSet {
            user_id: self.user_id,
            run_id: self.run_id,
            scope: self.scope.parse()?,
            scope_value: self.scope_value,
            date_range: DateRange::new(
                parse_store_timestamp(&self.range_start)?,
                parse_store_timestamp(&self.range_end)?,
            )?,
            total_prompts: self.total_prompts.max(0) as usize,
            total_brands: self.total_brands.max(0) as usize,
            brands,
            last_calculated: parse_store_timestamp(&self.last_calculated)?,
        })
    }
}
