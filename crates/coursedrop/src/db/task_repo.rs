//! Task repository: queries against the `download_tasks` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Row};

use super::{Database, DatabaseError};

/// A raw task row from the database.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub order_id: Option<i64>,
    pub email: String,
    pub course_url: String,
    pub status: String,
    pub error_log: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            email: row.get("email")?,
            course_url: row.get("course_url")?,
            status: row.get("status")?,
            error_log: row.get("error_log")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Task counts for one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderSummary {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

impl OrderSummary {
    /// True once every task of a non-empty order has reached an outcome.
    pub fn is_settled(&self) -> bool {
        self.total > 0 && self.completed + self.failed >= self.total
    }
}

/// Formats a timestamp the way every `*_at` column stores it.
///
/// Fixed-width UTC so that string comparison orders correctly.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Inserts a new task row.
pub fn insert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO download_tasks (id, order_id, email, course_url, status, error_log,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.order_id,
                task.email,
                task.course_url,
                task.status,
                task.error_log,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a task by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM download_tasks WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], TaskRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Reads only the status column of a task.
pub fn find_status(db: &Database, id: i64) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status FROM download_tasks WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(status)) => Ok(Some(status)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// New `error_log` for a status write: cleared on completion, otherwise
/// replaced by `?3` when given.
const ERROR_LOG_UPDATE: &str =
    "CASE WHEN ?2 = 'completed' THEN NULL ELSE COALESCE(?3, error_log) END";

/// Updates the status and updated_at of a task.
///
/// `error_log` overwrites the stored value only when given; moving to
/// `completed` clears it. Returns the number of rows touched (0 when the
/// task does not exist).
pub fn update_status(
    db: &Database,
    id: i64,
    status: &str,
    error_log: Option<&str>,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            &format!(
                "UPDATE download_tasks
                 SET status = ?2, error_log = {}, updated_at = ?4
                 WHERE id = ?1",
                ERROR_LOG_UPDATE
            ),
            params![id, status, error_log, updated_at],
        )?;
        Ok(changed)
    })
}

/// Moves a task to `to` only if its current status is one of `from`.
///
/// Returns whether the row was changed.
pub fn transition(
    db: &Database,
    id: i64,
    from: &[&str],
    to: &str,
    error_log: Option<&str>,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 5)).collect();
        let sql = format!(
            "UPDATE download_tasks
             SET status = ?2, error_log = {}, updated_at = ?4
             WHERE id = ?1 AND status IN ({})",
            ERROR_LOG_UPDATE,
            placeholders.join(", ")
        );

        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(id),
            Box::new(to.to_string()),
            Box::new(error_log.map(str::to_string)),
            Box::new(updated_at.to_string()),
        ];
        values.extend(
            from.iter()
                .map(|s| Box::new(s.to_string()) as Box<dyn rusqlite::types::ToSql>),
        );

        let changed = conn.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
        Ok(changed > 0)
    })
}

/// Counts the tasks of an order by outcome.
pub fn order_summary(db: &Database, order_id: i64) -> Result<OrderSummary, DatabaseError> {
    db.with_conn(|conn| {
        let counts = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status IN ('failed', 'not_found') THEN 1 ELSE 0 END), 0)
             FROM download_tasks WHERE order_id = ?1",
            params![order_id],
            |r| {
                Ok(OrderSummary {
                    total: r.get(0)?,
                    completed: r.get(1)?,
                    failed: r.get(2)?,
                })
            },
        )?;
        Ok(counts)
    })
}

/// Resets tasks stuck in `downloading`/`uploading` since before `cutoff`
/// back to `enrolled`. Returns the number of tasks reset.
pub fn reset_stale(db: &Database, cutoff: &str, updated_at: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE download_tasks SET status = 'enrolled', updated_at = ?2
             WHERE status IN ('downloading', 'uploading') AND updated_at < ?1",
            params![cutoff, updated_at],
        )?;
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_task(id: i64, status: &str) -> TaskRow {
        TaskRow {
            id,
            order_id: Some(10),
            email: "student@example.com".to_string(),
            course_url: "https://platform.example.com/course/demo/".to_string(),
            status: status.to_string(),
            error_log: None,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_task(1, "enrolled")).unwrap();

        let found = find_by_id(&db, 1).unwrap().unwrap();
        assert_eq!(found.email, "student@example.com");
        assert_eq!(found.status, "enrolled");
        assert_eq!(found.order_id, Some(10));
        assert!(found.error_log.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 404).unwrap().is_none());
        assert!(find_status(&db, 404).unwrap().is_none());
    }

    #[test]
    fn test_update_status_keeps_error_log_when_absent() {
        let db = test_db();
        insert(&db, &sample_task(2, "downloading")).unwrap();

        update_status(&db, 2, "failed", Some("{\"errorType\":\"PROCESS_ERROR\"}"), "t1").unwrap();
        update_status(&db, 2, "failed", None, "t2").unwrap();

        let found = find_by_id(&db, 2).unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(found.updated_at, "t2");
        assert!(found.error_log.unwrap().contains("PROCESS_ERROR"));
    }

    #[test]
    fn test_completion_clears_earlier_failure() {
        let db = test_db();
        insert(&db, &sample_task(5, "downloading")).unwrap();
        update_status(&db, 5, "failed", Some("{\"errorType\":\"TIMEOUT_ERROR\"}"), "t1").unwrap();

        assert!(transition(&db, 5, &["failed"], "enrolled", None, "t2").unwrap());
        assert!(find_by_id(&db, 5).unwrap().unwrap().error_log.is_some());

        update_status(&db, 5, "completed", None, "t3").unwrap();
        let found = find_by_id(&db, 5).unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert!(found.error_log.is_none());

        insert(&db, &sample_task(6, "uploading")).unwrap();
        update_status(&db, 6, "failed", Some("{}"), "t1").unwrap();
        assert!(transition(&db, 6, &["failed"], "completed", None, "t2").unwrap());
        assert!(find_by_id(&db, 6).unwrap().unwrap().error_log.is_none());
    }

    #[test]
    fn test_update_status_missing_row() {
        let db = test_db();
        assert_eq!(update_status(&db, 99, "failed", None, "t").unwrap(), 0);
    }

    #[test]
    fn test_transition_only_from_listed_states() {
        let db = test_db();
        insert(&db, &sample_task(3, "processing")).unwrap();

        assert!(!transition(&db, 3, &["enrolled"], "downloading", None, "t").unwrap());
        assert_eq!(find_status(&db, 3).unwrap().as_deref(), Some("processing"));

        assert!(transition(&db, 3, &["pending", "processing"], "failed", None, "t").unwrap());
        assert_eq!(find_status(&db, 3).unwrap().as_deref(), Some("failed"));
    }

    #[test]
    fn test_transition_empty_from_is_noop() {
        let db = test_db();
        insert(&db, &sample_task(4, "enrolled")).unwrap();
        assert!(!transition(&db, 4, &[], "failed", None, "t").unwrap());
    }

    #[test]
    fn test_order_summary() {
        let db = test_db();
        insert(&db, &sample_task(5, "completed")).unwrap();
        insert(&db, &sample_task(6, "failed")).unwrap();
        insert(&db, &sample_task(7, "downloading")).unwrap();
        let mut other = sample_task(8, "completed");
        other.order_id = Some(11);
        insert(&db, &other).unwrap();

        let counts = order_summary(&db, 10).unwrap();
        assert_eq!(
            counts,
            OrderSummary {
                total: 3,
                completed: 1,
                failed: 1
            }
        );
        assert!(!counts.is_settled());
        assert_eq!(order_summary(&db, 999).unwrap(), OrderSummary::default());
        assert!(!OrderSummary::default().is_settled());
        assert!(order_summary(&db, 11).unwrap().is_settled());
    }

    #[test]
    fn test_reset_stale_respects_cutoff() {
        let db = test_db();
        let mut old = sample_task(20, "downloading");
        old.updated_at = "2026-01-01T00:00:00.000Z".to_string();
        insert(&db, &old).unwrap();

        let mut fresh = sample_task(21, "uploading");
        fresh.updated_at = "2026-01-01T02:00:00.000Z".to_string();
        insert(&db, &fresh).unwrap();

        insert(&db, &sample_task(22, "failed")).unwrap();

        let reset = reset_stale(&db, "2026-01-01T01:00:00.000Z", "2026-01-01T03:00:00.000Z").unwrap();
        assert_eq!(reset, 1);
        assert_eq!(find_status(&db, 20).unwrap().as_deref(), Some("enrolled"));
        assert_eq!(find_status(&db, 21).unwrap().as_deref(), Some("uploading"));
        assert_eq!(find_status(&db, 22).unwrap().as_deref(), Some("failed"));
    }

    #[test]
    fn test_format_timestamp_fixed_width() {
        let at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(at), "2026-03-04T05:06:07.000Z");
    }
}
