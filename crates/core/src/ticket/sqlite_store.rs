//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    AppliedChanges, ApprovedChange, AssigneeFilter, CreateTicketRequest, HistoryEntry, Priority,
    Ticket, TicketError, TicketFilter, TicketQuery, TicketStatus, TicketStore, TicketUpdates,
};

const TICKET_COLUMNS: &str =
    "id, title, description, status, priority, assignee, created_at, updated_at, closed_at";

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path).map_err(|e| TicketError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| TicketError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TicketError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 1,
                assignee TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority DESC);
            CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON tickets(assignee);

            CREATE TABLE IF NOT EXISTS ticket_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id TEXT NOT NULL,
                changed_at TEXT NOT NULL,
                before TEXT NOT NULL,
                updates TEXT NOT NULL,
                rationale TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_ticket_history_ticket_id ON ticket_history(ticket_id);
            "#,
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Database("connection lock poisoned".to_string()))
    }

    fn build_filter_clause(filter: &TicketFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref assignee) = filter.assignee {
            conditions.push("assignee = ?");
            params.push(Box::new(assignee.clone()));
        }

        (Self::join_conditions(&conditions), params)
    }

    fn build_query_clause(query: &TicketQuery) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = query.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(priority) = query.priority {
            conditions.push("priority = ?");
            params.push(Box::new(priority.rank()));
        }

        match &query.assignee {
            Some(AssigneeFilter::Unassigned) => conditions.push("assignee IS NULL"),
            Some(AssigneeFilter::Is(name)) => {
                conditions.push("assignee = ?");
                params.push(Box::new(name.clone()));
            }
            None => {}
        }

        if let Some(text) = query.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            conditions.push("(LOWER(title) LIKE ? OR LOWER(description) LIKE ?)");
            let pattern = format!("%{}%", text.to_lowercase());
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern));
        }

        (Self::join_conditions(&conditions), params)
    }

    fn join_conditions(conditions: &[&str]) -> String {
        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let id: String = row.get(0)?;
        let title: String = row.get(1)?;
        let description: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let priority_rank: i64 = row.get(4)?;
        let assignee: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;
        let closed_at_str: Option<String> = row.get(8)?;

        // Values are written by this store only, so fall back rather than fail the row
        let status = status_str.parse().unwrap_or(TicketStatus::Open);
        let priority = Priority::from_rank(priority_rank).unwrap_or(Priority::Medium);

        Ok(Ticket {
            id,
            title,
            description,
            status,
            priority,
            assignee,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            closed_at: closed_at_str.as_deref().map(parse_timestamp),
        })
    }

    fn select_ticket(conn: &Connection, id: &str) -> Result<Option<Ticket>, TicketError> {
        conn.query_row(
            &format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS),
            params![id],
            Self::row_to_ticket,
        )
        .optional()
        .map_err(|e| TicketError::Database(e.to_string()))
    }

    fn collect_tickets(
        conn: &Connection,
        sql: &str,
        params: Vec<Box<dyn rusqlite::ToSql>>,
    ) -> Result<Vec<Ticket>, TicketError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_ticket)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let mut tickets = Vec::new();
        for row_result in rows {
            tickets.push(row_result.map_err(|e| TicketError::Database(e.to_string()))?);
        }
        Ok(tickets)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, request: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let conn = self.lock()?;

        let now = Utc::now();
        let ticket = Ticket {
            id: uuid::Uuid::new_v4().to_string(),
            title: request.title,
            description: request.description,
            status: request.status,
            priority: request.priority,
            assignee: request.assignee,
            created_at: now,
            updated_at: now,
            closed_at: (request.status == TicketStatus::Closed).then_some(now),
        };

        conn.execute(
            &format!(
                "INSERT INTO tickets ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TICKET_COLUMNS
            ),
            params![
                ticket.id,
                ticket.title,
                ticket.description,
                ticket.status.as_str(),
                ticket.priority.rank(),
                ticket.assignee,
                now.to_rfc3339(),
                now.to_rfc3339(),
                ticket.closed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(ticket)
    }

    fn get(&self, id: &str) -> Result<Option<Ticket>, TicketError> {
        let conn = self.lock()?;
        Self::select_ticket(&conn, id)
    }

    fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.lock()?;

        let (where_clause, mut params) = Self::build_filter_clause(filter);
        let sql = format!(
            "SELECT {} FROM tickets {} ORDER BY priority DESC, created_at ASC LIMIT ? OFFSET ?",
            TICKET_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        Self::collect_tickets(&conn, &sql, params)
    }

    fn count(&self, filter: &TicketFilter) -> Result<i64, TicketError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tickets {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| TicketError::Database(e.to_string()))
    }

    fn query(&self, query: &TicketQuery, limit: usize) -> Result<Vec<Ticket>, TicketError> {
        let conn = self.lock()?;

        let (where_clause, mut params) = Self::build_query_clause(query);
        let sql = format!(
            "SELECT {} FROM tickets {} ORDER BY priority DESC, created_at ASC LIMIT ?",
            TICKET_COLUMNS, where_clause
        );
        params.push(Box::new(limit as i64));

        Self::collect_tickets(&conn, &sql, params)
    }

    fn apply_changes(&self, changes: &[ApprovedChange]) -> Result<AppliedChanges, TicketError> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls it back
        let tx = conn
            .transaction()
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let now = Utc::now();
        let mut applied = AppliedChanges::default();

        for change in changes {
            let before = Self::select_ticket(&tx, &change.ticket_id)?
                .ok_or_else(|| TicketError::NotFound(change.ticket_id.clone()))?;
            let after = before.with_updates(&change.updates, now);

            tx.execute(
                "UPDATE tickets SET status = ?, priority = ?, assignee = ?, updated_at = ?, closed_at = ? WHERE id = ?",
                params![
                    after.status.as_str(),
                    after.priority.rank(),
                    after.assignee,
                    now.to_rfc3339(),
                    after.closed_at.map(|t| t.to_rfc3339()),
                    after.id,
                ],
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;

            let before_json = serde_json::to_string(&before)
                .map_err(|e| TicketError::Serialization(e.to_string()))?;
            let updates_json = serde_json::to_string(&change.updates)
                .map_err(|e| TicketError::Serialization(e.to_string()))?;

            tx.execute(
                "INSERT INTO ticket_history (ticket_id, changed_at, before, updates, rationale) VALUES (?, ?, ?, ?, ?)",
                params![
                    change.ticket_id,
                    now.to_rfc3339(),
                    before_json,
                    updates_json,
                    change.rationale,
                ],
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;

            applied.history.push(HistoryEntry {
                id: tx.last_insert_rowid(),
                ticket_id: change.ticket_id.clone(),
                changed_at: now,
                before,
                updates: change.updates.clone(),
                rationale: change.rationale.clone(),
            });
            applied.updated_tickets.push(after);
        }

        tx.commit()
            .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(applied)
    }

    fn history(&self, ticket_id: &str) -> Result<Vec<HistoryEntry>, TicketError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, ticket_id, changed_at, before, updates, rationale FROM ticket_history WHERE ticket_id = ? ORDER BY id DESC",
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![ticket_id], |row| {
                let id: i64 = row.get(0)?;
                let ticket_id: String = row.get(1)?;
                let changed_at: String = row.get(2)?;
                let before: String = row.get(3)?;
                let updates: String = row.get(4)?;
                let rationale: Option<String> = row.get(5)?;
                Ok((id, ticket_id, changed_at, before, updates, rationale))
            })
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row_result in rows {
            let (id, ticket_id, changed_at, before_json, updates_json, rationale) =
                row_result.map_err(|e| TicketError::Database(e.to_string()))?;

            let before: Ticket = serde_json::from_str(&before_json)
                .map_err(|e| TicketError::Serialization(e.to_string()))?;
            let updates: TicketUpdates = serde_json::from_str(&updates_json)
                .map_err(|e| TicketError::Serialization(e.to_string()))?;

            entries.push(HistoryEntry {
                id,
                ticket_id,
                changed_at: parse_timestamp(&changed_at),
                before,
                updates,
                rationale,
            });
        }

        Ok(entries)
    }
}
