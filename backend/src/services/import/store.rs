//! SQLite persistence for imported board content.
//!
//! The import worker opens one connection per import and runs every write of
//! a chunk inside a single transaction. Name lookups (columns, cards,
//! labels) are case-insensitive, mirroring how users type into a sheet.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS board_columns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    position INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS cards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    column_id INTEGER NOT NULL REFERENCES board_columns(id),
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    position INTEGER NOT NULL,
    due_date TEXT,
    priority TEXT,
    assignee_email TEXT,
    parent_card_id INTEGER REFERENCES cards(id),
    archived INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS labels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    board_id INTEGER NOT NULL,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS card_labels (
    card_id INTEGER NOT NULL REFERENCES cards(id),
    label_id INTEGER NOT NULL REFERENCES labels(id),
    PRIMARY KEY (card_id, label_id)
);
CREATE TABLE IF NOT EXISTS checklist_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id INTEGER NOT NULL REFERENCES cards(id),
    content TEXT NOT NULL,
    checked INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL
);
";

/// Location of the board database. Cheap to clone into worker threads.
#[derive(Clone, Debug)]
pub struct BoardStore {
    path: PathBuf,
}

/// Card fields taken from one sheet row.
#[derive(Debug, Default)]
pub struct CardFields<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub position: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub priority: &'a str,
    pub assignee_email: &'a str,
}

impl BoardStore {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema.
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.connect()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn connect(&self) -> rusqlite::Result<Connection> {
        Connection::open(&self.path)
    }
}

/// Finds the board's column by name, creating it when missing.
pub fn resolve_column(
    conn: &Connection,
    board_id: i64,
    name: &str,
    position: Option<i64>,
) -> rusqlite::Result<i64> {
    let existing = conn
        .query_row(
            "SELECT id FROM board_columns WHERE board_id = ?1 AND lower(name) = lower(?2)",
            params![board_id, name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            if let Some(position) = position {
                conn.execute(
                    "UPDATE board_columns SET position = ?1 WHERE id = ?2",
                    params![position, id],
                )?;
            }
            Ok(id)
        }
        None => {
            let position = match position {
                Some(position) => position,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM board_columns WHERE board_id = ?1",
                    params![board_id],
                    |row| row.get(0),
                )?,
            };
            conn.execute(
                "INSERT INTO board_columns (board_id, name, position) VALUES (?1, ?2, ?3)",
                params![board_id, name, position],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Archives every live card on the board. Returns how many were archived.
pub fn archive_board_cards(conn: &Connection, board_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE cards SET archived = 1
         WHERE archived = 0
           AND column_id IN (SELECT id FROM board_columns WHERE board_id = ?1)",
        params![board_id],
    )
}

/// Updates the card with the same title in the column, or inserts a new one.
/// An archived match is revived.
pub fn upsert_card(conn: &Connection, column_id: i64, card: &CardFields<'_>) -> rusqlite::Result<i64> {
    let existing = conn
        .query_row(
            "SELECT id, position FROM cards WHERE column_id = ?1 AND lower(title) = lower(?2)
             ORDER BY archived ASC, id ASC LIMIT 1",
            params![column_id, card.title],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    let due_date = card.due_date.map(|d| d.format("%Y-%m-%d").to_string());
    let priority = non_empty(card.priority);
    let assignee = non_empty(card.assignee_email);

    match existing {
        Some((id, current_position)) => {
            conn.execute(
                "UPDATE cards SET title = ?1, description = ?2, position = ?3, due_date = ?4,
                 priority = COALESCE(?5, priority), assignee_email = ?6, archived = 0
                 WHERE id = ?7",
                params![
                    card.title,
                    card.description,
                    card.position.unwrap_or(current_position),
                    due_date,
                    priority,
                    assignee,
                    id
                ],
            )?;
            Ok(id)
        }
        None => {
            let position = match card.position {
                Some(position) => position,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM cards WHERE column_id = ?1 AND archived = 0",
                    params![column_id],
                    |row| row.get(0),
                )?,
            };
            conn.execute(
                "INSERT INTO cards (column_id, title, description, position, due_date, priority, assignee_email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    column_id,
                    card.title,
                    card.description,
                    position,
                    due_date,
                    priority,
                    assignee
                ],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Finds the card named `title` that `card_id` should hang under: first in
/// the same column, then anywhere on the board. Live cards win over archived
/// ones and a card is never its own parent.
pub fn find_parent_card(
    conn: &Connection,
    board_id: i64,
    column_id: i64,
    card_id: i64,
    title: &str,
) -> rusqlite::Result<Option<i64>> {
    let in_column = conn
        .query_row(
            "SELECT id FROM cards
             WHERE column_id = ?1 AND lower(title) = lower(?2) AND id != ?3
             ORDER BY archived ASC, id ASC LIMIT 1",
            params![column_id, title, card_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if in_column.is_some() {
        return Ok(in_column);
    }

    conn.query_row(
        "SELECT cards.id FROM cards
         JOIN board_columns ON board_columns.id = cards.column_id
         WHERE board_columns.board_id = ?1 AND lower(cards.title) = lower(?2) AND cards.id != ?3
         ORDER BY cards.archived ASC, cards.id ASC LIMIT 1",
        params![board_id, title, card_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
}

pub fn set_parent_card(conn: &Connection, card_id: i64, parent_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE cards SET parent_card_id = ?1 WHERE id = ?2",
        params![parent_id, card_id],
    )?;
    Ok(())
}

/// Finds the board's label by name, creating it when missing.
pub fn resolve_label(conn: &Connection, board_id: i64, name: &str) -> rusqlite::Result<i64> {
    let existing = conn
        .query_row(
            "SELECT id FROM labels WHERE board_id = ?1 AND lower(name) = lower(?2)",
            params![board_id, name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO labels (board_id, name) VALUES (?1, ?2)",
        params![board_id, name],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Replaces the card's label set.
pub fn set_card_labels(conn: &Connection, card_id: i64, label_ids: &[i64]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM card_labels WHERE card_id = ?1", params![card_id])?;
    for label_id in label_ids {
        conn.execute(
            "INSERT OR IGNORE INTO card_labels (card_id, label_id) VALUES (?1, ?2)",
            params![card_id, label_id],
        )?;
    }
    Ok(())
}

/// Replaces the card's checklist. Items without a matching state are
/// unchecked.
pub fn replace_checklist(
    conn: &Connection,
    card_id: i64,
    items: &[String],
    states: &[bool],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM checklist_items WHERE card_id = ?1", params![card_id])?;
    for (position, content) in items.iter().enumerate() {
        let checked = states.get(position).copied().unwrap_or(false);
        conn.execute(
            "INSERT INTO checklist_items (card_id, content, checked, position) VALUES (?1, ?2, ?3, ?4)",
            params![card_id, content, checked, position as i64],
        )?;
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BoardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BoardStore::open(dir.path().join("board.sqlite")).unwrap();
        (dir, store)
    }

    #[test]
    fn columns_and_labels_are_resolved_by_name() {
        let (_dir, store) = store();
        let conn = store.connect().unwrap();

        let todo = resolve_column(&conn, 7, "Todo", None).unwrap();
        assert_eq!(resolve_column(&conn, 7, "TODO", None).unwrap(), todo);
        assert_ne!(resolve_column(&conn, 8, "Todo", None).unwrap(), todo);

        let bug = resolve_label(&conn, 7, "Bug").unwrap();
        assert_eq!(resolve_label(&conn, 7, "bug").unwrap(), bug);
    }

    #[test]
    fn cards_are_upserted_by_title_and_archiving_is_undone() {
        let (_dir, store) = store();
        let conn = store.connect().unwrap();
        let column = resolve_column(&conn, 1, "Todo", None).unwrap();

        let first = CardFields {
            title: "Write docs",
            description: "v1",
            ..Default::default()
        };
        let id = upsert_card(&conn, column, &first).unwrap();
        assert_eq!(archive_board_cards(&conn, 1).unwrap(), 1);

        let second = CardFields {
            title: "write DOCS",
            description: "v2",
            ..Default::default()
        };
        assert_eq!(upsert_card(&conn, column, &second).unwrap(), id);

        let (description, archived): (String, bool) = conn
            .query_row(
                "SELECT description, archived FROM cards WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(description, "v2");
        assert!(!archived);
    }

    #[test]
    fn checklist_is_replaced_with_states() {
        let (_dir, store) = store();
        let conn = store.connect().unwrap();
        let column = resolve_column(&conn, 1, "Todo", None).unwrap();
        let card = upsert_card(
            &conn,
            column,
            &CardFields {
                title: "Release",
                ..Default::default()
            },
        )
        .unwrap();

        replace_checklist(&conn, card, &["old".to_string()], &[]).unwrap();
        replace_checklist(&conn, card, &["tag".to_string(), "publish".to_string()], &[true])
            .unwrap();

        let mut stmt = conn
            .prepare("SELECT content, checked FROM checklist_items WHERE card_id = ?1 ORDER BY position")
            .unwrap();
        let items: Vec<(String, bool)> = stmt
            .query_map(params![card], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            items,
            vec![("tag".to_string(), true), ("publish".to_string(), false)]
        );
    }

    #[test]
    fn archiving_covers_every_column_of_the_board_only() {
        let (_dir, store) = store();
        let conn = store.connect().unwrap();
        let todo = resolve_column(&conn, 1, "Todo", None).unwrap();
        let done = resolve_column(&conn, 1, "Done", None).unwrap();
        let elsewhere = resolve_column(&conn, 2, "Todo", None).unwrap();
        for column in [todo, done, elsewhere] {
            upsert_card(
                &conn,
                column,
                &CardFields {
                    title: "Card",
                    ..Default::default()
                },
            )
            .unwrap();
        }

        assert_eq!(archive_board_cards(&conn, 1).unwrap(), 2);
        assert_eq!(archive_board_cards(&conn, 1).unwrap(), 0);
        let live: i64 = conn
            .query_row("SELECT COUNT(*) FROM cards WHERE archived = 0", [], |row| row.get(0))
            .unwrap();
        assert_eq!(live, 1);
    }

    #[test]
    fn parent_is_looked_up_in_column_first_then_on_board() {
        let (_dir, store) = store();
        let conn = store.connect().unwrap();
        let todo = resolve_column(&conn, 1, "Todo", None).unwrap();
        let done = resolve_column(&conn, 1, "Done", None).unwrap();
        let card = |column: i64, title: &str| {
            upsert_card(
                &conn,
                column,
                &CardFields {
                    title,
                    ..Default::default()
                },
            )
            .unwrap()
        };
        let todo_epic = card(todo, "Epic");
        let done_epic = card(done, "Epic");
        let task = card(done, "Task");

        assert_eq!(find_parent_card(&conn, 1, done, task, "epic").unwrap(), Some(done_epic));
        assert_eq!(find_parent_card(&conn, 1, todo, task, "Epic").unwrap(), Some(todo_epic));
        assert_eq!(find_parent_card(&conn, 1, done, done_epic, "Epic").unwrap(), Some(todo_epic));
        assert_eq!(find_parent_card(&conn, 1, done, task, "Missing").unwrap(), None);
        let other_board = resolve_column(&conn, 2, "Todo", None).unwrap();
        assert_eq!(find_parent_card(&conn, 2, other_board, task, "Epic").unwrap(), None);

        set_parent_card(&conn, task, done_epic).unwrap();
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_card_id FROM cards WHERE id = ?1",
                params![task],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(parent, Some(done_epic));
    }
}
