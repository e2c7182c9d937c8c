//! Thing repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Load every persisted Thing at store init.
//! - Rewrite whole records on every mutation, in one transaction per call.
//!
//! # Invariants
//! - Write paths call `Thing::validate()` before SQL mutations.
//! - A record's `id` column always matches the JSON record's `id`.
//!
//! Each save rewrites the full record including all history, so write cost
//! grows with history length.

use crate::db::DbError;
use crate::model::thing::{Thing, ThingId, ThingValidationError};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence error for Thing records.
#[derive(Debug)]
pub enum RepoError {
    Validation(ThingValidationError),
    Db(DbError),
    Encode(serde_json::Error),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode thing record: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted thing data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ThingValidationError> for RepoError {
    fn from(value: ThingValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Persistence contract for Thing records.
pub trait ThingRepository: Send {
    /// Loads every persisted Thing.
    fn load_all(&self) -> RepoResult<Vec<Thing>>;
    /// Writes the given records atomically, replacing existing rows.
    fn write_things(&self, things: &[&Thing]) -> RepoResult<()>;
    /// Removes one record and rewrites the records it detached, atomically.
    fn delete_thing(&self, id: &ThingId, detached: &[&Thing]) -> RepoResult<()>;
}

/// SQLite-backed Thing repository owning its connection.
pub struct SqliteThingRepository {
    conn: Connection,
}

impl SqliteThingRepository {
    /// Wraps a migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl ThingRepository for SqliteThingRepository {
    fn load_all(&self) -> RepoResult<Vec<Thing>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record FROM things ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut things = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let record: String = row.get(1)?;
            things.push(parse_record(&id, &record)?);
        }
        Ok(things)
    }

    fn write_things(&self, things: &[&Thing]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for thing in things {
            upsert_record(&tx, thing)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_thing(&self, id: &ThingId, detached: &[&Thing]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM things WHERE id = ?1;", [id.as_str()])?;
        for thing in detached {
            upsert_record(&tx, thing)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn upsert_record(conn: &Connection, thing: &Thing) -> RepoResult<()> {
    thing.validate()?;
    let record = serde_json::to_string_pretty(thing).map_err(RepoError::Encode)?;
    conn.execute(
        "INSERT INTO things (id, name, type, version, record, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            type = excluded.type,
            version = excluded.version,
            record = excluded.record,
            updated_at = excluded.updated_at;",
        params![
            thing.id.as_str(),
            thing.name.as_str(),
            thing.kind.as_str(),
            thing.version as i64,
            record,
            thing.modified,
        ],
    )?;
    Ok(())
}

fn parse_record(id: &str, record: &str) -> RepoResult<Thing> {
    let thing: Thing = serde_json::from_str(record)
        .map_err(|err| RepoError::InvalidData(format!("record `{id}` is not valid: {err}")))?;
    if thing.id.as_str() != id {
        return Err(RepoError::InvalidData(format!(
            "record stored under `{id}` carries id `{}`",
            thing.id
        )));
    }
    thing.validate()?;
    Ok(thing)
}

#[cfg(test)]
mod tests {
    use super::{RepoError, SqliteThingRepository, ThingRepository};
    use crate::db::open_db_in_memory;
    use crate::model::template::default_components;
    use crate::model::thing::Thing;

    #[test]
    fn write_then_load_returns_same_record() {
        let repo = SqliteThingRepository::new(open_db_in_memory().expect("db"));
        let mut thing = Thing::new("Menu", default_components());
        thing.record_components(default_components(), 42);

        repo.write_things(&[&thing]).expect("write");
        let loaded = repo.load_all().expect("load");
        assert_eq!(loaded, vec![thing]);
    }

    #[test]
    fn rewrite_replaces_existing_row() {
        let repo = SqliteThingRepository::new(open_db_in_memory().expect("db"));
        let mut thing = Thing::new("Menu", default_components());
        repo.write_things(&[&thing]).expect("first write");
        thing.name = "Renamed".to_string();
        repo.write_things(&[&thing]).expect("second write");

        let loaded = repo.load_all().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Renamed");
    }

    #[test]
    fn write_rejects_invalid_record() {
        let repo = SqliteThingRepository::new(open_db_in_memory().expect("db"));
        let mut thing = Thing::new("Broken", default_components());
        thing.version = 3;
        let err = repo.write_things(&[&thing]).expect_err("invalid record");
        assert!(matches!(err, RepoError::Validation(_)));
        assert!(repo.load_all().expect("load").is_empty());
    }

    #[test]
    fn load_rejects_id_mismatch() {
        let conn = open_db_in_memory().expect("db");
        let thing = Thing::new("Menu", default_components());
        let record = serde_json::to_string(&thing).expect("encode");
        conn.execute(
            "INSERT INTO things (id, name, type, version, record) VALUES ('other', 'x', 'generic', 0, ?1);",
            [record],
        )
        .expect("insert");

        let repo = SqliteThingRepository::new(conn);
        let err = repo.load_all().expect_err("mismatched id");
        assert!(matches!(err, RepoError::InvalidData(_)));
    }
}
