use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ratings_core::{Entity, EntityKind, Movie, MovieId, Rating, User, UserId};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

const CREATE_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  user_id INTEGER PRIMARY KEY AUTOINCREMENT,
  age INTEGER,
  zipcode TEXT
);

CREATE TABLE IF NOT EXISTS movies (
  movie_id INTEGER PRIMARY KEY,
  title TEXT NOT NULL,
  released_at TEXT,
  imdb_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ratings (
  rating_id INTEGER PRIMARY KEY,
  user_id INTEGER NOT NULL REFERENCES users(user_id),
  movie_id INTEGER NOT NULL REFERENCES movies(movie_id),
  score INTEGER NOT NULL CHECK (score BETWEEN 1 AND 5)
);

CREATE INDEX IF NOT EXISTS idx_ratings_user_id ON ratings(user_id);
CREATE INDEX IF NOT EXISTS idx_ratings_movie_id ON ratings(movie_id);
";

const USER_SEQUENCE_NAME: &str = "users";

/// SQLite-backed session for reseeding the ratings database.
///
/// Writes open a transaction lazily. Rows passed to [`SqliteStore::stage`] are buffered
/// and only reach the database inside [`SqliteStore::commit`], together with any
/// delete issued earlier in the same transaction.
pub struct SqliteStore {
    conn: Connection,
    staged: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCounts {
    pub users: usize,
    pub movies: usize,
    pub ratings: usize,
}

impl SqliteStore {
    /// Open a SQLite-backed ratings store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        // Users are cleared while ratings still point at them, so keys stay unenforced.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = OFF;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn, staged: Vec::new() })
    }

    /// Create the users, movies and ratings tables when they are missing.
    ///
    /// # Errors
    /// Returns an error when the schema statements fail.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_SCHEMA_SQL).context("failed to create ratings schema")
    }

    /// Delete every row of one entity inside the current transaction.
    ///
    /// # Errors
    /// Returns an error when the transaction cannot be opened or the delete fails.
    pub fn delete_all(&mut self, kind: EntityKind) -> Result<usize> {
        self.begin_if_idle()?;
        self.staged.retain(|entity| entity.kind() != kind);
        self.conn
            .execute(&format!("DELETE FROM {}", kind.table()), [])
            .with_context(|| format!("failed to delete all rows from {}", kind.table()))
    }

    /// Buffer one entity for the next commit.
    pub fn stage(&mut self, entity: impl Into<Entity>) {
        self.staged.push(entity.into());
    }

    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Insert every staged entity and commit the open transaction.
    ///
    /// A failed insert or commit rolls back the whole transaction, including earlier deletes.
    ///
    /// # Errors
    /// Returns an error when an insert or the commit itself fails.
    pub fn commit(&mut self) -> Result<()> {
        self.begin_if_idle()?;
        let staged = std::mem::take(&mut self.staged);

        let result = insert_entities(&self.conn, &staged).and_then(|()| {
            self.conn.execute_batch("COMMIT").context("failed to commit seed transaction")
        });
        if let Err(err) = result {
            return Err(after_rollback(err, self.rollback()));
        }
        Ok(())
    }

    /// Discard staged entities and roll back the open transaction, if any.
    ///
    /// # Errors
    /// Returns an error when the rollback statement fails.
    pub fn rollback(&mut self) -> Result<()> {
        self.staged.clear();
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK").context("failed to roll back seed transaction")?;
        }
        Ok(())
    }

    /// Run one raw parameterized statement inside the current transaction.
    ///
    /// # Errors
    /// Returns an error when the transaction cannot be opened or the statement fails.
    pub fn execute_raw(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        self.begin_if_idle()?;
        self.conn.execute(sql, params).with_context(|| format!("failed to execute `{sql}`"))
    }

    /// Highest seeded user id, or `None` when the users table is empty.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn max_user_id(&self) -> Result<Option<UserId>> {
        let max = self
            .conn
            .query_row("SELECT MAX(user_id) FROM users", [], |row| row.get::<_, Option<i64>>(0))
            .context("failed to query max user_id")?;
        Ok(max.map(UserId))
    }

    /// Point the users auto-increment counter at `next`.
    ///
    /// SQLite stores the last issued id, so the counter row is written as `next - 1`.
    ///
    /// # Errors
    /// Returns an error when `next` is not positive or the counter cannot be written.
    pub fn set_user_id_sequence(&mut self, next: i64) -> Result<()> {
        if next < 1 {
            return Err(anyhow!("user id sequence must start at 1 or above, got {next}"));
        }
        let last_issued = next - 1;

        let updated = self.execute_raw(
            "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
            params![last_issued, USER_SEQUENCE_NAME],
        )?;
        if updated == 0 {
            self.execute_raw(
                "INSERT INTO sqlite_sequence(name, seq) VALUES (?1, ?2)",
                params![USER_SEQUENCE_NAME, last_issued],
            )?;
        }
        Ok(())
    }

    /// The id SQLite will assign to the next user inserted without an explicit id.
    ///
    /// # Errors
    /// Returns an error when the sequence or users table cannot be read.
    pub fn next_user_id(&self) -> Result<UserId> {
        let last_issued = self
            .conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = ?1",
                params![USER_SEQUENCE_NAME],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("failed to read users sequence")?;
        let max_present = self.max_user_id()?.map_or(0, |id| id.0);

        Ok(UserId(last_issued.unwrap_or(0).max(max_present) + 1))
    }

    /// Insert a user and let SQLite generate its id.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn insert_generated_user(&mut self, age: i64, zipcode: &str) -> Result<UserId> {
        self.conn
            .execute("INSERT INTO users(age, zipcode) VALUES (?1, ?2)", params![age, zipcode])
            .context("failed to insert user with generated id")?;
        Ok(UserId(self.conn.last_insert_rowid()))
    }

    /// Number of rows currently stored for one entity.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", kind.table()), [], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count rows in {}", kind.table()))?;
        usize::try_from(count).context("row count does not fit in usize")
    }

    /// Row counts of every seeded table.
    ///
    /// # Errors
    /// Returns an error when any count query fails.
    pub fn table_counts(&self) -> Result<TableCounts> {
        Ok(TableCounts {
            users: self.count(EntityKind::User)?,
            movies: self.count(EntityKind::Movie)?,
            ratings: self.count(EntityKind::Rating)?,
        })
    }

    /// Load all users ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt =
            self.conn.prepare("SELECT user_id, age, zipcode FROM users ORDER BY user_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(User {
                user_id: UserId(row.get(0)?),
                age: row.get(1)?,
                zipcode: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read users")
    }

    /// Load all movies ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or a stored date is malformed.
    pub fn list_movies(&self) -> Result<Vec<Movie>> {
        let mut stmt = self.conn.prepare(
            "SELECT movie_id, title, released_at, imdb_url FROM movies ORDER BY movie_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut movies = Vec::new();

        while let Some(row) = rows.next()? {
            let released_at = row
                .get::<_, Option<String>>(2)?
                .map(|raw| parse_stored_date(&raw))
                .transpose()?;
            movies.push(Movie {
                movie_id: MovieId(row.get(0)?),
                title: row.get(1)?,
                released_at,
                imdb_url: row.get(3)?,
            });
        }

        Ok(movies)
    }

    /// Load all ratings in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_ratings(&self) -> Result<Vec<Rating>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, movie_id, score FROM ratings ORDER BY rating_id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(Rating {
                user_id: UserId(row.get(0)?),
                movie_id: MovieId(row.get(1)?),
                score: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to read ratings")
    }

    fn begin_if_idle(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN IMMEDIATE")
                .context("failed to start seed transaction")?;
        }
        Ok(())
    }
}

fn insert_entities(conn: &Connection, entities: &[Entity]) -> Result<()> {
    for entity in entities {
        match entity {
            Entity::User(user) => {
                conn.prepare_cached(
                    "INSERT INTO users(user_id, age, zipcode) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![user.user_id.0, user.age, user.zipcode])
                .with_context(|| format!("failed to insert user {}", user.user_id))?;
            }
            Entity::Movie(movie) => {
                let released_at = movie.released_at.map(stored_date).transpose()?;
                conn.prepare_cached(
                    "INSERT INTO movies(movie_id, title, released_at, imdb_url)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![movie.movie_id.0, movie.title, released_at, movie.imdb_url])
                .with_context(|| format!("failed to insert movie {}", movie.movie_id))?;
            }
            Entity::Rating(rating) => {
                conn.prepare_cached(
                    "INSERT INTO ratings(user_id, movie_id, score) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![rating.user_id.0, rating.movie_id.0, rating.score])
                .with_context(|| {
                    format!(
                        "failed to insert rating of movie {} by user {}",
                        rating.movie_id, rating.user_id
                    )
                })?;
            }
        }
    }
    Ok(())
}

/// Keep the failure that triggered a rollback visible when the rollback fails too.
fn after_rollback(cause: anyhow::Error, rollback: Result<()>) -> anyhow::Error {
    match rollback {
        Ok(()) => cause,
        Err(rollback_err) => rollback_err.context(format!("rollback after failed write: {cause:#}")),
    }
}

fn stored_date(value: Date) -> Result<String> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .context("failed to format release date")
}

fn parse_stored_date(value: &str) -> Result<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid stored release date: {value}"))
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn open_seeded_schema() -> Result<SqliteStore> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.ensure_schema()?;
        Ok(store)
    }

    fn user(id: i64) -> User {
        User { user_id: UserId(id), age: 30, zipcode: format!("{id:05}") }
    }

    #[test]
    fn ensure_schema_is_a_no_op_when_tables_exist() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(1));
        store.commit()?;

        store.ensure_schema()?;
        assert_eq!(store.count(EntityKind::User)?, 1);
        Ok(())
    }

    #[test]
    fn staged_rows_are_invisible_until_commit() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(1));
        store.stage(user(2));

        assert_eq!(store.staged_len(), 2);
        assert_eq!(store.count(EntityKind::User)?, 0);

        store.commit()?;
        assert_eq!(store.staged_len(), 0);
        assert_eq!(store.count(EntityKind::User)?, 2);
        Ok(())
    }

    #[test]
    fn delete_then_insert_replaces_table_contents() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(1));
        store.stage(user(2));
        store.commit()?;

        assert_eq!(store.delete_all(EntityKind::User)?, 2);
        store.stage(user(7));
        store.commit()?;

        let ids = store.list_users()?.into_iter().map(|user| user.user_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![UserId(7)]);
        Ok(())
    }

    #[test]
    fn failed_insert_rolls_back_the_preceding_delete() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(1));
        store.commit()?;

        store.delete_all(EntityKind::User)?;
        store.stage(user(2));
        store.stage(user(2));
        let Err(err) = store.commit() else {
            return Err(anyhow!("expected duplicate user id to fail the commit"));
        };

        assert!(format!("{err:#}").contains("failed to insert user 2"));
        assert!(store.conn.is_autocommit());
        let ids = store.list_users()?.into_iter().map(|user| user.user_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![UserId(1)]);
        Ok(())
    }

    #[test]
    fn failed_rollback_keeps_the_write_error() {
        let err = after_rollback(
            anyhow!("failed to insert user 2"),
            Err(anyhow!("failed to roll back seed transaction")),
        );

        let message = format!("{err:#}");
        assert!(message.contains("failed to insert user 2"), "{message}");
        assert!(message.contains("failed to roll back seed transaction"), "{message}");
    }

    #[test]
    fn successful_rollback_returns_the_write_error_unchanged() {
        let err = after_rollback(anyhow!("failed to insert user 2"), Ok(()));
        assert_eq!(format!("{err:#}"), "failed to insert user 2");
    }

    #[test]
    fn negative_age_round_trips() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(User { user_id: UserId(1), age: -3, zipcode: "85711".to_string() });
        store.commit()?;

        assert_eq!(store.list_users()?[0].age, -3);
        Ok(())
    }

    #[test]
    fn explicit_rollback_discards_staged_rows_and_delete() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(1));
        store.commit()?;

        store.delete_all(EntityKind::User)?;
        store.stage(user(3));
        store.rollback()?;

        assert_eq!(store.staged_len(), 0);
        assert_eq!(store.count(EntityKind::User)?, 1);
        Ok(())
    }

    #[test]
    fn max_user_id_is_none_on_empty_table() -> Result<()> {
        let store = open_seeded_schema()?;
        assert_eq!(store.max_user_id()?, None);
        Ok(())
    }

    #[test]
    fn sequence_reset_puts_next_generated_id_after_max() -> Result<()> {
        let mut store = open_seeded_schema()?;
        for id in [1, 2, 5] {
            store.stage(user(id));
        }
        store.commit()?;

        let max = store.max_user_id()?.map_or(0, |id| id.0);
        store.set_user_id_sequence(max + 1)?;
        store.commit()?;

        assert_eq!(store.next_user_id()?, UserId(6));
        assert_eq!(store.insert_generated_user(41, "94110")?, UserId(6));
        Ok(())
    }

    #[test]
    fn sequence_reset_lowers_a_counter_left_by_an_earlier_run() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(943));
        store.commit()?;

        store.delete_all(EntityKind::User)?;
        for id in [1, 2, 5] {
            store.stage(user(id));
        }
        store.commit()?;
        assert_eq!(store.next_user_id()?, UserId(944));

        store.set_user_id_sequence(6)?;
        store.commit()?;
        assert_eq!(store.insert_generated_user(20, "10001")?, UserId(6));
        Ok(())
    }

    #[test]
    fn sequence_reset_rejects_non_positive_ids() -> Result<()> {
        let mut store = open_seeded_schema()?;
        let Err(err) = store.set_user_id_sequence(0) else {
            return Err(anyhow!("expected zero to be rejected"));
        };
        assert!(err.to_string().contains("must start at 1"));
        Ok(())
    }

    #[test]
    fn movies_round_trip_optional_release_dates() -> Result<()> {
        let mut store = open_seeded_schema()?;
        let dated = Movie {
            movie_id: MovieId(1),
            title: "Toy Story".to_string(),
            released_at: Some(date!(1995 - 01 - 01)),
            imdb_url: "http://us.imdb.com/M/title-exact?Toy%20Story%20".to_string(),
        };
        let undated = Movie {
            movie_id: MovieId(267),
            title: String::new(),
            released_at: None,
            imdb_url: String::new(),
        };
        store.stage(dated.clone());
        store.stage(undated.clone());
        store.commit()?;

        assert_eq!(store.list_movies()?, vec![dated, undated]);
        let stored: Option<String> = store.conn.query_row(
            "SELECT released_at FROM movies WHERE movie_id = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(stored.as_deref(), Some("1995-01-01"));
        Ok(())
    }

    #[test]
    fn rating_scores_outside_one_to_five_violate_the_schema() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(Rating { user_id: UserId(1), movie_id: MovieId(1), score: 9 });
        assert!(store.commit().is_err());
        assert_eq!(store.count(EntityKind::Rating)?, 0);
        Ok(())
    }

    #[test]
    fn deleting_users_with_ratings_present_succeeds() -> Result<()> {
        let mut store = open_seeded_schema()?;
        store.stage(user(196));
        store.stage(Rating { user_id: UserId(196), movie_id: MovieId(242), score: 3 });
        store.commit()?;

        assert_eq!(store.delete_all(EntityKind::User)?, 1);
        store.commit()?;
        assert_eq!(
            store.table_counts()?,
            TableCounts { users: 0, movies: 0, ratings: 1 }
        );
        Ok(())
    }
}
