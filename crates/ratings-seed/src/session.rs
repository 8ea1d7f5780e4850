use anyhow::Result;
use ratings_core::{Entity, EntityKind, UserId};
use ratings_store_sqlite::SqliteStore;

/// Unit of work shared by every seeding step.
///
/// Deletes and staged rows accumulate in one transaction until `commit`; `rollback`
/// restores the state of the last commit.
pub trait SeedSession {
    /// Remove every row of `kind`, returning how many rows the delete touched.
    ///
    /// # Errors
    /// Returns an error when the delete cannot be issued.
    fn delete_all(&mut self, kind: EntityKind) -> Result<usize>;

    /// Stage one entity for the next commit.
    ///
    /// # Errors
    /// Returns an error when the backend refuses the entity.
    fn add(&mut self, entity: Entity) -> Result<()>;

    /// # Errors
    /// Returns an error when staged work cannot be made durable.
    fn commit(&mut self) -> Result<()>;

    /// # Errors
    /// Returns an error when the open transaction cannot be discarded.
    fn rollback(&mut self) -> Result<()>;

    /// # Errors
    /// Returns an error when the aggregate query fails.
    fn max_user_id(&mut self) -> Result<Option<UserId>>;

    /// Make `next` the id handed to the next user inserted without an explicit id.
    ///
    /// # Errors
    /// Returns an error when the counter cannot be written.
    fn set_user_id_sequence(&mut self, next: i64) -> Result<()>;
}

impl SeedSession for SqliteStore {
    fn delete_all(&mut self, kind: EntityKind) -> Result<usize> {
        SqliteStore::delete_all(self, kind)
    }

    fn add(&mut self, entity: Entity) -> Result<()> {
        self.stage(entity);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        SqliteStore::commit(self)
    }

    fn rollback(&mut self) -> Result<()> {
        SqliteStore::rollback(self)
    }

    fn max_user_id(&mut self) -> Result<Option<UserId>> {
        SqliteStore::max_user_id(self)
    }

    fn set_user_id_sequence(&mut self, next: i64) -> Result<()> {
        SqliteStore::set_user_id_sequence(self, next)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use anyhow::{anyhow, Result};
    use ratings_core::{Entity, EntityKind, UserId};

    use super::SeedSession;

    /// Transactional in-memory session used to exercise the loaders without SQLite.
    #[derive(Debug, Default)]
    pub(crate) struct MemorySession {
        pub(crate) rows: Vec<Entity>,
        pub(crate) next_user_id: Option<i64>,
        pub(crate) commits: usize,
        pub(crate) fail_next_commit: bool,
        pending_deletes: Vec<EntityKind>,
        staged: Vec<Entity>,
        pending_sequence: Option<i64>,
    }

    impl MemorySession {
        pub(crate) fn with_rows(rows: Vec<Entity>) -> Self {
            Self { rows, ..Self::default() }
        }

        pub(crate) fn failing_next_commit() -> Self {
            Self { fail_next_commit: true, ..Self::default() }
        }

        pub(crate) fn rows_of(&self, kind: EntityKind) -> Vec<&Entity> {
            self.rows.iter().filter(|entity| entity.kind() == kind).collect()
        }

        pub(crate) fn staged_len(&self) -> usize {
            self.staged.len()
        }
    }

    impl SeedSession for MemorySession {
        fn delete_all(&mut self, kind: EntityKind) -> Result<usize> {
            self.pending_deletes.push(kind);
            self.staged.retain(|entity| entity.kind() != kind);
            Ok(self.rows_of(kind).len())
        }

        fn add(&mut self, entity: Entity) -> Result<()> {
            self.staged.push(entity);
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            if self.fail_next_commit {
                self.fail_next_commit = false;
                self.rollback()?;
                return Err(anyhow!("simulated commit failure"));
            }
            for kind in std::mem::take(&mut self.pending_deletes) {
                self.rows.retain(|entity| entity.kind() != kind);
            }
            self.rows.append(&mut self.staged);
            if let Some(next) = self.pending_sequence.take() {
                self.next_user_id = Some(next);
            }
            self.commits += 1;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.pending_deletes.clear();
            self.staged.clear();
            self.pending_sequence = None;
            Ok(())
        }

        fn max_user_id(&mut self) -> Result<Option<UserId>> {
            Ok(self
                .rows
                .iter()
                .filter_map(|entity| match entity {
                    Entity::User(user) => Some(user.user_id),
                    _ => None,
                })
                .max())
        }

        fn set_user_id_sequence(&mut self, next: i64) -> Result<()> {
            self.pending_sequence = Some(next);
            Ok(())
        }
    }
}
