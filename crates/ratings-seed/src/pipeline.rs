use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ratings_core::UserId;
use ratings_store_sqlite::{SqliteStore, TableCounts};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::loader::{load_movies, load_ratings, load_users};
use crate::sequence::synchronize_user_sequence;
use crate::session::SeedSession;

pub const USERS_FILE: &str = "u.user";
pub const MOVIES_FILE: &str = "u.item";
pub const RATINGS_FILE: &str = "u.data";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeedStep {
    Users,
    Movies,
    Ratings,
    UserSequence,
}

impl SeedStep {
    /// Ratings reference users and movies; the sequence needs the final users table.
    pub const ORDER: [Self; 4] = [Self::Users, Self::Movies, Self::Ratings, Self::UserSequence];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Movies => "movies",
            Self::Ratings => "ratings",
            Self::UserSequence => "user_sequence",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Users => "Users",
            Self::Movies => "Movies",
            Self::Ratings => "Ratings",
            Self::UserSequence => "User sequence",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedPaths {
    pub users: PathBuf,
    pub movies: PathBuf,
    pub ratings: PathBuf,
}

impl SeedPaths {
    /// The MovieLens 100K file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            users: dir.join(USERS_FILE),
            movies: dir.join(MOVIES_FILE),
            ratings: dir.join(RATINGS_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadedRows {
    pub step: SeedStep,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedReport {
    pub loaded: Vec<LoadedRows>,
    pub next_user_id: Option<UserId>,
    pub last_completed: Option<SeedStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRun {
    #[serde(flatten)]
    pub report: SeedReport,
    pub tables: TableCounts,
}

/// Run every step of [`SeedStep::ORDER`] against `session`, stopping at the first failure.
///
/// Steps that completed before a failure stay committed.
///
/// # Errors
/// Returns the failing step's error, annotated with that step and the last completed one.
pub fn run_pipeline<S: SeedSession + ?Sized>(
    session: &mut S,
    paths: &SeedPaths,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for step in SeedStep::ORDER {
        info!(step = step.as_str(), "{}", step.label());
        run_step(session, paths, step, &mut report)
            .with_context(|| failure_context(step, report.last_completed))?;
        report.last_completed = Some(step);
    }

    Ok(report)
}

fn run_step<S: SeedSession + ?Sized>(
    session: &mut S,
    paths: &SeedPaths,
    step: SeedStep,
    report: &mut SeedReport,
) -> Result<()> {
    let rows = match step {
        SeedStep::Users => load_users(session, &paths.users)?,
        SeedStep::Movies => load_movies(session, &paths.movies)?,
        SeedStep::Ratings => load_ratings(session, &paths.ratings)?,
        SeedStep::UserSequence => {
            report.next_user_id = Some(synchronize_user_sequence(session)?);
            return Ok(());
        }
    };
    report.loaded.push(LoadedRows { step, rows });
    Ok(())
}

fn failure_context(step: SeedStep, last_completed: Option<SeedStep>) -> String {
    match last_completed {
        Some(done) => format!(
            "seed step `{}` failed after `{}` completed",
            step.as_str(),
            done.as_str()
        ),
        None => format!("seed step `{}` failed before any step completed", step.as_str()),
    }
}

/// Open the database at `db`, create the schema if needed and reseed it from `paths`.
///
/// # Errors
/// Returns an error when the database cannot be prepared or any step fails.
pub fn seed_database(db: &Path, paths: &SeedPaths) -> Result<SeedRun> {
    let mut store = SqliteStore::open(db)?;
    store.ensure_schema()?;

    let report = run_pipeline(&mut store, paths)?;
    let tables = store.table_counts()?;
    Ok(SeedRun { report, tables })
}
