use std::path::Path;

use anyhow::{Context, Result};
use ratings_core::{
    parse_movie_line, parse_rating_line, parse_user_line, Entity, EntityKind, ParseError,
};
use tracing::{debug, info};

use crate::session::SeedSession;
use crate::source::SourceLines;

/// Clear every row of `kind` ahead of a reload.
///
/// The delete joins the open transaction, so it is undone if the reload fails.
///
/// # Errors
/// Returns an error when the delete cannot be issued.
pub fn reset_entity<S: SeedSession + ?Sized>(session: &mut S, kind: EntityKind) -> Result<usize> {
    let removed = session
        .delete_all(kind)
        .with_context(|| format!("failed to reset {}", kind.table()))?;
    debug!(table = kind.table(), removed, "cleared existing rows");
    Ok(removed)
}

/// Reload the users table from `u.user`.
///
/// # Errors
/// Returns an error on unreadable files, malformed lines or persistence failures.
pub fn load_users<S: SeedSession + ?Sized>(session: &mut S, path: &Path) -> Result<usize> {
    load_entity(session, EntityKind::User, path, |line| parse_user_line(line).map(Entity::from))
}

/// Reload the movies table from `u.item`.
///
/// # Errors
/// Returns an error on unreadable files, malformed lines or persistence failures.
pub fn load_movies<S: SeedSession + ?Sized>(session: &mut S, path: &Path) -> Result<usize> {
    load_entity(session, EntityKind::Movie, path, |line| parse_movie_line(line).map(Entity::from))
}

/// Reload the ratings table from `u.data`.
///
/// # Errors
/// Returns an error on unreadable files, malformed lines or persistence failures.
pub fn load_ratings<S: SeedSession + ?Sized>(session: &mut S, path: &Path) -> Result<usize> {
    load_entity(session, EntityKind::Rating, path, |line| {
        parse_rating_line(line).map(Entity::from)
    })
}

fn load_entity<S, F>(session: &mut S, kind: EntityKind, path: &Path, parse: F) -> Result<usize>
where
    S: SeedSession + ?Sized,
    F: Fn(&str) -> Result<Entity, ParseError>,
{
    let staged = match reset_and_stage(session, kind, path, parse) {
        Ok(staged) => staged,
        Err(err) => {
            session
                .rollback()
                .with_context(|| format!("failed to roll back {} reload", kind.table()))?;
            return Err(err);
        }
    };

    session.commit().with_context(|| format!("failed to commit {} reload", kind.table()))?;
    info!(table = kind.table(), rows = staged, "reloaded");
    Ok(staged)
}

fn reset_and_stage<S, F>(session: &mut S, kind: EntityKind, path: &Path, parse: F) -> Result<usize>
where
    S: SeedSession + ?Sized,
    F: Fn(&str) -> Result<Entity, ParseError>,
{
    reset_entity(session, kind)?;

    let lines = SourceLines::open(path)?;
    let mut staged = 0_usize;
    for line in lines {
        let line = line?;
        let entity = parse(&line.text).with_context(|| {
            format!("invalid {} record at {}:{}", kind.as_str(), path.display(), line.number)
        })?;
        session.add(entity)?;
        staged += 1;
    }

    Ok(staged)
}
