use anyhow::{anyhow, Context, Result};
use ratings_core::UserId;
use tracing::info;

use crate::session::SeedSession;

/// Move the users id counter past every seeded id and return the next id it will issue.
///
/// Seeded users carry explicit ids, so the counter is left wherever the previous
/// run put it. After this call an insert without an id receives `max(user_id) + 1`.
///
/// # Errors
/// Returns an error when the users table is empty or the counter cannot be written.
pub fn synchronize_user_sequence<S: SeedSession + ?Sized>(session: &mut S) -> Result<UserId> {
    let max = session
        .max_user_id()?
        .ok_or_else(|| anyhow!("cannot synchronize user id sequence: users table is empty"))?;
    let next = max
        .0
        .checked_add(1)
        .ok_or_else(|| anyhow!("user id {max} leaves no room for a next id"))?;

    if let Err(err) = session.set_user_id_sequence(next) {
        session.rollback().context("failed to roll back user id sequence update")?;
        return Err(err);
    }
    session.commit().context("failed to commit user id sequence")?;

    info!(next_user_id = next, "synchronized user id sequence");
    Ok(UserId(next))
}
