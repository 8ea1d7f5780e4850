//! Reseeds the ratings database from the MovieLens 100K source files.
//!
//! Each entity is cleared and reloaded inside its own transaction, in the order
//! given by [`SeedStep::ORDER`], and the users id counter is moved past the
//! seeded ids once the users table is final.

pub mod loader;
pub mod pipeline;
pub mod sequence;
pub mod session;
pub mod source;

pub use loader::{load_movies, load_ratings, load_users, reset_entity};
pub use pipeline::{
    run_pipeline, seed_database, LoadedRows, SeedPaths, SeedReport, SeedRun, SeedStep,
    MOVIES_FILE, RATINGS_FILE, USERS_FILE,
};
pub use sequence::synchronize_user_sequence;
pub use session::SeedSession;
pub use source::{SourceLine, SourceLines};

pub const SEED_CONTRACT_VERSION: &str = "seed.v1";
