//! Push Registration Storage
//!
//! Diesel-based storage for push service registrations.

mod error;
mod models;
mod schema;
mod sqlite;
mod traits;

pub use error::StorageError;
pub use models::*;
pub use sqlite::SqliteStorage;
pub use traits::*;

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
