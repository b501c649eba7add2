//! Database layer
//!
//! SQLite through SQLx: the pool wrapper, code-embedded migrations and one
//! repository per table family.
//!
//! # Usage
//!
//! ```ignore
//! use agora::config::DatabaseConfig;
//! use agora::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//!
//! let mut tx = pool.begin().await?;
//! // repository calls with `&mut *tx`
//! tx.commit().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DynDatabasePool, SqliteDatabase};
