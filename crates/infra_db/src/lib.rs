//! Infrastructure Database Layer
//!
//! This crate persists the recurring billing lifecycle on PostgreSQL using
//! SQLx, and hosts the batch job that turns staged charges into bill items.
//!
//! # Architecture
//!
//! The crate follows the repository pattern. Repositories are stateless and
//! receive the executor per call, so callers decide the transaction
//! boundary; the domain rules they enforce live in `domain_billing`.
//!
//! # Consistency
//!
//! - at most one latest bill item per subscription (partial unique index)
//! - at most one live upcoming item per order, product and period
//! - compare-and-set updates on `student_product.version_number`
//! - non-overlapping periods and ratios (exclusion constraints)
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, GenerationJob, GenerationConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/tuition_billing")).await?;
//! run_migrations(&pool).await?;
//! let report = GenerationJob::new(pool, GenerationConfig::default()).run(Utc::now()).await?;
//! ```

pub mod pool;
pub mod error;
pub mod enums;
pub mod repositories;
pub mod generation;

pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use error::{DatabaseError, OperationContext};
pub use generation::{GenerationConfig, GenerationJob, GenerationReport};
pub use repositories::*;
