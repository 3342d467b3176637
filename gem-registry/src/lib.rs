//! # Gem Registry Server
//!
//! A private RubyGems-compatible registry. Clients push archives into a private
//! namespace, and an optional pull-through mirror caches packages from an
//! upstream registry behind a name filter and a vulnerability gate.
//!
//! ## Features
//!
//! - **Binary index**: `specs.4.8.gz`, `latest_specs.4.8.gz` and
//!   `prerelease_specs.4.8.gz` in Marshal 4.8, plus per-version gemspecs
//! - **Compact index**: `/names`, `/versions` and `/info/{name}` for bundler
//! - **Dependency API**: `/api/v1/dependencies` in binary and JSON form
//! - **Mirror**: single-flight fetches, name filtering and advisory checks
//!
//! ## Key Modules
//!
//! - [`spec`]: reading `.gem` archives into [`spec::PackageMetadata`]
//! - [`marshal`]: the Marshal 4.8 encoder for index artifacts
//! - [`compact_index`]: text index documents built from the store
//! - [`store`]: the embedded metadata store
//! - [`indexer`]: index artifact generation and the background reindex queue
//! - [`mirror`]: the pull-through cache
//! - [`filter`] and [`advisory`]: admission rules for mirrored packages
//! - [`server`]: routing and startup

pub mod advisory;
pub mod compact_index;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod indexer;
pub mod marshal;
pub mod mirror;
pub mod server;
pub mod spec;
pub mod state;
pub mod storage;
pub mod store;
pub mod upstream;
pub mod version;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use server::{build_router, rebuild_all, run_server};
pub use state::{AppState, SuccessResponse};
