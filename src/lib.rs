//! Cronista - in-process call-tree profiler with build-aware statistics
//!
//! Instrumentation points mark the entry and exit of logical scopes
//! (typically functions). Finished measurements are folded incrementally into
//! a persistent statistics tree keyed by scope name and build fingerprint, so
//! timings from different compiled variants of the same program never mix.
//! The tree is periodically rendered into a hierarchical report file.
//!
//! ```no_run
//! use cronista::{BuildFingerprint, ProfilerConfig};
//! use std::time::Duration;
//!
//! cronista::configure(ProfilerConfig::new("profiling.md", Duration::from_secs(1)));
//!
//! fn update_world() {
//!     cronista::profile_fn!();
//!     // ... measured work ...
//! }
//!
//! let _main = cronista::start("main", BuildFingerprint::current());
//! update_world();
//! ```

pub mod build_id;
pub mod config;
pub mod measurement;
pub mod profiler;
pub mod report;
pub mod results;

pub use build_id::{BuildFingerprint, Property};
pub use config::ProfilerConfig;
pub use profiler::{configure, finish, start, with_profiler, ScopeGuard};

/// Measure the rest of the enclosing block as one scope.
///
/// Expands to a named guard binding, so at most one invocation per block.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _cronista_scope_guard =
            $crate::profiler::start($name, $crate::build_id::BuildFingerprint::current());
    };
}

/// Measure the rest of the enclosing function, named after it.
#[macro_export]
macro_rules! profile_fn {
    () => {
        let _cronista_scope_guard = {
            struct Here;
            let name = ::core::any::type_name::<Here>();
            let name = name.strip_suffix("::Here").unwrap_or(name);
            $crate::profiler::start(name, $crate::build_id::BuildFingerprint::current())
        };
    };
}
