//! Ruby Marshal 4.8 output for the binary parts of the RubyGems protocol:
//! the `specs.4.8` indexes, `quick/Marshal.4.8` gemspecs and the bundler
//! dependency API.

mod deps;
mod gemspec;
mod specs;
mod writer;

pub use deps::{encode_dependencies, BundlerDependency};
pub use gemspec::{encode_gemspec, encode_gemspec_rz};
pub use specs::{decode_specs, encode_specs, IndexEntry};
pub use writer::{dump, Value, Writer};
