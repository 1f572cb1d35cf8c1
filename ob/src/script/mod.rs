//! Command scripts
//!
//! A script is loaded once into a flat, include-expanded [`Script`] and then
//! re-interpreted as many times as the run requires.

pub mod directive;
pub mod error;
pub mod loader;

pub use directive::Directive;
pub use error::LoadError;
pub use loader::{Script, load_script, normalize_hey};
