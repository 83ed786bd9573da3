#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod cluster;
pub mod fetcher;
pub mod fingerprint;
pub mod input;
pub mod pipeline;
pub mod reporter;
pub mod resolver;
pub mod retry;
pub mod stats;
pub mod types;
pub mod utils;
