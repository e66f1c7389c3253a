//! Helper builders, registered under `helper.<name>`.

pub mod kvdb;
