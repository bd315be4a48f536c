//! Deck assembly: unify per-page question files into one deck artifact,
//! with question images moved to their permanent home.

pub mod relocate;
pub mod store;
pub mod unify;
