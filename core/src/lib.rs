//! Core of the pacer fitness tracker: route and workout sessions, the local
//! SQLite store, and synchronisation with a remote document store.

pub mod clock;
pub mod db;
pub mod geo;
pub mod models;
pub mod remote;
pub mod replay;
pub mod sampler;
pub mod service;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod workout;
