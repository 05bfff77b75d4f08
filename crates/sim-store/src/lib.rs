//! SQLite-backed implementations of the simulator's persistence ports.

pub mod db;

pub use db::SimDb;
