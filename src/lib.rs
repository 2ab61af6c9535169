pub mod appointments;
pub mod auth;
pub mod care_guide;
pub mod chats;
pub mod client;
pub mod config;
pub mod conversation;
pub mod doctors;
pub mod enrich;
pub mod error;
pub mod filter;
pub mod heart_rate;
pub mod models;
pub mod random;
pub mod scan;
pub mod seed;
pub mod server;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sync;

pub use error::{Alert, Error, Result};
