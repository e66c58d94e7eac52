pub mod tx;
pub mod state;
pub mod storage;
pub mod error;
pub mod logger;
pub mod config;
pub mod replay;
pub mod engine;

pub use engine::BookingEngine;

use sha2::{Sha256, Digest};

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
