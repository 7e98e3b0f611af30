//! Fixed 128-dimensional face embedding vectors.
//!
//! Edge cameras ship one embedding per detected face. This crate owns the
//! vector type, its fixed 512-byte wire form, and the squared-distance
//! comparison used by the matcher's voting rule.
//!
//! # Usage
//!
//! ```
//! use facematch_embedding::Embedding;
//!
//! let a = Embedding::from([0.0f32; 128]);
//! let mut raw = [0.0f32; 128];
//! raw[0] = 0.5;
//! let b = Embedding::from(raw);
//!
//! // dd is a squared-distance threshold.
//! assert!(a.within_distance(&b, 0.3));
//! assert!(!a.within_distance(&b, 0.2));
//! ```

mod embedding;
mod error;

pub use embedding::{Embedding, BYTE_LEN, DIM};
pub use error::EmbeddingError;
