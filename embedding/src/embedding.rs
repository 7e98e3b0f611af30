use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::EmbeddingError;

/// Embedding dimension produced by the edge face models.
pub const DIM: usize = 128;

/// Serialized size: 128 little-endian f32 values.
pub const BYTE_LEN: usize = DIM * 4;

/// A 128-dimensional face embedding.
///
/// Comparison is by squared Euclidean distance against a threshold `dd`;
/// see [`Embedding::within_distance`].
#[derive(Clone, PartialEq)]
pub struct Embedding([f32; DIM]);

impl Embedding {
    /// Returns the raw vector values.
    pub fn values(&self) -> &[f32; DIM] {
        &self.0
    }

    /// Encodes the vector as 512 little-endian bytes.
    pub fn to_bytes(&self) -> [u8; BYTE_LEN] {
        let mut buf = [0u8; BYTE_LEN];
        for (chunk, v) in buf.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    /// Decodes a vector from its fixed 512-byte form.
    /// The round trip through [`Embedding::to_bytes`] is bit-exact.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.len() != BYTE_LEN {
            return Err(EmbeddingError::ByteLengthMismatch {
                expected: BYTE_LEN,
                got: bytes.len(),
            });
        }
        let mut values = [0.0f32; DIM];
        for (v, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
            *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self(values))
    }

    /// Returns true if any component is NaN.
    ///
    /// NaN vectors never match anything (see [`Embedding::within_distance`]);
    /// ingestion layers can use this to reject them up front.
    pub fn has_nan(&self) -> bool {
        self.0.iter().any(|v| v.is_nan())
    }

    /// Full squared Euclidean distance. Reference implementation for
    /// [`Embedding::within_distance`]; use that one on hot paths.
    pub fn distance_sq(&self, other: &Embedding) -> f32 {
        let mut sum = 0.0f32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let d = a - b;
            sum += d * d;
        }
        sum
    }

    /// Returns true if the squared Euclidean distance to `other` is below
    /// the squared-distance threshold `dd`.
    ///
    /// The accumulation aborts as soon as the running sum exceeds `dd`,
    /// so clear non-matches skip most of the 128 multiplies.
    ///
    /// Any NaN component makes the result `false`: a NaN term fails the
    /// abort comparison, poisons the sum, and the final `sum < dd` check
    /// is false for a NaN sum. Callers never see a NaN-driven match.
    pub fn within_distance(&self, other: &Embedding, dd: f32) -> bool {
        let mut sum = 0.0f32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let d = a - b;
            sum += d * d;
            if sum > dd {
                return false;
            }
        }
        sum < dd
    }
}

impl From<[f32; DIM]> for Embedding {
    fn from(values: [f32; DIM]) -> Self {
        Self(values)
    }
}

impl TryFrom<&[f32]> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        let arr: [f32; DIM] =
            values
                .try_into()
                .map_err(|_| EmbeddingError::DimensionMismatch {
                    expected: DIM,
                    got: values.len(),
                })?;
        Ok(Self(arr))
    }
}

// serde's derive only covers arrays up to 32 elements, so the 128-value
// vector serializes through a plain sequence.
impl Serialize for Embedding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for Embedding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Embedding::try_from(values.as_slice()).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("dim", &DIM)
            .field("head", &&self.0[..4])
            .finish()
    }
}
