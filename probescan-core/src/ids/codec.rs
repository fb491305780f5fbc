//! Mixed-radix mapping between integer identifiers and fixed-width key
//! strings such as `BAFGAK`.
//!
//! Each part contributes one character drawn from its own alphabet and
//! written at its own position in the key. The last part is the least
//! significant digit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Identifier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("codec has no parts")]
    Empty,
    #[error("part {0} has an empty alphabet")]
    EmptyAlphabet(usize),
    #[error("part {part} targets position {position} outside a key of width {width}")]
    PositionOutOfBounds {
        part: usize,
        position: usize,
        width: usize,
    },
    #[error("position {0} is targeted by more than one part")]
    DuplicatePosition(usize),
    #[error("codec capacity overflows a 64-bit identifier")]
    CapacityOverflow,
}

/// Serialized form of one codec digit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPart {
    /// Characters this digit can take, in digit-value order.
    pub alphabet: String,
    /// Character index in the rendered key.
    pub position: usize,
}

#[derive(Clone, Debug)]
struct Digit {
    alphabet: Vec<char>,
    position: usize,
}

#[derive(Clone, Debug)]
pub struct MixedRadixCodec {
    digits: Vec<Digit>,
    capacity: u64,
}

impl MixedRadixCodec {
    pub fn new(parts: &[CodecPart]) -> Result<Self, CodecError> {
        if parts.is_empty() {
            return Err(CodecError::Empty);
        }

        let width = parts.len();
        let mut taken = vec![false; width];
        let mut capacity: u64 = 1;
        let mut digits = Vec::with_capacity(width);

        for (index, part) in parts.iter().enumerate() {
            let alphabet: Vec<char> = part.alphabet.chars().collect();
            if alphabet.is_empty() {
                return Err(CodecError::EmptyAlphabet(index));
            }
            if part.position >= width {
                return Err(CodecError::PositionOutOfBounds {
                    part: index,
                    position: part.position,
                    width,
                });
            }
            if std::mem::replace(&mut taken[part.position], true) {
                return Err(CodecError::DuplicatePosition(part.position));
            }
            capacity = capacity
                .checked_mul(alphabet.len() as u64)
                .filter(|c| *c <= i64::MAX as u64)
                .ok_or(CodecError::CapacityOverflow)?;
            digits.push(Digit {
                alphabet,
                position: part.position,
            });
        }

        Ok(Self { digits, capacity })
    }

    /// Number of encodable identifiers; valid identifiers are
    /// `0..capacity`.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Largest encodable identifier.
    pub fn max_identifier(&self) -> Identifier {
        // capacity is bounded by i64::MAX at construction
        (self.capacity - 1) as Identifier
    }

    /// Render `id` as a key, or `None` when it falls outside the codec.
    pub fn encode(&self, id: Identifier) -> Option<String> {
        let mut rest = u64::try_from(id).ok()?;
        let mut key = vec!['\0'; self.digits.len()];

        for digit in self.digits.iter().rev() {
            let base = digit.alphabet.len() as u64;
            key[digit.position] = digit.alphabet[(rest % base) as usize];
            rest /= base;
        }

        (rest == 0).then(|| key.into_iter().collect())
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(&self, key: &str) -> Option<Identifier> {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() != self.digits.len() {
            return None;
        }

        let mut value: u64 = 0;
        for digit in &self.digits {
            let found = chars[digit.position];
            let index = digit.alphabet.iter().position(|c| *c == found)?;
            value = value * digit.alphabet.len() as u64 + index as u64;
        }
        Identifier::try_from(value).ok()
    }
}
