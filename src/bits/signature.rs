//! Fixed-length bit sequence holding one PUF reading.

use super::BitsError;

/// One measured PUF response.
///
/// Bits are stored MSB-first, eight to a byte. Padding bits in the last
/// byte are always zero so that two signatures with equal bits compare
/// equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed bit data.
    bytes: Vec<u8>,
    /// Number of meaningful bits.
    len: usize,
}

impl Signature {
    /// Creates an all-zero signature of `len` bits.
    pub fn zeros(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Creates a signature covering every bit of `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        Self { bytes, len }
    }

    /// Collects a signature from individual bits, first bit first.
    pub fn from_bits<I>(bits: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let mut sig = Self::zeros(0);
        for bit in bits {
            if sig.len % 8 == 0 {
                sig.bytes.push(0);
            }
            sig.len += 1;
            if bit {
                sig.set_bit(sig.len - 1, true);
            }
        }
        sig
    }

    /// Parses a hex string (optionally `0x`-prefixed). Every hex digit
    /// contributes four bits, so odd-length strings are accepted.
    pub fn from_hex(text: &str) -> Result<Self, BitsError> {
        let text = text.trim();
        let text = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        let len = text.len() * 4;

        let bytes = if text.len() % 2 == 1 {
            hex::decode(format!("{text}0"))?
        } else {
            hex::decode(text)?
        };

        Ok(Self { bytes, len })
    }

    /// Encodes the signature as lowercase hex, one digit per four bits.
    pub fn to_hex(&self) -> String {
        let mut text = hex::encode(&self.bytes);
        text.truncate(self.len.div_ceil(4));
        text
    }

    /// Returns the packed bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the number of bits.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the signature holds no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns bit `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[inline]
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < self.len, "bit index {index} out of range");
        (self.bytes[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Sets bit `index` to `value`.
    pub fn set_bit(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit index {index} out of range");
        let mask = 1u8 << (7 - index % 8);
        if value {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
    }

    /// Inverts bit `index`.
    pub fn flip(&mut self, index: usize) {
        assert!(index < self.len, "bit index {index} out of range");
        self.bytes[index / 8] ^= 1u8 << (7 - index % 8);
    }

    /// Iterates over the bits, first bit first.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bit(i))
    }

    /// Counts the set bits.
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Bitwise XOR of two equal-length signatures.
    pub fn xor(&self, other: &Signature) -> Result<Signature, BitsError> {
        self.check_len(other)?;
        let bytes = self
            .bytes
            .iter()
            .zip(&other.bytes)
            .map(|(a, b)| a ^ b)
            .collect();
        Ok(Self {
            bytes,
            len: self.len,
        })
    }

    /// In-place bitwise OR with an equal-length signature.
    pub fn or_assign(&mut self, other: &Signature) -> Result<(), BitsError> {
        self.check_len(other)?;
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= b;
        }
        Ok(())
    }

    fn check_len(&self, other: &Signature) -> Result<(), BitsError> {
        if self.len != other.len {
            return Err(BitsError::LengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("bits", &self.len)
            .field("ones", &self.count_ones())
            .field("hex", &self.to_hex())
            .finish()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
