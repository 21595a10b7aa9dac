//! Binary BCH code over GF(2^m), shortened and systematic.
//!
//! The codeword polynomial places data bit `j` (MSB first) at degree
//! `r + (k - 1 - j)` and parity bit `i` at degree `i`, where `r` is the
//! generator degree. Only the parity bits are kept as helper data; the
//! data bits are re-read from the chip.

use super::EccError;
use crate::bits::Signature;
use serde::{Deserialize, Serialize};

/// Code parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BchParams {
    /// Field degree; the field is GF(2^m).
    pub m: u32,
    /// Correction capacity in bits.
    pub t: usize,
    /// Data bits per codeword.
    pub k: usize,
    /// Primitive polynomial of degree `m`, bit `i` = coefficient of x^i.
    pub primitive_poly: u32,
}

impl Default for BchParams {
    fn default() -> Self {
        Self {
            m: 13,
            t: 20,
            k: 1024,
            primitive_poly: 0x25AF,
        }
    }
}

/// Parity bits computed at enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperData {
    parity: Signature,
}

impl HelperData {
    /// Wraps raw parity bits.
    pub fn new(parity: Signature) -> Self {
        Self { parity }
    }

    /// Parses hex-encoded parity bits of the given length.
    pub fn from_hex(text: &str, len: usize) -> Result<Self, EccError> {
        let mut parity = Signature::from_hex(text)
            .map_err(|e| EccError::InvalidParams(format!("helper data: {e}")))?;
        if parity.len() < len {
            return Err(EccError::HelperLength {
                expected: len,
                found: parity.len(),
            });
        }
        if parity.len() > len {
            parity = Signature::from_bits(parity.iter().take(len));
        }
        Ok(Self { parity })
    }

    /// Parity bits.
    pub fn parity(&self) -> &Signature {
        &self.parity
    }

    /// Number of parity bits.
    pub fn len(&self) -> usize {
        self.parity.len()
    }

    /// Returns true if there are no parity bits.
    pub fn is_empty(&self) -> bool {
        self.parity.is_empty()
    }

    /// Hex encoding of the parity bits.
    pub fn to_hex(&self) -> String {
        self.parity.to_hex()
    }
}

/// Lookup tables for GF(2^m).
#[derive(Debug, Clone)]
struct GaloisField {
    /// Multiplicative group order, 2^m - 1.
    order: usize,
    /// `exp[i] = α^i`, doubled to skip a reduction in `mul`.
    exp: Vec<u16>,
    log: Vec<usize>,
}

impl GaloisField {
    fn new(m: u32, primitive_poly: u32) -> Result<Self, EccError> {
        if !(2..=16).contains(&m) {
            return Err(EccError::InvalidParams(format!(
                "field degree {m} outside 2..=16"
            )));
        }
        if primitive_poly >> m != 1 {
            return Err(EccError::InvalidParams(format!(
                "polynomial {primitive_poly:#x} is not of degree {m}"
            )));
        }

        let order = (1usize << m) - 1;
        let mut exp = vec![0u16; 2 * order];
        let mut log = vec![usize::MAX; order + 1];
        let mut x: u32 = 1;
        for i in 0..order {
            if log[x as usize] != usize::MAX {
                return Err(EccError::InvalidParams(format!(
                    "polynomial {primitive_poly:#x} is not primitive"
                )));
            }
            exp[i] = x as u16;
            exp[i + order] = x as u16;
            log[x as usize] = i;
            x <<= 1;
            if x >> m != 0 {
                x ^= primitive_poly;
            }
        }
        Ok(Self { order, exp, log })
    }

    fn mul(&self, a: u16, b: u16) -> u16 {
        if a == 0 || b == 0 {
            return 0;
        }
        self.exp[self.log[a as usize] + self.log[b as usize]]
    }

    fn inv(&self, a: u16) -> u16 {
        self.exp[(self.order - self.log[a as usize]) % self.order]
    }

    /// α^e for any non-negative exponent.
    fn pow_alpha(&self, e: usize) -> u16 {
        self.exp[e % self.order]
    }

    /// Binary minimal polynomial of α^i, coefficients lowest degree first.
    fn minimal_polynomial(&self, coset: &[usize]) -> Vec<u8> {
        let mut poly: Vec<u16> = vec![1];
        for &c in coset {
            let root = self.pow_alpha(c);
            let mut next = vec![0u16; poly.len() + 1];
            for (d, &coef) in poly.iter().enumerate() {
                next[d + 1] ^= coef;
                next[d] ^= self.mul(root, coef);
            }
            poly = next;
        }
        // Conjugate roots leave only 0/1 coefficients.
        poly.into_iter().map(|c| (c & 1) as u8).collect()
    }
}

/// BCH encoder/decoder for one parameter set.
#[derive(Debug, Clone)]
pub struct BchCode {
    params: BchParams,
    field: GaloisField,
    /// Generator polynomial, lowest degree first, monic.
    generator: Vec<u8>,
}

impl BchCode {
    /// Builds the generator polynomial for `params`.
    pub fn new(params: BchParams) -> Result<Self, EccError> {
        let field = GaloisField::new(params.m, params.primitive_poly)?;
        if params.t == 0 || params.k == 0 {
            return Err(EccError::InvalidParams(
                "t and k must be positive".to_string(),
            ));
        }
        if 2 * params.t >= field.order {
            return Err(EccError::InvalidParams(format!(
                "t = {} too large for GF(2^{})",
                params.t, params.m
            )));
        }

        let mut covered = vec![false; field.order];
        let mut generator: Vec<u8> = vec![1];
        for i in (1..2 * params.t).step_by(2) {
            if covered[i] {
                continue;
            }
            let mut coset = Vec::new();
            let mut j = i;
            while !covered[j] {
                covered[j] = true;
                coset.push(j);
                j = (j * 2) % field.order;
            }
            generator = binary_poly_mul(&generator, &field.minimal_polynomial(&coset));
        }

        let parity_bits = generator.len() - 1;
        if params.k + parity_bits > field.order {
            return Err(EccError::InvalidParams(format!(
                "{} data bits plus {} parity bits exceed code length {}",
                params.k, parity_bits, field.order
            )));
        }

        tracing::debug!(
            m = params.m,
            t = params.t,
            k = params.k,
            parity_bits,
            "Built BCH code"
        );
        Ok(Self {
            params,
            field,
            generator,
        })
    }

    /// Parameters the code was built from.
    pub fn params(&self) -> &BchParams {
        &self.params
    }

    /// Correction capacity `t`.
    pub fn correction_capacity(&self) -> usize {
        self.params.t
    }

    /// Data bits per codeword.
    pub fn data_bits(&self) -> usize {
        self.params.k
    }

    /// Parity bits per codeword, the generator degree.
    pub fn parity_bits(&self) -> usize {
        self.generator.len() - 1
    }

    /// Computes the helper data for `data`.
    pub fn encode(&self, data: &Signature) -> Result<HelperData, EccError> {
        self.check_data(data)?;
        let r = self.parity_bits();
        let mut remainder = vec![0u8; r];
        for bit in data.iter() {
            let feedback = u8::from(bit) ^ remainder[r - 1];
            for i in (1..r).rev() {
                remainder[i] = remainder[i - 1] ^ (feedback & self.generator[i]);
            }
            remainder[0] = feedback & self.generator[0];
        }
        let parity = Signature::from_bits((0..r).map(|h| remainder[r - 1 - h] == 1));
        Ok(HelperData::new(parity))
    }

    /// Corrects `data` against `helper`, returning the number of bit
    /// errors found and the corrected data.
    pub fn decode(
        &self,
        data: &Signature,
        helper: &HelperData,
    ) -> Result<(usize, Signature), EccError> {
        self.check_data(data)?;
        let r = self.parity_bits();
        let k = self.params.k;
        if helper.len() != r {
            return Err(EccError::HelperLength {
                expected: r,
                found: helper.len(),
            });
        }

        let syndromes = self.syndromes(data, helper);
        if syndromes.iter().all(|&s| s == 0) {
            return Ok((0, data.clone()));
        }

        let (locator, degree) = self.berlekamp_massey(&syndromes);
        let uncorrectable = EccError::Uncorrectable {
            capacity: self.params.t,
        };
        if degree > self.params.t {
            return Err(uncorrectable);
        }

        let roots = self.chien_search(&locator, degree, r + k);
        if roots.len() != degree {
            return Err(uncorrectable);
        }

        let mut corrected = data.clone();
        for position in roots {
            if position >= r {
                corrected.flip(k - 1 - (position - r));
            }
        }
        Ok((degree, corrected))
    }

    fn check_data(&self, data: &Signature) -> Result<(), EccError> {
        if data.len() != self.params.k {
            return Err(EccError::LengthMismatch {
                expected: self.params.k,
                found: data.len(),
            });
        }
        Ok(())
    }

    /// S_1..S_2t of the received codeword.
    fn syndromes(&self, data: &Signature, helper: &HelperData) -> Vec<u16> {
        let r = self.parity_bits();
        let k = self.params.k;
        let data_positions = data
            .iter()
            .enumerate()
            .filter(|(_, bit)| *bit)
            .map(|(j, _)| r + (k - 1 - j));
        let parity_positions = helper
            .parity()
            .iter()
            .enumerate()
            .filter(|(_, bit)| *bit)
            .map(|(h, _)| r - 1 - h);

        let mut syndromes = vec![0u16; 2 * self.params.t];
        for position in data_positions.chain(parity_positions) {
            for (i, s) in syndromes.iter_mut().enumerate() {
                *s ^= self.field.pow_alpha((i + 1) * position);
            }
        }
        syndromes
    }

    /// Error locator polynomial and its degree.
    fn berlekamp_massey(&self, syndromes: &[u16]) -> (Vec<u16>, usize) {
        let field = &self.field;
        let mut locator: Vec<u16> = vec![1];
        let mut previous: Vec<u16> = vec![1];
        let mut degree = 0usize;
        let mut shift = 1usize;
        let mut last_discrepancy: u16 = 1;

        for step in 0..syndromes.len() {
            let mut discrepancy = syndromes[step];
            for i in 1..=degree.min(locator.len() - 1) {
                discrepancy ^= field.mul(locator[i], syndromes[step - i]);
            }
            if discrepancy == 0 {
                shift += 1;
                continue;
            }

            let coef = field.mul(discrepancy, field.inv(last_discrepancy));
            let snapshot = locator.clone();
            let needed = previous.len() + shift;
            if locator.len() < needed {
                locator.resize(needed, 0);
            }
            for (i, &b) in previous.iter().enumerate() {
                locator[i + shift] ^= field.mul(coef, b);
            }

            if 2 * degree <= step {
                degree = step + 1 - degree;
                previous = snapshot;
                last_discrepancy = discrepancy;
                shift = 1;
            } else {
                shift += 1;
            }
        }
        (locator, degree)
    }

    /// Positions `p < length` with Λ(α^-p) = 0.
    fn chien_search(&self, locator: &[u16], degree: usize, length: usize) -> Vec<usize> {
        let field = &self.field;
        let order = field.order;
        (0..length)
            .filter(|&p| {
                let value = locator
                    .iter()
                    .take(degree + 1)
                    .enumerate()
                    .filter(|&(_, &c)| c != 0)
                    .fold(0u16, |acc, (i, &c)| {
                        acc ^ field.mul(c, field.pow_alpha(order - (p * i) % order))
                    });
                value == 0
            })
            .collect()
    }
}

fn binary_poly_mul(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut product = vec![0u8; a.len() + b.len() - 1];
    for (i, &ca) in a.iter().enumerate() {
        if ca == 0 {
            continue;
        }
        for (j, &cb) in b.iter().enumerate() {
            product[i + j] ^= cb;
        }
    }
    product
}
