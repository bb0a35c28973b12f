//! CRC codec - modulo-2 polynomial arithmetic over ASCII bit-strings
//!
//! A frame is the payload bits (UTF-8 bytes of the message, most significant
//! bit first) followed by `degree` checksum bits, where `degree` is one less
//! than the generator polynomial's length. One long-division routine backs
//! both encoding and verification, so an uncorrupted frame always divides to
//! an all-zero remainder.

use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CrcError {
    #[error("polynomial is empty")]
    EmptyPolynomial,

    #[error("invalid polynomial {0:?}: expected binary digits with a leading '1' and degree >= 1")]
    InvalidPolynomial(String),

    #[error("frame contains a non-binary character at bit position {0}")]
    InvalidFrame(usize),
}

pub type CrcResult<T> = Result<T, CrcError>;

/// Bit representation of `text`: eight '0'/'1' characters per UTF-8 byte,
/// most significant bit first.
pub fn text_to_bits(text: &str) -> String {
    bits_to_string(&text_bit_vec(text))
}

/// Checksum length implied by `poly`.
pub fn degree(poly: &str) -> usize {
    poly.len().saturating_sub(1)
}

/// Build the frame for `message`: payload bits plus the CRC remainder of the
/// payload padded with `degree` zero bits.
pub fn encode(message: &str, poly: &str) -> CrcResult<String> {
    let poly_bits = parse_poly(poly)?;
    let degree = poly_bits.len() - 1;

    let payload = text_bit_vec(message);
    let mut dividend = payload.clone();
    dividend.resize(payload.len() + degree, 0);

    let checksum = remainder(dividend, &poly_bits);

    let mut frame = bits_to_string(&payload);
    frame.push_str(&bits_to_string(&checksum));
    Ok(frame)
}

/// Receiver-side check: divide the entire frame (payload + checksum) by the
/// polynomial and accept iff the remainder is all zeros.
pub fn verify(frame: &str, poly: &str) -> CrcResult<bool> {
    let poly_bits = parse_poly(poly)?;
    let bits = parse_bits(frame).map_err(CrcError::InvalidFrame)?;
    Ok(remainder(bits, &poly_bits).iter().all(|&b| b == 0))
}

/// Remainder of `bits` divided by `poly` over GF(2).
///
/// XOR sweep of standard CRC long division: align the divisor under each set
/// bit left of the checksum region. A dividend shorter than the degree is
/// its own remainder.
fn remainder(mut bits: Vec<u8>, poly: &[u8]) -> Vec<u8> {
    let degree = poly.len() - 1;
    let steps = bits.len().saturating_sub(degree);

    for i in 0..steps {
        if bits[i] == 1 {
            for (j, p) in poly.iter().enumerate() {
                bits[i + j] ^= p;
            }
        }
    }

    let keep = bits.len().min(degree);
    bits.split_off(bits.len() - keep)
}

fn parse_poly(poly: &str) -> CrcResult<Vec<u8>> {
    if poly.is_empty() {
        return Err(CrcError::EmptyPolynomial);
    }
    let bits =
        parse_bits(poly).map_err(|_| CrcError::InvalidPolynomial(poly.to_string()))?;
    if bits.len() < 2 || bits[0] != 1 {
        return Err(CrcError::InvalidPolynomial(poly.to_string()));
    }
    Ok(bits)
}

fn parse_bits(s: &str) -> Result<Vec<u8>, usize> {
    s.bytes()
        .enumerate()
        .map(|(i, b)| match b {
            b'0' => Ok(0),
            b'1' => Ok(1),
            _ => Err(i),
        })
        .collect()
}

fn text_bit_vec(text: &str) -> Vec<u8> {
    text.bytes()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1))
        .collect()
}

fn bits_to_string(bits: &[u8]) -> String {
    bits.iter().map(|&b| char::from(b'0' + b)).collect()
}
