//! GF(256) arithmetic for Shamir sharing
//!
//! Elements are bytes; addition is XOR, multiplication is carry-less
//! multiplication reduced modulo x⁸ + x⁴ + x³ + x + 1 (the AES polynomial).

use std::ops::{Add, Div, Mul};
use zeroize::Zeroize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gf256(pub(crate) u8);

impl Gf256 {
    pub(crate) const ZERO: Self = Gf256(0);
    pub(crate) const ONE: Self = Gf256(1);

    /// Multiplicative inverse via a⁻¹ = a²⁵⁴. Zero maps to zero.
    pub(crate) fn invert(self) -> Self {
        // square-and-multiply over the fixed exponent 254 = 0b1111_1110
        let mut result = Gf256::ONE;
        let mut base = self;
        let mut exp = 254u8;
        while exp > 0 {
            if exp & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            exp >>= 1;
        }
        result
    }

    /// Evaluate `coeffs[0] + coeffs[1]·x + …` with Horner's rule
    pub(crate) fn eval_polynomial(coeffs: &[Self], x: Self) -> Self {
        coeffs
            .iter()
            .rev()
            .fold(Gf256::ZERO, |acc, &c| acc * x + c)
    }

    /// Lagrange interpolation of the polynomial through `points`, evaluated at `x`.
    ///
    /// All point abscissae must be distinct.
    pub(crate) fn interpolate_at(points: &[(Self, Self)], x: Self) -> Self {
        let mut acc = Gf256::ZERO;
        for (i, &(xi, yi)) in points.iter().enumerate() {
            let mut num = Gf256::ONE;
            let mut den = Gf256::ONE;
            for (j, &(xj, _)) in points.iter().enumerate() {
                if i != j {
                    // subtraction is addition in characteristic 2
                    num = num * (x + xj);
                    den = den * (xi + xj);
                }
            }
            acc = acc + yi * (num / den);
        }
        acc
    }
}

impl Zeroize for Gf256 {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Add for Gf256 {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn add(self, rhs: Self) -> Self {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Mul for Gf256 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut a = self.0;
        let mut b = rhs.0;
        let mut res = 0u8;
        // fixed 8 rounds, no early exit on b == 0
        for _ in 0..8 {
            let mask = 0u8.wrapping_sub(b & 1);
            res ^= a & mask;
            let carry = 0u8.wrapping_sub(a >> 7);
            a = (a << 1) ^ (0x1B & carry);
            b >>= 1;
        }
        Gf256(res)
    }
}

impl Div for Gf256 {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self {
        self * rhs.invert()
    }
}
