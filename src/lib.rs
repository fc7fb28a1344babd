//! Bit-precise stream entropy coders (ANS and Range coding) over quantized
//! probability models.
//!
//! This crate is the coding core of `constriction`: the part that has to be
//! exactly invertible at the level of individual machine words. It provides
//! two complete stream codecs —
//!
//! - [`stream::stack`]: an Asymmetric Numeral Systems (rANS) coder, which
//!   operates as a stack (last in, first out); and
//! - [`stream::queue`]: a Range coder, which operates as a queue (first in,
//!   first out) with carry propagation;
//!
//! both driven by the same fixed-point entropy model substrate in
//! [`stream::models`].
//!
//! Host-language bindings, CLI tooling, and the wider catalog of parametric
//! distributions are out of scope for this crate; it operates purely on
//! in-memory buffers of `CompressedWord`s and is single-threaded.

#![no_std]
#![warn(rust_2018_idioms)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

use core::{
    fmt::{Debug, Display},
    ops::{Add, BitOr, BitOrAssign, Div, Mul, Rem, Shl, Shr, Sub},
};

use num::cast::AsPrimitive;

pub mod stream;

/// An unsigned integer type that can serve as a "word" (`CompressedWord`) or
/// "state" (`State`) of a stream coder.
///
/// Implemented for `u8`, `u16`, `u32`, `u64`, and `u128`. Coders are generic
/// over this trait so that callers can trade off compression overhead
/// against state size (see the module-level docs of [`stream::stack`] and
/// [`stream::queue`]).
pub trait BitArray:
    Copy
    + Eq
    + Ord
    + Debug
    + Default
    + BitOr<Output = Self>
    + BitOrAssign
    + Shl<usize, Output = Self>
    + Shr<usize, Output = Self>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Rem<Output = Self>
    + 'static
{
    /// Number of bits in this integer type.
    const BITS: usize;

    fn zero() -> Self;
    fn one() -> Self;
    fn max_value() -> Self;

    fn wrapping_add(&self, rhs: &Self) -> Self;
    fn wrapping_sub(&self, rhs: &Self) -> Self;
    fn checked_div(&self, rhs: &Self) -> Option<Self>;
    fn leading_zeros(&self) -> u32;

    /// Converts from host byte order to little-endian (a no-op on
    /// little-endian hosts). Its own inverse.
    fn to_le(self) -> Self;
}

macro_rules! impl_bit_array {
    ($t:ty) => {
        impl BitArray for $t {
            const BITS: usize = <$t>::BITS as usize;

            #[inline(always)]
            fn zero() -> Self {
                0
            }

            #[inline(always)]
            fn one() -> Self {
                1
            }

            #[inline(always)]
            fn max_value() -> Self {
                <$t>::MAX
            }

            #[inline(always)]
            fn wrapping_add(&self, rhs: &Self) -> Self {
                <$t>::wrapping_add(*self, *rhs)
            }

            #[inline(always)]
            fn wrapping_sub(&self, rhs: &Self) -> Self {
                <$t>::wrapping_sub(*self, *rhs)
            }

            #[inline(always)]
            fn checked_div(&self, rhs: &Self) -> Option<Self> {
                <$t>::checked_div(*self, *rhs)
            }

            #[inline(always)]
            fn leading_zeros(&self) -> u32 {
                <$t>::leading_zeros(*self)
            }

            #[inline(always)]
            fn to_le(self) -> Self {
                <$t>::to_le(self)
            }
        }
    };
}

impl_bit_array!(u8);
impl_bit_array!(u16);
impl_bit_array!(u32);
impl_bit_array!(u64);
impl_bit_array!(u128);

/// Shorthand for `CompressedWord: BitArray + Into<State>, State: BitArray +
/// AsPrimitive<CompressedWord>`, the bound shared by every coder and model in
/// this crate.
pub(crate) trait WordAndState<CompressedWord>: BitArray + AsPrimitive<CompressedWord>
where
    CompressedWord: BitArray,
{
}

impl<State, CompressedWord> WordAndState<CompressedWord> for State
where
    State: BitArray + AsPrimitive<CompressedWord>,
    CompressedWord: BitArray,
{
}

/// Error returned when a model construction fails one of its invariants
/// (C1)-(C3) (see [`stream::models`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelConstructionError {
    /// `lower > upper`, or the alphabet is otherwise empty.
    EmptySupport,

    /// `PRECISION` exceeds the bit width of the probability type, or is zero.
    InvalidPrecision,

    /// The declared support is larger than `2^PRECISION`, so every symbol
    /// cannot be assigned a nonzero fixed-point probability.
    UnrepresentableProbabilities,
}

impl Display for ModelConstructionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptySupport => write!(f, "model support is empty (lower > upper)"),
            Self::InvalidPrecision => write!(f, "PRECISION must be in `1..=Probability::BITS`"),
            Self::UnrepresentableProbabilities => write!(
                f,
                "support is larger than 2^PRECISION; cannot assign every symbol a nonzero probability"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ModelConstructionError {}

/// Error returned by [`stream::Encode::encode_symbol`] when the symbol has
/// zero probability under the given entropy model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EncoderFrontendError {
    /// The symbol is outside the model's declared alphabet (or otherwise has
    /// probability zero).
    ImpossibleSymbol,
}

impl Display for EncoderFrontendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ImpossibleSymbol => {
                write!(f, "tried to encode a symbol with zero probability")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncoderFrontendError {}

/// Error type returned by [`stream::Encode::encode_symbol`] and its batch
/// variants.
pub type EncoderError = EncoderFrontendError;

/// Error returned by [`stream::queue::RangeDecoder::decode_symbol`] when the
/// compressed data is malformed (a quantile falls outside every probability
/// interval of the supplied model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecoderFrontendError {
    InvalidData,
}

impl Display for DecoderFrontendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidData => write!(f, "tried to decode invalid compressed data"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderFrontendError {}

/// Unwraps a `Result` whose error type is known to be uninhabited.
///
/// Used in places where a generic bound forces a `Result<T, Infallible>` but
/// the concrete instantiation in this crate can never actually fail.
pub(crate) trait UnwrapInfallible<T> {
    fn unwrap_infallible(self) -> T;
}

impl<T> UnwrapInfallible<T> for Result<T, core::convert::Infallible> {
    fn unwrap_infallible(self) -> T {
        match self {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

/// Converts a slice of compressed words from host byte order to
/// little-endian, word by word, for persisting compressed data in a
/// platform-independent format.
///
/// This is its own inverse: applying it twice restores the original words,
/// since `to_le` is a no-op on little-endian hosts and a full byte swap on
/// big-endian hosts.
pub fn little_endian_words<W: BitArray>(words: &[W]) -> impl Iterator<Item = W> + '_ {
    words.iter().map(|&word| word.to_le())
}
