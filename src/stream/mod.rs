//! Stream entropy coding: turn a sequence of symbols plus a sequence of
//! entropy models into a sequence of compressed words, and back.
//!
//! This module defines the [`Code`], [`Encode`], and [`Decode`] traits that
//! both [`stack::AnsCoder`] and the [`queue::RangeEncoder`]/
//! [`queue::RangeDecoder`] pair implement, plus the shared entropy model
//! substrate in [`models`].
//!
//! Encoding and decoding disciplines are *not* unified beyond this shared
//! interface: an [`AnsCoder`](stack::AnsCoder) is a stack (last symbol
//! encoded is the first symbol decoded), while a [`RangeEncoder`]/
//! [`RangeDecoder`] pair is a queue (first symbol encoded is the first
//! symbol decoded). See the module docs of [`stack`] and [`queue`].

use core::borrow::Borrow;

use crate::BitArray;
use models::{DecoderModel, EncoderModel};

pub mod models;
pub mod queue;
pub mod stack;

/// Common state shared by all stream coders in this crate.
pub trait Code {
    /// The smallest unit of compressed data (see the module-level docs of
    /// [`stack`] and [`queue`] for guidance on choosing this type).
    type CompressedWord: BitArray;

    /// The internal coder state, typically twice as wide as
    /// `CompressedWord`.
    type State;

    /// Returns the current internal state of the coder.
    fn state(&self) -> Self::State;

    /// Conservatively checks whether any more compressed data could be
    /// decoded. `true` does not always imply there is no more data: for
    /// [`stack::AnsCoder`] this method delegates to the precise
    /// [`is_empty`](stack::AnsCoder::is_empty).
    fn maybe_empty(&self) -> bool;
}

/// A stream coder that can encode symbols onto its buffer.
pub trait Encode<const PRECISION: usize>: Code {
    /// Encodes a single symbol.
    ///
    /// This is a low-level method; [`encode_symbols`](Self::encode_symbols)
    /// or [`encode_iid_symbols`](Self::encode_iid_symbols) are usually more
    /// convenient for encoding more than one symbol.
    fn encode_symbol<D>(
        &mut self,
        symbol: impl Borrow<D::Symbol>,
        model: D,
    ) -> Result<(), crate::EncoderError>
    where
        D: EncoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>;

    /// Encodes a sequence of symbols, each with its own entropy model, in
    /// the order they're provided.
    fn encode_symbols<S, D, I>(&mut self, symbols_and_models: I) -> Result<(), crate::EncoderError>
    where
        S: Borrow<D::Symbol>,
        D: EncoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>,
        I: IntoIterator<Item = (S, D)>,
    {
        for (symbol, model) in symbols_and_models {
            self.encode_symbol(symbol, model)?;
        }
        Ok(())
    }

    /// Encodes a sequence of symbols drawn independently from the same
    /// entropy model.
    fn encode_iid_symbols<S, D, I>(
        &mut self,
        symbols: I,
        model: &D,
    ) -> Result<(), crate::EncoderError>
    where
        S: Borrow<D::Symbol>,
        D: EncoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>,
        I: IntoIterator<Item = S>,
    {
        self.encode_symbols(symbols.into_iter().map(|symbol| (symbol, model)))
    }
}

/// A stream coder that can decode symbols off its buffer.
pub trait Decode<const PRECISION: usize>: Code {
    /// The error returned when the compressed data is malformed. This is
    /// `core::convert::Infallible` for coders (like [`stack::AnsCoder`])
    /// whose decoding is total.
    type DecodingError;

    /// Decodes a single symbol.
    fn decode_symbol<D>(&mut self, model: D) -> Result<D::Symbol, Self::DecodingError>
    where
        D: DecoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>;

    /// Decodes a sequence of symbols, each with its own entropy model, in
    /// the order in which they were originally encoded.
    fn decode_symbols<'s, I, D>(
        &'s mut self,
        models: I,
    ) -> DecodeSymbols<'s, Self, I::IntoIter, PRECISION>
    where
        I: IntoIterator<Item = D>,
        D: DecoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>,
    {
        DecodeSymbols {
            coder: self,
            models: models.into_iter(),
        }
    }

    /// Decodes `amt` symbols drawn independently from the same entropy
    /// model.
    fn decode_iid_symbols<'s, 'm, D>(
        &'s mut self,
        amt: usize,
        model: &'m D,
    ) -> DecodeIidSymbols<'s, 'm, Self, D, PRECISION>
    where
        D: DecoderModel<PRECISION>,
        D::Probability: Into<Self::CompressedWord>,
        Self::CompressedWord: num::cast::AsPrimitive<D::Probability>,
    {
        DecodeIidSymbols {
            coder: self,
            model,
            remaining: amt,
        }
    }
}

/// Iterator returned by [`Decode::decode_symbols`].
pub struct DecodeSymbols<'s, Coder: ?Sized, I, const PRECISION: usize> {
    coder: &'s mut Coder,
    models: I,
}

impl<'s, Coder, I, D, const PRECISION: usize> Iterator for DecodeSymbols<'s, Coder, I, PRECISION>
where
    Coder: Decode<PRECISION>,
    I: Iterator<Item = D>,
    D: DecoderModel<PRECISION>,
    D::Probability: Into<Coder::CompressedWord>,
    Coder::CompressedWord: num::cast::AsPrimitive<D::Probability>,
{
    type Item = Result<D::Symbol, Coder::DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let model = self.models.next()?;
        Some(self.coder.decode_symbol(model))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.models.size_hint()
    }
}

/// Iterator returned by [`Decode::decode_iid_symbols`].
pub struct DecodeIidSymbols<'s, 'm, Coder: ?Sized, D, const PRECISION: usize> {
    coder: &'s mut Coder,
    model: &'m D,
    remaining: usize,
}

impl<'s, 'm, Coder, D, const PRECISION: usize> Iterator
    for DecodeIidSymbols<'s, 'm, Coder, D, PRECISION>
where
    Coder: Decode<PRECISION>,
    D: DecoderModel<PRECISION>,
    D::Probability: Into<Coder::CompressedWord>,
    Coder::CompressedWord: num::cast::AsPrimitive<D::Probability>,
{
    type Item = Result<D::Symbol, Coder::DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.coder.decode_symbol(self.model))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
