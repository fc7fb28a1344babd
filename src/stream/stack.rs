//! Encoding and decoding on a stack ("last in, first out").
//!
//! [`AnsCoder`] implements range Asymmetric Numeral Systems (rANS). Pushing
//! (encoding) a symbol and popping (decoding) a symbol are each other's exact
//! inverse, but only in LIFO order: the last symbol encoded is the first
//! symbol decoded. This is what lets encoding and decoding interleave
//! arbitrarily on the same buffer, which is the basis of the bits-back trick
//! (out of scope here, but the reason this discipline exists at all).
//!
//! Internally, the coder keeps a single integer `state` of type `State`
//! (typically twice as wide as `CompressedWord`). Encoding a symbol divides
//! `state` by the symbol's probability and folds in a remainder; once
//! `state` gets too small to safely absorb the next symbol, its lower
//! `CompressedWord` is flushed onto a growable buffer first. Decoding runs
//! this transformation backwards.

use alloc::vec::Vec;
use core::{borrow::Borrow, convert::Infallible, marker::PhantomData, ops::Deref};

use num::cast::AsPrimitive;
use smallvec::SmallVec;

use super::{
    models::{DecoderModel, EncoderModel},
    Code, Decode, Encode,
};
use crate::{BitArray, EncoderError, EncoderFrontendError, UnwrapInfallible};

/// A stack entropy coder: encoding pushes symbols on, decoding pops them back
/// off in reverse order.
///
/// See the [module-level docs](self) for the rANS algorithm and
/// [`DefaultAnsCoder`] for the type alias most callers want.
#[derive(Clone, PartialEq, Eq)]
pub struct AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    bulk: Vec<CompressedWord>,

    /// Invariant: `state >= State::one() << (State::BITS - CompressedWord::BITS)`
    /// whenever `bulk` is nonempty.
    state: State,

    phantom: PhantomData<CompressedWord>,
}

/// An [`AnsCoder`] with generic parameters that work well for most
/// applications: 32-bit compressed words and a 64-bit internal state.
pub type DefaultAnsCoder = AnsCoder<u32, u64>;

impl<CompressedWord, State> core::fmt::Debug for AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AnsCoder")
            .field("bulk", &self.bulk)
            .field("state", &self.state)
            .finish()
    }
}

impl<CompressedWord, State> Default for AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn default() -> Self {
        assert!(State::BITS >= 2 * CompressedWord::BITS);
        Self {
            bulk: Vec::new(),
            state: State::zero(),
            phantom: PhantomData,
        }
    }
}

fn state_to_words_msb_first<CompressedWord, State>(mut state: State) -> SmallVec<[CompressedWord; 4]>
where
    CompressedWord: BitArray,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    let mut chunks = SmallVec::new();
    while state != State::zero() {
        chunks.push(state.as_());
        state = state >> CompressedWord::BITS;
    }
    chunks.reverse();
    chunks
}

impl<CompressedWord, State> AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    /// Creates an empty ANS coder. This is the usual starting point for
    /// compressing data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an ANS coder from previously compressed data. This is the
    /// usual starting point for decompressing data, but it can also be used
    /// to append more symbols to an existing compressed buffer.
    ///
    /// Returns `Err(compressed)` if `compressed` is nonempty and its last
    /// word is zero, since an `AnsCoder` can never produce such data (an
    /// all-zero trailing word would be indistinguishable from padding).
    pub fn from_compressed(mut compressed: Vec<CompressedWord>) -> Result<Self, Vec<CompressedWord>> {
        assert!(State::BITS >= 2 * CompressedWord::BITS);

        let state = match compressed.pop() {
            None => State::zero(),
            Some(first_word) => {
                if first_word == CompressedWord::zero() {
                    compressed.push(first_word);
                    return Err(compressed);
                }
                let mut state: State = first_word.into();
                while state < State::one() << (State::BITS - CompressedWord::BITS) {
                    match compressed.pop() {
                        Some(word) => state = (state << CompressedWord::BITS) | word.into(),
                        None => break,
                    }
                }
                state
            }
        };

        Ok(Self {
            bulk: compressed,
            state,
            phantom: PhantomData,
        })
    }

    /// Returns `true` if no compressed data is left to decode.
    ///
    /// Decoding further symbols off an empty coder is well-defined (it keeps
    /// producing deterministic, low-entropy symbols) but will not recover any
    /// previously encoded data.
    pub fn is_empty(&self) -> bool {
        self.state == State::zero()
    }

    /// Returns a read-only view of the compressed data, without consuming the
    /// coder.
    pub fn get_compressed(&mut self) -> CoderGuard<'_, CompressedWord, State> {
        CoderGuard::new(self)
    }

    /// Number of `CompressedWord`s currently on the coder's stack, including
    /// the (up to two) words folded into `state`.
    pub fn num_words(&self) -> usize {
        self.bulk.len() + state_to_words_msb_first::<CompressedWord, State>(self.state).len()
    }

    /// Number of bits of compressed data currently on the coder's stack.
    pub fn num_bits(&self) -> usize {
        CompressedWord::BITS * self.num_words()
    }

    /// Consumes the coder and returns the compressed data, ready to be passed
    /// to [`from_compressed`](Self::from_compressed) later.
    pub fn into_compressed(mut self) -> Vec<CompressedWord> {
        let chunks = state_to_words_msb_first::<CompressedWord, State>(self.state);
        self.bulk.extend(chunks.into_iter().rev());
        self.bulk
    }

    #[inline(always)]
    fn flush_state(&mut self) {
        self.bulk.push(self.state.as_());
        self.state = self.state >> CompressedWord::BITS;
    }

    #[inline(always)]
    fn refill_state_if_necessary(&mut self) {
        if self.state < State::one() << (State::BITS - CompressedWord::BITS) {
            if let Some(word) = self.bulk.pop() {
                self.state = (self.state << CompressedWord::BITS) | word.into();
            }
        }
    }

    /// Like [`Encode::encode_symbols`], but encodes in reverse order so that
    /// a subsequent forward [`Decode::decode_symbols`] reproduces `symbols`
    /// in their original order.
    pub fn encode_symbols_reverse<S, D, I, const PRECISION: usize>(
        &mut self,
        symbols_and_models: I,
    ) -> Result<(), EncoderError>
    where
        Self: Encode<PRECISION, CompressedWord = CompressedWord, State = State>,
        S: Borrow<D::Symbol>,
        D: EncoderModel<PRECISION>,
        D::Probability: Into<CompressedWord>,
        CompressedWord: AsPrimitive<D::Probability>,
        I: IntoIterator<Item = (S, D)>,
        I::IntoIter: DoubleEndedIterator,
    {
        self.encode_symbols(symbols_and_models.into_iter().rev())
    }

    /// Like [`Encode::encode_iid_symbols`], but encodes in reverse order so
    /// that a subsequent forward [`Decode::decode_iid_symbols`] reproduces
    /// `symbols` in their original order.
    pub fn encode_iid_symbols_reverse<S, D, I, const PRECISION: usize>(
        &mut self,
        symbols: I,
        model: &D,
    ) -> Result<(), EncoderError>
    where
        Self: Encode<PRECISION, CompressedWord = CompressedWord, State = State>,
        S: Borrow<D::Symbol>,
        D: EncoderModel<PRECISION>,
        D::Probability: Into<CompressedWord>,
        CompressedWord: AsPrimitive<D::Probability>,
        I: IntoIterator<Item = S>,
        I::IntoIter: DoubleEndedIterator,
    {
        self.encode_iid_symbols(symbols.into_iter().rev(), model)
    }
}

/// RAII guard returned by [`AnsCoder::get_compressed`]: temporarily exposes
/// the coder's full compressed data (including the words still folded into
/// `state`) as a slice, then restores the coder on drop.
pub struct CoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    inner: &'a mut AnsCoder<CompressedWord, State>,
    num_appended: usize,
}

impl<'a, CompressedWord, State> CoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn new(inner: &'a mut AnsCoder<CompressedWord, State>) -> Self {
        let chunks = state_to_words_msb_first::<CompressedWord, State>(inner.state);
        let num_appended = chunks.len();
        inner.bulk.extend(chunks.into_iter().rev());
        Self { inner, num_appended }
    }
}

impl<'a, CompressedWord, State> Deref for CoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    type Target = [CompressedWord];

    fn deref(&self) -> &Self::Target {
        &self.inner.bulk
    }
}

impl<'a, CompressedWord, State> Drop for CoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn drop(&mut self) {
        self.inner.bulk.truncate(self.inner.bulk.len() - self.num_appended);
    }
}

impl<CompressedWord, State> Code for AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    type CompressedWord = CompressedWord;
    type State = State;

    fn state(&self) -> State {
        self.state
    }

    fn maybe_empty(&self) -> bool {
        self.is_empty()
    }
}

impl<CompressedWord, State, const PRECISION: usize> Encode<PRECISION> for AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn encode_symbol<D>(&mut self, symbol: impl Borrow<D::Symbol>, model: D) -> Result<(), EncoderError>
    where
        D: EncoderModel<PRECISION>,
        D::Probability: Into<CompressedWord>,
        CompressedWord: AsPrimitive<D::Probability>,
    {
        let (left_cumulative, probability) = model
            .left_cumulative_and_probability(symbol)
            .map_err(|()| EncoderFrontendError::ImpossibleSymbol)?;

        if (self.state >> (State::BITS - PRECISION)) >= probability.into().into() {
            // Would overflow if we didn't make room first.
            self.flush_state();
        }

        let remainder: D::Probability = (self.state % probability.into().into()).as_().as_();
        self.state = self
            .state
            .checked_div(&probability.into().into())
            .expect("probability is nonzero");
        self.state = (self.state << PRECISION) | (left_cumulative + remainder).into().into();

        Ok(())
    }
}

impl<CompressedWord, State, const PRECISION: usize> Decode<PRECISION> for AnsCoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    /// Decoding never fails: an `AnsCoder` can always produce *some* symbol,
    /// even past the end of the originally encoded data (see
    /// [`is_empty`](Self::is_empty)).
    type DecodingError = Infallible;

    fn decode_symbol<D>(&mut self, model: D) -> Result<D::Symbol, Infallible>
    where
        D: DecoderModel<PRECISION>,
        D::Probability: Into<CompressedWord>,
        CompressedWord: AsPrimitive<D::Probability>,
    {
        let quantile: D::Probability = (self.state % (State::one() << PRECISION)).as_().as_();
        self.state = self.state >> PRECISION;

        let (symbol, left_cumulative, probability) = model.quantile_function(quantile);
        let remainder = quantile - left_cumulative;
        self.state = self.state * probability.into().into() + remainder.into().into();
        self.refill_state_if_necessary();

        Ok(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::models::Categorical;
    use alloc::vec;

    #[test]
    fn round_trips_categorical_iid() {
        let probabilities = vec![0.03, 0.07, 0.1, 0.1, 0.2, 0.2, 0.1, 0.15, 0.05];
        let model = Categorical::<u32, 24>::from_floating_point_probabilities(&probabilities).unwrap();
        let symbols = vec![8usize, 2, 0, 7, 5, 5, 1];

        let mut coder = DefaultAnsCoder::new();
        coder
            .encode_iid_symbols_reverse::<_, _, _, 24>(&symbols, &model)
            .unwrap();
        assert!(!coder.is_empty());

        let decoded = coder
            .decode_iid_symbols(symbols.len(), &model)
            .map(UnwrapInfallible::unwrap_infallible)
            .collect::<Vec<_>>();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn empty_coder_round_trips() {
        let coder = DefaultAnsCoder::new();
        assert!(coder.is_empty());
        let compressed = coder.into_compressed();
        assert!(compressed.is_empty());
        let coder = DefaultAnsCoder::from_compressed(compressed).unwrap();
        assert!(coder.is_empty());
    }

    #[test]
    #[cfg(feature = "std")]
    fn round_trips_heterogeneous_gaussian_models() {
        use crate::stream::models::quantized_gaussian;

        let symbols: [i32; 9] = [6, 10, -4, 2, -9, 41, 3, 0, 2];
        let means = [3.2, -5.1, 0.0, 12.7, -3.3, 40.1, 1.1, 0.0, -20.0];
        let stds = [5.1, 3.3, 1.2, 8.0, 2.2, 10.5, 4.4, 1.0, 9.9];

        let models: Vec<_> = means
            .iter()
            .zip(stds.iter())
            .map(|(&mean, &std)| quantized_gaussian::<u32, 24>(-127..=127, mean, std).unwrap())
            .collect();

        let mut coder = DefaultAnsCoder::new();
        coder
            .encode_symbols_reverse::<_, _, _, 24>(symbols.iter().zip(models.iter()))
            .unwrap();

        let decoded = coder
            .decode_symbols(models.iter())
            .map(UnwrapInfallible::unwrap_infallible)
            .collect::<Vec<_>>();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn compressed_round_trip_via_bytes() {
        let probabilities = vec![0.5, 0.25, 0.125, 0.125];
        let model = Categorical::<u32, 12>::from_floating_point_probabilities(&probabilities).unwrap();
        let symbols = vec![0usize, 1, 2, 3, 0, 0, 3, 2];

        let mut coder = DefaultAnsCoder::new();
        coder
            .encode_iid_symbols_reverse::<_, _, _, 12>(&symbols, &model)
            .unwrap();
        let compressed = coder.into_compressed();

        let mut coder = DefaultAnsCoder::from_compressed(compressed).unwrap();
        let decoded = coder
            .decode_iid_symbols(symbols.len(), &model)
            .map(UnwrapInfallible::unwrap_infallible)
            .collect::<Vec<_>>();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn get_compressed_peek_then_continue_encoding() {
        let model = Categorical::<u32, 16>::from_floating_point_probabilities(&[0.4, 0.3, 0.2, 0.1]).unwrap();
        let first_half = vec![1usize, 2, 0];
        let second_half = vec![3usize, 1, 2, 0];

        let mut coder = DefaultAnsCoder::new();
        coder
            .encode_iid_symbols_reverse::<_, _, _, 16>(&second_half, &model)
            .unwrap();

        let peeked = coder.get_compressed().to_vec();
        assert!(!peeked.is_empty());

        // The peek must be independently decodable, and the coder must be left
        // exactly as it was before the peek (not off by one word).
        let mut peek_coder = DefaultAnsCoder::from_compressed(peeked).unwrap();
        let decoded_second_half = peek_coder
            .decode_iid_symbols(second_half.len(), &model)
            .map(UnwrapInfallible::unwrap_infallible)
            .collect::<Vec<_>>();
        assert_eq!(decoded_second_half, second_half);

        coder
            .encode_iid_symbols_reverse::<_, _, _, 16>(&first_half, &model)
            .unwrap();
        let compressed = coder.into_compressed();

        let mut coder = DefaultAnsCoder::from_compressed(compressed).unwrap();
        let decoded = coder
            .decode_iid_symbols(first_half.len() + second_half.len(), &model)
            .map(UnwrapInfallible::unwrap_infallible)
            .collect::<Vec<_>>();
        assert_eq!(decoded, [first_half, second_half].concat());
    }

    #[test]
    fn round_trips_many_random_messages() {
        use rand::{Rng, SeedableRng};
        use rand_xoshiro::Xoshiro256StarStar;

        let probabilities = vec![0.02, 0.3, 0.05, 0.18, 0.11, 0.02, 0.09, 0.04, 0.19];
        let model = Categorical::<u32, 24>::from_floating_point_probabilities(&probabilities).unwrap();

        let mut rng = Xoshiro256StarStar::seed_from_u64(0xDEAD_BEEF_u64);
        for _ in 0..100 {
            let amt = rng.gen_range(0..200);
            let symbols = (0..amt)
                .map(|_| rng.gen_range(0..model.len()))
                .collect::<Vec<_>>();

            let mut coder = DefaultAnsCoder::new();
            coder
                .encode_iid_symbols_reverse::<_, _, _, 24>(&symbols, &model)
                .unwrap();
            let compressed = coder.into_compressed();

            let mut coder = DefaultAnsCoder::from_compressed(compressed).unwrap();
            let decoded = coder
                .decode_iid_symbols(symbols.len(), &model)
                .map(UnwrapInfallible::unwrap_infallible)
                .collect::<Vec<_>>();
            assert_eq!(decoded, symbols);
        }
    }
}
