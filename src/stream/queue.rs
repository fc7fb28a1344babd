//! Encoding and decoding on a queue ("first in, first out").
//!
//! [`RangeEncoder`]/[`RangeDecoder`] implement range coding: they maintain a
//! shrinking interval `[lower, lower + range)` of `State`, narrowed on every
//! encoded symbol to the sub-interval proportional to that symbol's
//! probability. Unlike [`super::stack::AnsCoder`], the symbol order is
//! preserved (first symbol encoded is the first symbol decoded), which comes
//! at the cost of carry propagation: narrowing the interval can overflow
//! `lower` and needs to retroactively increment words already written. The
//! encoder defers emitting a word until it knows whether a carry will land on
//! it, tracked by [`EncoderSituation`].

use alloc::vec::Vec;
use core::{
    borrow::Borrow,
    fmt::Debug,
    marker::PhantomData,
    num::NonZeroUsize,
    ops::Deref,
};

use num::cast::AsPrimitive;

use super::{
    models::{DecoderModel, EncoderModel},
    Code, Decode, Encode,
};
use crate::{BitArray, DecoderFrontendError, EncoderError, EncoderFrontendError};

/// The internal state of a [`RangeEncoder`] or [`RangeDecoder`]: the current
/// interval `[lower, lower + range)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoderState<CompressedWord, State> {
    lower: State,

    /// Invariant: `range >= State::one() << (State::BITS - CompressedWord::BITS)`.
    /// This guarantees that the highest-order `CompressedWord` of `lower`
    /// always identifies the interval precisely enough that only it (modulo
    /// carry propagation) needs to be flushed.
    range: State,

    phantom: PhantomData<CompressedWord>,
}

impl<CompressedWord, State: BitArray> CoderState<CompressedWord, State> {
    pub fn lower(&self) -> State {
        self.lower
    }

    pub fn range(&self) -> State {
        self.range
    }
}

impl<CompressedWord, State: BitArray> Default for CoderState<CompressedWord, State> {
    fn default() -> Self {
        Self {
            lower: State::zero(),
            range: State::max_value(),
            phantom: PhantomData,
        }
    }
}

/// A queue entropy coder: encoding appends symbols, decoding consumes them
/// back off in the same order.
///
/// See the [module-level docs](self) for the range coding algorithm and
/// [`DefaultRangeEncoder`]/[`DefaultRangeDecoder`] for the type aliases most
/// callers want.
pub struct RangeEncoder<CompressedWord, State>
where
    CompressedWord: BitArray,
    State: BitArray,
{
    bulk: Vec<CompressedWord>,
    state: CoderState<CompressedWord, State>,
    situation: EncoderSituation<CompressedWord>,
}

/// Tracks whether the most recently flushed word might still need a carry
/// applied to it (`Inverted`) or is final (`Normal`). Wraps the number of
/// words held back and the value of the first one of them.
#[derive(Debug, PartialEq, Eq)]
enum EncoderSituation<CompressedWord> {
    Normal,
    Inverted(NonZeroUsize, CompressedWord),
}

impl<CompressedWord> Default for EncoderSituation<CompressedWord> {
    fn default() -> Self {
        Self::Normal
    }
}

/// A [`RangeEncoder`] with generic parameters that work well for most
/// applications: 32-bit compressed words and a 64-bit internal state.
pub type DefaultRangeEncoder = RangeEncoder<u32, u64>;

/// A [`RangeDecoder`] with the same generic parameters as
/// [`DefaultRangeEncoder`].
pub type DefaultRangeDecoder = RangeDecoder<u32, u64>;

impl<CompressedWord, State> Debug for RangeEncoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter_compressed()).finish()
    }
}

impl<CompressedWord, State> Code for RangeEncoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    type CompressedWord = CompressedWord;
    type State = CoderState<CompressedWord, State>;

    fn state(&self) -> Self::State {
        self.state
    }

    fn maybe_empty(&self) -> bool {
        self.is_empty()
    }
}

impl<CompressedWord, State> Default for RangeEncoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<CompressedWord, State> RangeEncoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    /// Creates an empty encoder for range coding.
    pub fn new() -> Self {
        assert!(State::BITS >= 2 * CompressedWord::BITS);
        assert_eq!(State::BITS % CompressedWord::BITS, 0);

        Self {
            bulk: Vec::new(),
            state: CoderState::default(),
            situation: EncoderSituation::Normal,
        }
    }

    /// Returns `true` if no symbol has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.state.range == State::max_value() && self.bulk.is_empty()
    }

    /// Consumes the encoder and seals the current interval into its final
    /// compressed representation.
    pub fn into_compressed(mut self) -> Vec<CompressedWord> {
        self.seal();
        self.bulk
    }

    /// Returns a read-only view of the compressed data, without consuming the
    /// encoder.
    pub fn get_compressed(&mut self) -> EncoderGuard<'_, CompressedWord, State> {
        EncoderGuard::new(self)
    }

    /// Turns the encoder into a decoder over the same (sealed) compressed
    /// data, consuming it.
    pub fn into_decoder(self) -> RangeDecoder<CompressedWord, State> {
        RangeDecoder::from_compressed(self.into_compressed())
    }

    pub fn iter_compressed(&self) -> impl Iterator<Item = CompressedWord> + '_ {
        let last = (self.state.lower >> (State::BITS - CompressedWord::BITS)).as_();
        self.bulk.iter().copied().chain(core::iter::once(last))
    }

    /// Number of `CompressedWord`s the encoder would currently emit.
    pub fn num_words(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.bulk.len() + 1
        }
    }

    pub fn num_bits(&self) -> usize {
        CompressedWord::BITS * self.num_words()
    }

    /// Flushes held-back words (if in an inverted situation) and appends the
    /// single word that identifies the current interval. A no-op if nothing
    /// has been encoded yet, so that encoding zero symbols produces zero
    /// words.
    ///
    /// Does not touch `state` or `situation`, so a subsequent call to
    /// [`unseal`](Self::unseal) exactly reverses it.
    fn seal(&mut self) {
        if self.state.range == State::max_value() {
            return;
        }

        let point = self.state.lower.wrapping_add(&(self.state.range - State::one()));

        if let EncoderSituation::Inverted(num_inverted, first_inverted_lower_word) = self.situation {
            let (first_word, consecutive_words) = if point < self.state.lower {
                (first_inverted_lower_word + CompressedWord::one(), CompressedWord::zero())
            } else {
                (first_inverted_lower_word, CompressedWord::max_value())
            };

            self.bulk.push(first_word);
            for _ in 1..num_inverted.get() {
                self.bulk.push(consecutive_words);
            }
        }

        let word = (point >> (State::BITS - CompressedWord::BITS)).as_();
        self.bulk.push(word);
    }

    fn unseal(&mut self) {
        if self.bulk.is_empty() {
            return;
        }
        self.bulk.pop();
        if let EncoderSituation::Inverted(num_inverted, _) = self.situation {
            for _ in 0..num_inverted.get() {
                self.bulk.pop();
            }
        }
    }
}

impl<CompressedWord, State, const PRECISION: usize> Encode<PRECISION> for RangeEncoder<CompressedWord, State>
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
        // Invariant maintained throughout: `range >= State::one() << (State::BITS -
        // CompressedWord::BITS)`.
        let (left_cumulative, probability) = model
            .left_cumulative_and_probability(symbol)
            .map_err(|()| EncoderFrontendError::ImpossibleSymbol)?;

        let scale = self.state.range >> PRECISION;
        self.state.range = scale * probability.into().into();
        let new_lower = self.state.lower.wrapping_add(&(scale * left_cumulative.into().into()));

        if let EncoderSituation::Inverted(num_inverted, first_inverted_lower_word) = self.situation {
            if new_lower.wrapping_add(&self.state.range) > new_lower {
                // A carry landed: we've transitioned from an inverted to a normal situation.
                let (first_word, consecutive_words) = if new_lower < self.state.lower {
                    (first_inverted_lower_word + CompressedWord::one(), CompressedWord::zero())
                } else {
                    (first_inverted_lower_word, CompressedWord::max_value())
                };

                self.bulk.push(first_word);
                for _ in 1..num_inverted.get() {
                    self.bulk.push(consecutive_words);
                }
                self.situation = EncoderSituation::Normal;
            }
        }

        self.state.lower = new_lower;

        if self.state.range < State::one() << (State::BITS - CompressedWord::BITS) {
            // `range` underflowed; restore the invariant by shifting in a fresh word. Since
            // `probability != 0`, `range` lost at most `CompressedWord::BITS` bits.
            self.state.range = self.state.range << CompressedWord::BITS;

            let lower_word = (self.state.lower >> (State::BITS - CompressedWord::BITS)).as_();
            self.state.lower = self.state.lower << CompressedWord::BITS;

            if let EncoderSituation::Inverted(num_inverted, _) = &mut self.situation {
                *num_inverted = NonZeroUsize::new(num_inverted.get().wrapping_add(1))
                    .expect("cannot encode more symbols than addressable with usize");
            } else if self.state.lower.wrapping_add(&self.state.range) > self.state.lower {
                // The most common case: no carry is possible yet, so the word is final.
                self.bulk.push(lower_word);
            } else {
                // The word might still need a carry applied later; hold it back.
                self.situation =
                    EncoderSituation::Inverted(NonZeroUsize::new(1).expect("1 != 0"), lower_word);
            }
        }

        Ok(())
    }
}

/// RAII guard returned by [`RangeEncoder::get_compressed`]: temporarily
/// seals the encoder's compressed data, then unseals it again on drop.
pub struct EncoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    inner: &'a mut RangeEncoder<CompressedWord, State>,
}

impl<'a, CompressedWord, State> EncoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn new(inner: &'a mut RangeEncoder<CompressedWord, State>) -> Self {
        inner.seal();
        Self { inner }
    }
}

impl<'a, CompressedWord, State> Deref for EncoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    type Target = [CompressedWord];

    fn deref(&self) -> &Self::Target {
        &self.inner.bulk
    }
}

impl<'a, CompressedWord, State> Drop for EncoderGuard<'a, CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    fn drop(&mut self) {
        self.inner.unseal();
    }
}

/// The decoding counterpart to [`RangeEncoder`].
#[derive(Debug)]
pub struct RangeDecoder<CompressedWord, State>
where
    CompressedWord: BitArray,
    State: BitArray,
{
    bulk: Vec<CompressedWord>,
    pos: usize,
    state: CoderState<CompressedWord, State>,

    /// Invariant: `point.wrapping_sub(&state.lower) < state.range`.
    point: State,
}

impl<CompressedWord, State> RangeDecoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    /// Creates a decoder from previously sealed compressed data (e.g., from
    /// [`RangeEncoder::into_compressed`]).
    pub fn from_compressed(compressed: Vec<CompressedWord>) -> Self {
        assert!(State::BITS >= 2 * CompressedWord::BITS);
        assert_eq!(State::BITS % CompressedWord::BITS, 0);

        let mut pos = 0usize;
        let words_per_state = State::BITS / CompressedWord::BITS;
        let mut point = State::zero();
        let mut num_read = 0;
        while num_read < words_per_state {
            let Some(&word) = compressed.get(pos) else {
                break;
            };
            point = (point << CompressedWord::BITS) | word.into();
            pos += 1;
            num_read += 1;
        }
        if num_read < words_per_state && num_read != 0 {
            point = point << (State::BITS - num_read * CompressedWord::BITS);
        }

        Self {
            bulk: compressed,
            pos,
            state: CoderState::default(),
            point,
        }
    }
}

impl<CompressedWord, State> Code for RangeDecoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    type CompressedWord = CompressedWord;
    type State = CoderState<CompressedWord, State>;

    fn state(&self) -> Self::State {
        self.state
    }

    fn maybe_empty(&self) -> bool {
        self.pos >= self.bulk.len()
    }
}

impl<CompressedWord, State, const PRECISION: usize> Decode<PRECISION> for RangeDecoder<CompressedWord, State>
where
    CompressedWord: BitArray + Into<State>,
    State: BitArray + AsPrimitive<CompressedWord>,
{
    /// Decoding can fail if the compressed data is malformed (a quantile that
    /// falls outside every probability interval of the supplied model).
    type DecodingError = DecoderFrontendError;

    fn decode_symbol<D>(&mut self, model: D) -> Result<D::Symbol, DecoderFrontendError>
    where
        D: DecoderModel<PRECISION>,
        D::Probability: Into<CompressedWord>,
        CompressedWord: AsPrimitive<D::Probability>,
    {
        // Invariant maintained throughout: `point (-) lower < range` (wrapping sub).
        let scale = self.state.range >> PRECISION;
        let quantile = self.point.wrapping_sub(&self.state.lower) / scale;
        if quantile >= State::one() << PRECISION {
            return Err(DecoderFrontendError::InvalidData);
        }

        let (symbol, left_cumulative, probability) = model.quantile_function(quantile.as_().as_());

        self.state.lower = self.state.lower.wrapping_add(&(scale * left_cumulative.into().into()));
        self.state.range = scale * probability.into().into();

        if self.state.range < State::one() << (State::BITS - CompressedWord::BITS) {
            self.state.lower = self.state.lower << CompressedWord::BITS;
            self.state.range = self.state.range << CompressedWord::BITS;

            self.point = self.point << CompressedWord::BITS;
            if let Some(&word) = self.bulk.get(self.pos) {
                self.point = self.point | word.into();
                self.pos += 1;
            }
        }

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

        let mut encoder = DefaultRangeEncoder::new();
        encoder.encode_iid_symbols(&symbols, &model).unwrap();
        assert!(!encoder.is_empty());
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded = decoder
            .decode_iid_symbols(symbols.len(), &model)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn empty_coder_round_trips() {
        let encoder = DefaultRangeEncoder::new();
        assert!(encoder.is_empty());
        let compressed = encoder.into_compressed();
        assert!(compressed.is_empty());
        let decoder = DefaultRangeDecoder::from_compressed(compressed);
        assert!(decoder.maybe_empty());
    }

    #[test]
    fn round_trips_mixed_model_segments() {
        let uniform = Categorical::<u32, 16>::from_floating_point_probabilities(&[1.0, 1.0, 1.0, 1.0]).unwrap();
        let skewed =
            Categorical::<u32, 16>::from_floating_point_probabilities(&[0.9, 0.05, 0.03, 0.02]).unwrap();

        let first_half = vec![0usize, 3, 1, 2];
        let second_half = vec![0usize, 0, 0, 2];

        let mut encoder = DefaultRangeEncoder::new();
        encoder.encode_iid_symbols(&first_half, &uniform).unwrap();
        encoder.encode_iid_symbols(&second_half, &skewed).unwrap();
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded_first = decoder
            .decode_iid_symbols(first_half.len(), &uniform)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let decoded_second = decoder
            .decode_iid_symbols(second_half.len(), &skewed)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded_first, first_half);
        assert_eq!(decoded_second, second_half);
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

        let mut encoder = DefaultRangeEncoder::new();
        encoder
            .encode_symbols(symbols.iter().zip(models.iter()))
            .unwrap();
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded = decoder
            .decode_symbols(models.iter())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    #[cfg(feature = "std")]
    fn round_trips_heterogeneous_cauchy_models() {
        use crate::stream::models::quantized_cauchy;

        let symbols: [i32; 7] = [3, 2, 6, -51, -19, 5, 87];
        let locs = [7.2, -1.4, 9.1, -60.1, 3.9, 8.1, 63.2];
        let scales = [4.3, 5.1, 6.0, 14.2, 31.9, 7.2, 10.7];

        let models: Vec<_> = locs
            .iter()
            .zip(scales.iter())
            .map(|(&loc, &scale)| quantized_cauchy::<u32, 24>(-100..=100, loc, scale).unwrap())
            .collect();

        let mut encoder = DefaultRangeEncoder::new();
        encoder
            .encode_symbols(symbols.iter().zip(models.iter()))
            .unwrap();
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded = decoder
            .decode_symbols(models.iter())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    #[cfg(feature = "std")]
    fn round_trips_fixed_cauchy_model() {
        use crate::stream::models::quantized_cauchy;

        let symbols: [i32; 7] = [3, 2, 6, -51, -19, 5, 87];
        let model = quantized_cauchy::<u32, 24>(-100..=100, 10.2, 30.9).unwrap();

        let mut encoder = DefaultRangeEncoder::new();
        encoder.encode_iid_symbols(&symbols, &model).unwrap();
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded = decoder
            .decode_iid_symbols(symbols.len(), &model)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn get_compressed_peek_then_continue_encoding() {
        let model = Categorical::<u32, 16>::from_floating_point_probabilities(&[0.4, 0.3, 0.2, 0.1]).unwrap();
        let first_half = vec![1usize, 2, 0];
        let second_half = vec![3usize, 1, 2, 0];

        let mut encoder = DefaultRangeEncoder::new();
        encoder.encode_iid_symbols(&first_half, &model).unwrap();

        let peeked = encoder.get_compressed().to_vec();
        assert!(!peeked.is_empty());

        // The peek must be independently decodable, and the encoder must be left
        // exactly as it was before the peek (not off by one held-back word).
        let mut peek_decoder = DefaultRangeDecoder::from_compressed(peeked);
        let decoded_first_half = peek_decoder
            .decode_iid_symbols(first_half.len(), &model)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded_first_half, first_half);

        encoder.encode_iid_symbols(&second_half, &model).unwrap();
        let compressed = encoder.into_compressed();

        let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
        let decoded = decoder
            .decode_iid_symbols(first_half.len() + second_half.len(), &model)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, [first_half, second_half].concat());
    }

    #[test]
    fn little_endian_round_trip_preserves_words() {
        let probabilities = vec![0.5, 0.25, 0.125, 0.125];
        let model = Categorical::<u32, 12>::from_floating_point_probabilities(&probabilities).unwrap();
        let symbols = vec![0usize, 1, 2, 3, 0, 0, 3, 2];

        let mut encoder = DefaultRangeEncoder::new();
        encoder.encode_iid_symbols(&symbols, &model).unwrap();
        let words = encoder.into_compressed();

        let persisted: Vec<u32> = crate::little_endian_words(&words).collect();
        let restored: Vec<u32> = crate::little_endian_words(&persisted).collect();
        assert_eq!(words, restored);

        let mut decoder = DefaultRangeDecoder::from_compressed(restored);
        let decoded = decoder
            .decode_iid_symbols(symbols.len(), &model)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn round_trips_many_random_messages() {
        use rand::{Rng, SeedableRng};
        use rand_xoshiro::Xoshiro256StarStar;

        let probabilities = vec![0.02, 0.3, 0.05, 0.18, 0.11, 0.02, 0.09, 0.04, 0.19];
        let model = Categorical::<u32, 24>::from_floating_point_probabilities(&probabilities).unwrap();

        let mut rng = Xoshiro256StarStar::seed_from_u64(0x1234_5678_u64);
        for _ in 0..100 {
            let amt = rng.gen_range(0..200);
            let symbols = (0..amt)
                .map(|_| rng.gen_range(0..model.len()))
                .collect::<Vec<_>>();

            let mut encoder = DefaultRangeEncoder::new();
            encoder.encode_iid_symbols(&symbols, &model).unwrap();
            let compressed = encoder.into_compressed();

            let mut decoder = DefaultRangeDecoder::from_compressed(compressed);
            let decoded = decoder
                .decode_iid_symbols(symbols.len(), &model)
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(decoded, symbols);
        }
    }
}
