//! The quantized entropy-model substrate shared by [`super::stack`] and
//! [`super::queue`].
//!
//! An entropy model turns a (possibly continuous) probability distribution
//! over a bounded integer alphabet into an exactly invertible fixed-point
//! mass function: every symbol gets a probability that is a positive integer
//! multiple of `2^-PRECISION`, and the probabilities sum to exactly
//! `2^PRECISION`. Two collaborator traits expose this to the coders:
//!
//! - [`EncoderModel::left_cumulative_and_probability`] — used while encoding,
//!   maps a symbol to its `(left_cumulative, probability)` pair;
//! - [`DecoderModel::quantile_function`] — used while decoding, maps a
//!   fixed-point quantile back to the symbol whose interval contains it.
//!
//! [`LeakyQuantizer`] builds such a model from any continuous distribution
//! that implements the `probability` crate's `Distribution` trait (i.e., has
//! a CDF); [`Categorical`] builds one directly from an explicit table of
//! probabilities.

use alloc::vec::Vec;
use core::{borrow::Borrow, marker::PhantomData, ops::RangeInclusive};

use num::cast::AsPrimitive;
use smallvec::SmallVec;

use crate::{BitArray, ModelConstructionError};

/// Shared associated types of [`EncoderModel`] and [`DecoderModel`].
pub trait EntropyModel<const PRECISION: usize> {
    /// The type of symbol this model assigns probabilities to.
    type Symbol;

    /// The fixed-point type used to represent probabilities and cumulatives.
    /// Only the lowest `PRECISION` bits are ever significant.
    type Probability: BitArray;
}

/// A model that can be queried while *encoding*.
pub trait EncoderModel<const PRECISION: usize>: EntropyModel<PRECISION> {
    /// Returns `(left_cumulative, probability)` for `symbol`, or `Err(())` if
    /// `symbol` is outside the model's support (equivalently, has
    /// probability zero).
    ///
    /// Invariant (C3): if this returns `Ok((c, p))` then
    /// `quantile_function` maps every `q` in `c..c + p` back to `symbol`.
    fn left_cumulative_and_probability(
        &self,
        symbol: impl Borrow<Self::Symbol>,
    ) -> Result<(Self::Probability, Self::Probability), ()>;
}

/// A model that can be queried while *decoding*.
pub trait DecoderModel<const PRECISION: usize>: EntropyModel<PRECISION> {
    /// Returns `(symbol, left_cumulative, probability)` for the symbol whose
    /// fixed-point interval contains `quantile`.
    ///
    /// `quantile` must be in `0..2^PRECISION`. Implementations may assume
    /// this (the coders never call this method with an out-of-range
    /// quantile unless the compressed data itself is malformed).
    fn quantile_function(
        &self,
        quantile: Self::Probability,
    ) -> (Self::Symbol, Self::Probability, Self::Probability);
}

impl<'m, M, const PRECISION: usize> EntropyModel<PRECISION> for &'m M
where
    M: EntropyModel<PRECISION>,
{
    type Symbol = M::Symbol;
    type Probability = M::Probability;
}

impl<'m, M, const PRECISION: usize> EncoderModel<PRECISION> for &'m M
where
    M: EncoderModel<PRECISION>,
{
    fn left_cumulative_and_probability(
        &self,
        symbol: impl Borrow<Self::Symbol>,
    ) -> Result<(Self::Probability, Self::Probability), ()> {
        (*self).left_cumulative_and_probability(symbol)
    }
}

impl<'m, M, const PRECISION: usize> DecoderModel<PRECISION> for &'m M
where
    M: DecoderModel<PRECISION>,
{
    fn quantile_function(
        &self,
        quantile: Self::Probability,
    ) -> (Self::Symbol, Self::Probability, Self::Probability) {
        (*self).quantile_function(quantile)
    }
}

/// Fixes up a vector of `N + 1` monotonically nondecreasing cumulatives
/// (`cumulative[0] == 0`, `cumulative[N] == 2^PRECISION`) so that every one
/// of the `N` induced probabilities `cumulative[i + 1] - cumulative[i]` is at
/// least 1, without changing the total.
///
/// Implements the "largest slack, lowest index on ties" remediation rule
/// shared by the CDF-based and the categorical construction algorithms.
fn lift_zero_probabilities(cumulative: &mut [i128]) {
    let n = cumulative.len() - 1;
    loop {
        let starved = (0..n).find(|&i| cumulative[i + 1] == cumulative[i]);
        let Some(starved) = starved else {
            break;
        };

        let mut donor = None;
        for j in 0..n {
            let slack = cumulative[j + 1] - cumulative[j] - 1;
            if slack > 0 {
                match donor {
                    None => donor = Some((j, slack)),
                    Some((_, best)) if slack > best => donor = Some((j, slack)),
                    _ => {}
                }
            }
        }
        let (donor, _) = donor.expect(
            "support is larger than 2^PRECISION; `LeakyQuantizer`/`Categorical` must reject this before calling `lift_zero_probabilities`",
        );

        if starved < donor {
            for c in &mut cumulative[starved + 1..=donor] {
                *c += 1;
            }
        } else {
            for c in &mut cumulative[donor + 1..=starved] {
                *c -= 1;
            }
        }
    }
}

/// Builds a [`LeakyQuantizedDistribution`] from a continuous probability
/// distribution's CDF and a bounded integer support.
///
/// `LeakyQuantizer` itself only holds the support; call [`quantize`](
/// Self::quantize) once per distribution (e.g., once per symbol, if the
/// distribution's parameters vary from symbol to symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakyQuantizer<Symbol, Probability, const PRECISION: usize> {
    min_symbol_inclusive: Symbol,
    max_symbol_inclusive: Symbol,
    _phantom: PhantomData<Probability>,
}

impl<Symbol, Probability, const PRECISION: usize> LeakyQuantizer<Symbol, Probability, PRECISION>
where
    Symbol: Copy + Ord + AsPrimitive<i64>,
    i64: AsPrimitive<Symbol>,
    Probability: BitArray,
{
    /// Creates a quantizer for the given (inclusive) integer support.
    pub fn new(support: RangeInclusive<Symbol>) -> Result<Self, ModelConstructionError> {
        if PRECISION == 0 || PRECISION > Probability::BITS {
            return Err(ModelConstructionError::InvalidPrecision);
        }
        let (lower, upper) = (*support.start(), *support.end());
        if lower > upper {
            return Err(ModelConstructionError::EmptySupport);
        }
        let alphabet_size = upper.as_() - lower.as_() + 1;
        if alphabet_size > (1i64 << PRECISION.min(62)) {
            return Err(ModelConstructionError::UnrepresentableProbabilities);
        }

        Ok(Self {
            min_symbol_inclusive: lower,
            max_symbol_inclusive: upper,
            _phantom: PhantomData,
        })
    }

    /// Quantizes `distribution` over this quantizer's support, producing an
    /// exactly invertible fixed-point entropy model.
    ///
    /// Implements the "Construction from a continuous CDF" algorithm: a
    /// tentative left-cumulative is computed as `round(F(s - 1/2) *
    /// 2^PRECISION)` for every symbol boundary, then any resulting
    /// zero-probability symbol is lifted to 1 by stealing from the neighbor
    /// with the largest slack.
    ///
    /// Requires the `std` feature (which pulls in the `probability` crate's
    /// `Distribution` trait).
    #[cfg(feature = "std")]
    pub fn quantize<D>(&self, distribution: D) -> LeakyQuantizedDistribution<Symbol, Probability, PRECISION>
    where
        D: probability::distribution::Distribution<Value = f64>,
        Probability: AsPrimitive<i128>,
        i128: AsPrimitive<Probability>,
    {
        let lower = self.min_symbol_inclusive.as_();
        let upper = self.max_symbol_inclusive.as_();
        let n = (upper - lower + 1) as usize;
        let scale = (1i128 << PRECISION) as f64;

        let mut cumulative: SmallVec<[i128; 256]> = SmallVec::with_capacity(n + 1);
        cumulative.push(0);
        for k in 1..n {
            let s = lower + k as i64;
            let raw = (distribution.distribution(s as f64 - 0.5) * scale).round() as i128;
            let prev = *cumulative.last().unwrap();
            let clamped = raw.clamp(prev, (1i128 << PRECISION) - 1);
            cumulative.push(clamped);
        }
        cumulative.push(1i128 << PRECISION);

        lift_zero_probabilities(&mut cumulative);

        LeakyQuantizedDistribution {
            min_symbol_inclusive: self.min_symbol_inclusive,
            cumulative: cumulative.into_iter().map(|c| c.as_()).collect(),
        }
    }
}

/// An exactly invertible fixed-point entropy model produced by
/// [`LeakyQuantizer::quantize`].
#[derive(Debug, Clone)]
pub struct LeakyQuantizedDistribution<Symbol, Probability, const PRECISION: usize> {
    min_symbol_inclusive: Symbol,
    /// `cumulative[i]` is the left-cumulative of symbol `min_symbol_inclusive + i`;
    /// length is `alphabet_size + 1`, with `cumulative[0] == 0` and
    /// `cumulative[alphabet_size] == 2^PRECISION`.
    cumulative: Vec<Probability>,
}

impl<Symbol, Probability, const PRECISION: usize> EntropyModel<PRECISION>
    for LeakyQuantizedDistribution<Symbol, Probability, PRECISION>
where
    Probability: BitArray,
{
    type Symbol = Symbol;
    type Probability = Probability;
}

impl<Symbol, Probability, const PRECISION: usize> EncoderModel<PRECISION>
    for LeakyQuantizedDistribution<Symbol, Probability, PRECISION>
where
    Symbol: Copy + Ord + AsPrimitive<i64>,
    i64: AsPrimitive<Symbol>,
    Probability: BitArray,
{
    fn left_cumulative_and_probability(
        &self,
        symbol: impl Borrow<Symbol>,
    ) -> Result<(Probability, Probability), ()> {
        let symbol = *symbol.borrow();
        let offset = symbol.as_() - self.min_symbol_inclusive.as_();
        if offset < 0 {
            return Err(());
        }
        let idx = offset as usize;
        if idx + 1 >= self.cumulative.len() {
            return Err(());
        }
        let left = self.cumulative[idx];
        let right = self.cumulative[idx + 1];
        Ok((left, right - left))
    }
}

impl<Symbol, Probability, const PRECISION: usize> DecoderModel<PRECISION>
    for LeakyQuantizedDistribution<Symbol, Probability, PRECISION>
where
    Symbol: Copy + Ord + AsPrimitive<i64>,
    i64: AsPrimitive<Symbol>,
    Probability: BitArray,
{
    fn quantile_function(&self, quantile: Probability) -> (Symbol, Probability, Probability) {
        let idx = binary_search_cumulative(&self.cumulative, quantile);
        let left = self.cumulative[idx];
        let right = self.cumulative[idx + 1];
        let symbol = (self.min_symbol_inclusive.as_() + idx as i64).as_();
        (symbol, left, right - left)
    }
}

/// Returns the unique `i` such that `cumulative[i] <= quantile <
/// cumulative[i + 1]`, assuming `cumulative` is nondecreasing, starts at 0,
/// and ends at (at least) `quantile + 1`.
fn binary_search_cumulative<Probability: BitArray>(cumulative: &[Probability], quantile: Probability) -> usize {
    let mut low = 0usize;
    let mut high = cumulative.len() - 1;
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if cumulative[mid] <= quantile {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

/// An entropy model built directly from an explicit table of probabilities,
/// for alphabets with no convenient continuous CDF (symbols are
/// `0..probabilities.len()`).
#[derive(Debug, Clone)]
pub struct Categorical<Probability, const PRECISION: usize> {
    cumulative: Vec<Probability>,
}

impl<Probability, const PRECISION: usize> Categorical<Probability, PRECISION>
where
    Probability: BitArray + AsPrimitive<i128>,
    i128: AsPrimitive<Probability>,
{
    /// Builds a categorical model from (not necessarily normalized)
    /// probabilities.
    ///
    /// Implements the "Construction from discrete categorical
    /// probabilities" algorithm: scale to `2^PRECISION`, floor, distribute
    /// the residual to the symbols with the largest fractional parts (ties
    /// broken by the lower index), then lift any resulting zero-probability
    /// symbol to 1 by stealing from the largest-slack neighbor.
    pub fn from_floating_point_probabilities(
        probabilities: &[f64],
    ) -> Result<Self, ModelConstructionError> {
        if PRECISION == 0 || PRECISION > Probability::BITS {
            return Err(ModelConstructionError::InvalidPrecision);
        }
        let n = probabilities.len();
        if n == 0 {
            return Err(ModelConstructionError::EmptySupport);
        }
        if n as u128 > (1u128 << PRECISION) {
            return Err(ModelConstructionError::UnrepresentableProbabilities);
        }

        let total_mass: f64 = probabilities.iter().sum();
        let scale = (1i128 << PRECISION) as f64 / total_mass;

        let mut floors: SmallVec<[i128; 256]> = SmallVec::with_capacity(n);
        let mut fracs: SmallVec<[(f64, usize); 256]> = SmallVec::with_capacity(n);
        for (i, &p) in probabilities.iter().enumerate() {
            let scaled = p * scale;
            let floor = scaled.floor();
            floors.push(floor as i128);
            fracs.push((scaled - floor, i));
        }

        let floor_sum: i128 = floors.iter().sum();
        let residual = (1i128 << PRECISION) - floor_sum;
        debug_assert!(residual >= 0 && residual as usize <= n);

        fracs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
        for &(_, i) in fracs.iter().take(residual.max(0) as usize) {
            floors[i] += 1;
        }

        let mut cumulative: Vec<i128> = Vec::with_capacity(n + 1);
        let mut acc = 0i128;
        cumulative.push(acc);
        for &p in &floors {
            acc += p;
            cumulative.push(acc);
        }

        lift_zero_probabilities(&mut cumulative);

        Ok(Self {
            cumulative: cumulative.into_iter().map(|c| c.as_()).collect(),
        })
    }

    /// Number of symbols in this model's alphabet.
    pub fn len(&self) -> usize {
        self.cumulative.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Probability: BitArray, const PRECISION: usize> EntropyModel<PRECISION>
    for Categorical<Probability, PRECISION>
{
    type Symbol = usize;
    type Probability = Probability;
}

impl<Probability: BitArray, const PRECISION: usize> EncoderModel<PRECISION>
    for Categorical<Probability, PRECISION>
{
    fn left_cumulative_and_probability(
        &self,
        symbol: impl Borrow<usize>,
    ) -> Result<(Probability, Probability), ()> {
        let symbol = *symbol.borrow();
        if symbol + 1 >= self.cumulative.len() {
            return Err(());
        }
        let left = self.cumulative[symbol];
        let right = self.cumulative[symbol + 1];
        Ok((left, right - left))
    }
}

impl<Probability: BitArray, const PRECISION: usize> DecoderModel<PRECISION>
    for Categorical<Probability, PRECISION>
{
    fn quantile_function(&self, quantile: Probability) -> (usize, Probability, Probability) {
        let idx = binary_search_cumulative(&self.cumulative, quantile);
        let left = self.cumulative[idx];
        let right = self.cumulative[idx + 1];
        (idx, left, right - left)
    }
}

/// Convenience constructor for a leaky-quantized Gaussian model over
/// `support`, as used throughout the end-to-end test scenarios of this
/// crate. Equivalent to `LeakyQuantizer::new(support)?.quantize(Gaussian)`.
#[cfg(feature = "std")]
pub fn quantized_gaussian<Probability, const PRECISION: usize>(
    support: RangeInclusive<i32>,
    mean: f64,
    std_dev: f64,
) -> Result<LeakyQuantizedDistribution<i32, Probability, PRECISION>, ModelConstructionError>
where
    Probability: BitArray + AsPrimitive<i128>,
    i128: AsPrimitive<Probability>,
{
    let quantizer = LeakyQuantizer::new(support)?;
    Ok(quantizer.quantize(probability::distribution::Gaussian::new(mean, std_dev)))
}

/// Convenience constructor for a leaky-quantized Cauchy model over
/// `support`. Equivalent to `LeakyQuantizer::new(support)?.quantize(Cauchy)`.
#[cfg(feature = "std")]
pub fn quantized_cauchy<Probability, const PRECISION: usize>(
    support: RangeInclusive<i32>,
    location: f64,
    scale: f64,
) -> Result<LeakyQuantizedDistribution<i32, Probability, PRECISION>, ModelConstructionError>
where
    Probability: BitArray + AsPrimitive<i128>,
    i128: AsPrimitive<Probability>,
{
    let quantizer = LeakyQuantizer::new(support)?;
    Ok(quantizer.quantize(probability::distribution::Cauchy::new(location, scale)))
}
