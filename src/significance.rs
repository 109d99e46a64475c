
//! Empirical null distributions from surrogate statistics and the multiple comparison correction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::*;

use crate::Loggable;
use crate::correlation::{CorrelationStructure, StructureKey};
use crate::data::Count;
use crate::error::{AnalysisError, Result};

pub mod online;

use online::VarianceOnline;

/// Surrogate values of one key, stored as a histogram over the statistic
#[derive( Debug, Clone, Default, PartialEq )]
pub struct NullDistribution {
    histogram: Vec<u64>,
    samples: u64,
}

/// Null distributions of all keys, in key order. Each worker owns one and they are merged afterwards.
#[derive( Debug, Clone, PartialEq )]
pub struct NullAccumulator {
    distributions: Vec<NullDistribution>,
    realizations: usize,
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Correction {
    /// family-wise error rate, level alpha / m per test
    Bonferroni,
    /// false discovery rate, Benjamini-Hochberg step-up
    Fdr,
    None,
}

/// Decides which keys exceed their null distribution
#[derive( Debug, Clone )]
pub struct SignificanceEngine {
    alpha: f64,
    correction: Correction,
    surrogates: usize,
}

#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct SignificantEntry {
    pub key: StructureKey,
    /// statistic of the recorded data
    pub statistic: Count,
    pub p_value: f64,
    /// corrected level the p-value was compared against
    pub threshold: f64,
    pub correction: Correction,
    /// distance of the statistic from the surrogate mean in standard deviations, if the surrogates vary
    pub z_score: Option<f64>,
    /// smallest statistic of this key that reaches the threshold
    pub critical_value: Option<Count>,
}

#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct SignificanceReport {
    /// number of tested keys
    pub tested: usize,
    pub surrogates: usize,
    pub alpha: f64,
    pub correction: Correction,
    pub threshold: f64,
    /// significant keys in key order
    pub entries: Vec<SignificantEntry>,
}

impl NullDistribution {

    pub fn new() -> NullDistribution {
	NullDistribution::default()
    }

    pub fn add( &mut self, value: Count ) {
	let index = value as usize;
	if index >= self.histogram.len() {
	    self.histogram.resize( index + 1, 0 );
	}
	self.histogram[ index ] += 1;
	self.samples += 1;
    }

    pub fn merge( &mut self, other: &NullDistribution ) {
	if other.histogram.len() > self.histogram.len() {
	    self.histogram.resize( other.histogram.len(), 0 );
	}
	for (count, other_count) in self.histogram.iter_mut().zip( other.histogram.iter() ) {
	    *count += other_count;
	}
	self.samples += other.samples;
    }

    pub fn samples( &self ) -> u64 { self.samples }

    /// Number of surrogate values at least as large as `value`
    pub fn exceeding( &self, value: Count ) -> u64 {
	let index = value as usize;
	if index >= self.histogram.len() {
	    return 0;
	}
	self.histogram[ index .. ].iter().sum()
    }

    /// (#{s >= value} + 1) / (N + 1), never zero
    pub fn p_value( &self, value: Count ) -> f64 {
	( self.exceeding( value ) + 1 ) as f64 / ( self.samples + 1 ) as f64
    }

    /// Smallest statistic whose p-value is at most `alpha`, None if the surrogates cannot resolve `alpha`
    pub fn critical_value( &self, alpha: f64 ) -> Option<Count> {
	let denominator = ( self.samples + 1 ) as f64;
	let mut exceeding = self.samples;
	for (value, count) in self.histogram.iter().enumerate() {
	    if ( exceeding + 1 ) as f64 / denominator <= alpha {
		return Some( value as Count );
	    }
	    exceeding -= count;
	}
	if 1.0 / denominator <= alpha {
	    Some( self.histogram.len() as Count )
	} else {
	    None
	}
    }

    /// Mean and unbiased standard deviation of the surrogate values
    pub fn mean_std( &self ) -> Option<(f64, f64)> {
	let mut moments = VarianceOnline::new();
	for (value, count) in self.histogram.iter().enumerate() {
	    moments.update_weighted( value as f64, *count );
	}
	moments.mean_std( true )
    }

    pub fn z_score( &self, value: Count ) -> Option<f64> {
	match self.mean_std()? {
	    (mean, std) if std > 0.0 => Some( ( value as f64 - mean ) / std ),
	    _ => None,
	}
    }
}

impl NullAccumulator {

    pub fn new( num_keys: usize ) -> NullAccumulator {
	NullAccumulator{ distributions: vec!( NullDistribution::new(); num_keys ), realizations: 0 }
    }

    /// Adds the statistics of one surrogate realization, given in key order
    pub fn add_realization( &mut self, statistics: &[Count] ) {
	assert_eq!( statistics.len(), self.distributions.len() );
	for (distribution, value) in self.distributions.iter_mut().zip( statistics.iter() ) {
	    distribution.add( *value );
	}
	self.realizations += 1;
    }

    pub fn merge( mut self, other: NullAccumulator ) -> NullAccumulator {
	assert_eq!( self.distributions.len(), other.distributions.len() );
	for (distribution, other) in self.distributions.iter_mut().zip( other.distributions.iter() ) {
	    distribution.merge( other );
	}
	self.realizations += other.realizations;
	self
    }

    pub fn realizations( &self ) -> usize { self.realizations }
    pub fn distributions( &self ) -> &[NullDistribution] { &self.distributions }
    pub fn get( &self, index: usize ) -> &NullDistribution { &self.distributions[ index ] }
}

impl fmt::Display for Correction {
    fn fmt( &self, f: &mut fmt::Formatter ) -> fmt::Result {
	let name = match self {
	    Correction::Bonferroni => "bonferroni",
	    Correction::Fdr => "fdr",
	    Correction::None => "none",
	};
	write!( f, "{name}" )
    }
}

impl FromStr for Correction {
    type Err = AnalysisError;

    fn from_str( s: &str ) -> Result<Correction> {
	match s.trim() {
	    "bonferroni" => Ok( Correction::Bonferroni ),
	    "fdr" => Ok( Correction::Fdr ),
	    "none" => Ok( Correction::None ),
	    other => Err( AnalysisError::InvalidConfiguration(
		format!( "unknown correction '{other}', expected bonferroni, fdr or none" ))),
	}
    }
}

impl SignificanceEngine {

    pub fn new( alpha: f64, correction: Correction, surrogates: usize ) -> SignificanceEngine {
	SignificanceEngine{ alpha, correction, surrogates }
    }

    pub fn alpha( &self ) -> f64 { self.alpha }
    pub fn correction( &self ) -> Correction { self.correction }
    pub fn surrogates( &self ) -> usize { self.surrogates }

    /// Smallest p-value that N surrogates can produce
    pub fn resolution( &self ) -> f64 {
	1.0 / ( self.surrogates + 1 ) as f64
    }

    /// Level the smallest p-value has to reach for any of `num_tests` keys to become significant
    pub fn required_level( &self, num_tests: usize ) -> f64 {
	match self.correction {
	    Correction::Bonferroni => self.alpha / num_tests.max( 1 ) as f64,
	    Correction::Fdr | Correction::None => self.alpha,
	}
    }

    /// Checks the parameters against the number of tests. Runs before any surrogate is drawn.
    pub fn validate( &self, num_tests: usize ) -> Result<()> {
	if self.surrogates == 0 {
	    return Err( AnalysisError::InvalidConfiguration( "the number of surrogates must be positive".to_string() ));
	}
	if !( self.alpha > 0.0 && self.alpha < 1.0 ) {
	    return Err( AnalysisError::InvalidConfiguration( format!( "significance level {} outside of (0, 1)", self.alpha )));
	}
	let required = self.required_level( num_tests );
	let resolution = self.resolution();
	if resolution > required {
	    return Err( AnalysisError::InsufficientSurrogates{ surrogates: self.surrogates, resolution, required } );
	}
	debug!( "{} surrogates resolve {resolution:.2e} <= {required:.2e} for {num_tests} tests", self.surrogates );
	Ok( () )
    }

    /// Compares the statistic of every key with its null distribution.
    /// `keys` and the distributions in `null` share one order.
    pub fn evaluate( &self, keys: &[StructureKey], real: &CorrelationStructure, null: &NullAccumulator ) -> Result<SignificanceReport> {
	if keys.len() != null.distributions().len() {
	    return Err( AnalysisError::InvalidConfiguration( format!(
		"{} keys but {} null distributions", keys.len(), null.distributions().len() )));
	}
	let statistics = keys.iter()
	    .map( |key| real.get( key ).ok_or_else( || AnalysisError::InvalidConfiguration(
		format!( "no statistic of the recorded data for {key:?}" ))))
	    .collect::<Result<Vec<Count>>>()?;
	let p_values: Vec<f64> = statistics.iter().zip( null.distributions() )
	    .map( |(statistic, distribution)| distribution.p_value( *statistic ))
	    .collect();

	let m = keys.len();
	let threshold = match self.correction {
	    Correction::Bonferroni => self.alpha / m.max( 1 ) as f64,
	    Correction::None => self.alpha,
	    Correction::Fdr => benjamini_hochberg( keys, &p_values, self.alpha ),
	};

	let entries: Vec<SignificantEntry> = ( 0 .. m )
	    .filter( |index| p_values[ *index ] <= threshold )
	    .map( |index| SignificantEntry{
		key: keys[ index ].clone(),
		statistic: statistics[ index ],
		p_value: p_values[ index ],
		threshold,
		correction: self.correction,
		z_score: null.get( index ).z_score( statistics[ index ] ),
		critical_value: null.get( index ).critical_value( threshold ),
	    }).collect();

	info!( "{} of {m} keys significant at {threshold:.3e} ({} correction)", entries.len(), self.correction );
	Ok( SignificanceReport{
	    tested: m,
	    surrogates: null.realizations(),
	    alpha: self.alpha,
	    correction: self.correction,
	    threshold,
	    entries,
	})
    }
}

/// Step-up threshold k * alpha / m for the largest rank k with p_(k) <= k * alpha / m.
/// Equal p-values are ranked in key order. Without any rejection the threshold is 0.
fn benjamini_hochberg( keys: &[StructureKey], p_values: &[f64], alpha: f64 ) -> f64 {
    let m = p_values.len();
    let mut order: Vec<usize> = ( 0 .. m ).collect();
    order.sort_by( |left, right| p_values[ *left ].total_cmp( &p_values[ *right ] )
		   .then_with( || keys[ *left ].cmp( &keys[ *right ] )));

    let largest_rank = order.iter().enumerate()
	.filter( |(rank, index)| p_values[ **index ] <= ( rank + 1 ) as f64 * alpha / m as f64 )
	.map( |(rank, _)| rank + 1 )
	.last();
    match largest_rank {
	Some( k ) => k as f64 * alpha / m as f64,
	None => 0.0,
    }
}

impl SignificanceReport {

    /// Fraction of tested keys that were found significant
    pub fn rejection_rate( &self ) -> f64 {
	if self.tested == 0 {
	    0.0
	} else {
	    self.entries.len() as f64 / self.tested as f64
	}
    }
}

impl Loggable for SignificanceReport {
    fn log( &self, message: &str, level: Level ) {
	let summary = format!( "{message}: {}/{} keys below {:.3e} ({} correction, {} surrogates)",
			       self.entries.len(), self.tested, self.threshold, self.correction, self.surrogates );
	match level {
	    Level::ERROR => error!( "{summary}" ),
	    Level::WARN => warn!( "{summary}" ),
	    Level::INFO => info!( "{summary}" ),
	    Level::DEBUG => debug!( "{summary}" ),
	    Level::TRACE => trace!( "{summary}" ),
	}
	for entry in &self.entries {
	    trace!( "{:?} lag {:?}: statistic {} p {:.3e}", entry.key.channels, entry.key.lag, entry.statistic, entry.p_value );
	}
    }
}
