
use serde::{Deserialize, Serialize};

use crate::correlation::{ItemsetEngine, MiningTarget, PairwiseEngine, StructureEngine};
use crate::data::Count;
use crate::error::{AnalysisError, Result};
use crate::miner::Budget;
use crate::pattern::MergePolicy;
use crate::significance::{Correction, SignificanceEngine};
use crate::surrogate::{SurrogateGenerator, SurrogateMethod};

/// Largest number of lags a range may expand to
pub const MAX_LAGS: i128 = 1 << 20;

/// Tested lags in bins
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum LagSpec {
    Set( Vec<i64> ),
    /// min, min + step, ... up to and including max
    Range { min: i64, max: i64, step: i64 },
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum LagUnit {
    #[default]
    Bins,
}

/// Which co-occurrence statistic is tested
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( tag = "kind", rename_all = "lowercase" )]
pub enum Mode {
    /// all channel pairs at all lags
    Pairwise,
    /// closed or maximal channel sets of the recorded data
    Itemset {
	min_support: Count,
	#[serde( default = "default_min_size" )]
	min_size: usize,
	#[serde( default )]
	max_size: Option<usize>,
	#[serde( default = "default_target" )]
	target: MiningTarget,
    },
}

/// Removal of population events before the analysis
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
pub struct SynchrofactFilter {
    /// empty bins allowed inside one event
    #[serde( default )]
    pub spread: usize,
    /// spikes in events of at least this complexity are removed
    pub threshold: Count,
}

#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct AnalysisConfig {
    /// in the time unit of the spike trains
    pub bin_width: f64,
    pub lags: LagSpec,
    pub lag_unit: LagUnit,
    pub method: SurrogateMethod,
    pub surrogates: usize,
    pub alpha: f64,
    pub correction: Correction,
    pub mode: Mode,
    pub merge: MergePolicy,
    pub seed: u64,
    pub budget: Budget,
    pub synchrofacts: Option<SynchrofactFilter>,
}

fn default_min_size() -> usize { 2 }
fn default_target() -> MiningTarget { MiningTarget::Closed }

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
	AnalysisConfig{
	    bin_width: 0.005,
	    lags: LagSpec::Set( vec!( 0 )),
	    lag_unit: LagUnit::Bins,
	    method: SurrogateMethod::BinShuffle,
	    surrogates: 1000,
	    alpha: 0.05,
	    correction: Correction::Fdr,
	    mode: Mode::Pairwise,
	    merge: MergePolicy::default(),
	    seed: 0,
	    budget: Budget::default(),
	    synchrofacts: None,
	}
    }
}

impl LagSpec {

    /// Sorted lags without duplicates
    pub fn expand( &self ) -> Result<Vec<i64>> {
	let mut lags = match self {
	    LagSpec::Set( lags ) => lags.clone(),
	    LagSpec::Range{ min, max, step } => {
		if *step <= 0 || min > max {
		    return Err( AnalysisError::InvalidConfiguration(
			format!( "lag range {min}..={max} with step {step} is empty" )));
		}
		let length = ( *max as i128 - *min as i128 ) / *step as i128 + 1;
		if length > MAX_LAGS {
		    return Err( AnalysisError::InvalidConfiguration(
			format!( "lag range {min}..={max} with step {step} holds {length} lags, at most {MAX_LAGS} are allowed" )));
		}
		( *min ..= *max ).step_by( *step as usize ).collect()
	    },
	};
	if lags.is_empty() {
	    return Err( AnalysisError::InvalidConfiguration( "no lag to test".to_string() ));
	}
	lags.sort_unstable();
	lags.dedup();
	Ok( lags )
    }
}

impl AnalysisConfig {

    /// Checks every parameter that does not depend on the data
    pub fn validate( &self ) -> Result<()> {
	if !( self.bin_width.is_finite() && self.bin_width > 0.0 ) {
	    return Err( AnalysisError::InvalidConfiguration( format!( "bin width {} must be positive", self.bin_width )));
	}
	if self.surrogates == 0 {
	    return Err( AnalysisError::InvalidConfiguration( "the number of surrogates must be positive".to_string() ));
	}
	if !( self.alpha > 0.0 && self.alpha < 1.0 ) {
	    return Err( AnalysisError::InvalidConfiguration( format!( "significance level {} outside of (0, 1)", self.alpha )));
	}
	self.method.validate()?;
	self.merge.validate()?;
	self.budget.time_limit()?;
	match &self.mode {
	    Mode::Pairwise => { self.lags.expand()?; },
	    Mode::Itemset{ min_support, min_size, max_size, .. } => {
		if *min_support == 0 {
		    return Err( AnalysisError::InvalidConfiguration( "minimum support must be at least one bin".to_string() ));
		}
		if *min_size == 0 || max_size.map_or( false, |max_size| max_size < *min_size ) {
		    return Err( AnalysisError::InvalidConfiguration(
			format!( "pattern sizes {min_size}..={max_size:?} are empty" )));
		}
	    },
	}
	if let Some( filter ) = &self.synchrofacts {
	    if filter.threshold < 2 {
		return Err( AnalysisError::InvalidConfiguration(
		    format!( "a synchrofact threshold of {} would delete every spike", filter.threshold )));
	    }
	}
	Ok( () )
    }

    /// Lags in bins, for the pairwise mode
    pub fn lags_in_bins( &self ) -> Result<Vec<i64>> {
	match self.lag_unit {
	    LagUnit::Bins => self.lags.expand(),
	}
    }

    pub fn engine( &self ) -> Result<Box<dyn StructureEngine>> {
	let engine: Box<dyn StructureEngine> = match &self.mode {
	    Mode::Pairwise => Box::new( PairwiseEngine::new( self.lags_in_bins()? )),
	    Mode::Itemset{ min_support, min_size, max_size, target } => {
		let mut engine = ItemsetEngine::new( *min_support, *min_size, max_size.unwrap_or( usize::MAX ), *target );
		if let Some( max_patterns ) = self.budget.max_patterns {
		    engine = engine.with_max_patterns( max_patterns );
		}
		Box::new( engine )
	    },
	};
	Ok( engine )
    }

    pub fn generator( &self ) -> SurrogateGenerator {
	SurrogateGenerator::new( self.method, self.seed )
    }

    pub fn significance( &self ) -> SignificanceEngine {
	SignificanceEngine::new( self.alpha, self.correction, self.surrogates )
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_lag_expansion() {
	assert_eq!( LagSpec::Range{ min: -2, max: 2, step: 2 }.expand().unwrap(), vec!( -2, 0, 2 ));
	assert_eq!( LagSpec::Range{ min: -1, max: 2, step: 2 }.expand().unwrap(), vec!( -1, 1 ));
	assert_eq!( LagSpec::Set( vec!( 3, -1, 3 )).expand().unwrap(), vec!( -1, 3 ));
	assert!( LagSpec::Set( vec!() ).expand().is_err() );
	assert!( LagSpec::Range{ min: 0, max: 2, step: 0 }.expand().is_err() );
	assert!( LagSpec::Range{ min: 3, max: 2, step: 1 }.expand().is_err() );
    }

    #[test]
    /// Huge ranges are refused before they are materialized
    fn test_lag_range_limit() {
	let huge = LagSpec::Range{ min: -1_000_000_000_000, max: 1_000_000_000_000, step: 1 };
	assert!( matches!( huge.expand(), Err( AnalysisError::InvalidConfiguration( _ ))));
	let config = AnalysisConfig{ lags: huge, ..AnalysisConfig::default() };
	assert!( matches!( config.validate(), Err( AnalysisError::InvalidConfiguration( _ ))));

	let extreme = LagSpec::Range{ min: i64::MIN, max: i64::MAX, step: 1 };
	assert!( extreme.expand().is_err() );
	let sparse = LagSpec::Range{ min: -1_000_000_000_000, max: 1_000_000_000_000, step: 100_000_000_000 };
	assert_eq!( sparse.expand().unwrap().len(), 21 );
    }

    #[test]
    fn test_json() {
	let text = r#"{
	    "bin_width": 0.002,
	    "lags": { "range": { "min": -3, "max": 3, "step": 1 } },
	    "method": { "name": "dithering", "window": 0.01 },
	    "surrogates": 200,
	    "correction": "bonferroni",
	    "mode": { "kind": "itemset", "min_support": 4 },
	    "merge": { "overlap_fraction": 0.75 },
	    "synchrofacts": { "threshold": 5 }
	}"#;
	let config: AnalysisConfig = serde_json::from_str( text ).unwrap();
	assert!( config.validate().is_ok() );
	assert_eq!( config.method, SurrogateMethod::Dithering{ window: 0.01 } );
	assert_eq!( config.correction, Correction::Bonferroni );
	assert_eq!( config.alpha, 0.05 );
	assert_eq!( config.mode, Mode::Itemset{ min_support: 4, min_size: 2, max_size: None, target: MiningTarget::Closed } );
	assert_eq!( config.merge.lag_tolerance, 1 );
	assert_eq!( config.synchrofacts.unwrap().spread, 0 );
	assert_eq!( config.lags_in_bins().unwrap().len(), 7 );

	assert!( serde_json::from_str::<AnalysisConfig>( r#"{ "bin_size": 0.1 }"# ).is_err() );
	assert!( serde_json::from_str::<AnalysisConfig>( r#"{ "correction": "holm" }"# ).is_err() );
    }

    #[test]
    fn test_validation() {
	let valid = AnalysisConfig::default();
	assert!( valid.validate().is_ok() );

	let invalid = vec!(
	    AnalysisConfig{ bin_width: 0.0, ..valid.clone() },
	    AnalysisConfig{ surrogates: 0, ..valid.clone() },
	    AnalysisConfig{ alpha: 1.5, ..valid.clone() },
	    AnalysisConfig{ method: SurrogateMethod::Dithering{ window: -1.0 }, ..valid.clone() },
	    AnalysisConfig{ lags: LagSpec::Set( vec!() ), ..valid.clone() },
	    AnalysisConfig{ mode: Mode::Itemset{ min_support: 0, min_size: 2, max_size: None, target: MiningTarget::Closed }, ..valid.clone() },
	    AnalysisConfig{ mode: Mode::Itemset{ min_support: 2, min_size: 3, max_size: Some( 2 ), target: MiningTarget::Closed }, ..valid.clone() },
	    AnalysisConfig{ synchrofacts: Some( SynchrofactFilter{ spread: 0, threshold: 1 } ), ..valid.clone() },
	);
	for config in invalid {
	    assert!( matches!( config.validate(), Err( AnalysisError::InvalidConfiguration( _ ))), "{config:?}" );
	}
    }

    #[test]
    fn test_engines() {
	let pairwise = AnalysisConfig{ lags: LagSpec::Set( vec!( -1, 0, 1 )), ..AnalysisConfig::default() };
	assert_eq!( pairwise.engine().unwrap().key_count_hint( 4 ), Some( 18 ));

	let itemset = AnalysisConfig{
	    mode: Mode::Itemset{ min_support: 2, min_size: 2, max_size: None, target: MiningTarget::Maximal },
	    ..AnalysisConfig::default()
	};
	assert_eq!( itemset.engine().unwrap().key_count_hint( 4 ), None );
	assert_eq!( itemset.generator().method(), SurrogateMethod::BinShuffle );
	assert_eq!( itemset.significance().surrogates(), 1000 );
    }
}
