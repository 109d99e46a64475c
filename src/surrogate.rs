
use std::fmt;
use std::str::FromStr;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{BinnedDataset, Channel, DiscretizedTrain, SpikeTrain};
use crate::error::{AnalysisError, Result};

pub mod methods;

/// Randomization that destroys cross-channel correlation while keeping the event count of each channel.
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
#[serde( tag = "name", rename_all = "kebab-case" )]
pub enum SurrogateMethod {
    /// permutes the bins of each channel
    BinShuffle,
    /// permutes the inter-spike intervals of each channel
    IsiShuffle,
    /// moves each spike uniformly within +-window
    Dithering { window: f64 },
    /// places the spikes uniformly, at least dead_time apart
    RefractoryRandomize { dead_time: f64 },
}

/// Produces surrogate replicas. Every (replica, channel) draws from its own generator stream.
#[derive( Debug, Clone )]
pub struct SurrogateGenerator {
    method: SurrogateMethod,
    seed: u64,
}

/// Materialized ensemble of surrogate realizations of a data set
#[derive( Debug, Clone )]
pub struct SurrogateSet {
    replicas: Vec<BinnedDataset>,
}

impl SurrogateMethod {

    pub const SELECTORS: [&'static str; 4] = ["bin-shuffle", "isi-shuffle", "dithering", "refractory-randomize"];

    /// Builds a method from its selector and its parameter (jitter window or dead time)
    pub fn from_selector( selector: &str, parameter: Option<f64> ) -> Result<SurrogateMethod> {
	let require = || parameter.ok_or_else( || AnalysisError::InvalidConfiguration(
	    format!( "surrogate method {selector} needs a time parameter" )));
	let method = match selector {
	    "bin-shuffle" => SurrogateMethod::BinShuffle,
	    "isi-shuffle" => SurrogateMethod::IsiShuffle,
	    "dithering" => SurrogateMethod::Dithering{ window: require()? },
	    "refractory-randomize" => SurrogateMethod::RefractoryRandomize{ dead_time: require()? },
	    other => return Err( AnalysisError::InvalidMethod( format!(
		"unknown selector '{other}', expected one of {}", SurrogateMethod::SELECTORS.join( ", " )))),
	};
	method.validate()?;
	Ok( method )
    }

    pub fn selector( &self ) -> &'static str {
	match self {
	    SurrogateMethod::BinShuffle => "bin-shuffle",
	    SurrogateMethod::IsiShuffle => "isi-shuffle",
	    SurrogateMethod::Dithering{ .. } => "dithering",
	    SurrogateMethod::RefractoryRandomize{ .. } => "refractory-randomize",
	}
    }

    pub fn validate( &self ) -> Result<()> {
	let (name, value) = match self {
	    SurrogateMethod::Dithering{ window } => ("dithering window", *window),
	    SurrogateMethod::RefractoryRandomize{ dead_time } => ("dead time", *dead_time),
	    _ => return Ok( () ),
	};
	if value.is_finite() && value > 0.0 {
	    Ok( () )
	} else {
	    Err( AnalysisError::InvalidConfiguration( format!( "{name} must be positive, got {value}" )))
	}
    }

    /// Checks that the method is defined for the train
    pub fn check_degenerate( &self, channel: Channel, train: &SpikeTrain ) -> Result<()> {
	match self {
	    SurrogateMethod::BinShuffle => Ok( () ),
	    SurrogateMethod::IsiShuffle | SurrogateMethod::Dithering{ .. } if train.len() < 2 =>
		Err( AnalysisError::DegenerateInput{
		    channel,
		    reason: format!( "{} needs at least two events, found {}", self.selector(), train.len() ),
		}),
	    SurrogateMethod::RefractoryRandomize{ dead_time } if train.len() > 1
		&& ( train.len() - 1 ) as f64 * dead_time >= train.duration() =>
		Err( AnalysisError::DegenerateInput{
		    channel,
		    reason: format!( "{} events do not fit into {} with a dead time of {dead_time}", train.len(), train.duration() ),
		}),
	    _ => Ok( () ),
	}
    }

    /// One randomized version of a channel on the grid of the data set
    pub fn randomize( &self, train: &SpikeTrain, binned: &DiscretizedTrain, dataset: &BinnedDataset, rng: &mut ChaCha8Rng ) -> Result<DiscretizedTrain> {
	match self {
	    SurrogateMethod::BinShuffle => {
		let counts = methods::shuffle_bins( binned.counts(), rng );
		Ok( DiscretizedTrain::from_counts( counts, binned.bin_width(), binned.t_start() ))
	    },
	    SurrogateMethod::IsiShuffle => dataset.rebin( &methods::shuffle_intervals( train, rng )),
	    SurrogateMethod::Dithering{ window } => dataset.rebin( &methods::dither( train, *window, rng )),
	    SurrogateMethod::RefractoryRandomize{ dead_time } => dataset.rebin( &methods::randomize_refractory( train, *dead_time, rng )),
	}
    }
}

impl fmt::Display for SurrogateMethod {
    fn fmt( &self, f: &mut fmt::Formatter ) -> fmt::Result {
	match self {
	    SurrogateMethod::Dithering{ window } => write!( f, "dithering:{window}" ),
	    SurrogateMethod::RefractoryRandomize{ dead_time } => write!( f, "refractory-randomize:{dead_time}" ),
	    other => write!( f, "{}", other.selector() ),
	}
    }
}

/// Parses `selector` or `selector:parameter`
impl FromStr for SurrogateMethod {
    type Err = AnalysisError;

    fn from_str( s: &str ) -> Result<SurrogateMethod> {
	let (selector, parameter) = match s.split_once( ':' ) {
	    Some( (selector, value) ) => {
		let value = value.trim().parse::<f64>()
		    .map_err( |e| AnalysisError::InvalidConfiguration( format!( "parameter of {selector}: {e}" )))?;
		(selector.trim(), Some( value ))
	    },
	    None => (s.trim(), None),
	};
	SurrogateMethod::from_selector( selector, parameter )
    }
}

impl SurrogateGenerator {

    pub fn new( method: SurrogateMethod, seed: u64 ) -> SurrogateGenerator {
	SurrogateGenerator{ method, seed }
    }

    pub fn method( &self ) -> SurrogateMethod { self.method }

    /// Generator of one channel in one replica.
    /// Streams of the same key are independent, so no state is shared between workers.
    pub fn rng_for( &self, replica: usize, channel: Channel, num_channels: usize ) -> ChaCha8Rng {
	let mut rng = ChaCha8Rng::seed_from_u64( self.seed );
	rng.set_stream( ( replica * num_channels + channel ) as u64 );
	rng
    }

    /// Checks every channel before any replica is drawn
    pub fn check_input( &self, trains: &[SpikeTrain] ) -> Result<()> {
	self.method.validate()?;
	for (channel, train) in trains.iter().enumerate() {
	    self.method.check_degenerate( channel, train )?;
	}
	Ok( () )
    }

    /// Realization number `index` of all channels. Depends only on the seed and the index.
    pub fn replica( &self, index: usize, trains: &[SpikeTrain], dataset: &BinnedDataset ) -> Result<BinnedDataset> {
	let num_channels = dataset.num_channels();
	let randomized = trains.iter().zip( dataset.trains() ).enumerate()
	    .map( |(channel, (train, binned))| {
		let mut rng = self.rng_for( index, channel, num_channels );
		self.method.randomize( train, binned, dataset, &mut rng )
	    }).collect::<Result<Vec<DiscretizedTrain>>>()?;
	BinnedDataset::from_trains( randomized, dataset.window(), dataset.bin_width() )
    }

    /// Draws `n` replicas in parallel
    pub fn generate_set( &self, n: usize, trains: &[SpikeTrain], dataset: &BinnedDataset ) -> Result<SurrogateSet> {
	self.check_input( trains )?;
	let replicas = ( 0 .. n ).into_par_iter()
	    .map( |index| self.replica( index, trains, dataset ))
	    .collect::<Result<Vec<BinnedDataset>>>()?;
	Ok( SurrogateSet{ replicas } )
    }
}

impl SurrogateSet {
    pub fn len( &self ) -> usize { self.replicas.len() }
    pub fn is_empty( &self ) -> bool { self.replicas.is_empty() }
    pub fn replicas( &self ) -> &[BinnedDataset] { &self.replicas }
    pub fn iter( &self ) -> std::slice::Iter<'_, BinnedDataset> { self.replicas.iter() }
}
