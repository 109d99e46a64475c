
use bit_set::BitSet;
use bit_vec::BitVec;

use super::*;
use crate::error::{Progress, Stage};

/// Relative slack when mapping times onto bins, absorbs rounding in (t - t_start) / bin_width
pub const BIN_TOLERANCE: f64 = 1e-8;

/// Spike counts per bin of one channel
#[derive( Debug, Clone, PartialEq )]
pub struct DiscretizedTrain {
    counts: Vec<Count>,
    bin_width: f64,
    t_start: f64,
}

/// Discretized trains of all channels over a common time base
#[derive( Debug, Clone, PartialEq )]
pub struct BinnedDataset {
    trains: Vec<DiscretizedTrain>,
    window: Window,
    bin_width: f64,
    num_bins: usize,
}

/// Number of bins needed to cover the window
pub fn num_bins( window: &Window, bin_width: f64 ) -> Result<usize> {
    if !( bin_width.is_finite() && bin_width > 0.0 ) {
	return Err( AnalysisError::InvalidWindow( format!( "bin width {bin_width} must be positive" )));
    }
    let duration = window.duration();
    if bin_width > duration {
	return Err( AnalysisError::InvalidWindow( format!( "bin width {bin_width} exceeds the window of length {duration}" )));
    }
    let bins = ( duration / bin_width - BIN_TOLERANCE ).ceil().max( 1.0 );
    if !( bins < isize::MAX as f64 ) {
	return Err( AnalysisError::InvalidWindow( format!(
	    "bin width {bin_width} splits the window of length {duration} into more bins than can be addressed" )));
    }
    Ok( bins as usize )
}

/// Maps a time onto its bin. Times on a boundary belong to the following bin.
pub(crate) fn bin_index( time: f64, window: &Window, bin_width: f64, num_bins: usize ) -> usize {
    let position = ( time - window.t_start ) / bin_width + BIN_TOLERANCE;
    ( position.floor() as usize ).min( num_bins - 1 )
}

/// Counts the events of the train per bin of the window
pub fn discretize( train: &SpikeTrain, window: &Window, bin_width: f64 ) -> Result<DiscretizedTrain> {
    let bins = num_bins( window, bin_width )?;
    discretize_times( train.times(), window, bin_width, bins )
}

fn discretize_times( times: &[f64], window: &Window, bin_width: f64, bins: usize ) -> Result<DiscretizedTrain> {
    let mut counts: Vec<Count> = Vec::new();
    counts.try_reserve_exact( bins ).map_err( |err| AnalysisError::ResourceExhaustion{
	reason: format!( "cannot allocate {bins} bins: {err}" ),
	progress: Progress::new( Stage::Preparation, 0, bins ),
    })?;
    counts.resize( bins, 0 );
    for t in times {
	if !( *t >= window.t_start && *t <= window.t_stop ) {
	    return Err( AnalysisError::InvalidWindow( format!(
		"event at {t} outside of the analysis window [{}, {}]", window.t_start, window.t_stop )));
	}
	counts[ bin_index( *t, window, bin_width, bins ) ] += 1;
    }
    Ok( DiscretizedTrain{ counts, bin_width, t_start: window.t_start } )
}

/// Discretizes all trains over their common recording interval
pub fn discretize_all( trains: &[SpikeTrain], bin_width: f64 ) -> Result<BinnedDataset> {
    let window = Window::common( trains )?;
    let bins = num_bins( &window, bin_width )?;
    let trains = trains.iter()
	.map( |train| discretize_times( train.times(), &window, bin_width, bins ))
	.collect::<Result<Vec<DiscretizedTrain>>>()?;
    Ok( BinnedDataset{ trains, window, bin_width, num_bins: bins } )
}

impl DiscretizedTrain {

    pub fn from_counts( counts: Vec<Count>, bin_width: f64, t_start: f64 ) -> DiscretizedTrain {
	DiscretizedTrain{ counts, bin_width, t_start }
    }

    pub fn counts( &self ) -> &[Count] { &self.counts }
    pub fn num_bins( &self ) -> usize { self.counts.len() }
    pub fn bin_width( &self ) -> f64 { self.bin_width }
    pub fn t_start( &self ) -> f64 { self.t_start }

    /// Total number of events
    pub fn total( &self ) -> Count {
	self.counts.iter().sum()
    }

    /// Bins with at least one event
    pub fn occupied( &self ) -> BitSet {
	let mut bits = BitVec::from_elem( self.counts.len(), false );
	for (bin, count) in self.counts.iter().enumerate() {
	    if *count > 0 {
		bits.set( bin, true );
	    }
	}
	BitSet::from_bit_vec( bits )
    }

    pub fn into_counts( self ) -> Vec<Count> { self.counts }
}

impl BinnedDataset {

    /// Assembles a data set from trains that share one bin grid.
    pub fn from_trains( trains: Vec<DiscretizedTrain>, window: Window, bin_width: f64 ) -> Result<BinnedDataset> {
	let bins = num_bins( &window, bin_width )?;
	if let Some( channel ) = trains.iter().position( |train| train.num_bins() != bins ) {
	    return Err( AnalysisError::InvalidWindow( format!( "channel {channel} does not have {bins} bins" )));
	}
	Ok( BinnedDataset{ trains, window, bin_width, num_bins: bins } )
    }

    /// Discretizes event times onto the grid of this data set
    pub fn rebin( &self, times: &[f64] ) -> Result<DiscretizedTrain> {
	discretize_times( times, &self.window, self.bin_width, self.num_bins )
    }

    pub fn trains( &self ) -> &[DiscretizedTrain] { &self.trains }
    pub fn train( &self, channel: Channel ) -> &DiscretizedTrain { &self.trains[ channel ] }
    pub fn num_channels( &self ) -> usize { self.trains.len() }
    pub fn num_bins( &self ) -> usize { self.num_bins }
    pub fn bin_width( &self ) -> f64 { self.bin_width }
    pub fn window( &self ) -> Window { self.window }

    /// Events per channel
    pub fn totals( &self ) -> Vec<Count> {
	self.trains.iter().map( |train| train.total() ).collect()
    }

    /// Events summed over channels per bin
    pub fn population_counts( &self ) -> Vec<Count> {
	let mut population = vec!( 0; self.num_bins );
	for train in &self.trains {
	    for (bin, count) in train.counts().iter().enumerate() {
		population[ bin ] += count;
	    }
	}
	population
    }
}
