
use bit_set::BitSet;
use serde::Serialize;

use crate::error::{AnalysisError, Result};

pub mod discretize;
pub mod synchrofact;

pub use discretize::{BinnedDataset, DiscretizedTrain};

/// Index of a recording channel
pub type Channel = usize;
pub type Count = u64;
/// Channels that fire in one bin
pub type Transaction = BitSet;
/// Bins in which one channel fires
pub type TidSet = BitSet;

/// Ordered event times of one channel together with the recording interval [t_start, t_stop].
/// An event at t_stop is counted in the last bin.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct SpikeTrain {
    times: Vec<f64>,
    t_start: f64,
    t_stop: f64,
}

/// Common time base of an analysis
#[derive( Debug, Clone, Copy, PartialEq, Serialize )]
pub struct Window {
    pub t_start: f64,
    pub t_stop: f64,
}

/// Transactional view on binned data: bins are transactions, channels are items.
pub trait Database {
    /// Number of bins
    fn num_transactions( &self ) -> Count;

    /// All channels, in ascending order
    fn universe( &self ) -> Vec<Channel>;

    /// Returns the number of transactions containing all channels in the query
    fn query_support( &self, query: &[Channel] ) -> Count;
}

/// Binary occupancy of a binned data set, stored both by bin and by channel.
#[derive( Debug, Clone )]
pub struct BinnedDatabase {
    transactions: Vec<Transaction>,
    tidsets: Vec<TidSet>,
}

impl SpikeTrain {

    /// Validates the times against the recording interval
    pub fn new( times: Vec<f64>, t_start: f64, t_stop: f64 ) -> Result<SpikeTrain> {
	if !( t_start.is_finite() && t_stop.is_finite() && t_start < t_stop ) {
	    return Err( AnalysisError::InvalidWindow( format!( "recording interval [{t_start}, {t_stop}) is empty or not finite" )));
	}
	if let Some( t ) = times.iter().find( |t| !t.is_finite() || **t < t_start || **t > t_stop ) {
	    return Err( AnalysisError::InvalidWindow( format!( "event at {t} outside of [{t_start}, {t_stop}]" )));
	}
	if let Some( pair ) = times.windows( 2 ).find( |pair| pair[ 1 ] <= pair[ 0 ] ) {
	    return Err( AnalysisError::InvalidWindow( format!( "events {} and {} are not strictly increasing", pair[ 0 ], pair[ 1 ] )));
	}
	Ok( SpikeTrain{ times, t_start, t_stop } )
    }

    /// Sorts the times first. Used for surrogates whose times come out of order.
    pub fn from_unsorted( mut times: Vec<f64>, t_start: f64, t_stop: f64 ) -> Result<SpikeTrain> {
	times.sort_unstable_by( |left, right| left.total_cmp( right ));
	SpikeTrain::new( times, t_start, t_stop )
    }

    pub fn empty( t_start: f64, t_stop: f64 ) -> Result<SpikeTrain> {
	SpikeTrain::new( Vec::new(), t_start, t_stop )
    }

    pub fn times( &self ) -> &[f64] { &self.times }
    pub fn t_start( &self ) -> f64 { self.t_start }
    pub fn t_stop( &self ) -> f64 { self.t_stop }
    pub fn duration( &self ) -> f64 { self.t_stop - self.t_start }
    pub fn len( &self ) -> usize { self.times.len() }
    pub fn is_empty( &self ) -> bool { self.times.is_empty() }

    pub fn window( &self ) -> Window {
	Window{ t_start: self.t_start, t_stop: self.t_stop }
    }

    /// Inter-spike intervals, the first one measured from the start of the recording
    pub fn intervals( &self ) -> Vec<f64> {
	let mut last = self.t_start;
	self.times.iter()
	    .map( |t| {
		let interval = t - last;
		last = *t;
		interval
	    }).collect()
    }
}

impl Window {

    pub fn new( t_start: f64, t_stop: f64 ) -> Result<Window> {
	if !( t_start.is_finite() && t_stop.is_finite() && t_start < t_stop ) {
	    return Err( AnalysisError::InvalidWindow( format!( "window [{t_start}, {t_stop}) is empty or not finite" )));
	}
	Ok( Window{ t_start, t_stop } )
    }

    pub fn duration( &self ) -> f64 { self.t_stop - self.t_start }

    /// The recording interval shared by all trains.
    /// Trains recorded over different intervals cannot be compared bin by bin.
    pub fn common( trains: &[SpikeTrain] ) -> Result<Window> {
	let first = trains.first()
	    .ok_or_else( || AnalysisError::InvalidConfiguration( "the set of spike trains is empty".to_string() ))?;
	let window = first.window();
	for (channel, train) in trains.iter().enumerate() {
	    if train.window() != window {
		return Err( AnalysisError::InvalidConfiguration( format!(
		    "channel {channel} is recorded over [{}, {}) instead of [{}, {})",
		    train.t_start, train.t_stop, window.t_start, window.t_stop )));
	    }
	}
	Ok( window )
    }
}

impl Database for BinnedDatabase {

    fn num_transactions( &self ) -> Count {
	self.transactions.len() as Count
    }

    fn universe( &self ) -> Vec<Channel> {
	( 0 .. self.tidsets.len() ).collect()
    }

    fn query_support( &self, query: &[Channel] ) -> Count {
	match query.split_first() {
	    None => self.num_transactions(),
	    Some( (first, rest) ) => {
		let mut bins = self.tidsets[ *first ].clone();
		for channel in rest {
		    bins.intersect_with( &self.tidsets[ *channel ] );
		}
		bins.len() as Count
	    }
	}
    }
}

impl BinnedDatabase {

    pub fn new( dataset: &BinnedDataset ) -> BinnedDatabase {
	let tidsets: Vec<TidSet> = dataset.trains().iter().map( |train| train.occupied() ).collect();
	let mut transactions = vec!( Transaction::with_capacity( tidsets.len() ); dataset.num_bins() );
	for (channel, bins) in tidsets.iter().enumerate() {
	    for bin in bins.iter() {
		transactions[ bin ].insert( channel );
	    }
	}
	BinnedDatabase{ transactions, tidsets }
    }

    pub fn num_channels( &self ) -> usize { self.tidsets.len() }

    pub fn tidset( &self, channel: Channel ) -> &TidSet {
	&self.tidsets[ channel ]
    }

    pub fn tidsets( &self ) -> &[TidSet] { &self.tidsets }

    pub fn transactions( &self ) -> &[Transaction] { &self.transactions }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_train_validation() {
	assert!( SpikeTrain::new( vec!( 0.1, 0.5, 0.9 ), 0.0, 1.0 ).is_ok() );
	assert!( SpikeTrain::new( vec!( 0.1, 1.0 ), 0.0, 1.0 ).is_ok() );
	assert!( matches!( SpikeTrain::new( vec!( 0.1, 1.5 ), 0.0, 1.0 ), Err( AnalysisError::InvalidWindow( _ ))));
	assert!( matches!( SpikeTrain::new( vec!( 0.5, 0.5 ), 0.0, 1.0 ), Err( AnalysisError::InvalidWindow( _ ))));
	assert!( matches!( SpikeTrain::new( vec!( f64::NAN ), 0.0, 1.0 ), Err( AnalysisError::InvalidWindow( _ ))));
	assert!( SpikeTrain::new( vec!(), 1.0, 1.0 ).is_err() );

	let train = SpikeTrain::from_unsorted( vec!( 0.7, 0.2 ), 0.0, 1.0 ).unwrap();
	assert_eq!( train.times(), &[0.2, 0.7] );
	let intervals = train.intervals();
	assert!( (intervals[ 0 ] - 0.2).abs() < 1e-12 );
	assert!( (intervals[ 1 ] - 0.5).abs() < 1e-12 );
    }

    #[test]
    fn test_common_window() {
	let a = SpikeTrain::new( vec!( 0.1 ), 0.0, 1.0 ).unwrap();
	let b = SpikeTrain::new( vec!( 0.2 ), 0.0, 1.0 ).unwrap();
	let c = SpikeTrain::new( vec!( 0.2 ), 0.0, 2.0 ).unwrap();
	assert_eq!( Window::common( &[a.clone(), b] ).unwrap(), Window{ t_start: 0.0, t_stop: 1.0 } );
	assert!( matches!( Window::common( &[a, c] ), Err( AnalysisError::InvalidConfiguration( _ ))));
	assert!( matches!( Window::common( &[] ), Err( AnalysisError::InvalidConfiguration( _ ))));
    }

    #[test]
    fn test_query_support() {
	let trains = vec!(
	    SpikeTrain::new( vec!( 0.05, 0.25, 0.45 ), 0.0, 1.0 ).unwrap(),
	    SpikeTrain::new( vec!( 0.05, 0.45, 0.95 ), 0.0, 1.0 ).unwrap(),
	    SpikeTrain::new( vec!( 0.45 ), 0.0, 1.0 ).unwrap(),
	);
	let dataset = discretize::discretize_all( &trains, 0.1 ).unwrap();
	let database = BinnedDatabase::new( &dataset );

	assert_eq!( database.num_transactions(), 10 );
	assert_eq!( database.universe(), vec!( 0, 1, 2 ));
	assert_eq!( database.query_support( &[] ), 10 );
	assert_eq!( database.query_support( &[0] ), 3 );
	assert_eq!( database.query_support( &[0, 1] ), 2 );
	assert_eq!( database.query_support( &[0, 1, 2] ), 1 );
	let bin_four: Vec<Channel> = database.transactions()[ 4 ].iter().collect();
	assert_eq!( bin_four, vec!( 0, 1, 2 ));
    }
}
