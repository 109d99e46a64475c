
use itertools::Itertools;

use crate::data::Database;

use super::*;

/// Lagged intersection counts of all channel pairs: for pair (i, j) and lag L,
/// the number of bins b in which i fires while j fires in bin b + L.
#[derive( Debug, Clone )]
pub struct PairwiseEngine {
    lags: Vec<i64>,
}

impl PairwiseEngine {

    pub fn new( mut lags: Vec<i64> ) -> PairwiseEngine {
	lags.sort_unstable();
	lags.dedup();
	PairwiseEngine{ lags }
    }

    pub fn lags( &self ) -> &[i64] { &self.lags }

    /// Counts for one pair over all lags at once
    pub fn lagged_counts( &self, database: &BinnedDatabase, first: Channel, second: Channel ) -> Vec<Count> {
	self.lags.iter().map( |lag| lagged_intersection( database, first, second, *lag )).collect()
    }
}

fn lagged_intersection( database: &BinnedDatabase, first: Channel, second: Channel, lag: i64 ) -> Count {
    let bins = database.num_transactions() as i64;
    let target = database.tidset( second );
    database.tidset( first ).iter()
	.map( |bin| bin as i64 + lag )
	.filter( |shifted| *shifted >= 0 && *shifted < bins && target.contains( *shifted as usize ))
	.count() as Count
}

impl StructureEngine for PairwiseEngine {

    fn key_count_hint( &self, num_channels: usize ) -> Option<usize> {
	let pairs = num_channels * num_channels.saturating_sub( 1 ) / 2;
	Some( pairs * self.lags.len() )
    }

    fn key_space( &self, database: &BinnedDatabase, _monitor: &Monitor ) -> Result<Vec<StructureKey>> {
	let keys = ( 0 .. database.num_channels() ).tuple_combinations()
	    .flat_map( |(first, second)| self.lags.iter().map( move |lag| StructureKey::pair( first, second, *lag )))
	    .collect();
	Ok( keys )
    }

    fn measure( &self, database: &BinnedDatabase, key: &StructureKey ) -> Count {
	match (key.channels.as_slice(), key.lag) {
	    ([first, second], Some( lag )) => lagged_intersection( database, *first, *second, lag ),
	    _ => panic!( "pairwise keys have two channels and a lag, got {key:?}" ),
	}
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::data::SpikeTrain;
    use crate::data::discretize::discretize_all;

    fn database() -> BinnedDatabase {
	// channel 0 fires in bins 0, 2, 4, channel 1 in 1, 3, 5, channel 2 in 0 and 5
	let trains = vec!(
	    SpikeTrain::new( vec!( 0.5, 2.5, 4.5 ), 0.0, 6.0 ).unwrap(),
	    SpikeTrain::new( vec!( 1.5, 3.5, 5.5 ), 0.0, 6.0 ).unwrap(),
	    SpikeTrain::new( vec!( 0.1, 0.2, 5.1 ), 0.0, 6.0 ).unwrap(),
	);
	BinnedDatabase::new( &discretize_all( &trains, 1.0 ).unwrap() )
    }

    #[test]
    fn test_lagged_counts() {
	let database = database();
	let engine = PairwiseEngine::new( vec!( 1, -1, 0, 5, 1 ));
	assert_eq!( engine.lags(), &[-1, 0, 1, 5] );
	assert_eq!( engine.lagged_counts( &database, 0, 1 ), vec!( 2, 0, 3, 1 ));
	// several spikes in one bin count once
	assert_eq!( engine.lagged_counts( &database, 0, 2 ), vec!( 0, 1, 1, 1 ));
	assert_eq!( engine.lagged_counts( &database, 1, 2 ), vec!( 1, 1, 0, 0 ));
    }

    #[test]
    fn test_key_space() {
	let database = database();
	let engine = PairwiseEngine::new( vec!( 0, 1 ));
	let keys = engine.key_space( &database, &Monitor::unbounded() ).unwrap();
	assert_eq!( Some( keys.len() ), engine.key_count_hint( 3 ));
	assert_eq!( keys.len(), 6 );
	assert_eq!( keys[ 0 ], StructureKey::pair( 0, 1, 0 ));
	assert_eq!( keys[ 5 ], StructureKey::pair( 1, 2, 1 ));
	let counts = engine.measure_all( &database, &keys );
	assert_eq!( counts, vec!( 0, 3, 1, 1, 1, 0 ));
    }
}
