
//! Synchronous population events ("synchrofacts").
//!
//! Spikes that coincide across many channels within a few bins are often
//! recording artifacts rather than neural activity. The complexity of an
//! interval is the number of spikes it gathers over all channels.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::*;
use super::discretize::{bin_index, discretize_all};

/// Stretch of bins with population activity
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct ComplexityInterval {
    pub first_bin: usize,
    pub last_bin: usize,
    pub left_edge: f64,
    pub right_edge: f64,
    /// number of spikes over all channels
    pub complexity: Count,
}

/// Which spikes to remove after annotating them with their complexity
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
pub struct Deletion {
    /// spikes with at least this complexity are synchronous, must be >= 2
    pub threshold: Count,
    /// keep only synchronous spikes instead of removing them
    #[serde( default )]
    pub invert: bool,
}

#[derive( Debug, Clone )]
pub struct SynchrofactReport {
    pub intervals: Vec<ComplexityInterval>,
    /// complexity of every spike, per channel
    pub complexities: Vec<Vec<Count>>,
    /// the input trains, with spikes removed if a deletion was requested
    pub trains: Vec<SpikeTrain>,
}

/// Groups non-empty bins separated by at most `spread - 1` empty bins.
/// A spread of 0 reports every non-empty bin on its own.
pub fn complexity_intervals( dataset: &BinnedDataset, spread: usize ) -> Vec<ComplexityInterval> {
    let population = dataset.population_counts();
    let n = population.len();
    let window = dataset.window();
    let bin_width = dataset.bin_width();
    let edge = |bin: usize| window.t_start + bin as f64 * bin_width;

    let mut intervals = Vec::new();
    let mut i = 0;
    while i < n {
	if population[ i ] == 0 {
	    i += 1;
	    continue;
	}

	// grow the window until it stops collecting spikes
	let mut last_nonzero = 0;
	let mut last_sum = population[ i ];
	let mut end = ( i + spread + 1 ).min( n );
	let mut sum: Count = population[ i .. end ].iter().sum();
	while sum > last_sum {
	    last_nonzero = population[ i .. end ].iter().rposition( |count| *count > 0 ).expect( "window starts on a spike" );
	    end = ( i + last_nonzero + spread + 1 ).min( n );
	    last_sum = sum;
	    sum = population[ i .. end ].iter().sum();
	}

	intervals.push( ComplexityInterval{
	    first_bin: i,
	    last_bin: i + last_nonzero,
	    left_edge: edge( i ),
	    right_edge: edge( i + last_nonzero + 1 ),
	    complexity: sum,
	});
	i += last_nonzero + 1;
    }
    intervals
}

/// Annotates every spike with the complexity of the interval it falls into and optionally deletes spikes by complexity.
pub fn detect_synchrofacts( trains: &[SpikeTrain], bin_width: f64, spread: usize, deletion: Option<Deletion> ) -> Result<SynchrofactReport> {
    if let Some( deletion ) = deletion {
	if deletion.threshold <= 1 {
	    return Err( AnalysisError::InvalidConfiguration(
		format!( "a deletion threshold of {} would delete every spike", deletion.threshold )));
	}
    }

    let dataset = discretize_all( trains, bin_width )?;
    let intervals = complexity_intervals( &dataset, spread );
    let window = dataset.window();
    let bins = dataset.num_bins();

    let mut complexities = Vec::with_capacity( trains.len() );
    let mut cleaned = Vec::with_capacity( trains.len() );
    for train in trains {
	let spike_complexities: Vec<Count> = train.times().iter()
	    .map( |t| {
		let bin = bin_index( *t, &window, bin_width, bins );
		// intervals are sorted and every occupied bin belongs to one
		let index = intervals.partition_point( |interval| interval.last_bin < bin );
		intervals[ index ].complexity
	    }).collect();

	let kept = match deletion {
	    None => train.clone(),
	    Some( Deletion{ threshold, invert } ) => {
		let times = train.times().iter().zip( spike_complexities.iter() )
		    .filter( |(_, complexity)| ( **complexity < threshold ) != invert )
		    .map( |(t, _)| *t )
		    .collect();
		SpikeTrain::new( times, train.t_start(), train.t_stop() )?
	    }
	};
	complexities.push( spike_complexities );
	cleaned.push( kept );
    }

    let removed: usize = trains.iter().zip( cleaned.iter() ).map( |(before, after)| before.len() - after.len() ).sum();
    debug!( "{} complexity intervals, {removed} spikes removed", intervals.len() );

    Ok( SynchrofactReport{ intervals, complexities, trains: cleaned } )
}

#[cfg(test)]
mod test {

    use super::*;

    fn example_trains() -> Vec<SpikeTrain> {
	vec!(
	    SpikeTrain::new( vec!( 1.0, 4.0, 6.0 ), 0.0, 10.0 ).unwrap(),
	    SpikeTrain::new( vec!( 1.0, 5.0, 8.0 ), 0.0, 10.0 ).unwrap(),
	)
    }

    fn complexities_of( intervals: &[ComplexityInterval] ) -> Vec<Count> {
	intervals.iter().map( |interval| interval.complexity ).collect()
    }

    #[test]
    fn test_complexity_spread() {
	let dataset = discretize_all( &example_trains(), 1.0 ).unwrap();

	let plain = complexity_intervals( &dataset, 0 );
	assert_eq!( complexities_of( &plain ), vec!( 2, 1, 1, 1, 1 ));

	let consecutive = complexity_intervals( &dataset, 1 );
	assert_eq!( complexities_of( &consecutive ), vec!( 2, 3, 1 ));
	assert_eq!( (consecutive[ 1 ].first_bin, consecutive[ 1 ].last_bin), (4, 6) );
	assert_eq!( consecutive[ 1 ].left_edge, 4.0 );
	assert_eq!( consecutive[ 1 ].right_edge, 7.0 );

	let gapped = complexity_intervals( &dataset, 2 );
	assert_eq!( complexities_of( &gapped ), vec!( 2, 4 ));
	assert_eq!( (gapped[ 1 ].first_bin, gapped[ 1 ].last_bin), (4, 8) );
    }

    #[test]
    fn test_deletion() {
	let trains = example_trains();
	let report = detect_synchrofacts( &trains, 1.0, 0, None ).unwrap();
	assert_eq!( report.complexities[ 0 ], vec!( 2, 1, 1 ));
	assert_eq!( report.trains, trains );

	let cleaned = detect_synchrofacts( &trains, 1.0, 0, Some( Deletion{ threshold: 2, invert: false } )).unwrap();
	assert_eq!( cleaned.trains[ 0 ].times(), &[4.0, 6.0] );
	assert_eq!( cleaned.trains[ 1 ].times(), &[5.0, 8.0] );

	let extracted = detect_synchrofacts( &trains, 1.0, 0, Some( Deletion{ threshold: 2, invert: true } )).unwrap();
	assert_eq!( extracted.trains[ 0 ].times(), &[1.0] );
	assert_eq!( extracted.trains[ 1 ].times(), &[1.0] );
    }

    #[test]
    fn test_threshold_validation() {
	let result = detect_synchrofacts( &example_trains(), 1.0, 0, Some( Deletion{ threshold: 1, invert: false } ));
	assert!( matches!( result, Err( AnalysisError::InvalidConfiguration( _ ))));
    }
}
