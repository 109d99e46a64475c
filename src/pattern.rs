
//! Merges significant entries that overlap in channels and are close in lag into reported patterns.

use serde::{Deserialize, Serialize};
use tracing::*;

use crate::Loggable;
use crate::data::{Channel, Count};
use crate::error::{AnalysisError, Result};
use crate::significance::{Correction, SignificantEntry};

/// How the p-values of merged entries are combined
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Pooling {
    Minimum,
    /// minimum times the number of merged entries, capped at one
    Bonferroni,
}

/// When two entries belong to the same pattern
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct MergePolicy {
    /// smallest |A ∩ B| / min(|A|, |B|) that merges, the bound itself included
    pub overlap_fraction: f64,
    /// largest lag difference in bins
    pub lag_tolerance: u64,
    pub pooling: Pooling,
}

/// A reported unit: channels that fire together, at a lag for sequential patterns
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct Pattern {
    pub channels: Vec<Channel>,
    pub lag: Option<i64>,
    pub support: Count,
    pub p_value: f64,
    pub corrected: bool,
    /// number of merged entries
    pub entries: usize,
}

impl Default for MergePolicy {
    fn default() -> MergePolicy {
	MergePolicy{ overlap_fraction: 0.5, lag_tolerance: 1, pooling: Pooling::Minimum }
    }
}

impl MergePolicy {

    pub fn validate( &self ) -> Result<()> {
	if !( self.overlap_fraction > 0.0 && self.overlap_fraction <= 1.0 ) {
	    return Err( AnalysisError::InvalidConfiguration(
		format!( "overlap fraction {} outside of (0, 1]", self.overlap_fraction )));
	}
	Ok( () )
    }

    fn lags_match( &self, left: Option<i64>, right: Option<i64> ) -> bool {
	match (left, right) {
	    (None, None) => true,
	    (Some( left ), Some( right )) => left.abs_diff( right ) <= self.lag_tolerance,
	    _ => false,
	}
    }

    pub fn merges( &self, left: &SignificantEntry, right: &SignificantEntry ) -> bool {
	self.lags_match( left.key.lag, right.key.lag )
	    && overlap( &left.key.channels, &right.key.channels ) >= self.overlap_fraction
    }
}

/// Shared channels relative to the smaller of two sorted sets
pub fn overlap( left: &[Channel], right: &[Channel] ) -> f64 {
    let smaller = left.len().min( right.len() );
    if smaller == 0 {
	return 0.0;
    }
    let shared = left.iter().filter( |channel| right.binary_search( channel ).is_ok() ).count();
    shared as f64 / smaller as f64
}

/// Connected components of the merge relation. Entries are visited in the order of descending
/// support, channel set and lag, and each component is represented by its earliest member.
pub fn extract( entries: &[SignificantEntry], policy: &MergePolicy ) -> Result<Vec<Pattern>> {
    policy.validate()?;

    let mut ordered: Vec<&SignificantEntry> = entries.iter().collect();
    ordered.sort_by( |left, right| right.statistic.cmp( &left.statistic )
		     .then_with( || left.key.cmp( &right.key )));

    let mut components = Components::new( ordered.len() );
    for later in 0 .. ordered.len() {
	for earlier in 0 .. later {
	    if policy.merges( ordered[ earlier ], ordered[ later ] ) {
		components.union( earlier, later );
	    }
	}
    }

    let mut clusters: Vec<Vec<&SignificantEntry>> = Vec::new();
    let mut cluster_of: Vec<Option<usize>> = vec!( None; ordered.len() );
    for (index, entry) in ordered.iter().copied().enumerate() {
	let root = components.find( index );
	match cluster_of[ root ] {
	    Some( cluster ) => clusters[ cluster ].push( entry ),
	    None => {
		cluster_of[ root ] = Some( clusters.len() );
		clusters.push( vec!( entry ));
	    },
	}
    }

    let mut patterns: Vec<Pattern> = clusters.iter().map( |cluster| merge_cluster( cluster, policy.pooling )).collect();
    patterns.sort_by( |left, right| left.p_value.total_cmp( &right.p_value )
		      .then_with( || right.support.cmp( &left.support ))
		      .then_with( || left.channels.cmp( &right.channels ))
		      .then_with( || left.lag.cmp( &right.lag )));
    debug!( "merged {} significant entries into {} patterns", entries.len(), patterns.len() );
    Ok( patterns )
}

/// Disjoint sets whose representative is always the smallest index
struct Components {
    parent: Vec<usize>,
}

impl Components {

    fn new( size: usize ) -> Components {
	Components{ parent: ( 0 .. size ).collect() }
    }

    fn find( &mut self, mut index: usize ) -> usize {
	while self.parent[ index ] != index {
	    self.parent[ index ] = self.parent[ self.parent[ index ]];
	    index = self.parent[ index ];
	}
	index
    }

    fn union( &mut self, left: usize, right: usize ) {
	let left = self.find( left );
	let right = self.find( right );
	if left < right {
	    self.parent[ right ] = left;
	} else {
	    self.parent[ left ] = right;
	}
    }
}

fn merge_cluster( cluster: &[&SignificantEntry], pooling: Pooling ) -> Pattern {
    let first = cluster[ 0 ];
    let mut channels: Vec<Channel> = cluster.iter().flat_map( |entry| entry.key.channels.iter().copied() ).collect();
    channels.sort_unstable();
    channels.dedup();

    let support = cluster.iter().map( |entry| entry.statistic ).max().unwrap_or( 0 );
    let minimum = cluster.iter().map( |entry| entry.p_value ).fold( 1.0, f64::min );
    let p_value = match pooling {
	Pooling::Minimum => minimum,
	Pooling::Bonferroni => ( minimum * cluster.len() as f64 ).min( 1.0 ),
    };

    Pattern{
	channels,
	lag: first.key.lag,
	support,
	p_value,
	corrected: first.correction != Correction::None,
	entries: cluster.len(),
    }
}

impl Loggable for Pattern {
    fn log( &self, message: &str, level: Level ) {
	let lag = match self.lag {
	    Some( lag ) => format!( "lag {lag}" ),
	    None => "synchronous".to_string(),
	};
	let line = format!( "{message}: {:?} {lag} support {} p {:.3e} ({} entries)", self.channels, self.support, self.p_value, self.entries );
	match level {
	    Level::ERROR => error!( "{line}" ),
	    Level::WARN => warn!( "{line}" ),
	    Level::INFO => info!( "{line}" ),
	    Level::DEBUG => debug!( "{line}" ),
	    Level::TRACE => trace!( "{line}" ),
	}
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::correlation::StructureKey;

    fn entry( channels: Vec<Channel>, lag: Option<i64>, statistic: Count, p_value: f64 ) -> SignificantEntry {
	SignificantEntry{
	    key: StructureKey::new( channels, lag ),
	    statistic,
	    p_value,
	    threshold: 0.05,
	    correction: Correction::Fdr,
	    z_score: None,
	    critical_value: None,
	}
    }

    fn entries() -> Vec<SignificantEntry> {
	vec!(
	    entry( vec!( 0, 1 ), Some( 5 ), 7, 0.03 ),
	    entry( vec!( 1, 2 ), Some( 1 ), 8, 0.02 ),
	    entry( vec!( 3, 4 ), Some( 0 ), 9, 0.01 ),
	    entry( vec!( 0, 1 ), Some( 0 ), 10, 0.01 ),
	)
    }

    #[test]
    fn test_overlap() {
	assert_eq!( overlap( &[0, 1], &[1, 2] ), 0.5 );
	assert_eq!( overlap( &[0, 1, 2, 3], &[1, 2] ), 1.0 );
	assert_eq!( overlap( &[0], &[1] ), 0.0 );
	assert_eq!( overlap( &[], &[1] ), 0.0 );
    }

    #[test]
    fn test_default_policy() {
	let patterns = extract( &entries(), &MergePolicy::default() ).unwrap();
	assert_eq!( patterns.len(), 3 );

	assert_eq!( patterns[ 0 ].channels, vec!( 0, 1, 2 ));
	assert_eq!( patterns[ 0 ].lag, Some( 0 ));
	assert_eq!( patterns[ 0 ].support, 10 );
	assert_eq!( patterns[ 0 ].entries, 2 );
	assert_eq!( patterns[ 0 ].p_value, 0.01 );
	assert!( patterns[ 0 ].corrected );

	assert_eq!( patterns[ 1 ].channels, vec!( 3, 4 ));
	// lag 5 is too far from lag 0 and lag 1
	assert_eq!( patterns[ 2 ].channels, vec!( 0, 1 ));
	assert_eq!( patterns[ 2 ].lag, Some( 5 ));
    }

    #[test]
    fn test_pooling_and_overlap() {
	let policy = MergePolicy{ pooling: Pooling::Bonferroni, ..MergePolicy::default() };
	let patterns = extract( &entries(), &policy ).unwrap();
	assert_eq!( patterns[ 0 ].channels, vec!( 3, 4 ));
	assert_eq!( patterns[ 1 ].channels, vec!( 0, 1, 2 ));
	assert!(( patterns[ 1 ].p_value - 0.02 ).abs() < 1e-12 );

	let strict = MergePolicy{ overlap_fraction: 1.0, ..MergePolicy::default() };
	assert_eq!( extract( &entries(), &strict ).unwrap().len(), 4 );

	let invalid = MergePolicy{ overlap_fraction: 0.0, ..MergePolicy::default() };
	assert!( matches!( extract( &entries(), &invalid ), Err( AnalysisError::InvalidConfiguration( _ ))));
    }

    #[test]
    /// An entry overlapping two patterns joins them into one
    fn test_bridging_entry() {
	let entries = vec!(
	    entry( vec!( 0, 1 ), Some( 0 ), 10, 0.01 ),
	    entry( vec!( 2, 3 ), Some( 0 ), 9, 0.02 ),
	    entry( vec!( 1, 2 ), Some( 0 ), 8, 0.03 ),
	);
	let policy = MergePolicy::default();
	assert!( !policy.merges( &entries[ 0 ], &entries[ 1 ] ));
	assert!( policy.merges( &entries[ 1 ], &entries[ 2 ] ));

	let patterns = extract( &entries, &policy ).unwrap();
	assert_eq!( patterns.len(), 1 );
	assert_eq!( patterns[ 0 ].channels, vec!( 0, 1, 2, 3 ));
	assert_eq!( patterns[ 0 ].entries, 3 );
	assert_eq!( patterns[ 0 ].support, 10 );
	assert_eq!( patterns[ 0 ].p_value, 0.01 );

	// chains of lags merge as well, one bin at a time
	let chain = vec!(
	    entry( vec!( 0, 1 ), Some( 0 ), 10, 0.01 ),
	    entry( vec!( 0, 1 ), Some( 2 ), 9, 0.01 ),
	    entry( vec!( 0, 1 ), Some( 1 ), 8, 0.01 ),
	);
	let patterns = extract( &chain, &policy ).unwrap();
	assert_eq!( patterns.len(), 1 );
	assert_eq!( patterns[ 0 ].lag, Some( 0 ));
    }

    #[test]
    fn test_overlap_bound_is_inclusive() {
	let half = vec!(
	    entry( vec!( 0, 1 ), None, 10, 0.01 ),
	    entry( vec!( 1, 2 ), None, 9, 0.01 ),
	);
	assert_eq!( extract( &half, &MergePolicy::default() ).unwrap().len(), 1 );
	let above = MergePolicy{ overlap_fraction: 0.6, ..MergePolicy::default() };
	assert_eq!( extract( &half, &above ).unwrap().len(), 2 );
    }

    #[test]
    /// Synchronous entries only merge with each other, and input order does not matter
    fn test_synchronous_and_order() {
	let mut entries = vec!(
	    entry( vec!( 0, 1, 2 ), None, 6, 0.001 ),
	    entry( vec!( 1, 2, 3 ), None, 6, 0.002 ),
	    entry( vec!( 1, 2 ), Some( 0 ), 6, 0.001 ),
	);
	let patterns = extract( &entries, &MergePolicy::default() ).unwrap();
	entries.reverse();
	assert_eq!( extract( &entries, &MergePolicy::default() ).unwrap(), patterns );

	assert_eq!( patterns.len(), 2 );
	let synchronous = patterns.iter().find( |p| p.lag.is_none() ).unwrap();
	assert_eq!( synchronous.channels, vec!( 0, 1, 2, 3 ));
	assert_eq!( synchronous.entries, 2 );
    }
}
