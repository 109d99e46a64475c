
//! Closed itemset mining over binned data: bins are transactions, channels are items.
//!
//! Enumeration follows the prefix-preserving closure extension of LCM: every
//! closed set is reached exactly once from its parent, so the search needs no
//! duplicate table and can be consumed lazily.

use bit_set::BitSet;
use bit_vec::BitVec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{Database, TidSet};
use crate::error::AnalysisError;

use super::*;

#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "kebab-case" )]
pub enum MiningTarget {
    /// no superset has the same support
    Closed,
    /// no superset is frequent
    Maximal,
}

#[derive( Debug, Clone, PartialEq, Eq )]
pub struct MinedItemset {
    pub channels: Vec<Channel>,
    pub support: Count,
}

/// Lazy depth-first enumeration of the closed channel sets with a minimum support.
pub struct ClosedItemsets<'a> {
    tidsets: &'a [TidSet],
    /// channels that are frequent on their own, ascending
    items: Vec<Channel>,
    min_support: Count,
    max_size: usize,
    stack: Vec<Frame>,
    /// closure of the empty set, emitted first
    pending: Option<MinedItemset>,
}

struct Frame {
    itemset: Vec<Channel>,
    tids: TidSet,
    /// position in `items` of the next extension to try
    next: usize,
}

/// Closed or maximal channel sets of the recorded data as keys, their support as statistic.
#[derive( Debug, Clone )]
pub struct ItemsetEngine {
    pub min_support: Count,
    pub min_size: usize,
    pub max_size: usize,
    pub target: MiningTarget,
    /// upper bound on mined keys
    pub max_patterns: usize,
}

impl<'a> ClosedItemsets<'a> {

    pub fn new( database: &'a BinnedDatabase, min_support: Count, max_size: usize ) -> ClosedItemsets<'a> {
	let tidsets = database.tidsets();
	let items: Vec<Channel> = ( 0 .. tidsets.len() )
	    .filter( |channel| tidsets[ *channel ].len() as Count >= min_support )
	    .collect();

	let num_bins = database.num_transactions() as usize;
	let mut iterator = ClosedItemsets{
	    tidsets,
	    items,
	    min_support,
	    max_size,
	    stack: Vec::new(),
	    pending: None,
	};
	if ( num_bins as Count ) < min_support {
	    return iterator;
	}

	let all_bins = BitSet::from_bit_vec( BitVec::from_elem( num_bins, true ));
	let root = iterator.closure( &all_bins );
	if root.len() > max_size {
	    return iterator;
	}
	if !root.is_empty() {
	    iterator.pending = Some( MinedItemset{ channels: root.clone(), support: num_bins as Count } );
	}
	iterator.stack.push( Frame{ itemset: root, tids: all_bins, next: 0 } );
	iterator
    }

    /// Frequent channels whose bins include all of `tids`
    fn closure( &self, tids: &TidSet ) -> Vec<Channel> {
	self.items.iter()
	    .filter( |channel| tids.is_subset( &self.tidsets[ **channel ] ))
	    .copied()
	    .collect()
    }
}

impl<'a> Iterator for ClosedItemsets<'a> {
    type Item = MinedItemset;

    fn next( &mut self ) -> Option<Self::Item> {
	if let Some( root ) = self.pending.take() {
	    return Some( root );
	}

	loop {
	    let frame = self.stack.last_mut()?;
	    if frame.next >= self.items.len() {
		self.stack.pop();
		continue;
	    }
	    let position = frame.next;
	    frame.next += 1;
	    let extension = self.items[ position ];
	    if frame.itemset.binary_search( &extension ).is_ok() {
		continue;
	    }

	    let mut tids = frame.tids.clone();
	    tids.intersect_with( &self.tidsets[ extension ] );
	    let support = tids.len() as Count;
	    if support < self.min_support {
		continue;
	    }

	    let frame_prefix: Vec<Channel> = frame.itemset.iter().copied().take_while( |c| *c < extension ).collect();
	    let closed = self.closure( &tids );
	    // the closure must not add channels before the extension, otherwise another parent owns it
	    let preserves_prefix = closed.iter().copied().take_while( |c| *c < extension ).eq( frame_prefix.into_iter() );
	    // supersets only grow
	    if !preserves_prefix || closed.len() > self.max_size {
		continue;
	    }

	    self.stack.push( Frame{ itemset: closed.clone(), tids, next: position + 1 } );
	    return Some( MinedItemset{ channels: closed, support } );
	}
    }
}

/// True if no additional channel keeps the set frequent
pub fn is_maximal( database: &BinnedDatabase, itemset: &[Channel], min_support: Count ) -> bool {
    let tidsets = database.tidsets();
    let mut tids = BitSet::from_bit_vec( BitVec::from_elem( database.num_transactions() as usize, true ));
    for channel in itemset {
	tids.intersect_with( &tidsets[ *channel ] );
    }
    ( 0 .. tidsets.len() )
	.filter( |channel| itemset.binary_search( channel ).is_err() )
	.all( |channel| ( tids.intersection( &tidsets[ channel ] ).count() as Count ) < min_support )
}

impl ItemsetEngine {

    pub fn new( min_support: Count, min_size: usize, max_size: usize, target: MiningTarget ) -> ItemsetEngine {
	ItemsetEngine{ min_support, min_size, max_size, target, max_patterns: usize::MAX }
    }

    pub fn with_max_patterns( mut self, max_patterns: usize ) -> ItemsetEngine {
	self.max_patterns = max_patterns;
	self
    }

    /// Mines the patterns with their support in the order of enumeration
    pub fn mine( &self, database: &BinnedDatabase, monitor: &Monitor ) -> Result<Vec<MinedItemset>> {
	let mut mined = Vec::new();
	for itemset in ClosedItemsets::new( database, self.min_support, self.max_size ) {
	    monitor.check( Stage::Mining, mined.len(), self.max_patterns )?;
	    if itemset.channels.len() < self.min_size {
		continue;
	    }
	    if self.target == MiningTarget::Maximal && !is_maximal( database, &itemset.channels, self.min_support ) {
		continue;
	    }
	    if mined.len() == self.max_patterns {
		return Err( AnalysisError::ResourceExhaustion{
		    reason: format!( "more than {} patterns with support >= {}", self.max_patterns, self.min_support ),
		    progress: crate::error::Progress::new( Stage::Mining, mined.len(), self.max_patterns ),
		});
	    }
	    mined.push( itemset );
	}
	debug!( "mined {} {:?} itemsets with support >= {}", mined.len(), self.target, self.min_support );
	Ok( mined )
    }
}

impl StructureEngine for ItemsetEngine {

    fn key_count_hint( &self, _num_channels: usize ) -> Option<usize> {
	None
    }

    fn key_space( &self, database: &BinnedDatabase, monitor: &Monitor ) -> Result<Vec<StructureKey>> {
	let mut keys: Vec<StructureKey> = self.mine( database, monitor )?.into_iter()
	    .map( |itemset| StructureKey{ channels: itemset.channels, lag: None } )
	    .collect();
	keys.sort();
	Ok( keys )
    }

    fn measure( &self, database: &BinnedDatabase, key: &StructureKey ) -> Count {
	database.query_support( &key.channels )
    }
}
