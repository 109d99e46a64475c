
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::data::{BinnedDatabase, Channel, Count};
use crate::error::{Result, Stage};
use crate::miner::Monitor;

pub mod itemset;
pub mod pairwise;

pub use itemset::{ClosedItemsets, ItemsetEngine, MinedItemset, MiningTarget};
pub use pairwise::PairwiseEngine;

/// Identifies one tested statistic: a channel combination and, for lagged statistics, the offset in bins.
/// Ordered by channel set first, then by lag.
#[derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize )]
pub struct StructureKey {
    /// sorted, without duplicates
    pub channels: Vec<Channel>,
    pub lag: Option<i64>,
}

/// Statistic per key for one realization of the data
#[derive( Debug, Clone, Default, PartialEq )]
pub struct CorrelationStructure {
    entries: FxHashMap<StructureKey, Count>,
}

/// Computes co-occurrence statistics. Has no randomness.
pub trait StructureEngine: Sync {

    /// Number of keys the engine will test on `num_channels` channels, if known without looking at the data
    fn key_count_hint( &self, num_channels: usize ) -> Option<usize>;

    /// Keys to test, derived from the recorded data. Surrogates are measured on the same keys.
    fn key_space( &self, database: &BinnedDatabase, monitor: &Monitor ) -> Result<Vec<StructureKey>>;

    /// The statistic of one key
    fn measure( &self, database: &BinnedDatabase, key: &StructureKey ) -> Count;

    /// Sequential evaluation of all keys, for callers that already run in parallel
    fn measure_all( &self, database: &BinnedDatabase, keys: &[StructureKey] ) -> Vec<Count> {
	keys.iter().map( |key| self.measure( database, key )).collect()
    }
}

/// Evaluates all keys in parallel, one channel combination per work item.
/// Once the monitor reports cancellation or an exhausted time budget the remaining keys are skipped,
/// and the error lists the keys that were computed.
pub fn compute<E: StructureEngine + ?Sized>( engine: &E, database: &BinnedDatabase, keys: &[StructureKey], monitor: &Monitor ) -> Result<CorrelationStructure> {
    let completed = AtomicUsize::new( 0 );
    let total = keys.len();
    let results = keys.par_iter()
	.map( |key| -> Result<Count> {
	    monitor.check( Stage::RealStructure, completed.load( Ordering::Relaxed ), total )?;
	    let count = engine.measure( database, key );
	    completed.fetch_add( 1, Ordering::Relaxed );
	    Ok( count )
	}).collect::<Vec<Result<Count>>>();

    let mut counts = Vec::with_capacity( total );
    let mut interruption = None;
    let mut finished = Vec::new();
    for (key, result) in keys.iter().zip( results ) {
	match result {
	    Ok( count ) => {
		counts.push( count );
		finished.push( key.clone() );
	    },
	    Err( err ) => if interruption.is_none() {
		interruption = Some( err );
	    },
	}
    }
    if let Some( err ) = interruption {
	return Err( err.with_finished( finished ));
    }
    Ok( CorrelationStructure::from_counts( keys, &counts ))
}

impl StructureKey {

    pub fn new( mut channels: Vec<Channel>, lag: Option<i64> ) -> StructureKey {
	channels.sort_unstable();
	channels.dedup();
	StructureKey{ channels, lag }
    }

    pub fn pair( first: Channel, second: Channel, lag: i64 ) -> StructureKey {
	StructureKey{ channels: vec!( first, second ), lag: Some( lag ) }
    }

    pub fn contains( &self, channel: Channel ) -> bool {
	self.channels.binary_search( &channel ).is_ok()
    }
}

impl CorrelationStructure {

    pub fn new() -> CorrelationStructure {
	CorrelationStructure::default()
    }

    /// Pairs up keys and statistics of the same order
    pub fn from_counts( keys: &[StructureKey], counts: &[Count] ) -> CorrelationStructure {
	assert_eq!( keys.len(), counts.len() );
	let mut entries = FxHashMap::default();
	entries.reserve( keys.len() );
	for (key, count) in keys.iter().zip( counts.iter() ) {
	    entries.insert( key.clone(), *count );
	}
	CorrelationStructure{ entries }
    }

    pub fn insert( &mut self, key: StructureKey, count: Count ) {
	self.entries.insert( key, count );
    }

    pub fn get( &self, key: &StructureKey ) -> Option<Count> {
	self.entries.get( key ).copied()
    }

    pub fn len( &self ) -> usize { self.entries.len() }
    pub fn is_empty( &self ) -> bool { self.entries.is_empty() }

    /// Entries in key order
    pub fn sorted( &self ) -> Vec<(&StructureKey, Count)> {
	let mut entries: Vec<(&StructureKey, Count)> = self.entries.iter().map( |(key, count)| (key, *count) ).collect();
	entries.sort_unstable_by( |left, right| left.0.cmp( right.0 ));
	entries
    }
}
