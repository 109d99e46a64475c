
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::*;

use crate::*;
use crate::config::{AnalysisConfig, Mode};
use crate::correlation::{self, StructureEngine, StructureKey};
use crate::data::{discretize, synchrofact, BinnedDatabase, BinnedDataset, SpikeTrain, Window};
use crate::error::{AnalysisError, Progress, Result, Stage};
use crate::pattern::{self, Pattern};
use crate::significance::{NullAccumulator, SignificanceReport};

/// Produces patterns from a set of simultaneously recorded spike trains
pub trait Miner {
    fn mine( &mut self, trains: &[SpikeTrain] ) -> Result<Vec<Pattern>>;
}

/// Shared flag to stop a running analysis. Clones refer to the same flag.
#[derive( Debug, Clone, Default )]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

/// Checked by workers between units of work: cancellation and the time budget
#[derive( Debug, Clone )]
pub struct Monitor {
    cancel: CancelToken,
    deadline: Option<Instant>,
}

/// Bins of the common grid allowed by default
pub const DEFAULT_MAX_BINS: usize = 100_000_000;

/// Limits on the size and the duration of an analysis
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Budget {
    /// bins of the common grid, checked before the trains are discretized
    pub max_bins: Option<usize>,
    /// tested keys
    pub max_keys: Option<usize>,
    /// mined patterns in the itemset mode
    pub max_patterns: Option<usize>,
    /// wall clock seconds
    pub time_limit: Option<f64>,
}

/// Compares the co-occurrence statistics of the recorded trains with their surrogates
pub struct SurrogateMiner {
    config: AnalysisConfig,
    cancel: CancelToken,
}

#[derive( Debug, Clone, Serialize )]
pub struct AnalysisReport {
    pub patterns: Vec<Pattern>,
    pub significance: SignificanceReport,
    pub channels: usize,
    pub num_bins: usize,
    pub bin_width: f64,
    pub window: Window,
    /// spikes dropped as synchrofacts before the analysis
    pub removed_spikes: usize,
}

impl CancelToken {

    pub fn new() -> CancelToken {
	CancelToken::default()
    }

    pub fn cancel( &self ) {
	self.cancelled.store( true, Ordering::SeqCst );
    }

    pub fn is_cancelled( &self ) -> bool {
	self.cancelled.load( Ordering::SeqCst )
    }
}

impl Monitor {

    pub fn new( cancel: CancelToken, time_limit: Option<Duration> ) -> Monitor {
	Monitor{ cancel, deadline: time_limit.map( |limit| Instant::now() + limit ) }
    }

    pub fn unbounded() -> Monitor {
	Monitor::new( CancelToken::new(), None )
    }

    /// Fails if the run was cancelled or ran out of time, reporting `completed` of `total` units of `stage`
    pub fn check( &self, stage: Stage, completed: usize, total: usize ) -> Result<()> {
	if self.cancel.is_cancelled() {
	    return Err( AnalysisError::Cancelled{ progress: Progress::new( stage, completed, total ) } );
	}
	if let Some( deadline ) = self.deadline {
	    if Instant::now() >= deadline {
		return Err( AnalysisError::ResourceExhaustion{
		    reason: "time limit exceeded".to_string(),
		    progress: Progress::new( stage, completed, total ),
		});
	    }
	}
	Ok( () )
    }
}

impl Default for Budget {
    fn default() -> Budget {
	Budget{ max_bins: Some( DEFAULT_MAX_BINS ), max_keys: None, max_patterns: None, time_limit: None }
    }
}

impl Budget {

    pub fn time_limit( &self ) -> Result<Option<Duration>> {
	match self.time_limit {
	    None => Ok( None ),
	    Some( seconds ) if seconds.is_finite() && seconds > 0.0 => Ok( Some( Duration::from_secs_f64( seconds ))),
	    Some( seconds ) => Err( AnalysisError::InvalidConfiguration( format!( "time limit {seconds} must be positive" ))),
	}
    }

    /// Fails before any memory is reserved for a grid finer than the budget allows
    pub fn check_bins( &self, bins: usize ) -> Result<()> {
	match self.max_bins {
	    Some( max_bins ) if bins > max_bins => Err( AnalysisError::ResourceExhaustion{
		reason: format!( "{bins} bins exceed the budget of {max_bins}" ),
		progress: Progress::new( Stage::Preparation, 0, bins ),
	    }),
	    _ => Ok( () ),
	}
    }

    /// Fails before any statistic is computed if the key space is too large
    pub fn check_keys( &self, keys: usize ) -> Result<()> {
	match self.max_keys {
	    Some( max_keys ) if keys > max_keys => Err( AnalysisError::ResourceExhaustion{
		reason: format!( "{keys} keys exceed the budget of {max_keys}" ),
		progress: Progress::new( Stage::RealStructure, 0, keys ),
	    }),
	    _ => Ok( () ),
	}
    }
}

impl Miner for SurrogateMiner {
    fn mine( &mut self, trains: &[SpikeTrain] ) -> Result<Vec<Pattern>> {
	self.analyze( trains ).map( |report| report.patterns )
    }
}

impl SurrogateMiner {

    pub fn new( config: AnalysisConfig ) -> SurrogateMiner {
	SurrogateMiner{ config, cancel: CancelToken::new() }
    }

    pub fn with_cancellation( mut self, cancel: CancelToken ) -> SurrogateMiner {
	self.cancel = cancel;
	self
    }

    pub fn config( &self ) -> &AnalysisConfig { &self.config }

    /// Runs all stages. Every validation error is raised before the first surrogate is drawn.
    pub fn analyze( &self, trains: &[SpikeTrain] ) -> Result<AnalysisReport> {
	let config = &self.config;
	let (trains, removed_spikes, dataset) = {
	    let _span = info_span!( "preparation" ).entered();
	    config.validate()?;
	    let window = Window::common( trains )?;
	    debug!( "{} channels over [{}, {})", trains.len(), window.t_start, window.t_stop );

	    config.budget.check_bins( discretize::num_bins( &window, config.bin_width )? )?;

	    let (trains, removed_spikes) = self.remove_synchrofacts( trains )?;
	    let dataset = discretize::discretize_all( &trains, config.bin_width )?;
	    config.generator().check_input( &trains )?;
	    info!( "discretized {} channels into {} bins of width {}", dataset.num_channels(), dataset.num_bins(), config.bin_width );
	    (trains, removed_spikes, dataset)
	};
	let monitor = Monitor::new( self.cancel.clone(), config.budget.time_limit()? );

	let database = BinnedDatabase::new( &dataset );
	let engine = config.engine()?;
	let keys = {
	    let _span = info_span!( "key_space" ).entered();
	    self.check_lags( dataset.num_bins() )?;
	    if let Some( hint ) = engine.key_count_hint( dataset.num_channels() ) {
		config.budget.check_keys( hint )?;
	    }
	    let keys = engine.key_space( &database, &monitor )?;
	    config.budget.check_keys( keys.len() )?;
	    info!( "testing {} keys", keys.len() );
	    keys
	};
	let significance = config.significance();
	significance.validate( keys.len() )?;

	let real = {
	    let _span = info_span!( "real_structure" ).entered();
	    correlation::compute( engine.as_ref(), &database, &keys, &monitor )?
	};

	let null = {
	    let _span = info_span!( "surrogates", n = config.surrogates ).entered();
	    self.surrogate_phase( engine.as_ref(), &keys, &trains, &dataset, &monitor )?
	};

	let _span = info_span!( "significance" ).entered();
	let report = significance.evaluate( &keys, &real, &null )?;
	report.log( "significance", Level::DEBUG );
	let patterns = pattern::extract( &report.entries, &config.merge )?;
	for pattern in &patterns {
	    pattern.log( "pattern", Level::DEBUG );
	}
	info!( "found {} patterns", patterns.len() );

	Ok( AnalysisReport{
	    patterns,
	    significance: report,
	    channels: dataset.num_channels(),
	    num_bins: dataset.num_bins(),
	    bin_width: dataset.bin_width(),
	    window: dataset.window(),
	    removed_spikes,
	})
    }

    fn remove_synchrofacts( &self, trains: &[SpikeTrain] ) -> Result<(Vec<SpikeTrain>, usize)> {
	let Some( filter ) = self.config.synchrofacts else {
	    return Ok( (trains.to_vec(), 0) );
	};
	let deletion = synchrofact::Deletion{ threshold: filter.threshold, invert: false };
	let report = synchrofact::detect_synchrofacts( trains, self.config.bin_width, filter.spread, Some( deletion ))?;
	let before: usize = trains.iter().map( |train| train.len() ).sum();
	let after: usize = report.trains.iter().map( |train| train.len() ).sum();
	info!( "removed {} synchrofact spikes in {} intervals", before - after,
	       report.intervals.iter().filter( |interval| interval.complexity >= filter.threshold ).count() );
	Ok( (report.trains, before - after) )
    }

    /// Lags must leave at least one bin to compare
    fn check_lags( &self, num_bins: usize ) -> Result<()> {
	if let Mode::Pairwise = self.config.mode {
	    let lags = self.config.lags_in_bins()?;
	    if let Some( lag ) = lags.iter().find( |lag| lag.unsigned_abs() as usize >= num_bins ) {
		return Err( AnalysisError::InvalidConfiguration(
		    format!( "lag {lag} does not fit into {num_bins} bins" )));
	    }
	}
	Ok( () )
    }

    /// Measures every replica in parallel. Each worker folds into its own accumulator; they are merged afterwards.
    fn surrogate_phase( &self, engine: &dyn StructureEngine, keys: &[StructureKey], trains: &[SpikeTrain],
			dataset: &BinnedDataset, monitor: &Monitor ) -> Result<NullAccumulator> {
	let generator = self.config.generator();
	let total = self.config.surrogates;
	let completed = AtomicUsize::new( 0 );

	let null = ( 0 .. total ).into_par_iter()
	    .try_fold( || NullAccumulator::new( keys.len() ), |mut accumulator, index| -> Result<NullAccumulator> {
		monitor.check( Stage::Surrogates, completed.load( Ordering::Relaxed ), total )?;
		let replica = generator.replica( index, trains, dataset )?;
		let database = BinnedDatabase::new( &replica );
		accumulator.add_realization( &engine.measure_all( &database, keys ));
		let done = completed.fetch_add( 1, Ordering::Relaxed ) + 1;
		if done % 100 == 0 {
		    debug!( "{done}/{total} surrogates" );
		}
		Ok( accumulator )
	    })
	    .try_reduce( || NullAccumulator::new( keys.len() ), |left, right| Ok( left.merge( right )))?;
	info!( "measured {} surrogates", null.realizations() );
	Ok( null )
    }
}

impl Loggable for AnalysisReport {
    fn log( &self, message: &str, level: Level ) {
	self.significance.log( message, level );
	for pattern in &self.patterns {
	    pattern.log( message, level );
	}
    }
}
