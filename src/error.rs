
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::correlation::StructureKey;

/// Pipeline stage in which a long running computation was interrupted
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize )]
#[serde( rename_all = "kebab-case" )]
pub enum Stage {
    /// binning of the recorded trains, one unit per bin
    Preparation,
    /// statistics of the recorded data, one unit per channel combination
    RealStructure,
    /// surrogate replicas, one unit per replica
    Surrogates,
    /// closed itemset enumeration, one unit per emitted pattern
    Mining,
}

/// How far an interrupted computation got.
#[derive( Debug, Clone, PartialEq, Eq, Serialize )]
pub struct Progress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
    /// channel combinations whose statistic was computed, in key order
    #[serde( skip_serializing_if = "Vec::is_empty" )]
    pub finished: Vec<StructureKey>,
}

#[derive( Debug, Error )]
pub enum AnalysisError {
    #[error( "invalid configuration: {0}" )]
    InvalidConfiguration( String ),

    #[error( "invalid window: {0}" )]
    InvalidWindow( String ),

    #[error( "invalid surrogate method: {0}" )]
    InvalidMethod( String ),

    #[error( "degenerate input on channel {channel}: {reason}" )]
    DegenerateInput { channel: usize, reason: String },

    #[error( "{surrogates} surrogates resolve p-values down to {resolution:.2e}, but {required:.2e} is required" )]
    InsufficientSurrogates { surrogates: usize, resolution: f64, required: f64 },

    #[error( "resources exhausted ({reason}) after {progress}" )]
    ResourceExhaustion { reason: String, progress: Progress },

    #[error( "analysis cancelled after {progress}" )]
    Cancelled { progress: Progress },

    #[error( "I/O error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "malformed document: {0}" )]
    Format( #[from] serde_json::Error ),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    /// Errors caused by parameters or input that a caller can fix and retry.
    /// They are raised before any surrogate is generated.
    pub fn is_validation( &self ) -> bool {
	matches!( self,
		  AnalysisError::InvalidConfiguration( _ )
		  | AnalysisError::InvalidWindow( _ )
		  | AnalysisError::InvalidMethod( _ )
		  | AnalysisError::DegenerateInput { .. }
		  | AnalysisError::InsufficientSurrogates { .. } )
    }

    /// Records the keys that were computed before the interruption
    pub fn with_finished( mut self, finished: Vec<StructureKey> ) -> AnalysisError {
	if let AnalysisError::ResourceExhaustion{ progress, .. } | AnalysisError::Cancelled{ progress } = &mut self {
	    progress.completed = finished.len();
	    progress.finished = finished;
	}
	self
    }

    /// Progress information of interrupted runs
    pub fn progress( &self ) -> Option<&Progress> {
	match self {
	    AnalysisError::ResourceExhaustion { progress, .. } => Some( progress ),
	    AnalysisError::Cancelled { progress } => Some( progress ),
	    _ => None,
	}
    }
}

impl Progress {

    pub fn new( stage: Stage, completed: usize, total: usize ) -> Progress {
	Progress{ stage, completed, total, finished: Vec::new() }
    }
}

impl fmt::Display for Progress {
    fn fmt( &self, f: &mut fmt::Formatter ) -> fmt::Result {
	let unit = match self.stage {
	    Stage::Preparation => "bins",
	    Stage::RealStructure => "channel combinations",
	    Stage::Surrogates => "surrogate replicas",
	    Stage::Mining => "mined patterns",
	};
	write!( f, "{}/{} {unit}", self.completed, self.total )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validation_split() {
	let progress = Progress::new( Stage::Surrogates, 3, 10 );
	assert!( AnalysisError::InvalidWindow( "x".into() ).is_validation() );
	assert!( AnalysisError::InsufficientSurrogates{ surrogates: 9, resolution: 0.1, required: 0.01 }.is_validation() );
	let exhausted = AnalysisError::ResourceExhaustion{ reason: "time".into(), progress: progress.clone() };
	assert!( !exhausted.is_validation() );
	assert_eq!( exhausted.progress(), Some( &progress ));
	assert_eq!( exhausted.to_string(), "resources exhausted (time) after 3/10 surrogate replicas" );
    }

    #[test]
    fn test_finished_keys() {
	let keys = vec!( StructureKey::pair( 0, 1, 0 ), StructureKey::pair( 0, 2, 0 ));
	let cancelled = AnalysisError::Cancelled{ progress: Progress::new( Stage::RealStructure, 0, 5 ) }
	    .with_finished( keys.clone() );
	let progress = cancelled.progress().unwrap();
	assert_eq!( progress.completed, 2 );
	assert_eq!( progress.finished, keys );

	let untouched = AnalysisError::InvalidWindow( "x".into() ).with_finished( keys );
	assert!( untouched.progress().is_none() );
    }
}
