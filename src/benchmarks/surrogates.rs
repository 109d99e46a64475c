
use tracing::{info, debug};
use tracing_subscriber;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Exp;

use std::time::*;

use spikemine::*;
use spikemine::correlation::{self, PairwiseEngine, StructureEngine};
use spikemine::data::{discretize, BinnedDatabase};
use spikemine::miner::Monitor;
use spikemine::surrogate::SurrogateGenerator;

fn main() -> Result<()> {
    prepare_logging();

    let channels = 40;
    let rate = 20.0;
    let duration = 10.0;
    let bin_width = 0.005;
    let replicas = 100;

    let trains = poisson_trains( channels, rate, duration, 17 )?;
    let dataset = discretize::discretize_all( &trains, bin_width )?;
    info!( "{channels} Poisson trains at {rate} Hz over {duration} s, {} bins", dataset.num_bins() );

    let methods = vec!(
	SurrogateMethod::BinShuffle,
	SurrogateMethod::IsiShuffle,
	SurrogateMethod::Dithering{ window: 0.02 },
	SurrogateMethod::RefractoryRandomize{ dead_time: 0.002 },
    );
    for method in methods {
	let generator = SurrogateGenerator::new( method, 3 );
	let start = Instant::now();
	let set = generator.generate_set( replicas, &trains, &dataset )?;
	let time = start.elapsed();
	info!( "{method}: {} replicas took {}ms ({:.1} replicas/s)", set.len(), time.as_millis(), set.len() as f64 / time.as_secs_f64() );
    }

    benchmark_pairwise( &dataset, 5 )?;
    Ok( () )
}

/// Exponential intervals, rejected beyond the end of the recording
fn poisson_trains( channels: usize, rate: f64, duration: f64, seed: u64 ) -> Result<Vec<SpikeTrain>> {
    let intervals = Exp::new( rate ).map_err( |err| AnalysisError::InvalidConfiguration( err.to_string() ))?;
    let mut rng = ChaCha8Rng::seed_from_u64( seed );
    ( 0 .. channels )
	.map( |_| {
	    let mut times = Vec::new();
	    let mut t = intervals.sample( &mut rng );
	    while t < duration {
		times.push( t );
		t += intervals.sample( &mut rng );
	    }
	    SpikeTrain::new( times, 0.0, duration )
	}).collect()
}

fn benchmark_pairwise( dataset: &data::BinnedDataset, max_lag: i64 ) -> Result<()> {
    let database = BinnedDatabase::new( dataset );
    let engine = PairwiseEngine::new( ( -max_lag ..= max_lag ).collect() );
    let monitor = Monitor::unbounded();
    let keys = engine.key_space( &database, &monitor )?;

    let start = Instant::now();
    let structure = correlation::compute( &engine, &database, &keys, &monitor )?;
    let parallel = start.elapsed();

    let start = Instant::now();
    let counts = engine.measure_all( &database, &keys );
    let sequential = start.elapsed();
    debug!( "{} counts, largest {:?}", counts.len(), counts.iter().max() );

    info!( "pairwise: {} keys in {}ms parallel, {}ms sequential", structure.len(), parallel.as_millis(), sequential.as_millis() );
    Ok( () )
}

fn prepare_logging() {
    let tracer = tracing_subscriber::fmt::fmt()
        .with_max_level( tracing_subscriber::filter::LevelFilter::INFO )
        .finish();
    if let Err( err ) = tracing::subscriber::set_global_default( tracer ) {
	eprintln!( "logging unavailable: {err}" );
    }
}
