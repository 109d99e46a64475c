
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::*;

use spikemine::*;
use spikemine::config::{LagSpec, Mode};
use spikemine::correlation::MiningTarget;
use spikemine::data::{discretize, BinnedDatabase};
use spikemine::io::{self, PatternFormatter, PrettyFormatter};
use spikemine::significance::Correction;

#[derive( Debug, Clone, Copy, ValueEnum )]
enum InputFormat {
    /// {"t_start", "t_stop", "trains": [[...], ...]}
    Json,
    /// one channel per line, needs --t-start and --t-stop
    Text,
}

/// Detects significant synchronous and lagged firing patterns in parallel spike trains
#[derive( Parser, Debug )]
#[command( name = "spike_miner", version )]
struct Cli {
    /// Spike trains
    input: PathBuf,

    #[arg( long, value_enum, default_value = "json" )]
    format: InputFormat,

    #[arg( long, allow_hyphen_values = true )]
    t_start: Option<f64>,

    #[arg( long, allow_hyphen_values = true )]
    t_stop: Option<f64>,

    /// Analysis configuration in JSON, overridden by the flags below
    #[arg( short, long )]
    config: Option<PathBuf>,

    #[arg( short, long )]
    bin_width: Option<f64>,

    /// Lags in bins: "-2..2" or "-1,0,3"
    #[arg( long, allow_hyphen_values = true )]
    lags: Option<String>,

    /// bin-shuffle, isi-shuffle, dithering:WINDOW or refractory-randomize:DEAD_TIME
    #[arg( short, long )]
    method: Option<SurrogateMethod>,

    #[arg( short = 'n', long )]
    surrogates: Option<usize>,

    #[arg( short, long )]
    alpha: Option<f64>,

    /// bonferroni, fdr or none
    #[arg( long )]
    correction: Option<Correction>,

    #[arg( long )]
    seed: Option<u64>,

    /// Test closed channel sets with at least this support instead of pairs
    #[arg( long, value_name = "MIN_SUPPORT" )]
    itemsets: Option<Count>,

    /// Keep only maximal channel sets
    #[arg( long, requires = "itemsets" )]
    maximal: bool,

    #[arg( long )]
    max_bins: Option<usize>,

    #[arg( long )]
    max_keys: Option<usize>,

    /// Seconds
    #[arg( long )]
    time_limit: Option<f64>,

    /// Write the report as JSON
    #[arg( short, long )]
    output: Option<PathBuf>,

    /// Write the binned recording in FIMI format
    #[arg( long )]
    fimi: Option<PathBuf>,

    #[arg( short, long )]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    prepare_logging( cli.verbose );

    match run( &cli ) {
	Ok( () ) => ExitCode::SUCCESS,
	Err( err ) => {
	    error!( "{err}" );
	    if err.is_validation() { ExitCode::from( 2 ) } else { ExitCode::from( 1 ) }
	},
    }
}

fn run( cli: &Cli ) -> Result<()> {
    let config = build_config( cli )?;
    let trains = match cli.format {
	InputFormat::Json => io::read_trains_json( &cli.input )?,
	InputFormat::Text => {
	    let (Some( t_start ), Some( t_stop )) = (cli.t_start, cli.t_stop) else {
		return Err( AnalysisError::InvalidConfiguration( "text input needs --t-start and --t-stop".to_string() ));
	    };
	    io::read_trains_text( &cli.input, t_start, t_stop )?
	},
    };
    info!( "read {} channels from {}", trains.len(), cli.input.display() );

    if let Some( path ) = &cli.fimi {
	let database = BinnedDatabase::new( &discretize::discretize_all( &trains, config.bin_width )? );
	let lines = io::write_fimi( &database, path )?;
	info!( "wrote {lines} transactions to {}", path.display() );
    }

    let miner = SurrogateMiner::new( config );
    let report = miner.analyze( &trains )?;

    let mut formatter = PatternFormatter::new();
    formatter.show_header();
    if cli.verbose {
	formatter.show_entries();
    }
    println!( "{}", formatter.format_pretty( &report ));

    if let Some( path ) = &cli.output {
	io::write_json( &report, path )?;
	info!( "wrote report to {}", path.display() );
    }
    Ok( () )
}

fn build_config( cli: &Cli ) -> Result<AnalysisConfig> {
    let mut config = match &cli.config {
	Some( path ) => io::read_config( path )?,
	None => AnalysisConfig::default(),
    };
    if let Some( bin_width ) = cli.bin_width { config.bin_width = bin_width; }
    if let Some( lags ) = &cli.lags { config.lags = parse_lags( lags )?; }
    if let Some( method ) = cli.method { config.method = method; }
    if let Some( surrogates ) = cli.surrogates { config.surrogates = surrogates; }
    if let Some( alpha ) = cli.alpha { config.alpha = alpha; }
    if let Some( correction ) = cli.correction { config.correction = correction; }
    if let Some( seed ) = cli.seed { config.seed = seed; }
    if let Some( max_bins ) = cli.max_bins { config.budget.max_bins = Some( max_bins ); }
    if let Some( max_keys ) = cli.max_keys { config.budget.max_keys = Some( max_keys ); }
    if let Some( time_limit ) = cli.time_limit { config.budget.time_limit = Some( time_limit ); }
    if let Some( min_support ) = cli.itemsets {
	let target = if cli.maximal { MiningTarget::Maximal } else { MiningTarget::Closed };
	config.mode = Mode::Itemset{ min_support, min_size: 2, max_size: None, target };
    }
    config.validate()?;
    Ok( config )
}

fn parse_lags( text: &str ) -> Result<LagSpec> {
    let invalid = || AnalysisError::InvalidConfiguration( format!( "cannot read lags '{text}'" ));
    if let Some( (min, max) ) = text.split_once( ".." ) {
	let min = min.trim().parse::<i64>().map_err( |_| invalid() )?;
	let max = max.trim().parse::<i64>().map_err( |_| invalid() )?;
	return Ok( LagSpec::Range{ min, max, step: 1 } );
    }
    let lags = text.split( ',' )
	.map( |lag| lag.trim().parse::<i64>().map_err( |_| invalid() ))
	.collect::<Result<Vec<i64>>>()?;
    Ok( LagSpec::Set( lags ))
}

fn prepare_logging( verbose: bool ) {
    let level = if verbose { tracing_subscriber::filter::LevelFilter::DEBUG } else { tracing_subscriber::filter::LevelFilter::INFO };
    let tracer = tracing_subscriber::fmt::fmt()
	.with_max_level( level )
	.with_writer( std::io::stderr )
	.finish();
    if let Err( err ) = tracing::subscriber::set_global_default( tracer ) {
	eprintln!( "logging unavailable: {err}" );
    }
}
