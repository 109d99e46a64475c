
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Deserialize;
use serde::de::Error as _;
use serde_json as json;

use crate::config::AnalysisConfig;
use crate::data::{BinnedDatabase, Channel, SpikeTrain};
use crate::error::{AnalysisError, Result};
use crate::miner::AnalysisReport;
use crate::pattern::Pattern;

/// Converts a structure into a string
pub trait PrettyFormatter<T: ?Sized> {
    fn format_pretty( &self, object: &T ) -> String;
}

/// Table of patterns, one per line
#[derive( Debug, Clone, Default )]
pub struct PatternFormatter {
    show_header: bool,
    show_entries: bool,
}

/// Spike trains of one recording as stored in JSON
#[derive( Debug, Deserialize )]
struct TrainDocument {
    t_start: f64,
    t_stop: f64,
    trains: Vec<Vec<f64>>,
}

/// Reads `{"t_start": .., "t_stop": .., "trains": [[..], ..]}`
pub fn read_trains_json<P: AsRef<Path>>( path: P ) -> Result<Vec<SpikeTrain>> {
    let reader = BufReader::new( File::open( path )? );
    let document: TrainDocument = json::from_reader( reader )?;
    document.trains.into_iter()
	.map( |times| SpikeTrain::new( times, document.t_start, document.t_stop ))
	.collect()
}

/// Reads one channel per line with whitespace separated times. Empty lines are silent channels.
pub fn read_trains_text<P: AsRef<Path>>( path: P, t_start: f64, t_stop: f64 ) -> Result<Vec<SpikeTrain>> {
    let reader = BufReader::new( File::open( path )? );
    let mut trains = Vec::new();
    for (number, line) in reader.lines().enumerate() {
	let times = parse_times( &line?, " " )
	    .map_err( |chunk| AnalysisError::Format( json::Error::custom(
		format!( "line {}: '{chunk}' is not a time", number + 1 ))))?;
	trains.push( SpikeTrain::new( times, t_start, t_stop )? );
    }
    Ok( trains )
}

/// Parses numbers separated by splitter, returns the first chunk that is not a number
pub fn parse_times( line: &str, splitter: &str ) -> std::result::Result<Vec<f64>, String> {
    line.split( splitter )
	.map( |chunk| chunk.trim() )
	.filter( |chunk| !chunk.is_empty() )
	.map( |chunk| chunk.parse::<f64>().map_err( |_| chunk.to_string() ))
	.collect()
}

pub fn read_config<P: AsRef<Path>>( path: P ) -> Result<AnalysisConfig> {
    let reader = BufReader::new( File::open( path )? );
    Ok( json::from_reader( reader )? )
}

/// Writes a serializeable object to a file
pub fn write_json<T: serde::Serialize, P: AsRef<Path>>( object: &T, path: P ) -> Result<()> {
    let mut writer = BufWriter::new( File::create( path )? );
    json::to_writer_pretty( &mut writer, object )?;
    writer.flush()?;
    Ok( () )
}

/// Creates a fimi string from an iterator over channels
pub fn produce_fimi<I: Iterator<Item = Channel>>( channels: I, left_delimiter: &str, separator: &str, right_delimiter: &str ) -> String {
    let mut fimi = String::new();
    fimi.push_str( left_delimiter );
    let body: Vec<String> = channels.map( |channel| channel.to_string() ).collect();
    fimi.push_str( &body.join( separator ));
    fimi.push_str( right_delimiter );
    fimi
}

/// Writes the non-empty bins as transactions in FIMI format, for external itemset miners
pub fn write_fimi<P: AsRef<Path>>( database: &BinnedDatabase, path: P ) -> Result<usize> {
    let mut writer = BufWriter::new( File::create( path )? );
    let mut lines = 0;
    for transaction in database.transactions().iter().filter( |transaction| !transaction.is_empty() ) {
	writeln!( writer, "{}", produce_fimi( transaction.iter(), "", " ", "" ))?;
	lines += 1;
    }
    writer.flush()?;
    Ok( lines )
}

impl PrettyFormatter<[Pattern]> for PatternFormatter {

    fn format_pretty( &self, patterns: &[Pattern] ) -> String {
	let mut output = String::new();
	output.push( '\n' ); // so output begins on a new line
	if self.show_header {
	    output = join_lines( output, format!( "{:>10}  {:>8}  {:>10}  {}", "lag", "support", "p-value", "channels" ));
	}
	patterns.iter()
	    .map( |pattern| self.format_pattern( pattern ))
	    .fold( output, join_lines )
    }
}

impl PrettyFormatter<AnalysisReport> for PatternFormatter {

    fn format_pretty( &self, report: &AnalysisReport ) -> String {
	let significance = &report.significance;
	let summary = format!(
	    "{} channels, {} bins of {}, {} keys tested against {} surrogates, {} correction at {:.3e}: {} significant, {} patterns",
	    report.channels, report.num_bins, report.bin_width, significance.tested, significance.surrogates,
	    significance.correction, significance.threshold, significance.entries.len(), report.patterns.len() );
	let mut output = summary;
	output.push_str( &self.format_pretty( report.patterns.as_slice() ));
	output
    }
}

impl PatternFormatter {

    pub fn new() -> PatternFormatter {
	PatternFormatter::default()
    }

    pub fn show_header( &mut self ) { self.show_header = true; }
    pub fn show_entries( &mut self ) { self.show_entries = true; }

    fn format_pattern( &self, pattern: &Pattern ) -> String {
	let lag = match pattern.lag {
	    Some( lag ) => lag.to_string(),
	    None => "sync".to_string(),
	};
	let channels = produce_fimi( pattern.channels.iter().copied(), "{", " ", "}" );
	let mut line = format!( "{lag:>10}  {:>8}  {:>10.3e}  {channels}", pattern.support, pattern.p_value );
	if self.show_entries {
	    line.push_str( &format!( "  ({} entries)", pattern.entries ));
	}
	line
    }
}

fn join_lines( mut accumulator: String, addition: String ) -> String {
    accumulator.push_str( addition.as_str() );
    accumulator.push( '\n' );
    accumulator
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::data::discretize::discretize_all;

    fn write_file( directory: &tempfile::TempDir, name: &str, content: &str ) -> std::path::PathBuf {
	let path = directory.path().join( name );
	std::fs::write( &path, content ).unwrap();
	path
    }

    #[test]
    fn test_read_json() {
	let directory = tempfile::tempdir().unwrap();
	let path = write_file( &directory, "trains.json", r#"{ "t_start": 0.0, "t_stop": 2.0, "trains": [[0.1, 1.5], []] }"# );
	let trains = read_trains_json( &path ).unwrap();
	assert_eq!( trains.len(), 2 );
	assert_eq!( trains[ 0 ].times(), &[0.1, 1.5] );
	assert!( trains[ 1 ].is_empty() );

	let outside = write_file( &directory, "outside.json", r#"{ "t_start": 0.0, "t_stop": 1.0, "trains": [[1.5]] }"# );
	assert!( matches!( read_trains_json( &outside ), Err( AnalysisError::InvalidWindow( _ ))));
	let broken = write_file( &directory, "broken.json", r#"{ "t_start": 0.0 "# );
	assert!( matches!( read_trains_json( &broken ), Err( AnalysisError::Format( _ ))));
	assert!( matches!( read_trains_json( directory.path().join( "missing.json" )), Err( AnalysisError::Io( _ ))));
    }

    #[test]
    fn test_read_text() {
	let directory = tempfile::tempdir().unwrap();
	let path = write_file( &directory, "trains.txt", "0.5 1.25  3.0\n\n2.0\n" );
	let trains = read_trains_text( &path, 0.0, 4.0 ).unwrap();
	assert_eq!( trains.len(), 3 );
	assert_eq!( trains[ 0 ].times(), &[0.5, 1.25, 3.0] );
	assert!( trains[ 1 ].is_empty() );

	let broken = write_file( &directory, "broken.txt", "0.5 x\n" );
	assert!( matches!( read_trains_text( &broken, 0.0, 4.0 ), Err( AnalysisError::Format( _ ))));
	assert_eq!( parse_times( "1 2 b", " " ), Err( "b".to_string() ));
    }

    #[test]
    fn test_fimi() {
	assert_eq!( produce_fimi( vec!( 1, 4, 7 ).into_iter(), "{", " ", "}" ), "{1 4 7}" );
	assert_eq!( produce_fimi( Vec::new().into_iter(), "", " ", "" ), "" );

	let trains = vec!(
	    SpikeTrain::new( vec!( 0.5, 2.5 ), 0.0, 4.0 ).unwrap(),
	    SpikeTrain::new( vec!( 0.5 ), 0.0, 4.0 ).unwrap(),
	);
	let database = BinnedDatabase::new( &discretize_all( &trains, 1.0 ).unwrap() );
	let directory = tempfile::tempdir().unwrap();
	let path = directory.path().join( "bins.fimi" );
	assert_eq!( write_fimi( &database, &path ).unwrap(), 2 );
	assert_eq!( std::fs::read_to_string( &path ).unwrap(), "0 1\n0\n" );
    }

    #[test]
    fn test_config_and_patterns() {
	let directory = tempfile::tempdir().unwrap();
	let path = write_file( &directory, "config.json", r#"{ "bin_width": 0.01, "surrogates": 500 }"# );
	let config = read_config( &path ).unwrap();
	assert_eq!( config.surrogates, 500 );

	let patterns = vec!( Pattern{ channels: vec!( 2, 5 ), lag: None, support: 12, p_value: 0.002, corrected: true, entries: 1 } );
	let output = directory.path().join( "patterns.json" );
	write_json( &patterns, &output ).unwrap();
	let written: json::Value = json::from_str( &std::fs::read_to_string( &output ).unwrap() ).unwrap();
	assert_eq!( written[ 0 ][ "channels" ], json::json!( [2, 5] ));
	assert_eq!( written[ 0 ][ "lag" ], json::Value::Null );

	let mut formatter = PatternFormatter::new();
	formatter.show_header();
	let table = formatter.format_pretty( patterns.as_slice() );
	assert_eq!( table.lines().count(), 3 );
	assert!( table.ends_with( "{2 5}\n" ));
	assert!( table.contains( "sync" ));
    }
}
