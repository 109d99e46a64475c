
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::{Count, SpikeTrain};

/// Permutes the bin counts of one channel
pub fn shuffle_bins<R: Rng>( counts: &[Count], rng: &mut R ) -> Vec<Count> {
    let mut shuffled = counts.to_vec();
    shuffled.shuffle( rng );
    shuffled
}

/// Permutes the inter-spike intervals and accumulates them again from the start of the recording.
/// Pre: the train has at least two events
pub fn shuffle_intervals<R: Rng>( train: &SpikeTrain, rng: &mut R ) -> Vec<f64> {
    let mut intervals = train.intervals();
    intervals.shuffle( rng );

    let mut t = train.t_start();
    intervals.iter()
	.map( |interval| {
	    t += interval;
	    clip( t, train )
	}).collect()
}

/// Moves every event independently by up to `window` in either direction.
/// Events pushed out of the recording are clipped to its edges.
/// Pre: window is positive
pub fn dither<R: Rng>( train: &SpikeTrain, window: f64, rng: &mut R ) -> Vec<f64> {
    let displacement = Uniform::new_inclusive( -window, window );
    let mut times: Vec<f64> = train.times().iter()
	.map( |t| clip( t + displacement.sample( rng ), train ))
	.collect();
    times.sort_unstable_by( |left, right| left.total_cmp( right ));
    times
}

/// Places the events of the train uniformly at random, keeping at least `dead_time` between consecutive events.
/// Pre: (len - 1) * dead_time < duration
pub fn randomize_refractory<R: Rng>( train: &SpikeTrain, dead_time: f64, rng: &mut R ) -> Vec<f64> {
    let n = train.len();
    if n == 0 {
	return Vec::new();
    }
    // draw in an interval shrunk by the dead times, then stretch the gaps again
    let free = train.duration() - ( n - 1 ) as f64 * dead_time;
    let uniform = Uniform::new( 0.0, free );
    let mut offsets: Vec<f64> = ( 0 .. n ).map( |_| uniform.sample( rng )).collect();
    offsets.sort_unstable_by( |left, right| left.total_cmp( right ));

    offsets.iter().enumerate()
	.map( |(i, offset)| clip( train.t_start() + offset + i as f64 * dead_time, train ))
	.collect()
}

/// Largest time inside [t_start, t_stop)
fn last_time( train: &SpikeTrain ) -> f64 {
    let t_stop = train.t_stop();
    t_stop - t_stop.abs().max( 1.0 ) * f64::EPSILON
}

fn clip( t: f64, train: &SpikeTrain ) -> f64 {
    t.max( train.t_start() ).min( last_time( train ))
}
