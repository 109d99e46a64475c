
//! Running estimate of mean and variance, updated one value or one batch at a time.

use serde::Serialize;

/// Welford's algorithm, with the pairwise combination of Chan et al. for merging
#[derive( Debug, Clone, Default, PartialEq, Serialize )]
pub struct VarianceOnline {
    mean: f64,
    count: u64,
    /// sum of squared deviations from the mean
    variance_sum: f64,
}

impl VarianceOnline {

    pub fn new() -> VarianceOnline {
	VarianceOnline::default()
    }

    pub fn update( &mut self, value: f64 ) {
	self.count += 1;
	let delta = value - self.mean;
	self.mean += delta / self.count as f64;
	self.variance_sum += delta * ( value - self.mean );
    }

    pub fn update_batch( &mut self, values: &[f64] ) {
	let mut batch = VarianceOnline::new();
	for value in values {
	    batch.update( *value );
	}
	self.merge( &batch );
    }

    /// Adds `weight` copies of a value
    pub fn update_weighted( &mut self, value: f64, weight: u64 ) {
	if weight == 0 {
	    return;
	}
	let batch = VarianceOnline{ mean: value, count: weight, variance_sum: 0.0 };
	self.merge( &batch );
    }

    /// Combines two partial estimates as if all values had been seen by one
    pub fn merge( &mut self, other: &VarianceOnline ) {
	if other.count == 0 {
	    return;
	}
	if self.count == 0 {
	    *self = other.clone();
	    return;
	}
	let count = self.count + other.count;
	let delta = other.mean - self.mean;
	self.mean += delta * other.count as f64 / count as f64;
	self.variance_sum += other.variance_sum + delta * delta * self.count as f64 * other.count as f64 / count as f64;
	self.count = count;
    }

    pub fn count( &self ) -> u64 { self.count }

    /// Mean and standard deviation, None before the first update.
    /// With a single value both estimators give zero spread.
    pub fn mean_std( &self, unbiased: bool ) -> Option<(f64, f64)> {
	if self.count == 0 {
	    return None;
	}
	let std = if self.count > 1 {
	    let denominator = if unbiased { self.count - 1 } else { self.count };
	    ( self.variance_sum / denominator as f64 ).sqrt()
	} else {
	    0.0
	};
	Some( (self.mean, std) )
    }

    pub fn reset( &mut self ) {
	*self = VarianceOnline::default();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_approx {
	($real:expr, $expected:expr, $delta:expr) => {
	    if $real < $expected - $delta || $real > $expected + $delta {
		panic!( "Violate {:.4} == {:.4} (+-{:.4})", $real, $expected, $delta );
	    }
	}
    }

    #[test]
    fn test_variance() {
	let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
	let mut variance = VarianceOnline::new();
	for v in values {
	    variance.update( v );
	}
	let (mean, std) = variance.mean_std( false ).unwrap();
	assert_approx!( mean, 5.0, 1e-12 );
	assert_approx!( std, 2.0, 1e-12 );
	let (_, unbiased) = variance.mean_std( true ).unwrap();
	assert_approx!( unbiased, ( 32.0f64 / 7.0 ).sqrt(), 1e-12 );

	let mut single = VarianceOnline::new();
	single.update( 3.0 );
	assert_eq!( single.mean_std( true ), Some( (3.0, 0.0) ));
	assert_eq!( VarianceOnline::new().mean_std( false ), None );
    }

    #[test]
    /// Merged partial accumulators agree with a single pass
    fn test_merge() {
	let mut left = VarianceOnline::new();
	left.update_batch( &[1.0, 2.0, 3.0] );
	let mut right = VarianceOnline::new();
	right.update_weighted( 10.0, 2 );
	right.update( 4.0 );
	left.merge( &right );

	let mut single = VarianceOnline::new();
	for v in [1.0, 2.0, 3.0, 10.0, 10.0, 4.0] {
	    single.update( v );
	}
	let (merged_mean, merged_std) = left.mean_std( false ).unwrap();
	let (mean, std) = single.mean_std( false ).unwrap();
	assert_eq!( left.count(), 6 );
	assert_approx!( merged_mean, mean, 1e-9 );
	assert_approx!( merged_std, std, 1e-9 );
    }
}
