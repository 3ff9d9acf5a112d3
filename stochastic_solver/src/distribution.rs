use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// The Wiener increment over a step of length dt
/// ``dW ~ N(0, dt)``
pub struct WienerIncrement {
    sqrt_dt: f64,
}

impl WienerIncrement {
    #[must_use]
    pub fn new(dt: f64) -> Self {
        Self {
            sqrt_dt: dt.sqrt(),
        }
    }
}

impl Distribution<f64> for WienerIncrement {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.sample::<f64, _>(StandardNormal) * self.sqrt_dt
    }
}

/// Two point stand-ins `V_{jr}` for the double ito integrals between each pair
/// of the `n_channels` measured channels, as used by the weak platen scheme
/// (14.2.8 - 14.2.10 in <https://doi.org/10.1007/978-3-662-12616-5>).
///
/// Off the diagonal `V_{jr} = \pm dt` with equal probability and `V_{rj} = -V_{jr}`,
/// on the diagonal `V_{jj} = -dt`.
pub struct PairIntegralSigns {
    pub n_channels: usize,
    pub dt: f64,
}

impl Distribution<Array2<f64>> for PairIntegralSigns {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array2<f64> {
        let mut out = Array2::from_diag_elem(self.n_channels, -self.dt);
        for j in 0..self.n_channels {
            for r in 0..j {
                let value = if rng.gen::<bool>() { self.dt } else { -self.dt };
                out[[j, r]] = value;
                out[[r, j]] = -value;
            }
        }
        out
    }
}
