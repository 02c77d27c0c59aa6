use smartstring::alias::String as SmartString;

use crate::{
    backend::ArrayBackend, grid::HypercubeGrid, parameters::ParameterSpace, rng::MonteCarloRng,
};

/// Draws uniform points in the occupied bins of a [HypercubeGrid].
#[derive(Debug, Default, Clone, Copy)]
pub struct BinSampler;

impl BinSampler {
    /// Draw [`HypercubeGrid::samples_per_bin`] points uniformly from every occupied bin of `grid`,
    /// independently per dimension. The points of all bins are concatenated into one
    /// row-major batch, in the order of the occupied bins.
    pub fn draw(
        &self,
        grid: &HypercubeGrid,
        rng: &mut MonteCarloRng,
        backend: &dyn ArrayBackend,
    ) -> Vec<f64> {
        let ndim = grid.dimensions();
        let per_bin = grid.samples_per_bin();
        if ndim == 0 || per_bin == 0 {
            return vec![];
        }

        let mut points = vec![0.; grid.batch_size() * ndim];
        backend.fill_uniform(rng, &mut points);

        for (bin, block) in grid.occupied().iter().zip(points.chunks_mut(per_bin * ndim)) {
            let lower: Vec<f64> = grid.bin_lower(bin).collect();
            for row in block.chunks_exact_mut(ndim) {
                for (((x, lo), w), hi) in row
                    .iter_mut()
                    .zip(&lower)
                    .zip(grid.bin_widths())
                    .zip(grid.upper())
                {
                    // rounding may push the last bin past the domain
                    *x = (lo + w * *x).min(*hi);
                }
            }
        }

        points
    }
}

/// A batch of sample points, stored as one column per dimension.
///
/// Integrands look up columns by parameter name with [`SampleBatch::column`], so that they
/// do not depend on the order in which the parameters were registered.
#[derive(Debug, Clone)]
pub struct SampleBatch<'a> {
    space: &'a ParameterSpace,
    columns: Vec<Vec<f64>>,
    len: usize,
}

impl<'a> SampleBatch<'a> {
    /// Create a batch from the row-major `points` of the dimensions of `space`.
    pub fn from_rows(space: &'a ParameterSpace, points: &[f64]) -> SampleBatch<'a> {
        let ndim = space.dimensions();
        let len = if ndim == 0 { 0 } else { points.len() / ndim };

        let mut columns = vec![Vec::with_capacity(len); ndim];
        for row in points.chunks_exact(ndim.max(1)).take(len) {
            for (c, x) in columns.iter_mut().zip(row) {
                c.push(*x);
            }
        }

        SampleBatch {
            space,
            columns,
            len,
        }
    }

    /// The number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimensions(&self) -> usize {
        self.columns.len()
    }

    /// The dimension names, in column order.
    pub fn names(&self) -> &[SmartString] {
        self.space.names()
    }

    /// The values of the dimension called `name`.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.space
            .index_of(name)
            .map(|i| self.columns[i].as_slice())
    }

    /// The values of the dimension at position `index`.
    pub fn column_at(&self, index: usize) -> Option<&[f64]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// The coordinates of sample `index`.
    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.len {
            return None;
        }
        Some(self.columns.iter().map(|c| c[index]).collect())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        backend::SerialBackend, grid::HypercubeGrid, parameters::ParameterSpace,
        rng::MonteCarloRng,
    };

    use super::{BinSampler, SampleBatch};

    #[test]
    fn draws_stay_in_bins() {
        let mut grid = HypercubeGrid::new(&[[0., 1.], [-1., 1.]], 100);
        grid.repartition(4, &[0.1, -0.9, 0.8, 0.6], 100, &SerialBackend);

        let mut rng = MonteCarloRng::new(1);
        let points = BinSampler.draw(&grid, &mut rng, &SerialBackend);
        assert_eq!(points.len(), 2 * 100);

        // the first half is drawn from bin (0, 0), the second from bin (3, 3)
        for (i, p) in points.chunks_exact(2).enumerate() {
            if i < 50 {
                assert!((0. ..0.25).contains(&p[0]) && (-1. ..-0.5).contains(&p[1]));
            } else {
                assert!((0.75..=1.).contains(&p[0]) && (0.5..=1.).contains(&p[1]));
            }
        }

        let bins = grid.assign_bins(&points, &SerialBackend);
        assert_eq!(HypercubeGrid::unique_bins(bins, &SerialBackend), grid.occupied());
    }

    #[test]
    fn empty_quota() {
        let mut grid = HypercubeGrid::new(&[[0., 1.]], 100);
        grid.set_bin_count(10);
        let mut rng = MonteCarloRng::new(1);
        assert!(BinSampler.draw(&grid, &mut rng, &SerialBackend).is_empty());
    }

    #[test]
    fn reproducible() {
        let grid = HypercubeGrid::new(&[[0., 1.], [0., 1.]], 10);
        let a = BinSampler.draw(&grid, &mut MonteCarloRng::new(5), &SerialBackend);
        let b = BinSampler.draw(&grid, &mut MonteCarloRng::new(5), &SerialBackend);
        assert_eq!(a, b);
    }

    #[test]
    fn named_columns() {
        let mut space = ParameterSpace::new();
        space.add_parameter("m1", None, 0., 10.).unwrap();
        space.add_parameter("m2", None, 0., 10.).unwrap();

        let batch = SampleBatch::from_rows(&space, &[1., 2., 3., 4., 5., 6.]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.column("m2"), Some(&[2., 4., 6.][..]));
        assert_eq!(batch.column_at(0), Some(&[1., 3., 5.][..]));
        assert_eq!(batch.column_at(2), None);
        assert_eq!(batch.column("q"), None);
        assert_eq!(batch.row(1), Some(vec![3., 4.]));
        assert_eq!(batch.row(3), None);
    }
}
