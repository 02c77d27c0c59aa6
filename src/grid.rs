use smallvec::{smallvec, SmallVec};

use crate::backend::ArrayBackend;

/// The integer coordinates of a hypercube bin, one entry per dimension.
pub type BinIndex = SmallVec<[usize; 4]>;

/// The largest number of bins in a single dimension. Larger counts would make the
/// bin widths indistinguishable from rounding noise.
pub const MAX_BINS_PER_DIMENSION: usize = u32::MAX as usize;

/// A uniform hypercube lattice over the original integration domain.
///
/// The lattice itself never moves: the live volume shrinks by making the bins smaller and
/// only keeping the bins that contain live samples. Every bin that is kept receives the
/// same number of samples, see [`HypercubeGrid::quota`].
#[derive(Debug, Clone)]
pub struct HypercubeGrid {
    lower: Vec<f64>,
    upper: Vec<f64>,
    domain_widths: Vec<f64>,
    bin_counts: Vec<usize>,
    bin_widths: Vec<f64>,
    occupied: Vec<BinIndex>,
    samples_per_bin: usize,
}

impl HypercubeGrid {
    /// Create a grid with a single bin that spans the domain given by `bounds`,
    /// which receives all `n_target` samples.
    pub fn new(bounds: &[[f64; 2]], n_target: usize) -> HypercubeGrid {
        let lower: Vec<_> = bounds.iter().map(|b| b[0]).collect();
        let upper: Vec<_> = bounds.iter().map(|b| b[1]).collect();
        let domain_widths: Vec<_> = bounds.iter().map(|b| b[1] - b[0]).collect();

        HypercubeGrid {
            bin_widths: domain_widths.clone(),
            bin_counts: vec![1; bounds.len()],
            occupied: vec![smallvec![0; bounds.len()]],
            samples_per_bin: n_target,
            lower,
            upper,
            domain_widths,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.lower.len()
    }

    /// The lower corner of the domain.
    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    /// The upper corner of the domain.
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// The widths of the original domain. They do not change when the grid is refined.
    pub fn domain_widths(&self) -> &[f64] {
        &self.domain_widths
    }

    pub fn bin_counts(&self) -> &[usize] {
        &self.bin_counts
    }

    pub fn bin_widths(&self) -> &[f64] {
        &self.bin_widths
    }

    /// The bins that contained at least one live sample when the grid was last partitioned.
    pub fn occupied(&self) -> &[BinIndex] {
        &self.occupied
    }

    /// The number of samples drawn from every occupied bin.
    pub fn samples_per_bin(&self) -> usize {
        self.samples_per_bin
    }

    /// The number of points a draw from this partition produces.
    pub fn batch_size(&self) -> usize {
        self.occupied.len() * self.samples_per_bin
    }

    /// Returns `true` if the partition is the single bin that covers the whole domain.
    pub fn is_whole_domain(&self) -> bool {
        self.bin_counts.iter().all(|c| *c == 1)
    }

    /// The mean number of bins per dimension.
    pub fn mean_bin_count(&self) -> f64 {
        if self.bin_counts.is_empty() {
            return 0.;
        }
        self.bin_counts.iter().map(|c| *c as f64).sum::<f64>() / self.bin_counts.len() as f64
    }

    /// The number of bins per dimension for which a single bin has the volume fraction
    /// `bin_volume`, rounded to the nearest integer and at least 1.
    pub fn bin_count_for_volume(bin_volume: f64, dimensions: usize) -> usize {
        if dimensions == 0 {
            return 1;
        }

        let c = (1. / bin_volume).powf(1. / dimensions as f64).round();
        if c.is_nan() || c < 1. {
            1
        } else if c >= MAX_BINS_PER_DIMENSION as f64 {
            MAX_BINS_PER_DIMENSION
        } else {
            c as usize
        }
    }

    /// The number of samples every bin gets when `n_target` samples are spread
    /// over `n_unique_bins` bins. The result is rounded up so that at least `n_target`
    /// samples are drawn.
    pub fn quota(n_target: usize, n_unique_bins: usize) -> usize {
        if n_unique_bins == 0 {
            0
        } else {
            n_target.div_ceil(n_unique_bins)
        }
    }

    /// Use `count` bins in every dimension. The occupied bins are reset to
    /// the empty set until [`HypercubeGrid::occupy`] is called.
    pub fn set_bin_count(&mut self, count: usize) {
        let count = count.clamp(1, MAX_BINS_PER_DIMENSION);
        for ((c, w), dw) in self
            .bin_counts
            .iter_mut()
            .zip(&mut self.bin_widths)
            .zip(&self.domain_widths)
        {
            *c = count;
            *w = dw / count as f64;
        }
        self.occupied.clear();
        self.samples_per_bin = 0;
    }

    /// Map a single point to its bin. Points on the lower edge of the domain land in
    /// bin 0 and points that rounding pushes past the last bin are clamped to it.
    #[inline]
    pub fn bin_of(&self, point: &[f64]) -> BinIndex {
        point
            .iter()
            .zip(&self.lower)
            .zip(&self.bin_widths)
            .zip(&self.bin_counts)
            .map(|(((x, l), w), c)| {
                let v = ((x - l) / w).floor();
                if v > 0. {
                    // NaN and negative values compare false and end up in bin 0
                    (v as usize).min(c - 1)
                } else {
                    0
                }
            })
            .collect()
    }

    /// Map every point of the row-major `points` to its bin.
    pub fn assign_bins(&self, points: &[f64], backend: &dyn ArrayBackend) -> Vec<BinIndex> {
        backend.assign_bins(self, points)
    }

    /// The distinct bins in `bins`, in lexicographic order.
    pub fn unique_bins(bins: Vec<BinIndex>, backend: &dyn ArrayBackend) -> Vec<BinIndex> {
        backend.unique_rows(bins)
    }

    /// Mark the bins that contain the row-major `points` as occupied and spread `n_target`
    /// samples over them.
    pub fn occupy(&mut self, points: &[f64], n_target: usize, backend: &dyn ArrayBackend) {
        let bins = self.assign_bins(points, backend);
        self.occupied = Self::unique_bins(bins, backend);
        self.samples_per_bin = Self::quota(n_target, self.occupied.len());
    }

    /// Refine the grid to `count` bins per dimension and occupy the bins of `points`.
    pub fn repartition(
        &mut self,
        count: usize,
        points: &[f64],
        n_target: usize,
        backend: &dyn ArrayBackend,
    ) {
        self.set_bin_count(count);
        self.occupy(points, n_target, backend);
    }

    /// The lower corner of `bin`.
    pub fn bin_lower<'a>(&'a self, bin: &'a BinIndex) -> impl Iterator<Item = f64> + 'a {
        self.lower
            .iter()
            .zip(&self.bin_widths)
            .zip(bin)
            .map(|((l, w), i)| l + w * *i as f64)
    }
}

#[cfg(test)]
mod test {
    use crate::backend::SerialBackend;

    use super::{BinIndex, HypercubeGrid};

    fn bin(i: &[usize]) -> BinIndex {
        BinIndex::from_slice(i)
    }

    #[test]
    fn single_bin() {
        let grid = HypercubeGrid::new(&[[0., 1.], [-2., 2.]], 1000);
        assert!(grid.is_whole_domain());
        assert_eq!(grid.occupied(), &[bin(&[0, 0])]);
        assert_eq!(grid.batch_size(), 1000);
        assert_eq!(grid.bin_widths(), &[1., 4.]);
    }

    #[test]
    fn bin_assignment_in_range() {
        let mut grid = HypercubeGrid::new(&[[0., 1.], [-2., 2.]], 1000);
        grid.set_bin_count(3);

        let points = [
            0., -2., // lower edge
            1., 2., // upper edge
            0.5, 0., // interior
            1. - 1e-17, 2. - 1e-16, // rounding
            f64::NAN, -3., // malformed
        ];

        let bins = grid.assign_bins(&points, &SerialBackend);
        assert_eq!(
            bins,
            vec![
                bin(&[0, 0]),
                bin(&[2, 2]),
                bin(&[1, 1]),
                bin(&[2, 2]),
                bin(&[0, 0]),
            ]
        );
        for b in &bins {
            for (i, c) in b.iter().zip(grid.bin_counts()) {
                assert!(i < c);
            }
        }
    }

    #[test]
    fn unique_and_quota() {
        let mut grid = HypercubeGrid::new(&[[0., 1.], [0., 1.]], 100);
        grid.repartition(4, &[0.1, 0.1, 0.9, 0.9, 0.12, 0.13, 0.6, 0.1], 100, &SerialBackend);

        assert_eq!(
            grid.occupied(),
            &[
                bin(&[0, 0]),
                bin(&[2, 0]),
                bin(&[3, 3])
            ]
        );
        assert_eq!(grid.samples_per_bin(), 34);
        assert!(grid.batch_size() >= 100);
        assert!(!grid.is_whole_domain());

        assert_eq!(HypercubeGrid::quota(100, 4), 25);
        assert_eq!(HypercubeGrid::quota(10, 0), 0);
    }

    #[test]
    fn bin_count_from_volume() {
        assert_eq!(HypercubeGrid::bin_count_for_volume(0.01, 2), 10);
        assert_eq!(HypercubeGrid::bin_count_for_volume(1. / 30., 1), 30);
        assert_eq!(HypercubeGrid::bin_count_for_volume(2., 3), 1);
        assert_eq!(
            HypercubeGrid::bin_count_for_volume(0., 1),
            super::MAX_BINS_PER_DIMENSION
        );
        assert_eq!(HypercubeGrid::bin_count_for_volume(f64::NAN, 1), 1);
        assert_eq!(
            HypercubeGrid::bin_count_for_volume(1e-300, 2),
            super::MAX_BINS_PER_DIMENSION
        );
        assert_eq!(super::MAX_BINS_PER_DIMENSION as u64, u32::MAX as u64);
    }

    #[test]
    fn bin_corners() {
        let mut grid = HypercubeGrid::new(&[[1., 3.], [0., 10.]], 10);
        grid.set_bin_count(2);
        let b = bin(&[1, 0]);
        assert_eq!(grid.bin_lower(&b).collect::<Vec<_>>(), vec![2., 0.]);
    }
}
