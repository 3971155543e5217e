//! Iteration over the spectra and planes of a cube, and parallel mapping.
//!
//! Iterators borrow the cube and hand out owned copies, so a sequence can be
//! restarted by cloning the iterator or asking the cube for a new one.
//! Parallel mapping runs a per-slice function on a rayon pool and reassembles
//! the results by position:
//!
//! ```rust,ignore
//! let continuum: Image = cube.map_spectra(
//!     |sp| sp.median().map(|m| m.unwrap_or(0.0)),
//!     &MapOptions::default(),
//! )?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array1, Array2, Array3, s};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::config::ProcessingConfig;
use crate::data::{Cube, Image, MaskedArray, Spectrum};
use crate::error::{DataError, Result};

/// Progress callback: `(finished, total)`.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Worker pool settings for [`Cube::map_spectra`] and [`Cube::map_images`].
#[derive(Clone, Default)]
pub struct MapOptions {
    /// Number of workers (default: available CPUs minus one)
    pub workers: Option<usize>,
    /// Called after every finished slice
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOptions")
            .field("workers", &self.workers)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl MapOptions {
    /// Options sized from a processing configuration. Progress is logged
    /// when the configuration asks for it.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            workers: Some(config.worker_count()),
            progress: config.progress.then(log_progress),
        }
    }

    /// Use `n` workers.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    /// Report progress to `callback`.
    pub fn with_progress(mut self, callback: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => ProcessingConfig::new().worker_count(),
        }
    }
}

/// Progress callback that logs every tenth of the work.
fn log_progress() -> ProgressFn {
    Arc::new(|finished, total| {
        let step = (total / 10).max(1);
        if finished % step == 0 || finished == total {
            log::info!("{}/{} slices processed", finished, total);
        }
    })
}

/// Marks a mapping result that is collected as-is, keyed by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Positional<T>(pub T);

/// Results of a per-spectrum function that can be reassembled.
pub trait SpectrumMapOutput: Sized + Send {
    /// Reassembled result
    type Output;

    /// Combine results sorted by spaxel `(p, q)`.
    fn assemble(cube: &Cube, results: Vec<((usize, usize), Self)>) -> Result<Self::Output>;
}

/// Results of a per-plane function that can be reassembled.
pub trait ImageMapOutput: Sized + Send {
    /// Reassembled result
    type Output;

    /// Combine results sorted by plane index.
    fn assemble(cube: &Cube, results: Vec<(usize, Self)>) -> Result<Self::Output>;
}

impl SpectrumMapOutput for Spectrum {
    type Output = Cube;

    fn assemble(cube: &Cube, results: Vec<((usize, usize), Self)>) -> Result<Cube> {
        let (ny, nx) = cube.spatial_shape();
        let first = results
            .first()
            .map(|(_, sp)| sp)
            .ok_or_else(|| DataError::empty_selection("no spectrum to assemble"))?;
        let n = first.len();
        let wave = first.wave().cloned();
        let unit = first.unit().cloned();
        let with_var = results.iter().all(|(_, sp)| sp.has_var().unwrap_or(false));

        let mut values = Array3::zeros((n, ny, nx));
        let mut mask = Array3::from_elem((n, ny, nx), true);
        let mut var = with_var.then(|| Array3::zeros((n, ny, nx)));
        for ((p, q), sp) in &results {
            if sp.len() != n {
                return Err(DataError::shape_mismatch(
                    format!("spectrum [:,{},{}]", p, q),
                    &[n],
                    sp.shape(),
                ));
            }
            let data = sp.data()?;
            values.slice_mut(s![.., *p, *q]).assign(data.data());
            mask.slice_mut(s![.., *p, *q]).assign(data.mask());
            if let (Some(var), Some(v)) = (var.as_mut(), sp.var()?) {
                var.slice_mut(s![.., *p, *q]).assign(v);
            }
        }
        let mut out = cube.derive(MaskedArray::new(values, mask)?, var, cube.wcs().cloned(), wave)?;
        out.set_unit(unit);
        Ok(out)
    }
}

impl SpectrumMapOutput for f64 {
    type Output = Image;

    fn assemble(cube: &Cube, results: Vec<((usize, usize), Self)>) -> Result<Image> {
        let mut values = Array2::from_elem(cube.spatial_shape(), f64::NAN);
        for ((p, q), v) in results {
            values[[p, q]] = v;
        }
        cube.derive(MaskedArray::from_data(values), None, cube.wcs().cloned(), None)
    }
}

impl<T: Send> SpectrumMapOutput for Positional<T> {
    type Output = BTreeMap<(usize, usize), T>;

    fn assemble(_cube: &Cube, results: Vec<((usize, usize), Self)>) -> Result<Self::Output> {
        Ok(results.into_iter().map(|(pos, Positional(v))| (pos, v)).collect())
    }
}

impl ImageMapOutput for Image {
    type Output = Cube;

    fn assemble(cube: &Cube, results: Vec<(usize, Self)>) -> Result<Cube> {
        let first = results
            .first()
            .map(|(_, ima)| ima)
            .ok_or_else(|| DataError::empty_selection("no image to assemble"))?;
        let (ny, nx) = (first.shape()[0], first.shape()[1]);
        let wcs = first.wcs().cloned();
        let unit = first.unit().cloned();
        let with_var = results.iter().all(|(_, ima)| ima.has_var().unwrap_or(false));

        let n = cube.n_planes();
        let mut values = Array3::zeros((n, ny, nx));
        let mut mask = Array3::from_elem((n, ny, nx), true);
        let mut var = with_var.then(|| Array3::zeros((n, ny, nx)));
        for (k, ima) in &results {
            if ima.shape() != &[ny, nx] {
                return Err(DataError::shape_mismatch(
                    format!("image [{},:,:]", k),
                    &[ny, nx],
                    ima.shape(),
                ));
            }
            let data = ima.data()?;
            values.slice_mut(s![*k, .., ..]).assign(data.data());
            mask.slice_mut(s![*k, .., ..]).assign(data.mask());
            if let (Some(var), Some(v)) = (var.as_mut(), ima.var()?) {
                var.slice_mut(s![*k, .., ..]).assign(v);
            }
        }
        let mut out = cube.derive(MaskedArray::new(values, mask)?, var, wcs, cube.wave().cloned())?;
        out.set_unit(unit);
        Ok(out)
    }
}

impl ImageMapOutput for f64 {
    type Output = Spectrum;

    fn assemble(cube: &Cube, results: Vec<(usize, Self)>) -> Result<Spectrum> {
        let mut values = Array1::from_elem(cube.n_planes(), f64::NAN);
        for (k, v) in results {
            values[k] = v;
        }
        cube.derive(MaskedArray::from_data(values), None, None, cube.wave().cloned())
    }
}

impl<T: Send> ImageMapOutput for Positional<T> {
    type Output = BTreeMap<usize, T>;

    fn assemble(_cube: &Cube, results: Vec<(usize, Self)>) -> Result<Self::Output> {
        Ok(results.into_iter().map(|(k, Positional(v))| (k, v)).collect())
    }
}

/// Spectra of a cube with their spaxel `(p, q)`, in row-major order.
#[derive(Debug, Clone)]
pub struct SpectrumIter<'a> {
    cube: &'a Cube,
    next: usize,
}

impl Iterator for SpectrumIter<'_> {
    type Item = Result<(Spectrum, (usize, usize))>;

    fn next(&mut self) -> Option<Self::Item> {
        let (ny, nx) = self.cube.spatial_shape();
        if self.next >= ny * nx {
            return None;
        }
        let (p, q) = (self.next / nx, self.next % nx);
        self.next += 1;
        Some(self.cube.spectrum(p, q).map(|sp| (sp, (p, q))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (ny, nx) = self.cube.spatial_shape();
        let left = (ny * nx).saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for SpectrumIter<'_> {}

/// Wavelength planes of a cube with their index.
#[derive(Debug, Clone)]
pub struct ImageIter<'a> {
    cube: &'a Cube,
    next: usize,
}

impl Iterator for ImageIter<'_> {
    type Item = Result<(Image, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.cube.n_planes() {
            return None;
        }
        let k = self.next;
        self.next += 1;
        Some(self.cube.plane(k).map(|ima| (ima, k)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cube.n_planes().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for ImageIter<'_> {}

/// Run `f` on every task, keyed by position. Every task runs to completion;
/// the first failure in position order is returned.
fn run_parallel<K, T, R, E>(
    tasks: Vec<K>,
    options: &MapOptions,
    make: impl Fn(K) -> Result<T> + Sync,
    f: impl Fn(T) -> std::result::Result<R, E> + Sync,
    describe: impl Fn(&K) -> String + Sync,
) -> Result<Vec<(K, R)>>
where
    K: Copy + Ord + Send + Sync,
    R: Send,
    E: fmt::Display,
{
    let total = tasks.len();
    let workers = options.worker_count();
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| DataError::invalid_argument(format!("cannot build worker pool: {}", e)))?;
    log::debug!("Mapping over {} slices with {} workers", total, workers);

    let finished = AtomicUsize::new(0);
    let outcomes: Vec<(K, Result<R>)> = pool.install(|| {
        tasks
            .into_par_iter()
            .map(|key| {
                let outcome = make(key).and_then(|input| {
                    f(input).map_err(|e| DataError::Worker {
                        position: describe(&key),
                        message: e.to_string(),
                    })
                });
                let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(progress) = &options.progress {
                    progress(done, total);
                }
                (key, outcome)
            })
            .collect()
    });

    let mut results = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (key, outcome) in outcomes {
        match outcome {
            Ok(r) => results.push((key, r)),
            Err(e) => failures.push((key, e)),
        }
    }
    failures.sort_by_key(|(key, _)| *key);
    if let Some((_, first)) = failures.into_iter().next() {
        log::warn!("Parallel mapping failed: {}", first);
        return Err(first);
    }
    results.sort_by_key(|(key, _)| *key);
    Ok(results)
}

impl Cube {
    /// Iterate over every spectrum with its spaxel `(p, q)`.
    pub fn iter_spectra(&self) -> SpectrumIter<'_> {
        SpectrumIter { cube: self, next: 0 }
    }

    /// Iterate over every wavelength plane with its index.
    pub fn iter_planes(&self) -> ImageIter<'_> {
        ImageIter { cube: self, next: 0 }
    }

    /// Apply `f` to every spectrum in parallel.
    ///
    /// Spectra returned by `f` are reassembled into a cube, numbers into an
    /// image and [`Positional`] values into a map keyed by spaxel. A failure is
    /// reported with the position of the offending spectrum.
    pub fn map_spectra<F, R, E>(&self, f: F, options: &MapOptions) -> Result<R::Output>
    where
        F: Fn(Spectrum) -> std::result::Result<R, E> + Sync,
        R: SpectrumMapOutput,
        E: fmt::Display,
    {
        self.data()?;
        self.var()?;
        let (ny, nx) = self.spatial_shape();
        let tasks: Vec<(usize, usize)> = (0..ny).flat_map(|p| (0..nx).map(move |q| (p, q))).collect();
        let results = run_parallel(
            tasks,
            options,
            |(p, q)| self.spectrum(p, q),
            f,
            |(p, q)| format!("spectrum [:,{},{}]", p, q),
        )?;
        R::assemble(self, results)
    }

    /// Apply `f` to every wavelength plane in parallel.
    ///
    /// Images returned by `f` are stacked into a cube, numbers form a
    /// spectrum and [`Positional`] values a map keyed by plane index.
    pub fn map_images<F, R, E>(&self, f: F, options: &MapOptions) -> Result<R::Output>
    where
        F: Fn(Image) -> std::result::Result<R, E> + Sync,
        R: ImageMapOutput,
        E: fmt::Display,
    {
        self.data()?;
        self.var()?;
        let tasks: Vec<usize> = (0..self.n_planes()).collect();
        let results = run_parallel(
            tasks,
            options,
            |k| self.plane(k),
            f,
            |k| format!("image [{},:,:]", k),
        )?;
        R::assemble(self, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{WaveCoord, Wcs};
    use crate::data::Reduction;

    fn ramp() -> Cube {
        Cube::new(Array3::from_shape_fn((4, 3, 2), |(k, j, i)| (k * 100 + j * 10 + i) as f64))
            .with_var(Array3::from_elem((4, 3, 2), 1.0))
            .unwrap()
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0]))
    }

    #[test]
    fn test_iterators_are_restartable() {
        let cube = ramp();
        let spectra = cube.iter_spectra();
        assert_eq!(spectra.len(), 6);
        let positions: Vec<(usize, usize)> = spectra.clone().map(|r| r.unwrap().1).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]);
        let (sp, _) = spectra.skip(3).next().unwrap().unwrap();
        assert_eq!(sp.data().unwrap().data().to_vec(), vec![11.0, 111.0, 211.0, 311.0]);

        let planes: Vec<usize> = cube.iter_planes().map(|r| r.unwrap().1).collect();
        assert_eq!(planes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_map_spectra_to_cube() {
        let cube = ramp();
        let doubled: Cube = cube
            .map_spectra(|sp| &sp * 2.0, &MapOptions::default().with_workers(2))
            .unwrap();
        assert_eq!(doubled.shape(), cube.shape());
        assert_eq!(doubled.element(&[3, 2, 1]).unwrap().value, 2.0 * 321.0);
        assert_eq!(doubled.element(&[3, 2, 1]).unwrap().var, Some(4.0));
        assert!(doubled.wcs().unwrap().is_equal(cube.wcs().unwrap(), 1e-12));
    }

    #[test]
    fn test_map_spectra_to_image_and_positional() {
        let cube = ramp();
        let sums: Image = cube
            .map_spectra(
                |sp| sp.sum().map(|s| s.unwrap_or(f64::NAN)),
                &MapOptions::default(),
            )
            .unwrap();
        let reference = cube.collapse_wave(Reduction::Sum).unwrap();
        assert_eq!(sums.data().unwrap().data(), reference.data().unwrap().data());

        let lengths = cube
            .map_spectra(
                |sp| Ok::<_, String>(Positional(sp.len())),
                &MapOptions::default(),
            )
            .unwrap();
        assert_eq!(lengths.len(), 6);
        assert_eq!(lengths[&(2, 1)], 4);
    }

    #[test]
    fn test_map_images() {
        let cube = ramp();
        let means: Spectrum = cube
            .map_images(|ima| ima.mean().map(|m| m.unwrap_or(f64::NAN)), &MapOptions::default())
            .unwrap();
        assert_eq!(means.len(), 4);
        assert!((means.element(&[2]).unwrap().value - 210.5).abs() < 1e-12);
        assert_eq!(means.get_start().unwrap(), 1.0);

        let shifted: Cube = cube
            .map_images(|ima| &ima + 1.0, &MapOptions::default())
            .unwrap();
        assert_eq!(shifted.element(&[1, 0, 0]).unwrap().value, 101.0);
        assert!(shifted.wave().is_some());
    }

    #[test]
    fn test_worker_failure_reports_position() {
        let cube = ramp();
        let err = cube
            .map_spectra(
                |sp| {
                    if sp.element(&[0]).unwrap().value == 21.0 {
                        Err("bad spaxel".to_string())
                    } else {
                        Ok(0.0)
                    }
                },
                &MapOptions::default(),
            )
            .unwrap_err();
        match &err {
            DataError::Worker { position, message } => {
                assert_eq!(position, "spectrum [:,2,1]");
                assert_eq!(message, "bad spaxel");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().contains("The error occurred for the spectrum [:,2,1]"));
    }

    #[test]
    fn test_progress_callback() {
        let cube = ramp();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let options = MapOptions::default().with_progress(move |_, total| {
            assert_eq!(total, 4);
            seen.fetch_add(1, Ordering::Relaxed);
        });
        let _: Spectrum = cube
            .map_images(|ima| ima.sum().map(|s| s.unwrap_or(0.0)), &options)
            .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }
}
