//! The "SPACE" Engine - Dwell-time heatmaps over a horizontal plane
//!
//! Turns a position stream into a 2D grid of seconds spent per cell, then
//! smooths it with an unnormalized Gaussian kernel:
//! - Raw grid: cumulative dwell time (seconds)
//! - Gaussian grid: every dwell splatted through the kernel
//! - Normalized grid: either of the above clamped to a `[min, max]` window

use crate::codec::{Dialect, Field, TableWriter};
use crate::config::{ensure_dir, EchoConfig};
use crate::dataset::RecordTrace;
use crate::error::{EchoError, Result};
use crate::naming::stamp;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Header of an exported heatmap.
pub const HEATMAP_CSV_HEADER: [&str; 4] = ["gridX", "gridY", "Value (s)", "Normalized value"];

/// Folder under the root holding exported heatmaps.
pub const HEATMAPS_FOLDER: &str = "Heatmaps";

// ============================================================================
// KERNEL
// ============================================================================

/// Radially symmetric kernel, `exp(-d² / 2σ²) / σ` inside `round(3σ)`.
///
/// The kernel does not sum to 1: callers normalize the output grid, so the
/// magnitude of a smoothed grid still reads as (scaled) seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    /// Standard deviation (cells)
    pub sigma: f32,

    /// Cells on each side of the center
    pub radius: usize,

    /// `diameter * diameter` coefficients, row-major by `dy`
    coefficients: Vec<f32>,
}

impl GaussianKernel {
    /// Precomputes the coefficients for `sigma`.
    pub fn new(sigma: f32) -> Result<Self> {
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(EchoError::InvalidConfig(format!("gaussian sigma must be positive, got {sigma}")));
        }

        let radius = (3.0 * sigma).round_ties_even() as usize;
        let diameter = 2 * radius + 1;
        let r = radius as i64;
        let mut coefficients = vec![0.0; diameter * diameter];

        for dy in -r..=r {
            for dx in -r..=r {
                let dist = dx * dx + dy * dy;
                if dist > r * r {
                    continue;
                }
                let index = ((dy + r) as usize) * diameter + (dx + r) as usize;
                coefficients[index] = (-(dist as f32) / (2.0 * sigma * sigma)).exp() / sigma;
            }
        }

        Ok(Self {
            sigma,
            radius,
            coefficients,
        })
    }

    pub fn diameter(&self) -> usize {
        2 * self.radius + 1
    }

    /// Coefficient at offset `(dx, dy)` from the center; 0 outside the disc.
    pub fn coefficient(&self, dx: i64, dy: i64) -> f32 {
        let r = self.radius as i64;
        if dx.abs() > r || dy.abs() > r {
            return 0.0;
        }
        self.coefficients[((dy + r) as usize) * self.diameter() + (dx + r) as usize]
    }

    /// Adds `value * kernel` centered on cell `(x, y)`, clipped to the grid.
    pub fn splat(&self, grid: &mut HeatmapGrid, x: usize, y: usize, value: f32) {
        let r = self.radius as i64;
        for dy in -r..=r {
            for dx in -r..=r {
                let (tx, ty) = (x as i64 + dx, y as i64 + dy);
                if tx < 0 || ty < 0 || tx >= grid.width as i64 || ty >= grid.height as i64 {
                    continue;
                }
                grid.add(tx as usize, ty as usize, value * self.coefficient(dx, dy));
            }
        }
    }

    /// Convolves a whole grid.
    pub fn apply(&self, grid: &HeatmapGrid) -> HeatmapGrid {
        let mut out = HeatmapGrid::new(grid.width, grid.height);
        for y in 0..grid.height {
            for x in 0..grid.width {
                let value = grid.get(x, y);
                if value != 0.0 {
                    self.splat(&mut out, x, y, value);
                }
            }
        }
        out
    }
}

// ============================================================================
// GRID
// ============================================================================

/// Row-major 2D grid of `f32` cells (`y` rows of `x` cells).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGrid {
    pub width: usize,
    pub height: usize,
    cells: Vec<f32>,
}

impl HeatmapGrid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![0.0; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.cells[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.cells[y * self.width + x] = value;
    }

    pub fn add(&mut self, x: usize, y: usize, value: f32) {
        self.cells[y * self.width + x] += value;
    }

    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn same_shape(&self, other: &HeatmapGrid) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Largest cell, 0 for an empty grid.
    pub fn max(&self) -> f32 {
        self.cells.iter().copied().fold(0.0, f32::max)
    }

    pub fn sum(&self) -> f32 {
        self.cells.iter().sum()
    }

    /// `clamp((cell - min) / (max - min), 0, 1)` for every cell.
    ///
    /// A degenerate window (`max <= min`) maps cells above `min` to 1 and the
    /// rest to 0.
    pub fn normalize(&self, min: f32, max: f32) -> HeatmapGrid {
        let span = max - min;
        let cells = self
            .cells
            .iter()
            .map(|v| {
                if span > 0.0 {
                    ((v - min) / span).clamp(0.0, 1.0)
                } else if *v > min {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();

        HeatmapGrid {
            width: self.width,
            height: self.height,
            cells,
        }
    }

    /// Normalizes over `[0, max]`.
    pub fn normalize_to_max(&self) -> HeatmapGrid {
        self.normalize(0.0, self.max())
    }

    /// Cell-wise sum. Both grids must have the same shape.
    pub fn accumulate(&mut self, other: &HeatmapGrid) {
        debug_assert!(self.same_shape(other));
        for (a, b) in self.cells.iter_mut().zip(&other.cells) {
            *a += b;
        }
    }

    fn scale(&mut self, factor: f32) {
        for v in &mut self.cells {
            *v *= factor;
        }
    }
}

// ============================================================================
// PLANE
// ============================================================================

/// Rectangle on the horizontal (x, z) plane the heatmap covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneBounds {
    /// Minimum corner (y ignored)
    pub origin: Vector3<f32>,

    /// Extent along x and z (y ignored)
    pub size: Vector3<f32>,
}

impl PlaneBounds {
    pub fn new(origin: Vector3<f32>, size: Vector3<f32>) -> Self {
        Self { origin, size }
    }

    /// Smallest rectangle holding every point, grown by `margin` on each side.
    pub fn around<'a>(points: impl IntoIterator<Item = &'a Vector3<f32>>, margin: f32) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (mut min, mut max) = (*first, *first);
        for p in iter {
            min = min.inf(p);
            max = max.sup(p);
        }

        let margin = Vector3::new(margin, 0.0, margin);
        Some(Self::new(min - margin, max - min + margin * 2.0))
    }

    /// `floor(ppm * size.x) x floor(ppm * size.z)`
    pub fn grid_dims(&self, pixels_per_meter: f32) -> (usize, usize) {
        let width = (pixels_per_meter * self.size.x).floor().max(0.0) as usize;
        let height = (pixels_per_meter * self.size.z).floor().max(0.0) as usize;
        (width, height)
    }

    /// Cell holding `position`, `None` outside the plane.
    pub fn cell_of(&self, position: &Vector3<f32>, width: usize, height: usize) -> Option<(usize, usize)> {
        let fx = (position.x - self.origin.x) / self.size.x;
        let fz = (position.z - self.origin.z) / self.size.z;
        if !(0.0..1.0).contains(&fx) || !(0.0..1.0).contains(&fz) {
            return None;
        }

        let cell = |frac: f32, dim: usize| ((frac * dim as f32).ceil() as i64 - 1).clamp(0, dim as i64 - 1) as usize;
        (width > 0 && height > 0).then(|| (cell(fx, width), cell(fz, height)))
    }
}

// ============================================================================
// RASTERIZATION
// ============================================================================

/// Seconds spent at each sample: gap to the next sample, or to the end of
/// the recording for the last one.
fn dwell_times(trace: &RecordTrace) -> impl Iterator<Item = (&Vector3<f32>, f32)> + '_ {
    let n = trace.timestamps.len();
    trace.positions.iter().enumerate().map(move |(i, p)| {
        let until = if i + 1 < n { trace.timestamps[i + 1] } else { trace.total_duration };
        (p, until - trace.timestamps[i])
    })
}

/// Dwell time per cell, in seconds.
pub fn rasterize_raw(trace: &RecordTrace, bounds: &PlaneBounds, pixels_per_meter: f32) -> HeatmapGrid {
    let (width, height) = bounds.grid_dims(pixels_per_meter);
    let mut grid = HeatmapGrid::new(width, height);

    for (position, duration) in dwell_times(trace) {
        if let Some((x, y)) = bounds.cell_of(position, width, height) {
            grid.add(x, y, duration);
        }
    }
    grid
}

/// Dwell times splatted through `kernel`, divided by the recording duration.
pub fn rasterize_gaussian(
    trace: &RecordTrace,
    bounds: &PlaneBounds,
    pixels_per_meter: f32,
    kernel: &GaussianKernel,
) -> HeatmapGrid {
    let (width, height) = bounds.grid_dims(pixels_per_meter);
    let mut grid = HeatmapGrid::new(width, height);

    for (position, duration) in dwell_times(trace) {
        if let Some((x, y)) = bounds.cell_of(position, width, height) {
            kernel.splat(&mut grid, x, y, duration);
        }
    }

    if trace.total_duration > 0.0 {
        grid.scale(1.0 / trace.total_duration);
    }
    grid
}

// ============================================================================
// ENGINE
// ============================================================================

/// Raw, smoothed and display grids of one heatmap computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub raw: HeatmapGrid,
    pub gaussian: HeatmapGrid,

    /// Gaussian grid under the display window
    pub normalized: HeatmapGrid,

    /// Hottest raw cell in seconds; `None` for aggregates, where it has no meaning
    pub max_duration: Option<f32>,
}

/// Heatmap settings plus the plane they apply to.
#[derive(Debug, Clone)]
pub struct HeatmapEngine {
    pub bounds: PlaneBounds,
    pub pixels_per_meter: f32,
    pub kernel: GaussianKernel,
}

impl HeatmapEngine {
    /// # Arguments
    /// * `bounds` - Plane the grid covers
    /// * `pixels_per_meter` - Grid resolution
    /// * `sigma` - Standard deviation of the smoothing kernel, in cells
    pub fn new(bounds: PlaneBounds, pixels_per_meter: f32, sigma: f32) -> Result<Self> {
        if !(pixels_per_meter > 0.0) {
            return Err(EchoError::InvalidConfig("pixels per meter must be positive".into()));
        }
        Ok(Self {
            bounds,
            pixels_per_meter,
            kernel: GaussianKernel::new(sigma)?,
        })
    }

    pub fn grid_dims(&self) -> (usize, usize) {
        self.bounds.grid_dims(self.pixels_per_meter)
    }

    /// Heatmap of one recording, displayed over `[lower * max, upper * max]`
    /// of its gaussian grid.
    ///
    /// # Arguments
    /// * `lower`, `upper` - Display window as fractions of the hottest cell
    pub fn single(&self, trace: &RecordTrace, lower: f32, upper: f32) -> Heatmap {
        let raw = rasterize_raw(trace, &self.bounds, self.pixels_per_meter);
        let gaussian = rasterize_gaussian(trace, &self.bounds, self.pixels_per_meter, &self.kernel);

        let max_gaussian = gaussian.max();
        let normalized = gaussian.normalize(lower * max_gaussian, upper * max_gaussian);
        let max_duration = raw.max();

        debug!(
            "Heatmap {}x{} from {} samples, hottest cell {:.2}s",
            raw.width,
            raw.height,
            trace.len(),
            max_duration
        );

        Heatmap {
            raw,
            gaussian,
            normalized,
            max_duration: Some(max_duration),
        }
    }

    /// Sum of per-recording heatmaps, each normalized to `[0, 1]` first so
    /// no recording dominates by its length.
    ///
    /// Recordings with at most one sample are skipped.
    pub fn aggregate(&self, traces: &[RecordTrace]) -> Heatmap {
        let (width, height) = self.grid_dims();
        let mut raw = HeatmapGrid::new(width, height);
        let mut gaussian = HeatmapGrid::new(width, height);
        let mut used = 0;

        for trace in traces.iter().filter(|t| t.len() > 1) {
            raw.accumulate(&rasterize_raw(trace, &self.bounds, self.pixels_per_meter).normalize_to_max());
            gaussian.accumulate(
                &rasterize_gaussian(trace, &self.bounds, self.pixels_per_meter, &self.kernel).normalize_to_max(),
            );
            used += 1;
        }

        info!("Aggregated {} of {} recordings into a {}x{} heatmap", used, traces.len(), width, height);

        let normalized = gaussian.normalize_to_max();
        Heatmap {
            raw,
            gaussian,
            normalized,
            max_duration: None,
        }
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// Writes one row per cell: `gridX, gridY, Value (s), Normalized value`.
pub fn write_heatmap_csv(path: &Path, grid: &HeatmapGrid, normalized: &HeatmapGrid, dialect: Dialect) -> Result<()> {
    if !grid.same_shape(normalized) {
        return Err(EchoError::InvalidState("heatmap and normalized grid differ in shape"));
    }

    let mut writer = TableWriter::create(path, dialect)?;
    writer.write_header(&HEATMAP_CSV_HEADER)?;
    for y in 0..grid.height {
        for x in 0..grid.width {
            writer.write_line(&[
                Field::Int(x as i32),
                Field::Int(y as i32),
                Field::Float(grid.get(x, y)),
                Field::Float(normalized.get(x, y)),
            ])?;
        }
    }
    writer.close()
}

/// Exports the raw and gaussian grids to
/// `<root>/Heatmaps/<project>/<session>/position_heatmap_<stamp>_{raw,gaussian}.csv`.
pub fn export_heatmap(config: &EchoConfig, heatmap: &Heatmap, now: SystemTime) -> Result<(PathBuf, PathBuf)> {
    let folder = config
        .root
        .join(HEATMAPS_FOLDER)
        .join(&config.project)
        .join(&config.session);
    ensure_dir(&folder)?;

    let name = format!("position_heatmap_{}", stamp(now, &config.date_format));
    let raw_path = folder.join(format!("{name}_raw.csv"));
    let gaussian_path = folder.join(format!("{name}_gaussian.csv"));

    write_heatmap_csv(&raw_path, &heatmap.raw, &heatmap.raw.normalize_to_max(), config.dialect)?;
    write_heatmap_csv(&gaussian_path, &heatmap.gaussian, &heatmap.gaussian.normalize_to_max(), config.dialect)?;

    info!("Heatmap exported to {}", folder.display());
    Ok((raw_path, gaussian_path))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_table;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn trace(points: &[(f32, f32, f32)], total_duration: f32) -> RecordTrace {
        RecordTrace {
            positions: points.iter().map(|(x, z, _)| Vector3::new(*x, 1.7, *z)).collect(),
            timestamps: points.iter().map(|(_, _, t)| *t).collect(),
            total_duration,
        }
    }

    fn unit_plane() -> PlaneBounds {
        PlaneBounds::new(Vector3::zeros(), Vector3::new(1.0, 0.0, 1.0))
    }

    #[test]
    fn test_kernel_shape() {
        let kernel = GaussianKernel::new(1.0).unwrap();
        assert_eq!(kernel.radius, 3);
        assert_eq!(kernel.diameter(), 7);
        assert_relative_eq!(kernel.coefficient(0, 0), 1.0);
        assert_relative_eq!(kernel.coefficient(1, 0), (-0.5f32).exp());
        assert_eq!(kernel.coefficient(1, 0), kernel.coefficient(0, -1));
        // Corner of the square lies outside the disc
        assert_eq!(kernel.coefficient(3, 3), 0.0);
        assert_eq!(kernel.coefficient(4, 0), 0.0);
    }

    #[test]
    fn test_kernel_is_not_normalized() {
        let kernel = GaussianKernel::new(2.0).unwrap();
        assert_eq!(kernel.radius, 6);
        assert_relative_eq!(kernel.coefficient(0, 0), 0.5);
    }

    #[test]
    fn test_kernel_radius_rounds_half_to_even() {
        assert_eq!(GaussianKernel::new(0.5).unwrap().radius, 2);
        assert_eq!(GaussianKernel::new(2.5).unwrap().radius, 8);
        assert!(GaussianKernel::new(0.0).is_err());
    }

    #[test]
    fn test_grid_dims_floor() {
        let bounds = PlaneBounds::new(Vector3::zeros(), Vector3::new(2.55, 0.0, 1.0));
        assert_eq!(bounds.grid_dims(10.0), (25, 10));
    }

    #[test]
    fn test_raw_dwell_accumulates() {
        let bounds = unit_plane();
        let t = trace(&[(0.05, 0.05, 0.0), (0.95, 0.95, 1.0), (0.05, 0.05, 3.0)], 4.5);
        let grid = rasterize_raw(&t, &bounds, 10.0);

        assert_eq!((grid.width, grid.height), (10, 10));
        assert_relative_eq!(grid.get(0, 0), 1.0 + 1.5);
        assert_relative_eq!(grid.get(9, 9), 2.0);
        assert_relative_eq!(grid.sum(), 4.5);
    }

    #[test]
    fn test_outside_samples_are_dropped() {
        let bounds = unit_plane();
        let t = trace(&[(-0.1, 0.5, 0.0), (0.5, 1.0, 1.0), (0.5, 0.5, 2.0)], 3.0);
        let grid = rasterize_raw(&t, &bounds, 10.0);
        assert_relative_eq!(grid.sum(), 1.0);
        // Origin maps to the first cell
        assert_eq!(bounds.cell_of(&Vector3::zeros(), 10, 10), Some((0, 0)));
    }

    #[test]
    fn test_gaussian_divided_by_duration() {
        let bounds = unit_plane();
        let kernel = GaussianKernel::new(1.0).unwrap();
        let t = trace(&[(0.55, 0.55, 0.0)], 2.0);
        let grid = rasterize_gaussian(&t, &bounds, 10.0, &kernel);

        assert!(grid.same_shape(&rasterize_raw(&t, &bounds, 10.0)));
        assert_relative_eq!(grid.get(5, 5), 1.0);
        assert_relative_eq!(grid.get(6, 5), (-0.5f32).exp());
    }

    #[test]
    fn test_apply_matches_splat() {
        let bounds = unit_plane();
        let kernel = GaussianKernel::new(1.0).unwrap();
        let t = trace(&[(0.15, 0.25, 0.0), (0.75, 0.45, 1.0)], 3.0);

        let mut splatted = kernel.apply(&rasterize_raw(&t, &bounds, 10.0));
        splatted.scale(1.0 / 3.0);
        let direct = rasterize_gaussian(&t, &bounds, 10.0, &kernel);

        for (a, b) in splatted.cells().iter().zip(direct.cells()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_single_window() {
        let engine = HeatmapEngine::new(unit_plane(), 10.0, 1.0).unwrap();
        let t = trace(&[(0.55, 0.55, 0.0), (0.15, 0.15, 3.0)], 4.0);
        let heatmap = engine.single(&t, 0.5, 1.0);

        assert_eq!(heatmap.max_duration, Some(3.0));
        assert_eq!(heatmap.normalized.get(5, 5), 1.0);
        // Far from both samples: below the window
        assert_eq!(heatmap.normalized.get(9, 0), 0.0);
    }

    #[test]
    fn test_aggregate_balances_recordings() {
        let engine = HeatmapEngine::new(unit_plane(), 10.0, 0.5).unwrap();
        let long = trace(&[(0.15, 0.15, 0.0), (0.16, 0.16, 100.0)], 200.0);
        let short = trace(&[(0.85, 0.85, 0.0), (0.86, 0.86, 1.0)], 2.0);
        let single = trace(&[(0.5, 0.5, 0.0)], 10.0);

        let heatmap = engine.aggregate(&[long, short, single]);
        assert_eq!(heatmap.max_duration, None);
        assert_relative_eq!(heatmap.raw.get(1, 1), 1.0);
        assert_relative_eq!(heatmap.raw.get(8, 8), 1.0);
        assert_eq!(heatmap.raw.get(4, 4), 0.0);
        assert_relative_eq!(heatmap.normalized.get(1, 1), heatmap.normalized.get(8, 8));
    }

    #[test]
    fn test_normalize_degenerate_window() {
        let grid = HeatmapGrid::new(2, 2);
        assert_eq!(grid.normalize_to_max(), HeatmapGrid::new(2, 2));
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let config = EchoConfig {
            root: dir.path().to_path_buf(),
            ..EchoConfig::default()
        };
        let engine = HeatmapEngine::new(unit_plane(), 2.0, 0.5).unwrap();
        let heatmap = engine.single(&trace(&[(0.2, 0.7, 0.0)], 1.0), 0.0, 1.0);

        let (raw_path, gaussian_path) = export_heatmap(&config, &heatmap, SystemTime::now()).unwrap();
        assert!(gaussian_path.exists());

        let rows = read_table(&raw_path, &config.dialect, None).unwrap();
        assert_eq!(rows.len(), 4);
        let hot = rows.iter().find(|r| r.f32("Value (s)") == Some(1.0)).unwrap();
        assert_eq!(hot.index("gridX"), Some(0));
        assert_eq!(hot.index("gridY"), Some(1));
        assert_eq!(hot.f32("Normalized value"), Some(1.0));
    }

    #[test]
    fn test_plane_around_points() {
        let points = [Vector3::new(-1.0, 0.0, 2.0), Vector3::new(3.0, 5.0, -2.0)];
        let bounds = PlaneBounds::around(&points, 0.5).unwrap();
        assert_eq!(bounds.origin, Vector3::new(-1.5, 0.0, -2.5));
        assert_eq!(bounds.size, Vector3::new(5.0, 5.0, 5.0));
        assert!(PlaneBounds::around(&[], 1.0).is_none());
    }

    proptest! {
        #[test]
        fn prop_normalize_spans_unit_interval(cells in prop::collection::vec(0.0f32..100.0, 4..64)) {
            let width = cells.len();
            let mut grid = HeatmapGrid::new(width, 1);
            for (x, v) in cells.iter().enumerate() {
                grid.set(x, 0, *v);
            }
            // Background cell
            grid.set(0, 0, 0.0);
            prop_assume!(grid.max() > 0.0);

            let normalized = grid.normalize_to_max();
            prop_assert_eq!(normalized.get(0, 0), 0.0);
            prop_assert_eq!(normalized.max(), 1.0);
            prop_assert!(normalized.cells().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
