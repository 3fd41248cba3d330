use geo::{LineString, MultiLineString, MultiPolygon};
use serde::Deserialize;

use super::{
    buffer::buffer_lines,
    error::SlicerError,
    slicing::{path_length_km, slice_path},
    stitching::{flatten_geometries, simplify_lines, stitch_lines},
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SlicerParams {
    /// Simplification tolerance in degrees, 0.00005 is about 5 meters.
    pub simplify_tolerance: f64,
    /// Line endpoints further apart than this are not considered connected.
    pub join_tolerance_km: f64,
    pub buffer_radius_km: f64,
    /// No buffer is computed up to this progress.
    pub min_buffer_progress: f64,
}

impl Default for SlicerParams {
    fn default() -> Self {
        Self {
            simplify_tolerance: 0.00005,
            join_tolerance_km: 1.0,
            buffer_radius_km: 0.015,
            min_buffer_progress: 0.001,
        }
    }
}

/// Route lines chained into one continuous path, along with the path's total length.
#[derive(Debug, Clone)]
pub struct Route {
    path: Vec<LineString>,
    total_length_km: f64,
}

impl Route {
    /// Flatten, simplify and stitch the raw route segments.
    pub fn from_segments(segments: Vec<geo::Geometry>, params: &SlicerParams) -> Self {
        let lines = flatten_geometries(segments);
        let lines = simplify_lines(&lines, params.simplify_tolerance);
        let path = stitch_lines(lines, params.join_tolerance_km);
        let total_length_km = path_length_km(&path);
        Self {
            path,
            total_length_km,
        }
    }

    pub fn path(&self) -> &Vec<LineString> {
        &self.path
    }

    pub fn total_length_km(&self) -> f64 {
        self.total_length_km
    }
}

/// A drawn part of the route: the line itself and its thickened outline.
#[derive(Debug, Clone, PartialEq)]
pub struct SlicedResult {
    pub line: MultiLineString,
    pub buffer: MultiPolygon,
}

impl SlicedResult {
    pub fn empty() -> Self {
        Self {
            line: MultiLineString::new(vec![]),
            buffer: MultiPolygon::new(vec![]),
        }
    }
}

enum SlicerState {
    Uninitialized,
    Ready(Route),
}

/// Cuts the part of a route covering a given fraction of its length.
///
/// Must be initialized with the route segments before slicing. Slicing faults are logged and
/// answered with the last successful slice, or an empty one.
pub struct RouteSlicer {
    params: SlicerParams,
    state: SlicerState,
    last_result: Option<SlicedResult>,
}

impl RouteSlicer {
    pub fn new(params: SlicerParams) -> Self {
        Self {
            params,
            state: SlicerState::Uninitialized,
            last_result: None,
        }
    }

    /// Build the route from raw segments and return its total length in kilometers.
    /// Initializing again replaces the route.
    pub fn initialize(
        &mut self,
        segments: Option<Vec<geo::Geometry>>,
    ) -> Result<f64, SlicerError> {
        let segments = segments.ok_or(SlicerError::EmptyInput)?;
        let num_segments = segments.len();
        let route = Route::from_segments(segments, &self.params);
        log::info!(
            "Stitched {} route segments into {} lines, {:.3} km in total",
            num_segments,
            route.path().len(),
            route.total_length_km()
        );
        let total_length_km = route.total_length_km();
        self.state = SlicerState::Ready(route);
        self.last_result = None;
        Ok(total_length_km)
    }

    pub fn route(&self) -> Option<&Route> {
        match &self.state {
            SlicerState::Ready(route) => Some(route),
            SlicerState::Uninitialized => None,
        }
    }

    /// Slice the route at `progress`, clamped to [0, 1].
    pub fn slice_at(&mut self, progress: f64) -> Result<SlicedResult, SlicerError> {
        let route = match &self.state {
            SlicerState::Ready(route) => route,
            SlicerState::Uninitialized => return Err(SlicerError::NotInitialized),
        };
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };

        match compute_slice(route, progress, &self.params) {
            Ok(result) => {
                self.last_result = Some(result.clone());
                Ok(result)
            }
            Err(err) => {
                log::error!("Slicing route at progress {}: {}", progress, err);
                Ok(self.last_result.clone().unwrap_or_else(SlicedResult::empty))
            }
        }
    }
}

fn compute_slice(
    route: &Route,
    progress: f64,
    params: &SlicerParams,
) -> Result<SlicedResult, SlicerError> {
    if !route.total_length_km().is_finite() {
        return Err(SlicerError::SliceComputation(format!(
            "Route length {} is not finite",
            route.total_length_km()
        )));
    }
    let target_km = progress * route.total_length_km();
    let lines = slice_path(route.path(), target_km);

    let buffer = if !lines.is_empty() && progress > params.min_buffer_progress {
        buffer_lines(&lines, params.buffer_radius_km)?
    } else {
        MultiPolygon::new(vec![])
    };
    Ok(SlicedResult {
        line: MultiLineString::new(lines),
        buffer,
    })
}
