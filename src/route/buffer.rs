use std::{f64::consts::PI, panic};

use geo::{BooleanOps, Coord, Line, LineString, MultiPolygon, Polygon};

use super::error::SlicerError;

const EARTH_RADIUS_M: f64 = 6_371_008.8;
/// Below this cosine of the latitude, degrees of longitude no longer map to meters.
const MIN_LONGITUDE_SCALE: f64 = 1e-6;

/// Equirectangular projection to meters around an origin. Accurate enough for the few kilometers
/// a single route line spans.
struct LocalProjection {
    origin: Coord,
    meters_per_degree_lon: f64,
    meters_per_degree_lat: f64,
}

impl LocalProjection {
    fn new(origin: Coord) -> Result<Self, SlicerError> {
        let longitude_scale = origin.y.to_radians().cos();
        if longitude_scale.is_nan() || longitude_scale <= MIN_LONGITUDE_SCALE {
            return Err(SlicerError::SliceComputation(format!(
                "Cannot project around {:?}",
                origin
            )));
        }
        let meters_per_degree = EARTH_RADIUS_M * PI / 180.0;
        Ok(Self {
            origin,
            meters_per_degree_lon: meters_per_degree * longitude_scale,
            meters_per_degree_lat: meters_per_degree,
        })
    }

    fn to_local(&self, coord: &Coord) -> Coord {
        Coord {
            x: (coord.x - self.origin.x) * self.meters_per_degree_lon,
            y: (coord.y - self.origin.y) * self.meters_per_degree_lat,
        }
    }

    fn to_geographic(&self, coord: &Coord) -> Coord {
        Coord {
            x: coord.x / self.meters_per_degree_lon + self.origin.x,
            y: coord.y / self.meters_per_degree_lat + self.origin.y,
        }
    }
}

fn unit_direction(line: &Line) -> Coord {
    let delta = line.delta();
    let length = delta.x.hypot(delta.y);
    Coord {
        x: delta.x / length,
        y: delta.y / length,
    }
}

fn closed_polygon(ring: Vec<Coord>) -> Polygon {
    Polygon::new(LineString::new(ring), vec![])
}

/// Rectangle `radius` wide on both sides of a segment, stretched by `start_cap` and `end_cap`
/// beyond its ends.
fn segment_quad(segment: &Line, radius: f64, start_cap: f64, end_cap: f64) -> Polygon {
    let direction = unit_direction(segment);
    let normal = Coord {
        x: -direction.y * radius,
        y: direction.x * radius,
    };
    let start = segment.start - direction * start_cap;
    let end = segment.end + direction * end_cap;
    closed_polygon(vec![
        start - normal,
        end - normal,
        end + normal,
        start + normal,
    ])
}

fn square_around(center: Coord, radius: f64) -> Polygon {
    closed_polygon(
        [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
            .iter()
            .map(|(sign_x, sign_y)| Coord {
                x: center.x + sign_x * radius,
                y: center.y + sign_y * radius,
            })
            .collect(),
    )
}

/// Pieces covering a polyline without repeated points: one quad per segment, square caps at
/// both ends and a square on every joint, which covers the outside of any bend.
fn buffer_pieces(points: &[Coord], radius: f64) -> Vec<Polygon> {
    if points.len() < 2 {
        return vec![square_around(points[0], radius)];
    }
    let last_index = points.len() - 2;
    let mut pieces: Vec<Polygon> = points
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let start_cap = if index == 0 { radius } else { 0.0 };
            let end_cap = if index == last_index { radius } else { 0.0 };
            segment_quad(&Line::new(pair[0], pair[1]), radius, start_cap, end_cap)
        })
        .collect();
    pieces.extend(
        points[1..points.len() - 1]
            .iter()
            .map(|joint| square_around(*joint, radius)),
    );
    pieces
}

/// Union all pieces into one MultiPolygon. The boolean operations can panic on degenerate
/// input, which is turned into an error.
fn union_all(pieces: Vec<Polygon>) -> Result<MultiPolygon, SlicerError> {
    let unioned = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let mut pieces = pieces.into_iter();
        let mut result = match pieces.next() {
            Some(first) => MultiPolygon::new(vec![first]),
            None => return MultiPolygon::new(vec![]),
        };
        for piece in pieces {
            result = result.union(&MultiPolygon::new(vec![piece]));
        }
        result
    }));
    unioned.map_err(|_| {
        log::warn!("Panic during union of buffer pieces");
        SlicerError::SliceComputation("Panic while buffering route line".to_string())
    })
}

/// Thicken a lon/lat line into polygons `radius_km` wide on either side, with square end caps.
///
/// The result covers the whole line, also on sharp bends and turnarounds. It is usually a single
/// polygon, possibly with holes where the line loops.
pub fn buffer_line(line: &LineString, radius_km: f64) -> Result<MultiPolygon, SlicerError> {
    let Some(origin) = line.0.first() else {
        return Err(SlicerError::SliceComputation(
            "Cannot buffer a line without coordinates".to_string(),
        ));
    };
    if line
        .coords()
        .any(|coord| !coord.x.is_finite() || !coord.y.is_finite())
    {
        return Err(SlicerError::SliceComputation(format!(
            "Line starting at {:?} has non-finite coordinates",
            origin
        )));
    }
    let projection = LocalProjection::new(*origin)?;

    let mut points: Vec<Coord> = line.coords().map(|coord| projection.to_local(coord)).collect();
    points.dedup();

    let buffer = union_all(buffer_pieces(&points, radius_km * 1000.0))?;
    let buffer: MultiPolygon = buffer
        .into_iter()
        .map(|polygon| {
            let (exterior, interiors) = polygon.into_inner();
            let to_geographic = |ring: LineString| -> LineString {
                ring.coords()
                    .map(|coord| projection.to_geographic(coord))
                    .collect()
            };
            Polygon::new(
                to_geographic(exterior),
                interiors.into_iter().map(to_geographic).collect(),
            )
        })
        .collect();

    if buffer
        .0
        .iter()
        .flat_map(|polygon| polygon.exterior().coords())
        .any(|coord| !coord.x.is_finite() || !(-90.0..=90.0).contains(&coord.y))
    {
        return Err(SlicerError::SliceComputation(format!(
            "Buffer of line starting at {:?} leaves the valid coordinate range",
            origin
        )));
    }
    Ok(buffer)
}

/// Buffer every line on its own and collect all resulting polygons.
pub fn buffer_lines(lines: &[LineString], radius_km: f64) -> Result<MultiPolygon, SlicerError> {
    let mut polygons = Vec::new();
    for line in lines {
        polygons.extend(buffer_line(line, radius_km)?.0);
    }
    Ok(MultiPolygon::new(polygons))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use geo::{BoundingRect, Contains, LineString, MultiPolygon, Point};
    use rstest::rstest;

    use super::{buffer_line, buffer_lines};
    use crate::route::error::SlicerError;

    const RADIUS_KM: f64 = 0.015;
    /// Degrees of latitude per meter on a sphere with the mean Earth radius.
    const DEGREES_PER_METER: f64 = 1.0 / 111_195.08;

    /// Line given in meters east and north of (0, 0).
    fn line_in_meters(coords: &[(f64, f64)]) -> LineString {
        coords
            .iter()
            .map(|(x, y)| (x * DEGREES_PER_METER, y * DEGREES_PER_METER))
            .collect::<Vec<_>>()
            .into()
    }

    fn point_in_meters(x: f64, y: f64) -> Point {
        Point::new(x * DEGREES_PER_METER, y * DEGREES_PER_METER)
    }

    fn assert_covers_line(buffer: &MultiPolygon, line: &LineString) {
        for coord in line.coords() {
            assert!(buffer.contains(&Point::from(*coord)), "{:?} not covered", coord);
        }
        for segment in line.lines() {
            let midpoint = Point::from((segment.start + segment.end) / 2.0);
            assert!(buffer.contains(&midpoint), "{:?} not covered", midpoint);
        }
    }

    #[rstest]
    fn test_buffer_straight_line_extent() {
        let line: LineString = vec![(0.0, 0.0), (0.005, 0.0), (0.01, 0.0)].into();

        let buffer = buffer_line(&line, RADIUS_KM).unwrap();
        let rect = buffer.bounding_rect().unwrap();

        assert_eq!(buffer.0.len(), 1);
        assert_abs_diff_eq!(rect.height(), 30.0 * DEGREES_PER_METER, epsilon = 1e-8);
        assert_abs_diff_eq!(rect.width(), 0.01 + 30.0 * DEGREES_PER_METER, epsilon = 1e-8);
        assert!(buffer.contains(&Point::new(0.0075, 0.0)));
        assert!(!buffer.contains(&Point::new(0.0075, 0.001)));
    }

    #[rstest]
    fn test_buffer_corner_contains_vertex_and_both_legs() {
        let line: LineString = vec![(0.0, 0.0), (0.01, 0.0), (0.01, 0.01)].into();

        let buffer = buffer_line(&line, RADIUS_KM).unwrap();

        assert_covers_line(&buffer, &line);
        // Inside the bend, close to the vertex.
        let inner_corner = Point::new(0.01 - 5.0 * DEGREES_PER_METER, 5.0 * DEGREES_PER_METER);
        assert!(buffer.contains(&inner_corner));
        assert!(!buffer.contains(&Point::new(0.005, 0.005)));
    }

    #[rstest]
    fn test_buffer_hairpin_covers_both_legs() {
        // Turnaround narrower than the buffer: 100 m out, 10 m across and 100 m back.
        let line = line_in_meters(&[(0.0, 0.0), (100.0, 0.0), (100.0, 10.0), (0.0, 10.0)]);

        let buffer = buffer_line(&line, RADIUS_KM).unwrap();

        assert_covers_line(&buffer, &line);
        assert!(buffer.contains(&point_in_meters(50.0, 5.0)));
        assert_eq!(buffer.0.len(), 1);
        assert!(buffer.0[0].interiors().is_empty());
        assert!(!buffer.contains(&point_in_meters(50.0, 40.0)));
        assert!(!buffer.contains(&point_in_meters(50.0, -30.0)));
    }

    #[rstest]
    fn test_buffer_right_angle_with_short_legs() {
        let line = line_in_meters(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)]);

        let buffer = buffer_line(&line, RADIUS_KM).unwrap();

        assert_covers_line(&buffer, &line);
        assert!(buffer.contains(&point_in_meters(5.0, 5.0)));
        // Outside of the bend.
        assert!(buffer.contains(&point_in_meters(20.0, -10.0)));
        assert!(!buffer.contains(&point_in_meters(40.0, 40.0)));
    }

    #[rstest]
    fn test_buffer_collapsed_line_is_square() {
        let line: LineString = vec![(10.0, 45.0), (10.0, 45.0)].into();

        let buffer = buffer_line(&line, RADIUS_KM).unwrap();

        // Four corners plus the closing coordinate.
        assert_eq!(buffer.0.len(), 1);
        assert_eq!(buffer.0[0].exterior().0.len(), 5);
        assert!(buffer.contains(&Point::new(10.0, 45.0)));
    }

    #[rstest]
    fn test_buffer_lines_one_polygon_per_line() {
        let lines: Vec<LineString> = vec![
            vec![(0.0, 0.0), (0.01, 0.0)].into(),
            vec![(1.0, 1.0), (1.01, 1.0)].into(),
        ];
        assert_eq!(buffer_lines(&lines, RADIUS_KM).unwrap().0.len(), 2);
        assert!(buffer_lines(&[], RADIUS_KM).unwrap().0.is_empty());
    }

    #[rstest]
    #[case(vec![(0.0, 0.0), (f64::NAN, 0.0)])]
    #[case(vec![(0.0, 90.0), (0.0, 89.99)])]
    fn test_buffer_unprojectable_line_is_error(#[case] coords: Vec<(f64, f64)>) {
        let line: LineString = coords.into();
        assert!(matches!(
            buffer_line(&line, RADIUS_KM),
            Err(SlicerError::SliceComputation(_))
        ));
    }
}
