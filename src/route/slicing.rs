use geo::{HaversineIntermediate, HaversineLength, LineString, Point};

use super::stitching::haversine_distance_km;

/// Length of a line along the Earth's surface in kilometers.
pub fn line_length_km(line: &LineString) -> f64 {
    line.haversine_length() / 1000.0
}

/// Total length of all lines in kilometers.
pub fn path_length_km(path: &[LineString]) -> f64 {
    path.iter().map(line_length_km).sum()
}

/// Cut the prefix of `line` which is `distance_km` long, measured along the line from its start.
///
/// The cut point is interpolated on the great circle between the two vertices around it. If the
/// line is shorter than `distance_km`, the whole line is returned.
pub fn slice_line_along(line: &LineString, distance_km: f64) -> LineString {
    let Some(first) = line.0.first() else {
        return LineString::new(vec![]);
    };

    let mut coords = vec![*first];
    let mut travelled_km = 0.0;
    for segment in line.lines() {
        let segment_km = haversine_distance_km(&segment.start, &segment.end);
        if segment_km > 0.0 && travelled_km + segment_km >= distance_km {
            let fraction = ((distance_km - travelled_km) / segment_km).clamp(0.0, 1.0);
            let cut =
                Point::from(segment.start).haversine_intermediate(&segment.end.into(), fraction);
            coords.push(cut.into());
            return LineString::new(coords);
        }
        coords.push(segment.end);
        travelled_km += segment_km;
    }
    LineString::new(coords)
}

/// The part of `path` covering its first `target_km` kilometers.
///
/// Lines are taken whole while they fit, the line in which `target_km` is reached is cut with
/// [`slice_line_along`] and everything after it is left out.
pub fn slice_path(path: &[LineString], target_km: f64) -> Vec<LineString> {
    let mut sliced = Vec::new();
    let mut covered_km = 0.0;
    for line in path {
        let line_km = line_length_km(line);
        if covered_km + line_km <= target_km {
            sliced.push(line.clone());
            covered_km += line_km;
        } else if covered_km < target_km {
            sliced.push(slice_line_along(line, target_km - covered_km));
            break;
        } else {
            break;
        }
    }
    sliced
}
