use geo::{Coord, HaversineDistance, LineString, Point, Simplify};
use rayon::prelude::*;

/// Great-circle distance between two lon/lat coordinates in kilometers.
pub fn haversine_distance_km(from: &Coord, to: &Coord) -> f64 {
    Point::from(*from).haversine_distance(&Point::from(*to)) / 1000.0
}

/// Split line geometries into single polylines, keeping input order.
///
/// MultiLineStrings are split into their parts and GeometryCollections are flattened recursively.
/// Geometries which are not lines and polylines with less than two coordinates are dropped.
pub fn flatten_geometries(geometries: Vec<geo::Geometry>) -> Vec<LineString> {
    let mut lines = Vec::new();
    let mut num_skipped = 0;
    for geometry in geometries {
        collect_lines(geometry, &mut lines, &mut num_skipped);
    }
    if num_skipped > 0 {
        log::warn!("Skipped {} geometries which are not lines.", num_skipped);
    }

    let num_lines = lines.len();
    let lines: Vec<LineString> = lines
        .into_iter()
        .filter(|line| 2 <= line.0.len())
        .collect();
    if lines.len() != num_lines {
        log::warn!(
            "Out of {} lines, only {} have at least two coordinates.",
            num_lines,
            lines.len()
        );
    }
    lines
}

fn collect_lines(geometry: geo::Geometry, lines: &mut Vec<LineString>, num_skipped: &mut usize) {
    match geometry {
        geo::Geometry::LineString(line) => lines.push(line),
        geo::Geometry::MultiLineString(multi_line) => lines.extend(multi_line.0),
        geo::Geometry::GeometryCollection(collection) => {
            for geometry in collection.0 {
                collect_lines(geometry, lines, num_skipped);
            }
        }
        _ => *num_skipped += 1,
    }
}

/// Reduce the point density of every line with Ramer-Douglas-Peucker.
/// `tolerance` is in degrees, the unit of the coordinates.
pub fn simplify_lines(lines: &Vec<LineString>, tolerance: f64) -> Vec<LineString> {
    lines
        .par_iter()
        .map(|line| line.simplify(&tolerance))
        .collect()
}

struct EndpointMatch {
    index: usize,
    distance_km: f64,
    reverse: bool,
}

/// Find the pool line with an endpoint closest to `tail`. Start coordinates are checked before end
/// coordinates and the first minimum found wins.
fn closest_endpoint(tail: &Coord, pool: &[LineString]) -> Option<EndpointMatch> {
    let mut best: Option<EndpointMatch> = None;
    for (index, line) in pool.iter().enumerate() {
        let (Some(start), Some(end)) = (line.0.first(), line.0.last()) else {
            continue;
        };
        for (endpoint, reverse) in [(start, false), (end, true)] {
            let distance_km = haversine_distance_km(tail, endpoint);
            let best_distance_km = best
                .as_ref()
                .map_or(f64::INFINITY, |best| best.distance_km);
            if distance_km < best_distance_km {
                best = Some(EndpointMatch {
                    index,
                    distance_km,
                    reverse,
                });
            }
        }
    }
    best
}

/// Greedily chain lines head to tail.
///
/// The first line seeds the chain. Then, until no lines are left, the line with an endpoint closest to
/// the end of the last chained line is appended, reversed if its end coordinate was the closest one.
/// When the closest endpoint is not within `join_tolerance_km`, the next line in input order is
/// appended as it is. Far apart fragments therefore end up in input order rather than being
/// rejected.
pub fn stitch_lines(lines: Vec<LineString>, join_tolerance_km: f64) -> Vec<LineString> {
    if lines.len() < 2 {
        return lines;
    }

    let mut pool = lines;
    let mut chain: Vec<LineString> = Vec::with_capacity(pool.len());
    chain.push(pool.remove(0));

    while !pool.is_empty() {
        let tail = chain.last().and_then(|line| line.0.last()).copied();
        let closest = tail.and_then(|tail| closest_endpoint(&tail, &pool));
        let next = match closest {
            Some(closest) if closest.distance_km < join_tolerance_km => {
                let mut line = pool.remove(closest.index);
                if closest.reverse {
                    line.0.reverse();
                }
                line
            }
            _ => {
                log::debug!(
                    "No line endpoint within {} km of {:?}, appending next line in input order",
                    join_tolerance_km,
                    tail
                );
                pool.remove(0)
            }
        };
        chain.push(next);
    }
    chain
}

#[cfg(test)]
mod tests {
    use geo::LineString;
    use rstest::rstest;

    use super::{flatten_geometries, simplify_lines, stitch_lines};

    const JOIN_TOLERANCE_KM: f64 = 1.0;

    fn reversed(line: &LineString) -> LineString {
        let mut line = line.clone();
        line.0.reverse();
        line
    }

    #[rstest]
    fn test_stitch_reverses_and_falls_back_to_input_order() {
        let a: LineString = vec![(0.0, 0.0), (1.0, 0.0)].into();
        let b: LineString = vec![(2.0, 0.0), (1.0, 0.0001)].into();
        let c: LineString = vec![(5.0, 5.0), (6.0, 6.0)].into();

        let chain = stitch_lines(vec![a.clone(), b.clone(), c.clone()], JOIN_TOLERANCE_KM);

        assert_eq!(chain, vec![a, reversed(&b), c]);
    }

    #[rstest]
    fn test_stitch_picks_closest_start() {
        let a: LineString = vec![(0.0, 0.0), (0.001, 0.0)].into();
        let far: LineString = vec![(0.003, 0.0), (0.004, 0.0)].into();
        let near: LineString = vec![(0.001, 0.0), (0.002, 0.0)].into();

        let chain = stitch_lines(vec![a.clone(), far.clone(), near.clone()], JOIN_TOLERANCE_KM);

        assert_eq!(chain, vec![a, near, far]);
    }

    #[rstest]
    fn test_stitch_tie_prefers_earliest_start_endpoint() {
        let a: LineString = vec![(0.0, 0.0), (0.001, 0.0)].into();
        // Both candidates touch the tail, once with the start and once with the end.
        let ends_at_tail: LineString = vec![(0.001, 0.001), (0.001, 0.0)].into();
        let starts_at_tail: LineString = vec![(0.001, 0.0), (0.002, 0.0)].into();

        let chain = stitch_lines(
            vec![a.clone(), ends_at_tail.clone(), starts_at_tail.clone()],
            JOIN_TOLERANCE_KM,
        );

        // Equal distances, so the first scanned candidate wins and is reversed.
        assert_eq!(chain[1], reversed(&ends_at_tail));
        assert_eq!(chain[2], starts_at_tail);
    }

    #[rstest]
    fn test_stitch_far_fragments_keep_input_order() {
        // Known approximation: fragments further apart than the join tolerance are not reordered,
        // even when a later fragment would be a better continuation.
        let a: LineString = vec![(0.0, 0.0), (0.1, 0.0)].into();
        let b: LineString = vec![(10.0, 10.0), (10.1, 10.0)].into();
        let c: LineString = vec![(0.2, 0.0), (0.3, 0.0)].into();

        let chain = stitch_lines(vec![a.clone(), b.clone(), c.clone()], JOIN_TOLERANCE_KM);

        assert_eq!(chain, vec![a, b, c]);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![vec![(0.0, 0.0), (1.0, 1.0)].into()])]
    fn test_stitch_trivial_inputs_unchanged(#[case] lines: Vec<LineString>) {
        assert_eq!(stitch_lines(lines.clone(), JOIN_TOLERANCE_KM), lines);
    }

    #[rstest]
    fn test_flatten_splits_multi_lines_and_drops_others() {
        let first: LineString = vec![(0.0, 0.0), (1.0, 0.0)].into();
        let second: LineString = vec![(1.0, 0.0), (2.0, 0.0)].into();
        let third: LineString = vec![(3.0, 0.0), (4.0, 0.0)].into();
        let geometries = vec![
            geo::Geometry::MultiLineString(geo::MultiLineString(vec![
                first.clone(),
                second.clone(),
            ])),
            geo::Geometry::Point(geo::Point::new(0.0, 0.0)),
            geo::Geometry::GeometryCollection(geo::GeometryCollection(vec![
                geo::Geometry::LineString(third.clone()),
                geo::Geometry::LineString(vec![(5.0, 0.0)].into()),
            ])),
        ];

        assert_eq!(flatten_geometries(geometries), vec![first, second, third]);
    }

    #[rstest]
    fn test_simplify_keeps_endpoints_and_order() {
        let wiggly: LineString = vec![
            (0.0, 0.0),
            (0.0001, 0.000001),
            (0.0002, -0.000001),
            (0.0003, 0.0),
        ]
        .into();
        let straight: LineString = vec![(1.0, 1.0), (2.0, 2.0)].into();

        let simplified = simplify_lines(&vec![wiggly, straight.clone()], 0.00005);

        assert_eq!(simplified.len(), 2);
        assert_eq!(
            simplified[0],
            LineString::from(vec![(0.0, 0.0), (0.0003, 0.0)])
        );
        assert_eq!(simplified[1], straight);
    }
}
