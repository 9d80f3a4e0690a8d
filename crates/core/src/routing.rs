//! Visiting order for a set of stops.
//!
//! Distances are straight lines on the sphere. The tour starts at the
//! origin, is built greedily by nearest neighbour and then refined with
//! 2-opt segment reversals. Travel time assumes urban driving speed plus a
//! fixed time at each stop.

use serde::{Deserialize, Serialize};

use crate::types::Coordinates;

/// Urban driving speed used for time estimates.
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Time spent at each stop.
pub const MINUTES_PER_STOP: u32 = 5;

/// Upper bound on 2-opt improvement passes.
pub const MAX_PASSES: usize = 1000;

/// Gains below this are treated as ties.
const EPSILON_KM: f64 = 1e-9;

/// How the visiting order is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// Greedy tour only
    #[serde(rename = "nearest-neighbor")]
    NearestNeighbor,
    /// 2-opt starting from the stops in input order
    #[serde(rename = "2-opt", alias = "two-opt")]
    TwoOpt,
    /// Greedy tour refined with 2-opt
    #[default]
    #[serde(rename = "nearest-neighbor-2opt")]
    NearestNeighborTwoOpt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// Close the tour with a leg back to the origin
    pub return_to_origin: bool,
    pub algorithm: Algorithm,
}

/// One end of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Waypoint {
    Origin,
    /// Index into the stops as given
    Stop(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Leg {
    pub from: Waypoint,
    pub to: Waypoint,
    pub distance_km: f64,
}

/// An ordered tour over the stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    /// Stop indices in visiting order
    pub order: Vec<usize>,
    pub legs: Vec<Leg>,
    pub total_distance_km: f64,
    pub estimated_minutes: u32,
    /// Distance 2-opt saved relative to the starting tour, in percent
    pub improvement_percent: f64,
    pub algorithm: Algorithm,
    pub return_to_origin: bool,
}

/// Order `stops` into a tour starting at `origin`.
///
/// ```
/// use rota_core::Coordinates;
/// use rota_core::routing::{RouteOptions, optimize};
///
/// let origin = Coordinates::new(-3.73, -38.52);
/// let stops = [origin.offset(0.02, 0.0), origin.offset(0.01, 0.0)];
/// let route = optimize(origin, &stops, RouteOptions::default());
/// assert_eq!(route.order, vec![1, 0]);
/// ```
#[must_use]
pub fn optimize(origin: Coordinates, stops: &[Coordinates], options: RouteOptions) -> Route {
    let points: Vec<Coordinates> = std::iter::once(origin).chain(stops.iter().copied()).collect();
    let distances = Distances::new(&points);

    let mut tour = match options.algorithm {
        Algorithm::TwoOpt => (0..points.len()).collect(),
        Algorithm::NearestNeighbor | Algorithm::NearestNeighborTwoOpt => {
            nearest_neighbor(&distances)
        }
    };
    if options.return_to_origin && !stops.is_empty() {
        tour.push(0);
    }

    let before = distances.tour(&tour);
    if options.algorithm != Algorithm::NearestNeighbor {
        two_opt(&mut tour, &distances, options.return_to_origin);
    }
    let total_distance_km = distances.tour(&tour);

    let improvement_percent = if before > 0.0 {
        (before - total_distance_km) / before * 100.0
    } else {
        0.0
    };

    let legs = tour
        .windows(2)
        .filter_map(|pair| match *pair {
            [from, to] => Some(Leg {
                from: waypoint(from),
                to: waypoint(to),
                distance_km: distances.between(from, to),
            }),
            _ => None,
        })
        .collect();

    Route {
        order: tour
            .iter()
            .filter_map(|&point| point.checked_sub(1))
            .collect(),
        legs,
        total_distance_km,
        estimated_minutes: estimate_minutes(total_distance_km, stops.len()),
        improvement_percent,
        algorithm: options.algorithm,
        return_to_origin: options.return_to_origin,
    }
}

/// Driving time at [`AVERAGE_SPEED_KMH`] plus [`MINUTES_PER_STOP`] per stop.
#[must_use]
pub fn estimate_minutes(distance_km: f64, stops: usize) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to u32 range
    let driving = (distance_km / AVERAGE_SPEED_KMH * 60.0)
        .round()
        .clamp(0.0, f64::from(u32::MAX)) as u32;
    let stopping = u32::try_from(stops)
        .unwrap_or(u32::MAX)
        .saturating_mul(MINUTES_PER_STOP);
    driving.saturating_add(stopping)
}

const fn waypoint(point: usize) -> Waypoint {
    match point.checked_sub(1) {
        Some(stop) => Waypoint::Stop(stop),
        None => Waypoint::Origin,
    }
}

/// Pairwise distances, row-major.
struct Distances {
    n: usize,
    km: Vec<f64>,
}

impl Distances {
    fn new(points: &[Coordinates]) -> Self {
        let km = points
            .iter()
            .flat_map(|a| points.iter().map(move |b| a.distance_km(b)))
            .collect();
        Self {
            n: points.len(),
            km,
        }
    }

    fn between(&self, a: usize, b: usize) -> f64 {
        self.km.get(a * self.n + b).copied().unwrap_or(0.0)
    }

    fn tour(&self, tour: &[usize]) -> f64 {
        tour.windows(2)
            .map(|pair| match *pair {
                [a, b] => self.between(a, b),
                _ => 0.0,
            })
            .sum()
    }
}

/// Greedy tour from point 0; ties go to the lower index.
fn nearest_neighbor(distances: &Distances) -> Vec<usize> {
    let n = distances.n;
    let mut visited = vec![false; n];
    let mut tour = Vec::with_capacity(n + 1);
    if n == 0 {
        return tour;
    }

    let mut current = 0;
    tour.push(current);
    if let Some(origin) = visited.first_mut() {
        *origin = true;
    }

    while tour.len() < n {
        let Some(next) = (0..n)
            .filter(|&i| !visited.get(i).copied().unwrap_or(true))
            .min_by(|&a, &b| {
                distances
                    .between(current, a)
                    .total_cmp(&distances.between(current, b))
            })
        else {
            break;
        };
        if let Some(seen) = visited.get_mut(next) {
            *seen = true;
        }
        tour.push(next);
        current = next;
    }

    tour
}

/// Reverse segments while that shortens the tour. The first point stays
/// put, and so does the last on a closed tour.
fn two_opt(tour: &mut [usize], distances: &Distances, closed: bool) {
    let last_movable = tour.len().saturating_sub(if closed { 2 } else { 1 });

    for _ in 0..MAX_PASSES {
        let mut improved = false;
        for i in 1..last_movable {
            for j in (i + 1)..=last_movable {
                if reversal_gain(tour, distances, i, j) > EPSILON_KM {
                    if let Some(segment) = tour.get_mut(i..=j) {
                        segment.reverse();
                    }
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
}

/// Distance saved by reversing `tour[i..=j]`, for `i >= 1`.
fn reversal_gain(tour: &[usize], distances: &Distances, i: usize, j: usize) -> f64 {
    let at = |k: usize| tour.get(k).copied();
    let (Some(before_start), Some(start), Some(end)) = (at(i - 1), at(i), at(j)) else {
        return 0.0;
    };
    let after_end = at(j + 1);

    let current = distances.between(before_start, start)
        + after_end.map_or(0.0, |next| distances.between(end, next));
    let reversed = distances.between(before_start, end)
        + after_end.map_or(0.0, |next| distances.between(start, next));
    current - reversed
}
