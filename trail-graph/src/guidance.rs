//! Route guidance: tracks live progress along a `PlannedRoute` and emits
//! discrete alert events. Single-threaded cooperative — `update` must be
//! called in causal order by one caller at a time.

use trail_types::{GuidanceAlert, PlannedRoute, TurnDirection};

use crate::geometry::{haversine_m, project_onto_segment};

const OFF_ROUTE_SET_M: f64 = 50.0;
const OFF_ROUTE_CLEAR_M: f64 = 30.0;
const APPROACHING_TURN_OUTER_M: f64 = 100.0;
const AT_TURN_M: f64 = 30.0;
const ARRIVAL_MARGIN_M: f64 = 30.0;

pub struct RouteGuidance {
    route: Option<PlannedRoute>,
    cumulative: Vec<f64>,
    current_instruction: usize,
    off_route: bool,
    approaching_fired: bool,
    at_fired: bool,
    arrived_fired: bool,
    progress: f64,
    remaining_m: f64,
}

impl Default for RouteGuidance {
    fn default() -> Self {
        Self {
            route: None,
            cumulative: Vec::new(),
            current_instruction: 0,
            off_route: false,
            approaching_fired: false,
            at_fired: false,
            arrived_fired: false,
            progress: 0.0,
            remaining_m: 0.0,
        }
    }
}

impl RouteGuidance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all state and precomputes the polyline's cumulative-distance array.
    pub fn start(&mut self, route: PlannedRoute) {
        let mut cumulative = vec![0.0; route.polyline.len()];
        for i in 1..route.polyline.len() {
            cumulative[i] = cumulative[i - 1] + haversine_m(route.polyline[i - 1], route.polyline[i]);
        }
        self.cumulative = cumulative;
        self.current_instruction = if route.instructions.len() > 1 { 1 } else { 0 };
        self.off_route = false;
        self.approaching_fired = false;
        self.at_fired = false;
        self.arrived_fired = false;
        self.progress = 0.0;
        self.remaining_m = route.total_distance_m;
        self.route = Some(route);
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }

    /// Fraction of the route covered so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Remaining distance to the route's end, in metres.
    pub fn remaining_m(&self) -> f64 {
        self.remaining_m
    }

    /// Advances guidance state for one live GPS fix, returning the alerts
    /// emitted (in order, never reordered).
    pub fn update(&mut self, location: trail_types::Coordinate) -> Vec<GuidanceAlert> {
        let Some(route) = self.route.clone() else {
            return Vec::new();
        };
        let mut alerts = Vec::new();

        let (distance_from_route, distance_along) = self.project(location, &route);

        // Off-route hysteresis.
        if distance_from_route > OFF_ROUTE_SET_M && !self.off_route {
            self.off_route = true;
            alerts.push(GuidanceAlert::OffRoute);
        } else if distance_from_route < OFF_ROUTE_CLEAR_M && self.off_route {
            self.off_route = false;
        }

        let total = route.total_distance_m;
        self.progress = (distance_along / total.max(1e-9)).clamp(0.0, 1.0);
        self.remaining_m = (total - distance_along).max(0.0);

        // Instruction advancement: look ahead 30m.
        while self.current_instruction + 1 < route.instructions.len()
            && route.instructions[self.current_instruction].distance_m <= distance_along + AT_TURN_M
        {
            self.current_instruction += 1;
            self.approaching_fired = false;
            self.at_fired = false;
        }

        let instruction = &route.instructions[self.current_instruction];
        let distance_to_turn = (instruction.distance_m - distance_along).max(0.0);

        if distance_to_turn > OFF_ROUTE_CLEAR_M
            && distance_to_turn <= APPROACHING_TURN_OUTER_M
            && !self.approaching_fired
        {
            alerts.push(GuidanceAlert::ApproachingTurn { direction: instruction.direction });
            self.approaching_fired = true;
        }
        if distance_to_turn <= AT_TURN_M && !self.at_fired {
            alerts.push(GuidanceAlert::AtTurn { direction: instruction.direction });
            self.at_fired = true;
        }

        let on_final_instruction = self.current_instruction + 1 == route.instructions.len()
            || instruction.direction == TurnDirection::Arrive;
        if on_final_instruction && distance_along >= total - ARRIVAL_MARGIN_M && !self.arrived_fired {
            alerts.push(GuidanceAlert::Arrived);
            self.arrived_fired = true;
        }

        alerts
    }

    /// Projects `location` onto the nearest polyline segment and returns
    /// `(distance_from_route_m, distance_along_route_m)`.
    fn project(&self, location: trail_types::Coordinate, route: &PlannedRoute) -> (f64, f64) {
        let mut best_distance = f64::INFINITY;
        let mut best_along = 0.0;

        for i in 0..route.polyline.len().saturating_sub(1) {
            let a = route.polyline[i];
            let b = route.polyline[i + 1];
            let (projected, t) = project_onto_segment(location, a, b);
            let distance = haversine_m(location, projected);
            if distance < best_distance {
                best_distance = distance;
                best_along = self.cumulative[i] + t * (self.cumulative[i + 1] - self.cumulative[i]);
            }
        }

        if route.polyline.len() < 2 {
            return (0.0, 0.0);
        }
        (best_distance, best_along)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trail_types::{Coordinate, TurnInstruction};

    fn straight_route() -> PlannedRoute {
        PlannedRoute {
            name: "Test".into(),
            polyline: vec![
                Coordinate::new(47.0, 11.0),
                Coordinate::new(47.0, 11.001),
                Coordinate::new(47.0, 11.002),
            ],
            instructions: vec![
                TurnInstruction { direction: TurnDirection::Start, distance_m: 0.0, street_name: None, coordinate: Coordinate::new(47.0, 11.0) },
                TurnInstruction { direction: TurnDirection::Arrive, distance_m: 150.0, street_name: None, coordinate: Coordinate::new(47.0, 11.002) },
            ],
            total_distance_m: 150.0,
            estimated_duration_s: 150.0,
            region_id: String::new(),
        }
    }

    #[test]
    fn off_route_alert_fires_past_fifty_metres_and_clears_below_thirty() {
        let mut guidance = RouteGuidance::new();
        guidance.start(straight_route());

        let far = Coordinate::new(47.001, 11.001); // well over 50m away
        let alerts = guidance.update(far);
        assert!(alerts.contains(&GuidanceAlert::OffRoute));

        let near = Coordinate::new(47.0, 11.001);
        let alerts = guidance.update(near);
        assert!(!alerts.contains(&GuidanceAlert::OffRoute));
    }

    #[test]
    fn arrival_fires_once_near_route_end() {
        let mut guidance = RouteGuidance::new();
        guidance.start(straight_route());

        let near_end = Coordinate::new(47.0, 11.00199);
        let alerts = guidance.update(near_end);
        assert!(alerts.contains(&GuidanceAlert::Arrived));

        let alerts_again = guidance.update(near_end);
        assert!(!alerts_again.contains(&GuidanceAlert::Arrived));
    }

    #[test]
    fn progress_and_remaining_track_distance_along_route() {
        let mut guidance = RouteGuidance::new();
        guidance.start(straight_route());
        assert_eq!(guidance.remaining_m(), 150.0);

        guidance.update(Coordinate::new(47.0, 11.001));
        assert!(guidance.progress() > 0.0);
        assert!(guidance.remaining_m() < 150.0);
    }

    #[test]
    fn stop_clears_all_state() {
        let mut guidance = RouteGuidance::new();
        guidance.start(straight_route());
        guidance.update(Coordinate::new(47.0, 11.0005));
        guidance.stop();
        assert!(guidance.update(Coordinate::new(47.0, 11.0005)).is_empty());
    }
}
