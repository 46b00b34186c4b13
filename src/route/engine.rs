//! # Route Geometry Engine
//!
//! Owns the route toward the current active target and decides what part of
//! it is visible.
//!
//! ## Architecture
//!
//! The engine performs no I/O. Operations return [`RouteCommand`]s that the
//! caller executes (spawn a fetch, start or stop the reveal ticker), and
//! results come back through [`RouteGeometryEngine::on_route_fetched`] and
//! [`RouteGeometryEngine::reveal_tick`]. This keeps every decision
//! deterministic and testable without a runtime.
//!
//! Fetch responses are not assumed to arrive in request order. Each
//! response carries the destination key and request id it was issued for,
//! and is dropped unless both still match.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::index::VertexIndex;
use super::reveal::RevealAnimation;
use super::trim::{trim_polyline, RouteCursor};
use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result};
use crate::geo_utils::{destination_key, haversine_distance, polyline_length};
use crate::GeoPoint;

/// Work requested by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteCommand {
    /// Fetch a route; deliver the result to `on_route_fetched`.
    Fetch {
        request_id: u64,
        destination_key: String,
        origin: GeoPoint,
        destination: GeoPoint,
    },
    /// Call `reveal_tick` every `interval` until told to stop.
    StartReveal { interval: Duration },
    /// Stop calling `reveal_tick`.
    StopReveal,
}

/// Serialisable view of the engine for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub destination_key: Option<String>,
    pub visible_trail: Vec<GeoPoint>,
    pub last_passed_index: usize,
    pub remaining_distance_m: f64,
    pub revealing: bool,
    pub fetching: bool,
}

/// A pending fetch the engine is waiting on.
#[derive(Debug, Clone, PartialEq)]
struct PendingFetch {
    request_id: u64,
    destination_key: String,
}

/// Route state for one destination at a time.
#[derive(Debug)]
pub struct RouteGeometryEngine {
    config: TrackerConfig,

    // Current target
    destination_key: Option<String>,
    destination: Option<GeoPoint>,

    // Geometry for the current target
    polyline: Vec<GeoPoint>,
    vertex_index: VertexIndex,
    cursor: RouteCursor,
    visible_trail: Vec<GeoPoint>,

    // In-flight guards
    pending: Option<PendingFetch>,
    reveal: Option<RevealAnimation>,
    next_request_id: u64,

    // Most recent origin hint, used to snap once a reveal finishes
    last_origin_hint: Option<GeoPoint>,
}

impl RouteGeometryEngine {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            destination_key: None,
            destination: None,
            polyline: Vec::new(),
            vertex_index: VertexIndex::empty(),
            cursor: RouteCursor::default(),
            visible_trail: Vec::new(),
            pending: None,
            reveal: None,
            next_request_id: 0,
            last_origin_hint: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn destination_key(&self) -> Option<&str> {
        self.destination_key.as_deref()
    }

    pub fn polyline(&self) -> &[GeoPoint] {
        &self.polyline
    }

    pub fn visible_trail(&self) -> &[GeoPoint] {
        &self.visible_trail
    }

    pub fn cursor(&self) -> &RouteCursor {
        &self.cursor
    }

    pub fn is_fetching(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_revealing(&self) -> bool {
        self.reveal.is_some()
    }

    /// Length of the visible trail in meters.
    pub fn remaining_distance(&self) -> f64 {
        polyline_length(&self.visible_trail)
    }

    /// Minimum distance from `point` to any vertex of the current route.
    ///
    /// `f64::INFINITY` when there is no route.
    pub fn deviation_distance(&self, point: &GeoPoint) -> f64 {
        self.vertex_index.nearest_distance(point, &self.polyline)
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            destination_key: self.destination_key.clone(),
            visible_trail: self.visible_trail.clone(),
            last_passed_index: self.cursor.last_passed_index,
            remaining_distance_m: self.remaining_distance(),
            revealing: self.is_revealing(),
            fetching: self.is_fetching(),
        }
    }

    // ========================================================================
    // Target Tracking
    // ========================================================================

    /// Re-evaluate the route after the origin or the active target changed.
    pub fn update_target(
        &mut self,
        origin_hint: Option<GeoPoint>,
        active_target: Option<GeoPoint>,
    ) -> Vec<RouteCommand> {
        let origin = origin_hint.filter(|p| p.is_valid());
        if origin.is_some() {
            self.last_origin_hint = origin;
        }

        let target = match active_target.filter(|p| p.is_valid()) {
            Some(target) => target,
            None => return self.clear(),
        };

        let key = destination_key(&target, self.config.destination_key_precision);
        if self.destination_key.as_deref() != Some(key.as_str()) {
            info!("[RouteEngine] New destination {}", key);
            let mut commands = self.clear();
            self.destination_key = Some(key);
            self.destination = Some(target);
            if let Some(origin) = origin {
                commands.push(self.issue_fetch(origin));
            }
            return commands;
        }

        let origin = match origin {
            Some(origin) => origin,
            None => return Vec::new(),
        };

        if self.pending.is_some() || self.reveal.is_some() {
            debug!("[RouteEngine] Fetch or reveal in flight, skipping update");
            return Vec::new();
        }

        let deviation = self.deviation_distance(&origin);
        if deviation > self.config.deviation_threshold_m {
            if deviation.is_finite() {
                info!(
                    "[RouteEngine] Off route by {:.0}m, re-fetching {}",
                    deviation, key
                );
            } else {
                debug!("[RouteEngine] No route for {}, re-fetching", key);
            }
            return vec![self.issue_fetch(origin)];
        }

        let moved = self
            .cursor
            .last_origin
            .map(|last| haversine_distance(&last, &origin))
            .unwrap_or(f64::INFINITY);
        if moved >= self.config.trim_threshold_m {
            self.trim(origin);
        }

        Vec::new()
    }

    /// Snap `position` onto the route and drop the traversed prefix.
    pub fn trim(&mut self, position: GeoPoint) {
        if let Some(result) = trim_polyline(
            &self.polyline,
            &mut self.cursor,
            &position,
            self.config.trim_window,
        ) {
            debug!(
                "[RouteEngine] Trimmed at segment {} ({} points left)",
                result.segment_start,
                result.trail.len()
            );
            self.visible_trail = result.trail;
        }
    }

    /// Drop the target and all route state.
    pub fn clear(&mut self) -> Vec<RouteCommand> {
        let was_revealing = self.reveal.is_some();

        self.destination_key = None;
        self.destination = None;
        self.pending = None;
        self.discard_geometry();

        if was_revealing {
            vec![RouteCommand::StopReveal]
        } else {
            Vec::new()
        }
    }

    fn discard_geometry(&mut self) {
        self.polyline.clear();
        self.vertex_index = VertexIndex::empty();
        self.cursor.reset();
        self.visible_trail.clear();
        self.reveal = None;
    }

    fn issue_fetch(&mut self, origin: GeoPoint) -> RouteCommand {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let destination_key = self.destination_key.clone().unwrap_or_default();
        let destination = self.destination.unwrap_or(origin);

        self.pending = Some(PendingFetch {
            request_id,
            destination_key: destination_key.clone(),
        });

        RouteCommand::Fetch {
            request_id,
            destination_key,
            origin,
            destination,
        }
    }

    // ========================================================================
    // Fetch Resolution
    // ========================================================================

    /// Apply a routing result. Results for a superseded request or a
    /// different destination are dropped without touching state.
    pub fn on_route_fetched(
        &mut self,
        request_id: u64,
        destination_key: &str,
        result: Result<Option<Vec<GeoPoint>>>,
    ) -> Vec<RouteCommand> {
        let current = PendingFetch {
            request_id,
            destination_key: destination_key.to_string(),
        };
        if self.destination_key.as_deref() != Some(destination_key)
            || self.pending.as_ref() != Some(&current)
        {
            debug!(
                "[RouteEngine] Dropping stale route #{} for {}",
                request_id, destination_key
            );
            return Vec::new();
        }
        self.pending = None;

        let route = result.and_then(|route| route.ok_or_no_route(destination_key));
        let points: Vec<GeoPoint> = match route {
            Ok(points) => points.into_iter().filter(|p| p.is_valid()).collect(),
            Err(e) => {
                warn!("[RouteEngine] Route fetch failed for {}: {}", destination_key, e);
                Vec::new()
            }
        };

        let mut commands = Vec::new();
        if self.reveal.is_some() {
            commands.push(RouteCommand::StopReveal);
        }
        self.discard_geometry();

        if points.len() < 2 {
            warn!("[RouteEngine] No route to {}", destination_key);
            return commands;
        }

        info!(
            "[RouteEngine] Route to {} with {} points ({:.0}m)",
            destination_key,
            points.len(),
            polyline_length(&points)
        );

        self.vertex_index = VertexIndex::build(&points);
        self.reveal = Some(RevealAnimation::new(
            points.len(),
            self.config.reveal_frames(),
        ));
        self.polyline = points;

        // The reveal replaces any StopReveal queued above
        commands.clear();
        commands.push(RouteCommand::StartReveal {
            interval: Duration::from_millis(self.config.reveal_tick_ms),
        });
        commands
    }

    // ========================================================================
    // Reveal Animation
    // ========================================================================

    /// Advance the reveal by one frame.
    ///
    /// On the final frame the reveal stops and the trail is snapped to the
    /// last known origin, handing over to steady-state trimming.
    pub fn reveal_tick(&mut self) -> Vec<RouteCommand> {
        let reveal = match self.reveal.as_mut() {
            Some(reveal) => reveal,
            None => return vec![RouteCommand::StopReveal],
        };

        let shown = reveal.tick();
        let complete = reveal.is_complete();
        self.visible_trail = self.polyline[..shown.min(self.polyline.len())].to_vec();

        if !complete {
            return Vec::new();
        }

        debug!("[RouteEngine] Reveal complete ({} points)", shown);
        self.reveal = None;
        if let Some(origin) = self.last_origin_hint {
            self.trim(origin);
        }
        vec![RouteCommand::StopReveal]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;

    fn straight_line(n: usize) -> Vec<GeoPoint> {
        (0..n).map(|i| GeoPoint::new(0.0, i as f64 * 0.001)).collect()
    }

    fn fetch_of(commands: &[RouteCommand]) -> (u64, String) {
        commands
            .iter()
            .find_map(|c| match c {
                RouteCommand::Fetch {
                    request_id,
                    destination_key,
                    ..
                } => Some((*request_id, destination_key.clone())),
                _ => None,
            })
            .expect("expected a fetch command")
    }

    fn finish_reveal(engine: &mut RouteGeometryEngine) {
        while engine.is_revealing() {
            engine.reveal_tick();
        }
    }

    /// Engine with a fully revealed 10-point route toward (0, 0.009).
    fn routed_engine() -> RouteGeometryEngine {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let origin = GeoPoint::new(0.0, 0.0);
        let commands = engine.update_target(Some(origin), Some(GeoPoint::new(0.0, 0.009)));
        let (id, key) = fetch_of(&commands);
        engine.on_route_fetched(id, &key, Ok(Some(straight_line(10))));
        finish_reveal(&mut engine);
        engine
    }

    #[test]
    fn test_new_target_issues_fetch() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let commands = engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        let (id, key) = fetch_of(&commands);
        assert_eq!(id, 1);
        assert_eq!(key, "0.00000,0.00900");
        assert!(engine.is_fetching());

        // Same target while the fetch is in flight: nothing new
        let again = engine.update_target(
            Some(GeoPoint::new(0.0, 0.0001)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_fetch_starts_reveal_then_trims() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let commands = engine.update_target(
            Some(GeoPoint::new(0.0, 0.0025)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        let (id, key) = fetch_of(&commands);

        let commands = engine.on_route_fetched(id, &key, Ok(Some(straight_line(10))));
        assert!(matches!(commands[..], [RouteCommand::StartReveal { .. }]));
        assert!(engine.visible_trail().is_empty());

        engine.reveal_tick();
        assert_eq!(engine.visible_trail().len(), 1);

        let mut last = Vec::new();
        while engine.is_revealing() {
            last = engine.reveal_tick();
        }
        assert_eq!(last, vec![RouteCommand::StopReveal]);
        // Snapped to the origin hint once the reveal finished
        assert_eq!(engine.cursor().last_passed_index, 2);
        assert_eq!(engine.visible_trail().len(), 10 - 3 + 1);
    }

    #[test]
    fn test_stale_response_is_dropped() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let origin = Some(GeoPoint::new(0.0, 0.0));

        let a = fetch_of(&engine.update_target(origin, Some(GeoPoint::new(0.0, 0.009))));
        let b = fetch_of(&engine.update_target(origin, Some(GeoPoint::new(0.0, -0.009))));
        assert_ne!(a.1, b.1);

        // A resolves after the key moved to B
        let commands = engine.on_route_fetched(a.0, &a.1, Ok(Some(straight_line(10))));
        assert!(commands.is_empty());
        assert!(engine.polyline().is_empty());
        assert!(engine.is_fetching());
        assert_eq!(engine.destination_key(), Some(b.1.as_str()));

        // B still applies
        let commands = engine.on_route_fetched(b.0, &b.1, Ok(Some(straight_line(4))));
        assert_eq!(commands.len(), 1);
        assert_eq!(engine.polyline().len(), 4);
    }

    #[test]
    fn test_superseded_request_same_key_is_dropped() {
        let mut engine = routed_engine();
        // Walk far off route to force a re-fetch
        let first = fetch_of(&engine.update_target(
            Some(GeoPoint::new(0.01, 0.004)),
            Some(GeoPoint::new(0.0, 0.009)),
        ));
        // An older request id with the same key is ignored
        let commands = engine.on_route_fetched(first.0 - 1, &first.1, Ok(Some(straight_line(3))));
        assert!(commands.is_empty());
        assert_eq!(engine.polyline().len(), 10);
    }

    #[test]
    fn test_failure_clears_route() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let (id, key) = fetch_of(&engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        ));
        let commands = engine.on_route_fetched(
            id,
            &key,
            Err(TrackerError::Http {
                message: "unreachable".to_string(),
                status_code: None,
            }),
        );
        assert!(commands.is_empty());
        assert!(engine.visible_trail().is_empty());
        assert!(!engine.is_fetching());
        assert_eq!(engine.deviation_distance(&GeoPoint::new(0.0, 0.0)), f64::INFINITY);

        // The next position retries
        let retry = engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        assert_eq!(fetch_of(&retry).0, id + 1);
    }

    #[test]
    fn test_empty_route_clears() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let (id, key) = fetch_of(&engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        ));
        assert!(engine.on_route_fetched(id, &key, Ok(None)).is_empty());
        assert!(engine.polyline().is_empty());
        assert_eq!(engine.destination_key(), Some(key.as_str()));
    }

    #[test]
    fn test_deviation_triggers_refetch() {
        let mut engine = routed_engine();
        let target = Some(GeoPoint::new(0.0, 0.009));

        // ~33m off the nearest vertex: still on route
        let commands = engine.update_target(Some(GeoPoint::new(0.0003, 0.003)), target);
        assert!(commands.is_empty());

        // ~100m off: re-route, old trail kept until the new one arrives
        let trail_before = engine.visible_trail().to_vec();
        let commands = engine.update_target(Some(GeoPoint::new(0.0009, 0.003)), target);
        assert!(matches!(commands[..], [RouteCommand::Fetch { .. }]));
        assert_eq!(engine.visible_trail(), &trail_before[..]);
    }

    #[test]
    fn test_small_moves_do_not_trim() {
        let mut engine = routed_engine();
        let target = Some(GeoPoint::new(0.0, 0.009));

        engine.update_target(Some(GeoPoint::new(0.0, 0.0035)), target);
        let trail = engine.visible_trail().to_vec();
        let cursor = *engine.cursor();

        // ~1m further: below the trim threshold
        engine.update_target(Some(GeoPoint::new(0.0, 0.003509)), target);
        assert_eq!(engine.visible_trail(), &trail[..]);
        assert_eq!(*engine.cursor(), cursor);

        // ~50m further: trims
        engine.update_target(Some(GeoPoint::new(0.0, 0.004)), target);
        assert_ne!(engine.visible_trail(), &trail[..]);
    }

    #[test]
    fn test_no_target_clears_everything() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let (id, key) = fetch_of(&engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        ));
        engine.on_route_fetched(id, &key, Ok(Some(straight_line(10))));
        assert!(engine.is_revealing());

        let commands = engine.update_target(Some(GeoPoint::new(0.0, 0.0)), None);
        assert_eq!(commands, vec![RouteCommand::StopReveal]);
        assert!(engine.destination_key().is_none());
        assert!(engine.polyline().is_empty());
        assert!(!engine.is_revealing());
    }

    #[test]
    fn test_target_change_resets_cursor() {
        let mut engine = routed_engine();
        engine.update_target(
            Some(GeoPoint::new(0.0, 0.0065)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        assert_eq!(engine.cursor().last_passed_index, 6);

        engine.update_target(
            Some(GeoPoint::new(0.0, 0.0065)),
            Some(GeoPoint::new(0.001, 0.009)),
        );
        assert_eq!(engine.cursor().last_passed_index, 0);
        assert!(engine.visible_trail().is_empty());
    }

    #[test]
    fn test_new_target_without_origin_waits() {
        let mut engine = RouteGeometryEngine::new(TrackerConfig::default());
        let commands = engine.update_target(None, Some(GeoPoint::new(0.0, 0.009)));
        assert!(commands.is_empty());
        assert!(!engine.is_fetching());

        // First origin for the same key fetches (no route yet = infinite deviation)
        let commands = engine.update_target(
            Some(GeoPoint::new(0.0, 0.0)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        assert!(matches!(commands[..], [RouteCommand::Fetch { .. }]));
    }

    #[test]
    fn test_snapshot_reports_remaining_distance() {
        let mut engine = routed_engine();
        engine.update_target(
            Some(GeoPoint::new(0.0, 0.0045)),
            Some(GeoPoint::new(0.0, 0.009)),
        );
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.visible_trail.len(), 6);
        assert!((snapshot.remaining_distance_m - 500.4).abs() < 1.0);
        assert!(!snapshot.revealing);
    }
}
