//! # Ride Session
//!
//! Event dispatcher that owns the single active ride.
//!
//! The session consumes [`SessionEvent`]s one at a time from an unbounded
//! channel, hands each to the synchronous route engine and driver machine,
//! and executes the commands they return:
//!
//! - route fetches and the reveal ticker are spawned tasks whose results
//!   re-enter the loop as events
//! - lifecycle timers are spawned sleeps keyed by their absolute deadline.
//!   The sleeps run on the monotonic clock, which stops while a phone app
//!   is suspended, so every event also checks the armed deadlines against
//!   the wall clock and fires the ones already due
//! - side effects go to the [`RideApi`] / [`RealtimeLink`] collaborators
//!
//! Every fetch, ticker and timer handle is registered in a [`TaskScope`].
//! Clearing the ride (completion, cancellation, emergency reset) aborts all
//! of them before the next event is processed, so nothing scheduled for the
//! old ride can fire against a cleared one. Side-effect calls are detached:
//! a cancellation request must still reach the server after teardown.
//!
//! After every event the session publishes a [`TrackingSnapshot`] through a
//! `watch` channel for the presentation layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::geofence::ServiceAreaPolygon;
use crate::lifecycle::{
    active_target, boarding_timer, ride_phase, Confirmation, DriverMachine, LifecycleTimer,
    PresentationPhase, RealtimeEvent, Ride, RideStatus, SideEffect, TimerKind,
};
use crate::route::{RouteCommand, RouteGeometryEngine, RouteProvider, RouteSnapshot};
use crate::{GeoPoint, PositionSample};

// ============================================================================
// Collaborators
// ============================================================================

/// Which side of the ride this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Rider,
}

/// Backend ride API. Every call is a single attempt; the session only
/// retries drop-off completion, and only via the next position sample.
pub trait RideApi: Send + Sync {
    fn start_ride(&self, ride_id: String) -> BoxFuture<'_, Result<()>>;
    fn complete_ride(&self, ride_id: String) -> BoxFuture<'_, Result<()>>;
    fn report_arrival(&self, ride_id: String, arrived_at: DateTime<Utc>)
        -> BoxFuture<'_, Result<()>>;
    fn become_available(&self) -> BoxFuture<'_, Result<()>>;
    fn cancel_ride(&self, ride_id: String) -> BoxFuture<'_, Result<()>>;
    fn emergency_cancel(&self, ride_id: String) -> BoxFuture<'_, Result<()>>;
}

/// Realtime socket with an explicit lifecycle.
pub trait RealtimeLink: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<()>>;
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;
    fn update_location(&self, sample: PositionSample) -> BoxFuture<'_, Result<()>>;
}

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub routes: Arc<dyn RouteProvider>,
    pub api: Arc<dyn RideApi>,
    pub realtime: Arc<dyn RealtimeLink>,
}

// ============================================================================
// Events and Snapshots
// ============================================================================

/// Input to the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A position sample of this client's own device
    Position(PositionSample),
    /// Server push
    Realtime(RealtimeEvent),
    /// A ride became active on this client (request created or job accepted)
    RideAssigned(Ride),
    /// Local cancellation of the active ride
    CancelRide,
    /// Drop everything and request an emergency cancel
    EmergencyReset,
    RouteFetched {
        request_id: u64,
        destination_key: String,
        result: Result<Option<Vec<GeoPoint>>>,
    },
    RevealTick,
    TimerFired(LifecycleTimer),
    /// The app returned from the background; re-arm timers from the wall
    /// clock
    Resume,
    SideEffectDone {
        effect: SideEffect,
        result: Result<()>,
    },
    Shutdown,
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub role: Role,
    pub ride_id: Option<String>,
    pub status: Option<RideStatus>,
    pub confirmation: Option<Confirmation>,
    pub phase: Option<PresentationPhase>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub route: RouteSnapshot,
    pub available: bool,
}

impl TrackingSnapshot {
    fn empty(role: Role) -> Self {
        Self {
            role,
            ride_id: None,
            status: None,
            confirmation: None,
            phase: None,
            arrived_at: None,
            route: RouteSnapshot::default(),
            available: false,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Task Scope
// ============================================================================

/// Owner of every cancellable task spawned for the active ride.
#[derive(Default)]
struct TaskScope {
    timers: HashMap<LifecycleTimer, JoinHandle<()>>,
    reveal: Option<JoinHandle<()>>,
    fetches: Vec<JoinHandle<()>>,
}

impl TaskScope {
    fn track_fetch(&mut self, handle: JoinHandle<()>) {
        self.fetches.retain(|h| !h.is_finished());
        self.fetches.push(handle);
    }

    fn cancel_reveal(&mut self) {
        if let Some(handle) = self.reveal.take() {
            handle.abort();
        }
    }

    /// Abort every timer not in `desired`.
    fn retain_timers(&mut self, desired: &[LifecycleTimer]) {
        self.timers.retain(|timer, handle| {
            let keep = desired.contains(timer);
            if !keep {
                handle.abort();
            }
            keep
        });
    }

    fn cancel_timers(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_timers();
        self.cancel_reveal();
        for handle in self.fetches.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ============================================================================
// Session
// ============================================================================

/// Cloneable sender side of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshots: watch::Receiver<TrackingSnapshot>,
}

impl SessionHandle {
    pub fn send(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| TrackerError::SessionClosed)
    }

    pub fn update_position(&self, sample: PositionSample) -> Result<()> {
        self.send(SessionEvent::Position(sample))
    }

    pub fn push_realtime(&self, event: RealtimeEvent) -> Result<()> {
        self.send(SessionEvent::Realtime(event))
    }

    /// Decode and forward a raw push payload.
    pub fn push_realtime_json(&self, json: &str) -> Result<()> {
        self.push_realtime(RealtimeEvent::from_json(json)?)
    }

    pub fn assign_ride(&self, ride: Ride) -> Result<()> {
        self.send(SessionEvent::RideAssigned(ride))
    }

    pub fn cancel_ride(&self) -> Result<()> {
        self.send(SessionEvent::CancelRide)
    }

    pub fn emergency_reset(&self) -> Result<()> {
        self.send(SessionEvent::EmergencyReset)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(SessionEvent::Resume)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionEvent::Shutdown)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> TrackingSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingSnapshot> {
        self.snapshots.clone()
    }
}

/// One client's live tracking and lifecycle state.
pub struct RideSession {
    role: Role,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,

    ride: Option<Ride>,
    own_position: Option<PositionSample>,
    engine: RouteGeometryEngine,
    // Only the driver runs proximity logic
    driver: Option<DriverMachine>,
    scope: TaskScope,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    snapshot_tx: watch::Sender<TrackingSnapshot>,
    snapshot_rx: watch::Receiver<TrackingSnapshot>,
}

impl RideSession {
    pub fn new(
        role: Role,
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackingSnapshot::empty(role));
        let driver = match role {
            Role::Driver => Some(DriverMachine::new(config.clone(), None)),
            Role::Rider => None,
        };

        let session = Self {
            role,
            engine: RouteGeometryEngine::new(config.clone()),
            config,
            clock,
            collaborators,
            ride: None,
            own_position: None,
            driver,
            scope: TaskScope::default(),
            events_tx,
            events_rx,
            snapshot_tx,
            snapshot_rx,
        };
        let handle = session.handle();
        (session, handle)
    }

    /// Use this service area for auto-connect instead of the installed one.
    pub fn with_service_area(mut self, area: Arc<ServiceAreaPolygon>) -> Self {
        if self.role == Role::Driver {
            self.driver = Some(DriverMachine::new(self.config.clone(), Some(area)));
        }
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.events_tx.clone(),
            snapshots: self.snapshot_rx.clone(),
        }
    }

    /// Connect the realtime link and process events until shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.collaborators.realtime.connect().await?;
        info!("[RideSession] Started as {:?}", self.role);
        self.reconcile();

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
            self.handle_event(event);
        }

        self.scope.cancel_all();
        if let Err(e) = self.collaborators.realtime.disconnect().await {
            warn!("[RideSession] Disconnect failed: {}", e);
        }
        info!("[RideSession] Stopped");
        Ok(())
    }

    fn handle_event(&mut self, event: SessionEvent) {
        let now = self.clock.now();
        match event {
            SessionEvent::Position(sample) => {
                if !sample.point.is_valid() {
                    debug!("[RideSession] Ignoring malformed position");
                    return;
                }
                self.own_position = Some(sample);
                if let Some(driver) = self.driver.as_mut() {
                    let effects = driver.on_position(self.ride.as_mut(), &sample, now);
                    self.dispatch_all(effects);
                }
            }
            SessionEvent::Realtime(event) => self.apply_realtime(event),
            SessionEvent::RideAssigned(ride) => {
                let replaces = self.ride.as_ref().is_some_and(|r| r.id != ride.id);
                if replaces {
                    self.teardown_ride();
                }
                info!(
                    "[RideSession] Ride {} assigned ({})",
                    ride.id,
                    ride.status.as_str()
                );
                self.ride = Some(ride);
            }
            SessionEvent::CancelRide => {
                if let Some(ride) = self.ride.as_ref().filter(|r| !r.status.is_terminal()) {
                    info!("[RideSession] Cancelling ride {}", ride.id);
                    let effect = SideEffect::CancelRide {
                        ride_id: ride.id.clone(),
                    };
                    self.dispatch(effect);
                }
                self.teardown_ride();
            }
            SessionEvent::EmergencyReset => {
                warn!("[RideSession] Emergency reset");
                if let Some(ride) = self.ride.as_ref() {
                    let effect = SideEffect::EmergencyCancel {
                        ride_id: ride.id.clone(),
                    };
                    self.dispatch(effect);
                }
                self.teardown_ride();
            }
            SessionEvent::RouteFetched {
                request_id,
                destination_key,
                result,
            } => {
                let commands = self
                    .engine
                    .on_route_fetched(request_id, &destination_key, result);
                self.execute(commands);
            }
            SessionEvent::RevealTick => {
                let commands = self.engine.reveal_tick();
                self.execute(commands);
                // Reveal frames only change the trail
                self.publish(now);
                return;
            }
            SessionEvent::TimerFired(timer) => {
                if self.scope.timers.remove(&timer).is_none() {
                    debug!("[RideSession] Ignoring cancelled timer {:?}", timer.kind);
                    return;
                }
                self.fire_timer(&timer, now);
            }
            SessionEvent::Resume => {
                info!("[RideSession] Resumed, re-arming timers");
                self.scope.cancel_timers();
            }
            SessionEvent::SideEffectDone { effect, result } => {
                if let SideEffect::PersistLocation { .. } = effect {
                    if let Err(e) = result {
                        debug!("[RideSession] Location update failed: {}", e);
                    }
                    return;
                }
                match self.driver.as_mut() {
                    Some(driver) => driver.on_side_effect_result(&effect, &result, self.ride.as_mut()),
                    None => {
                        if let Err(e) = &result {
                            warn!("[RideSession] {} failed: {}", effect.name(), e);
                        }
                    }
                }
            }
            SessionEvent::Shutdown => return,
        }
        self.reconcile();
    }

    fn apply_realtime(&mut self, event: RealtimeEvent) {
        let ride = match self.ride.as_mut() {
            Some(ride) if ride.id == event.ride_id() => ride,
            _ => {
                debug!(
                    "[RideSession] Push for unknown ride {}, ignoring",
                    event.ride_id()
                );
                return;
            }
        };
        if ride.apply_patch(event.patch()) {
            debug!(
                "[RideSession] Ride {} now {} ({:?})",
                ride.id,
                ride.status.as_str(),
                ride.confirmation
            );
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Recompute everything derived from the current inputs.
    fn reconcile(&mut self) {
        let now = self.clock.now();
        self.fire_due_timers(now);

        if let Some(ride) = self.ride.as_ref().filter(|r| r.is_settled()) {
            info!(
                "[RideSession] Ride {} finished as {}",
                ride.id,
                ride.status.as_str()
            );
            self.teardown_ride();
        }

        let target = self.ride.as_ref().and_then(active_target);
        let origin = self.route_origin();
        let commands = self.engine.update_target(origin, target);
        self.execute(commands);

        self.arm_timers(now);
        self.publish(now);
    }

    /// Start of the route: the driver's position, whichever side is asking.
    fn route_origin(&self) -> Option<GeoPoint> {
        let own = self.own_position.map(|s| s.point);
        match self.role {
            Role::Driver => own,
            Role::Rider => self
                .ride
                .as_ref()
                .and_then(|r| r.counterparty_location)
                .or(own),
        }
    }

    /// Drop the ride and abort everything scheduled for it.
    fn teardown_ride(&mut self) {
        self.ride = None;
        if let Some(driver) = self.driver.as_mut() {
            driver.reset_ride_guards();
        }
        self.scope.cancel_all();
        // Handles are already aborted
        let _ = self.engine.clear();
    }

    fn desired_timers(&self, now: DateTime<Utc>) -> Vec<LifecycleTimer> {
        let mut desired = Vec::new();
        if let Some(ride) = self.ride.as_ref() {
            desired.extend(boarding_timer(ride, now, &self.config));
            if let Some(driver) = self.driver.as_ref() {
                desired.extend(driver.auto_start_timer(ride));
            }
        }
        desired
    }

    fn fire_timer(&mut self, timer: &LifecycleTimer, now: DateTime<Utc>) {
        // Boarding only changes the derived phase, which the next publish picks up
        if timer.kind == TimerKind::AutoStart {
            if let Some(driver) = self.driver.as_mut() {
                let effects = driver.on_deadline(timer, self.ride.as_mut(), now);
                self.dispatch_all(effects);
            }
        }
    }

    /// Fire every wanted timer whose deadline has passed on the wall clock,
    /// whether or not its sleep has elapsed.
    fn fire_due_timers(&mut self, now: DateTime<Utc>) {
        for timer in self.desired_timers(now) {
            if !timer.is_due(now) {
                continue;
            }
            if let Some(handle) = self.scope.timers.remove(&timer) {
                handle.abort();
            }
            debug!(
                "[RideSession] {:?} for ride {} is due, firing now",
                timer.kind, timer.ride_id
            );
            self.fire_timer(&timer, now);
        }
    }

    fn arm_timers(&mut self, now: DateTime<Utc>) {
        let desired = self.desired_timers(now);
        self.scope.retain_timers(&desired);

        for timer in desired {
            if timer.is_due(now) || self.scope.timers.contains_key(&timer) {
                continue;
            }
            let delay = timer.sleep_duration(now);
            debug!(
                "[RideSession] Arming {:?} for ride {} in {}ms",
                timer.kind,
                timer.ride_id,
                delay.as_millis()
            );
            let tx = self.events_tx.clone();
            let fired = timer.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(SessionEvent::TimerFired(fired));
            });
            self.scope.timers.insert(timer, handle);
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        let ride = self.ride.as_ref();
        let snapshot = TrackingSnapshot {
            role: self.role,
            ride_id: ride.map(|r| r.id.clone()),
            status: ride.map(|r| r.status),
            confirmation: ride.map(|r| r.confirmation.clone()),
            phase: ride.and_then(|r| ride_phase(r, now, &self.config)),
            arrived_at: ride.and_then(|r| r.arrived_at),
            route: self.engine.snapshot(),
            available: self.driver.as_ref().is_some_and(|d| d.is_available()),
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    // ========================================================================
    // Command Execution
    // ========================================================================

    fn execute(&mut self, commands: Vec<RouteCommand>) {
        for command in commands {
            match command {
                RouteCommand::Fetch {
                    request_id,
                    destination_key,
                    origin,
                    destination,
                } => {
                    debug!(
                        "[RideSession] Fetching route #{} to {}",
                        request_id, destination_key
                    );
                    let routes = Arc::clone(&self.collaborators.routes);
                    let tx = self.events_tx.clone();
                    let handle = tokio::spawn(async move {
                        let result = routes.get_route(origin, destination).await;
                        let _ = tx.send(SessionEvent::RouteFetched {
                            request_id,
                            destination_key,
                            result,
                        });
                    });
                    self.scope.track_fetch(handle);
                }
                RouteCommand::StartReveal { interval } => {
                    self.scope.cancel_reveal();
                    let tx = self.events_tx.clone();
                    self.scope.reveal = Some(tokio::spawn(reveal_ticker(tx, interval)));
                }
                RouteCommand::StopReveal => self.scope.cancel_reveal(),
            }
        }
    }

    fn dispatch_all(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            self.dispatch(effect);
        }
    }

    /// Run a side effect on a detached task and report its outcome.
    fn dispatch(&self, effect: SideEffect) {
        let collaborators = self.collaborators.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = perform(&collaborators, &effect).await;
            if tx.send(SessionEvent::SideEffectDone { effect, result }).is_err() {
                debug!("[RideSession] Session gone before side effect finished");
            }
        });
    }
}

async fn reveal_ticker(tx: mpsc::UnboundedSender<SessionEvent>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if tx.send(SessionEvent::RevealTick).is_err() {
            break;
        }
    }
}

async fn perform(collaborators: &Collaborators, effect: &SideEffect) -> Result<()> {
    let api = &collaborators.api;
    match effect {
        SideEffect::StartRide { ride_id } => api.start_ride(ride_id.clone()).await,
        SideEffect::CompleteRide { ride_id } => api.complete_ride(ride_id.clone()).await,
        SideEffect::ReportArrival {
            ride_id,
            arrived_at,
        } => api.report_arrival(ride_id.clone(), *arrived_at).await,
        SideEffect::BecomeAvailable => api.become_available().await,
        SideEffect::CancelRide { ride_id } => api.cancel_ride(ride_id.clone()).await,
        SideEffect::EmergencyCancel { ride_id } => api.emergency_cancel(ride_id.clone()).await,
        SideEffect::PersistLocation { sample } => {
            collaborators.realtime.update_location(*sample).await
        }
    }
}
