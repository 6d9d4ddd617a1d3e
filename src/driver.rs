//! Async driver for the fetch cycle and animation loop.
//!
//! Runs a [`FleetTracker`] on a single-threaded tokio runtime. All timers
//! (one-second countdown, repeating fetch, animation frames) are multiplexed
//! in one `select!` loop; fetches run as `spawn_local` tasks and hand their
//! results back over an mpsc channel, so the tracker itself is only ever
//! touched from the loop.
//!
//! Must be awaited inside a [`tokio::task::LocalSet`].

use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::Options;
use crate::fetch::{FetchKind, FetchRequest};
use crate::selection::SelectionState;
use crate::source::SnapshotSource;
use crate::surface::RenderSurface;
use crate::tracker::{FetchResult, FleetTracker};

/// Fallback wake-up when no repeating timer is armed.
const IDLE_TIMER: Duration = Duration::from_secs(3600);

/// UI events forwarded to the driver.
#[derive(Debug, Clone)]
pub enum DriverCommand {
    ApplySelection(SelectionState),
    ApplyOptions(Options),
    SetGroupVisible { group_id: String, visible: bool },
    Interact(String),
    MarkerClicked(String),
    MapClicked,
    Shutdown,
}

type Completion = (FetchRequest, FetchResult);

/// Current time on the runtime clock (honours paused test time).
pub fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn spawn_fetch<Src>(
    source: &Rc<Src>,
    request: FetchRequest,
    tx: &mpsc::UnboundedSender<Completion>,
) where
    Src: SnapshotSource + 'static,
{
    let source = Rc::clone(source);
    let tx = tx.clone();
    tokio::task::spawn_local(async move {
        let result = match request.kind {
            FetchKind::Entities => {
                FetchResult::Entities(source.fetch_entities(&request.scope).await)
            }
            FetchKind::Overlays => {
                FetchResult::Overlays(source.fetch_overlay_shapes(&request.scope).await)
            }
        };
        // The driver may already have shut down
        let _ = tx.send((request, result));
    });
}

fn handle_command<S: RenderSurface>(
    tracker: &mut FleetTracker<S>,
    command: DriverCommand,
    now: Instant,
) -> Vec<FetchRequest> {
    match command {
        DriverCommand::ApplySelection(selection) => tracker.apply_selection(selection, now),
        DriverCommand::ApplyOptions(options) => tracker.apply_options(options, now),
        DriverCommand::SetGroupVisible { group_id, visible } => {
            tracker.set_group_visible(&group_id, visible);
            Vec::new()
        }
        DriverCommand::Interact(group_id) => {
            tracker.interact(&group_id);
            Vec::new()
        }
        DriverCommand::MarkerClicked(entity_id) => {
            tracker.marker_clicked(&entity_id);
            Vec::new()
        }
        DriverCommand::MapClicked => {
            tracker.map_clicked();
            Vec::new()
        }
        DriverCommand::Shutdown => Vec::new(),
    }
}

/// Drive `tracker` until a [`DriverCommand::Shutdown`] arrives or the command
/// channel closes, then hand the tracker back.
///
/// `initial` are requests already issued by the caller (typically from
/// [`FleetTracker::apply_selection`] or preference restore).
pub async fn run_tracker<S, Src>(
    mut tracker: FleetTracker<S>,
    source: Rc<Src>,
    initial: Vec<FetchRequest>,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
) -> FleetTracker<S>
where
    S: RenderSurface,
    Src: SnapshotSource + 'static,
{
    let (tx, mut completions) = mpsc::unbounded_channel::<Completion>();

    let mut countdown = tokio::time::interval(Duration::from_secs(1));
    countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);
    countdown.tick().await;

    let mut frames = tokio::time::interval(tracker.config().frame_interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("[Driver] Started with {} initial requests", initial.len());
    for request in initial {
        spawn_fetch(&source, request, &tx);
    }

    loop {
        let timer_at = tokio::time::Instant::from_std(
            tracker
                .fetch_controller()
                .next_due()
                .unwrap_or_else(|| clock_now() + IDLE_TIMER),
        );

        tokio::select! {
            command = commands.recv() => {
                let command = match command {
                    None | Some(DriverCommand::Shutdown) => break,
                    Some(command) => command,
                };
                debug!("[Driver] Command: {:?}", command);
                for request in handle_command(&mut tracker, command, clock_now()) {
                    spawn_fetch(&source, request, &tx);
                }
            }
            Some((request, result)) = completions.recv() => {
                tracker.complete_fetch(&request, result, clock_now());
            }
            _ = countdown.tick() => {
                if let Some(request) = tracker.on_countdown_tick() {
                    spawn_fetch(&source, request, &tx);
                }
            }
            _ = tokio::time::sleep_until(timer_at) => {
                if let Some(request) = tracker.poll_fetch_timer(clock_now()) {
                    spawn_fetch(&source, request, &tx);
                }
            }
            _ = frames.tick(), if tracker.needs_frame() => {
                tracker.animation_frame(clock_now());
            }
        }
    }

    info!("[Driver] Stopped: {:?}", tracker.stats());
    tracker
}
