use crate::config::{InputConfig, TouchMode};
use crate::error::EngineError;
use futures::future::{select_all, FutureExt, LocalBoxFuture};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tojex_core::{ResponseSource, Side};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    /// Key name as the host reports it, compared case-insensitively.
    Key(String),
    TouchStart(Side),
    TouchEnd(Side),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFilter {
    Key(String),
    TouchStart(Side),
    AnyTouch,
    /// A finger (or mouse button) going down on either half.
    AnyTouchStart,
}

impl InputFilter {
    pub fn matches(&self, kind: &InputKind) -> bool {
        match (self, kind) {
            (InputFilter::Key(want), InputKind::Key(got)) => want.eq_ignore_ascii_case(got),
            (InputFilter::TouchStart(want), InputKind::TouchStart(got)) => want == got,
            (InputFilter::AnyTouch, InputKind::TouchStart(_) | InputKind::TouchEnd(_)) => true,
            (InputFilter::AnyTouchStart, InputKind::TouchStart(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerCounters {
    pub registered: u64,
    pub unregistered: u64,
}

struct Listener {
    filter: InputFilter,
    tx: mpsc::UnboundedSender<InputEvent>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
    counters: ListenerCounters,
}

/// Fan-out point between the host's raw input and response sources.
/// Every subscription is accounted for and removed when dropped.
#[derive(Clone, Default)]
pub struct InputHub {
    state: Arc<Mutex<HubState>>,
}

impl std::fmt::Debug for InputHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHub")
            .field("active_listeners", &self.active_listeners())
            .field("counters", &self.counters())
            .finish()
    }
}

impl InputHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, filter: InputFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.insert(id, Listener { filter, tx });
        state.counters.registered += 1;
        Subscription {
            id,
            state: Arc::clone(&self.state),
            rx,
        }
    }

    /// Delivers an event stamped now. Returns how many listeners got it.
    pub fn dispatch(&self, kind: InputKind) -> usize {
        self.dispatch_at(kind, Instant::now())
    }

    pub fn dispatch_at(&self, kind: InputKind, at: Instant) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for listener in state.listeners.values() {
            if listener.filter.matches(&kind)
                && listener
                    .tx
                    .send(InputEvent {
                        kind: kind.clone(),
                        at,
                    })
                    .is_ok()
            {
                delivered += 1;
            }
        }
        trace!(?kind, delivered, "input dispatched");
        delivered
    }

    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn counters(&self) -> ListenerCounters {
        self.lock().counters
    }
}

/// A registered listener. Dropping it unregisters.
pub struct Subscription {
    id: u64,
    state: Arc<Mutex<HubState>>,
    rx: mpsc::UnboundedReceiver<InputEvent>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.listeners.remove(&self.id).is_some() {
            state.counters.unregistered += 1;
        }
    }
}

/// A settled response: which physical choice was made, how, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    pub side: Side,
    pub source: ResponseSource,
    pub key: Option<String>,
    pub at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Key { key: String, side: Side },
    Tap(Side),
    DoubleTap { side: Side, window: Duration },
    LongPress { side: Side, hold: Duration },
}

pub type ResponseFuture = LocalBoxFuture<'static, Option<Captured>>;

impl SourceSpec {
    /// Registers with `hub` immediately and returns a future owning the
    /// registration. Dropping the future unregisters.
    pub fn listen(self, hub: &InputHub) -> ResponseFuture {
        match self {
            SourceSpec::Key { key, side } => {
                let mut sub = hub.subscribe(InputFilter::Key(key.clone()));
                async move {
                    let event = sub.next().await?;
                    Some(Captured {
                        side,
                        source: ResponseSource::Key,
                        key: Some(key),
                        at: event.at,
                    })
                }
                .boxed_local()
            }
            SourceSpec::Tap(side) => {
                let mut sub = hub.subscribe(InputFilter::TouchStart(side));
                async move {
                    let event = sub.next().await?;
                    Some(Captured {
                        side,
                        source: ResponseSource::Tap,
                        key: None,
                        at: event.at,
                    })
                }
                .boxed_local()
            }
            SourceSpec::DoubleTap { side, window } => {
                let mut sub = hub.subscribe(InputFilter::AnyTouch);
                async move {
                    let mut last_tap: Option<Instant> = None;
                    loop {
                        let event = sub.next().await?;
                        if !matches!(event.kind, InputKind::TouchStart(_)) {
                            continue;
                        }
                        match last_tap {
                            Some(prev) if event.at.saturating_duration_since(prev) <= window => {
                                return Some(Captured {
                                    side,
                                    source: ResponseSource::DoubleTap,
                                    key: None,
                                    at: event.at,
                                });
                            }
                            _ => last_tap = Some(event.at),
                        }
                    }
                }
                .boxed_local()
            }
            SourceSpec::LongPress { side, hold } => {
                let mut sub = hub.subscribe(InputFilter::AnyTouch);
                async move {
                    let mut pressed: Option<Instant> = None;
                    loop {
                        match pressed {
                            None => {
                                let event = sub.next().await?;
                                if matches!(event.kind, InputKind::TouchStart(_)) {
                                    pressed = Some(event.at);
                                }
                            }
                            Some(start) => {
                                let deadline = start + hold;
                                match tokio::time::timeout_at(deadline, sub.next()).await {
                                    Err(_) => {
                                        return Some(Captured {
                                            side,
                                            source: ResponseSource::LongPress,
                                            key: None,
                                            at: deadline,
                                        });
                                    }
                                    Ok(None) => return None,
                                    Ok(Some(event)) => {
                                        if matches!(event.kind, InputKind::TouchEnd(_)) {
                                            pressed = None;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                .boxed_local()
            }
        }
    }
}

/// The response sources a trial races, per the input configuration.
pub fn source_specs(input: &InputConfig) -> Vec<SourceSpec> {
    let mut specs = vec![
        SourceSpec::Key {
            key: input.left_key.clone(),
            side: Side::Left,
        },
        SourceSpec::Key {
            key: input.right_key.clone(),
            side: Side::Right,
        },
    ];
    match input.touch {
        TouchMode::Halves => {
            specs.push(SourceSpec::Tap(Side::Left));
            specs.push(SourceSpec::Tap(Side::Right));
        }
        TouchMode::Gestures {
            double_tap,
            double_tap_window_ms,
            long_press_ms,
        } => {
            specs.push(SourceSpec::DoubleTap {
                side: double_tap,
                window: Duration::from_millis(double_tap_window_ms),
            });
            specs.push(SourceSpec::LongPress {
                side: double_tap.opposite(),
                hold: Duration::from_millis(long_press_ms),
            });
        }
    }
    specs
}

pub fn response_sources(input: &InputConfig, hub: &InputHub) -> Vec<ResponseFuture> {
    source_specs(input)
        .into_iter()
        .map(|spec| spec.listen(hub))
        .collect()
}

/// Resolves with the first source that produces a response. The remaining
/// sources are dropped, which unregisters them. There is no timeout.
pub async fn first_settled(sources: Vec<ResponseFuture>) -> Result<Captured, EngineError> {
    if sources.is_empty() {
        return Err(EngineError::NoResponseSources);
    }
    let mut pending = sources;
    loop {
        let (outcome, _index, rest) = select_all(pending).await;
        match outcome {
            Some(captured) => return Ok(captured),
            None if rest.is_empty() => return Err(EngineError::InputClosed),
            None => pending = rest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn until_listening(hub: &InputHub, count: usize) {
        while hub.active_listeners() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_set_is_an_error() {
        assert_eq!(
            first_settled(Vec::new()).await,
            Err(EngineError::NoResponseSources)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_key_wins_and_all_listeners_released() {
        let hub = InputHub::new();
        let input = InputConfig::default();
        let sources = response_sources(&input, &hub);
        assert_eq!(hub.active_listeners(), 4);

        let sender = hub.clone();
        let press = async move {
            tokio::time::sleep(Duration::from_millis(420)).await;
            sender.dispatch(InputKind::Key("P".into()));
            tokio::time::sleep(Duration::from_millis(10)).await;
            sender.dispatch(InputKind::Key("q".into()))
        };
        let start = Instant::now();
        let (captured, late_deliveries) = tokio::join!(first_settled(sources), press);
        assert_eq!(late_deliveries, 0);
        let captured = captured.unwrap();
        assert_eq!(captured.side, Side::Right);
        assert_eq!(captured.source, ResponseSource::Key);
        assert_eq!(captured.key.as_deref(), Some("p"));
        assert_eq!(captured.at - start, Duration::from_millis(420));

        assert_eq!(hub.active_listeners(), 0);
        assert_eq!(
            hub.counters(),
            ListenerCounters {
                registered: 4,
                unregistered: 4
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tap_on_half_maps_to_side() {
        let hub = InputHub::new();
        let sources = response_sources(&InputConfig::default(), &hub);
        let sender = hub.clone();
        let tap = async move {
            until_listening(&sender, 4).await;
            sender.dispatch(InputKind::TouchStart(Side::Left));
        };
        let (captured, ()) = tokio::join!(first_settled(sources), tap);
        let captured = captured.unwrap();
        assert_eq!(captured.side, Side::Left);
        assert_eq!(captured.source, ResponseSource::Tap);
        assert_eq!(hub.active_listeners(), 0);
    }

    fn gesture_input() -> InputConfig {
        InputConfig {
            touch: TouchMode::Gestures {
                double_tap: Side::Left,
                double_tap_window_ms: 300,
                long_press_ms: 600,
            },
            ..InputConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn double_tap_within_window() {
        let hub = InputHub::new();
        let sources = response_sources(&gesture_input(), &hub);
        let sender = hub.clone();
        let taps = async move {
            sender.dispatch(InputKind::TouchStart(Side::Right));
            sender.dispatch(InputKind::TouchEnd(Side::Right));
            tokio::time::sleep(Duration::from_millis(150)).await;
            sender.dispatch(InputKind::TouchStart(Side::Right));
        };
        let (captured, ()) = tokio::join!(first_settled(sources), taps);
        let captured = captured.unwrap();
        assert_eq!(captured.source, ResponseSource::DoubleTap);
        assert_eq!(captured.side, Side::Left);
    }

    #[tokio::test(start_paused = true)]
    async fn long_press_settles_after_hold() {
        let hub = InputHub::new();
        let sources = response_sources(&gesture_input(), &hub);
        let sender = hub.clone();
        let start = Instant::now();
        let press = async move {
            sender.dispatch(InputKind::TouchStart(Side::Left));
        };
        let (captured, ()) = tokio::join!(first_settled(sources), press);
        let captured = captured.unwrap();
        assert_eq!(captured.source, ResponseSource::LongPress);
        assert_eq!(captured.side, Side::Right);
        assert_eq!(captured.at - start, Duration::from_millis(600));
        assert_eq!(hub.active_listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_press_is_not_a_long_press() {
        let hub = InputHub::new();
        let sources = response_sources(&gesture_input(), &hub);
        let sender = hub.clone();
        let start = Instant::now();
        let input = async move {
            sender.dispatch(InputKind::TouchStart(Side::Left));
            tokio::time::sleep(Duration::from_millis(100)).await;
            sender.dispatch(InputKind::TouchEnd(Side::Left));
            tokio::time::sleep(Duration::from_millis(900)).await;
            sender.dispatch(InputKind::Key("q".into()));
        };
        let (captured, ()) = tokio::join!(first_settled(sources), input);
        let captured = captured.unwrap();
        assert_eq!(captured.source, ResponseSource::Key);
        assert_eq!(captured.at - start, Duration::from_millis(1000));
    }

    #[test]
    fn dropping_unpolled_sources_unregisters() {
        let hub = InputHub::new();
        let sources = response_sources(&InputConfig::default(), &hub);
        assert_eq!(hub.active_listeners(), 4);
        drop(sources);
        assert_eq!(hub.active_listeners(), 0);
        assert_eq!(hub.counters().unregistered, 4);
    }

    #[test]
    fn filters_match_kinds() {
        assert!(InputFilter::Key("q".into()).matches(&InputKind::Key("Q".into())));
        assert!(!InputFilter::Key("q".into()).matches(&InputKind::Key("p".into())));
        assert!(InputFilter::AnyTouch.matches(&InputKind::TouchEnd(Side::Left)));
        assert!(InputFilter::AnyTouchStart.matches(&InputKind::TouchStart(Side::Right)));
        assert!(!InputFilter::AnyTouchStart.matches(&InputKind::TouchEnd(Side::Left)));
        assert!(!InputFilter::TouchStart(Side::Left).matches(&InputKind::TouchStart(Side::Right)));
    }
}
