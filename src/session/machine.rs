use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::events::{ScrollRequest, SessionEvent};
use super::timers::TimerSet;
use super::Phase;
use crate::config::SessionTiming;
use crate::message::{Author, ChatMessage, HistoryStoryOption};
use crate::scroll::{ScrollInput, ScrollTarget, autoscroll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reveal {
    Idle,
    Running,
    Done,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    messages: Vec<ChatMessage>,
    typing: Option<Author>,
    choices: Vec<HistoryStoryOption>,
    visible: usize,
    reveal: Reveal,
    /// Bumped whenever a reveal run starts or is interrupted.
    reveal_run: u64,
    hiding: bool,
    /// Choice set handed in while a hide was settling.
    deferred: Option<Vec<HistoryStoryOption>>,
    choice_epoch: u64,
    /// Bumped by `clear_messages` and shutdown; timers from older epochs are void.
    epoch: u64,
    reveal_timers: TimerSet,
    hide_timers: TimerSet,
    delivery_timers: TimerSet,
    slot: Option<(u64, CancellationToken)>,
    next_ticket: u64,
    closed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            messages: Vec::new(),
            typing: None,
            choices: Vec::new(),
            visible: 0,
            reveal: Reveal::Idle,
            reveal_run: 0,
            hiding: false,
            deferred: None,
            choice_epoch: 0,
            epoch: 0,
            reveal_timers: TimerSet::new(),
            hide_timers: TimerSet::new(),
            delivery_timers: TimerSet::new(),
            slot: None,
            next_ticket: 0,
            closed: false,
        }
    }

    fn current_arc(&self) -> u32 {
        self.messages
            .iter()
            .filter_map(ChatMessage::arc_number)
            .max()
            .unwrap_or(1)
    }

    fn cancel_slot(&mut self) {
        if let Some((id, token)) = self.slot.take() {
            debug!(ticket = id, "cancelling in-flight request");
            token.cancel();
        }
    }

    fn cancel_timers(&mut self) {
        self.reveal_timers.cancel_all();
        self.hide_timers.cancel_all();
        self.delivery_timers.cancel_all();
    }
}

struct Shared {
    state: Mutex<State>,
    events: mpsc::UnboundedSender<SessionEvent>,
    timing: SessionTiming,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // The host may have dropped its receiver; the session keeps working.
        let _ = self.events.send(event);
    }

    fn choices_changed(&self, st: &State) {
        self.emit(SessionEvent::ChoicesChanged {
            visible: st.visible,
            hiding: st.hiding,
        });
    }

    fn scroll(&self, st: &State, choices_appeared: bool, typing_started: bool, message_delta: usize) {
        let directive = autoscroll(ScrollInput {
            phase: st.phase,
            current_arc: st.current_arc(),
            choices_appeared,
            typing_started,
            message_delta,
        });
        let delay = directive.delay;
        let request = match directive.target {
            ScrollTarget::None => return,
            ScrollTarget::Bottom => ScrollRequest::Bottom { delay },
            ScrollTarget::LastMoonMessage => match st.messages.iter().rev().find(|m| m.is_moon()) {
                Some(moon) => ScrollRequest::Message {
                    id: moon.id().to_string(),
                    delay,
                },
                None => ScrollRequest::Bottom { delay },
            },
        };
        self.emit(SessionEvent::Scroll(request));
    }

    fn push_messages(&self, st: &mut State, messages: Vec<ChatMessage>) {
        if messages.is_empty() {
            return;
        }
        let delta = messages.len();
        st.messages.extend(messages);
        self.emit(SessionEvent::MessagesChanged);
        self.scroll(st, false, false, delta);
    }

    /// Stop a running reveal. The visible count is reset by the next run.
    fn interrupt_reveal(&self, st: &mut State) {
        st.reveal_timers.cancel_all();
        st.reveal_run += 1;
        if st.reveal == Reveal::Running {
            trace!(visible = st.visible, "choice reveal interrupted");
            st.reveal = Reveal::Idle;
        }
    }

    fn start_reveal_if_eligible(self: &Arc<Self>, st: &mut State) {
        if st.closed
            || st.choices.is_empty()
            || st.typing.is_some()
            || st.hiding
            || st.reveal != Reveal::Idle
        {
            return;
        }
        st.reveal_timers.cancel_all();
        st.reveal_run += 1;
        st.reveal = Reveal::Running;
        st.visible = 0;
        self.choices_changed(st);

        // One extra slot for the custom answer affordance.
        let total = st.choices.len() + 1;
        let run = st.reveal_run;
        let cadence = self.timing.reveal_cadence();
        let weak = Arc::downgrade(self);
        st.reveal_timers.push(tokio::spawn(async move {
            for step in 1..=total {
                tokio::time::sleep(cadence).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let mut st = shared.lock();
                if st.reveal_run != run || st.reveal != Reveal::Running {
                    return;
                }
                st.visible = step;
                if step == total {
                    st.reveal = Reveal::Done;
                }
                trace!(step, total, "choice revealed");
                shared.choices_changed(&st);
                shared.scroll(&st, true, false, 0);
            }
        }));
    }

    fn replace_choices(self: &Arc<Self>, st: &mut State, options: Vec<HistoryStoryOption>) {
        self.interrupt_reveal(st);
        st.reveal = Reveal::Idle;
        st.choices = options;
        st.visible = 0;
        st.choice_epoch += 1;
        self.choices_changed(st);
        self.start_reveal_if_eligible(st);
    }

    fn set_typing(self: &Arc<Self>, st: &mut State, author: Option<Author>) {
        if st.typing == author {
            return;
        }
        let started = author.is_some();
        st.typing = author;
        if started {
            self.interrupt_reveal(st);
        }
        self.emit(SessionEvent::MessagesChanged);
        if started {
            self.scroll(st, false, true, 0);
        } else {
            self.start_reveal_if_eligible(st);
        }
    }

    fn spawn_hide(self: &Arc<Self>, st: &mut State) {
        let epoch = st.epoch;
        let choice_epoch = st.choice_epoch;
        let settle = self.timing.hide_settle();
        let weak = Arc::downgrade(self);
        st.hide_timers.push(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut st = shared.lock();
            if st.epoch != epoch || !st.hiding {
                return;
            }
            st.hiding = false;
            if st.choice_epoch == choice_epoch {
                st.choices.clear();
                st.visible = 0;
                st.reveal = Reveal::Idle;
            }
            trace!("choice hide settled");
            match st.deferred.take() {
                Some(next) => shared.replace_choices(&mut st, next),
                None => {
                    shared.choices_changed(&st);
                    shared.start_reveal_if_eligible(&mut st);
                }
            }
        }));
    }

    fn spawn_delivery(self: &Arc<Self>, st: &mut State, message: ChatMessage, delay: Duration) {
        let epoch = st.epoch;
        let weak: Weak<Shared> = Arc::downgrade(self);
        st.delivery_timers.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut st = shared.lock();
            shared.land(&mut st, epoch, message);
        }));
    }

    /// Append a delayed message unless the session moved to a new epoch.
    fn land(self: &Arc<Self>, st: &mut State, epoch: u64, message: ChatMessage) -> bool {
        if st.epoch != epoch || st.closed {
            return false;
        }
        let author = message.author();
        trace!(%author, "delayed message delivered");
        self.push_messages(st, vec![message]);
        if st.typing == Some(author) {
            self.set_typing(st, None);
        }
        true
    }
}

/// Handle for one story-generation request.
///
/// Only the most recently issued ticket is current; starting a new request or
/// clearing the session cancels the previous token.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    id: u64,
    cancel: CancellationToken,
}

impl RequestTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token to pass down to the generation pipeline.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The live story session.
///
/// All commands are synchronous and take effect immediately; timed steps
/// (choice reveal, hide settling, delayed delivery) run as tokio tasks that
/// hold only a weak reference back to the session. Commands that start a
/// timer must be called from within a tokio runtime.
pub struct StorySession {
    shared: Arc<Shared>,
}

impl StorySession {
    pub fn new(timing: SessionTiming) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::new()),
            events: tx,
            timing,
        });
        (Self { shared }, rx)
    }

    pub fn timing(&self) -> SessionTiming {
        self.shared.timing
    }

    pub fn add_message(&self, message: ChatMessage) {
        self.add_messages(vec![message]);
    }

    pub fn add_messages(&self, messages: Vec<ChatMessage>) {
        let mut st = self.shared.lock();
        self.shared.push_messages(&mut st, messages);
    }

    /// Show `author` as typing, replacing any previous author, or clear it.
    pub fn set_typing(&self, author: Option<Author>) {
        let mut st = self.shared.lock();
        self.shared.set_typing(&mut st, author);
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut st = self.shared.lock();
        if st.phase == phase {
            return;
        }
        debug!(from = ?st.phase, to = ?phase, "phase changed");
        st.phase = phase;
        self.shared.emit(SessionEvent::PhaseChanged(phase));
    }

    /// Reset to an empty idle session. Cancels every timer and any in-flight
    /// request. Calling it twice is harmless.
    pub fn clear_messages(&self) {
        let mut st = self.shared.lock();
        st.epoch += 1;
        st.cancel_slot();
        st.cancel_timers();
        st.messages.clear();
        st.typing = None;
        st.choices.clear();
        st.deferred = None;
        st.hiding = false;
        st.visible = 0;
        st.reveal = Reveal::Idle;
        st.reveal_run += 1;
        st.choice_epoch += 1;
        st.phase = Phase::Idle;
        self.shared.emit(SessionEvent::MessagesChanged);
        self.shared.choices_changed(&st);
        self.shared.emit(SessionEvent::PhaseChanged(Phase::Idle));
    }

    /// Replace the choice set and restart the sequential reveal. An empty set
    /// hides choices immediately. While a hide is settling the new set is
    /// held back and shown once the hide completes.
    pub fn set_choices(&self, options: Vec<HistoryStoryOption>) {
        let mut st = self.shared.lock();
        if st.hiding {
            trace!(count = options.len(), "choices deferred until hide settles");
            st.deferred = Some(options);
            return;
        }
        self.shared.replace_choices(&mut st, options);
    }

    /// Mark the current choices as hiding and clear them after the settle delay.
    pub fn hide_choices(&self) {
        let mut st = self.shared.lock();
        if st.hiding || st.choices.is_empty() {
            return;
        }
        st.hiding = true;
        self.shared.interrupt_reveal(&mut st);
        self.shared.choices_changed(&st);
        self.shared.spawn_hide(&mut st);
    }

    /// Show the author as typing, then append `message` after `delay`.
    pub fn deliver_after(&self, message: ChatMessage, delay: Duration) {
        let mut st = self.shared.lock();
        if st.closed {
            return;
        }
        self.shared.set_typing(&mut st, Some(message.author()));
        self.shared.spawn_delivery(&mut st, message, delay);
    }

    /// Like [`deliver_after`](Self::deliver_after), but waits in the caller's
    /// task. Returns `false` when the session was cleared or shut down first.
    pub async fn deliver(&self, message: ChatMessage, delay: Duration) -> bool {
        let epoch = {
            let mut st = self.shared.lock();
            if st.closed {
                return false;
            }
            self.shared.set_typing(&mut st, Some(message.author()));
            st.epoch
        };
        tokio::time::sleep(delay).await;
        let mut st = self.shared.lock();
        self.shared.land(&mut st, epoch, message)
    }

    /// Start a new generation request, cancelling the previous one.
    pub fn begin_request(&self) -> RequestTicket {
        let mut st = self.shared.lock();
        st.cancel_slot();
        st.next_ticket += 1;
        let ticket = RequestTicket {
            id: st.next_ticket,
            cancel: CancellationToken::new(),
        };
        if st.closed {
            ticket.cancel.cancel();
        } else {
            st.slot = Some((ticket.id, ticket.cancel.clone()));
        }
        ticket
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        let st = self.shared.lock();
        Self::current(&st, ticket)
    }

    fn current(st: &State, ticket: &RequestTicket) -> bool {
        !ticket.is_cancelled() && matches!(&st.slot, Some((id, _)) if *id == ticket.id)
    }

    /// Apply a finished request: clear typing, append `messages` and, when
    /// given, install a new choice set. Stale tickets change nothing.
    pub fn commit(
        &self,
        ticket: &RequestTicket,
        messages: Vec<ChatMessage>,
        choices: Option<Vec<HistoryStoryOption>>,
    ) -> bool {
        let mut st = self.shared.lock();
        if !Self::current(&st, ticket) {
            debug!(ticket = ticket.id, "discarding result of superseded request");
            return false;
        }
        st.slot = None;
        let was_typing = st.typing.take().is_some();
        self.shared.push_messages(&mut st, messages);
        if was_typing {
            self.shared.emit(SessionEvent::MessagesChanged);
        }
        match choices {
            Some(options) if !st.hiding => self.shared.replace_choices(&mut st, options),
            Some(options) => st.deferred = Some(options),
            None => self.shared.start_reveal_if_eligible(&mut st),
        }
        true
    }

    /// Finish a request without a result, clearing typing if it is current.
    pub fn release(&self, ticket: &RequestTicket) -> bool {
        let mut st = self.shared.lock();
        if !Self::current(&st, ticket) {
            return false;
        }
        st.slot = None;
        self.shared.set_typing(&mut st, None);
        true
    }

    pub fn get_phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn get_messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().messages.clone()
    }

    /// Highest arc number among story and finale messages, or 1.
    pub fn get_current_arc(&self) -> u32 {
        self.shared.lock().current_arc()
    }

    pub fn typing(&self) -> Option<Author> {
        self.shared.lock().typing
    }

    pub fn choices(&self) -> Vec<HistoryStoryOption> {
        self.shared.lock().choices.clone()
    }

    /// Number of revealed slots, counting the custom answer slot last.
    pub fn visible_count(&self) -> usize {
        self.shared.lock().visible
    }

    pub fn visible_choices(&self) -> Vec<HistoryStoryOption> {
        let st = self.shared.lock();
        st.choices.iter().take(st.visible).cloned().collect()
    }

    pub fn custom_slot_visible(&self) -> bool {
        let st = self.shared.lock();
        !st.choices.is_empty() && st.visible > st.choices.len()
    }

    pub fn is_hiding(&self) -> bool {
        self.shared.lock().hiding
    }

    /// Cancel every timer and the in-flight request. Later timer callbacks
    /// and commits become no-ops.
    pub fn shutdown(&self) {
        let mut st = self.shared.lock();
        if st.closed {
            return;
        }
        st.closed = true;
        st.epoch += 1;
        st.reveal_run += 1;
        st.cancel_slot();
        st.cancel_timers();
        debug!("session shut down");
    }
}

impl Drop for StorySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Planet;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn opt(id: &str) -> HistoryStoryOption {
        HistoryStoryOption {
            id: id.into(),
            title: id.to_uppercase(),
            description: String::new(),
        }
    }

    fn session() -> (StorySession, mpsc::UnboundedReceiver<SessionEvent>) {
        StorySession::new(SessionTiming::default())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn reveals_choices_one_by_one_plus_custom_slot() {
        let (s, _rx) = session();
        s.set_choices(vec![opt("a"), opt("b")]);
        assert_eq!(s.visible_count(), 0);
        tokio::time::sleep(ms(520)).await;
        assert_eq!(s.visible_count(), 1);
        tokio::time::sleep(ms(500)).await;
        assert_eq!(s.visible_choices().len(), 2);
        assert!(!s.custom_slot_visible());
        tokio::time::sleep(ms(500)).await;
        assert_eq!(s.visible_count(), 3);
        assert!(s.custom_slot_visible());
        tokio::time::sleep(ms(2000)).await;
        assert_eq!(s.visible_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_set_right_after_non_empty_shows_nothing() {
        let (s, _rx) = session();
        s.set_choices(vec![opt("a"), opt("b")]);
        s.set_choices(Vec::new());
        tokio::time::sleep(ms(3000)).await;
        assert_eq!(s.visible_count(), 0);
        assert!(s.visible_choices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_interrupts_and_restarts_reveal() {
        let (s, _rx) = session();
        s.set_choices(vec![opt("a"), opt("b")]);
        tokio::time::sleep(ms(600)).await;
        assert_eq!(s.visible_count(), 1);

        s.set_typing(Some(Author::Moon));
        tokio::time::sleep(ms(2000)).await;
        assert_eq!(s.visible_count(), 1);

        s.set_typing(None);
        assert_eq!(s.visible_count(), 0);
        tokio::time::sleep(ms(600)).await;
        assert_eq!(s.visible_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn choices_wait_while_typing() {
        let (s, _rx) = session();
        s.set_typing(Some(Author::Story));
        s.set_choices(vec![opt("a")]);
        tokio::time::sleep(ms(2000)).await;
        assert_eq!(s.visible_count(), 0);
        s.set_typing(None);
        tokio::time::sleep(ms(1100)).await;
        assert_eq!(s.visible_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hide_settles_then_shows_deferred_set() {
        let (s, _rx) = session();
        s.set_choices(vec![opt("a"), opt("b")]);
        tokio::time::sleep(ms(2000)).await;
        assert_eq!(s.visible_count(), 3);

        s.hide_choices();
        assert!(s.is_hiding());
        s.set_choices(vec![opt("c")]);
        assert_eq!(s.choices()[0].id, "a");

        tokio::time::sleep(ms(510)).await;
        assert!(!s.is_hiding());
        assert_eq!(s.choices(), vec![opt("c")]);
        assert_eq!(s.visible_count(), 0);
        tokio::time::sleep(ms(510)).await;
        assert_eq!(s.visible_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hide_without_new_set_clears_choices() {
        let (s, _rx) = session();
        s.set_choices(vec![opt("a")]);
        tokio::time::sleep(ms(700)).await;
        s.hide_choices();
        tokio::time::sleep(ms(600)).await;
        assert!(s.choices().is_empty());
        assert_eq!(s.visible_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_is_idempotent_and_cancels_timers() {
        let (s, _rx) = session();
        s.set_phase(Phase::Story);
        s.add_messages(vec![ChatMessage::moon("привет"), ChatMessage::story("сцена", Some(2), None)]);
        s.set_choices(vec![opt("a"), opt("b")]);
        s.deliver_after(ChatMessage::planet(Planet::Mars, "поздно"), ms(800));
        tokio::time::sleep(ms(100)).await;

        s.clear_messages();
        s.clear_messages();
        for _ in 0..2 {
            assert_eq!(s.get_phase(), Phase::Idle);
            assert!(s.get_messages().is_empty());
            assert_eq!(s.visible_count(), 0);
            assert_eq!(s.typing(), None);
            tokio::time::sleep(ms(2000)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_after_types_then_appends() {
        let (s, _rx) = session();
        s.deliver_after(ChatMessage::moon("я здесь"), ms(1200));
        assert_eq!(s.typing(), Some(Author::Moon));
        assert!(s.get_messages().is_empty());
        tokio::time::sleep(ms(1250)).await;
        assert_eq!(s.typing(), None);
        assert_eq!(s.get_messages()[0].content(), "я здесь");
    }

    #[tokio::test(start_paused = true)]
    async fn awaited_delivery_is_dropped_after_clear() {
        let (s, _rx) = session();
        let s = Arc::new(s);
        let pending = tokio::spawn({
            let s = s.clone();
            async move { s.deliver(ChatMessage::moon("не успела"), ms(1200)).await }
        });
        tokio::time::sleep(ms(100)).await;
        assert_eq!(s.typing(), Some(Author::Moon));

        s.clear_messages();
        assert!(!pending.await.unwrap());
        assert!(s.get_messages().is_empty());
        assert_eq!(s.typing(), None);
    }

    #[tokio::test]
    async fn current_arc_tracks_highest_story_arc() {
        let (s, _rx) = session();
        assert_eq!(s.get_current_arc(), 1);
        s.add_messages(vec![
            ChatMessage::story("a", Some(3), None),
            ChatMessage::moon("m"),
            ChatMessage::story("b", Some(2), None),
        ]);
        assert_eq!(s.get_current_arc(), 3);
        s.add_message(ChatMessage::finale("конец", Some(6), None));
        assert_eq!(s.get_current_arc(), 6);
    }

    #[tokio::test]
    async fn newer_request_supersedes_older() {
        let (s, _rx) = session();
        let first = s.begin_request();
        let second = s.begin_request();
        assert!(first.is_cancelled());
        assert!(!s.commit(&first, vec![ChatMessage::story("старое", Some(1), None)], None));
        assert!(s.commit(&second, vec![ChatMessage::story("новое", Some(1), None)], None));
        assert_eq!(s.get_messages().len(), 1);
        assert_eq!(s.get_messages()[0].content(), "новое");
        assert!(!s.commit(&second, vec![ChatMessage::system("дважды")], None));
    }

    #[tokio::test]
    async fn clear_cancels_in_flight_request() {
        let (s, _rx) = session();
        let ticket = s.begin_request();
        s.clear_messages();
        assert!(ticket.is_cancelled());
        assert!(!s.commit(&ticket, vec![ChatMessage::story("x", Some(1), None)], None));
        assert!(s.get_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_arc_reveal_scrolls_to_moon_message() {
        let (s, mut rx) = session();
        s.set_phase(Phase::Story);
        let moon = ChatMessage::moon("вступление");
        let moon_id = moon.id().to_string();
        s.add_messages(vec![moon, ChatMessage::story("сцена", Some(1), None)]);
        drain(&mut rx);

        s.set_choices(vec![opt("a")]);
        tokio::time::sleep(ms(600)).await;
        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Scroll(ScrollRequest::Message {
            id: moon_id,
            delay: ms(1000),
        })));
    }

    #[tokio::test]
    async fn dialogue_messages_scroll_to_bottom_immediately() {
        let (s, mut rx) = session();
        s.set_phase(Phase::Dialogue);
        s.add_message(ChatMessage::system("Марс подключился"));
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                SessionEvent::PhaseChanged(Phase::Dialogue),
                SessionEvent::MessagesChanged,
                SessionEvent::Scroll(ScrollRequest::Bottom { delay: Duration::ZERO }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drop_tears_down_timers() {
        let (s, mut rx) = session();
        s.set_choices(vec![opt("a")]);
        drop(s);
        tokio::time::sleep(ms(2000)).await;
        let events = drain(&mut rx);
        assert!(events.iter().all(|e| matches!(e, SessionEvent::ChoicesChanged { visible: 0, .. })));
        assert!(rx.recv().await.is_none());
    }
}
