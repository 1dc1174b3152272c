use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ratatui::text::Line;

use crate::core::message::{Message, MessageId};
use crate::ui::render_units::build_render_units;
use crate::utils::scroll::ScrollCalculator;

/// How long a notice stays on screen before the event loop clears it.
pub(crate) const NOTICE_TTL: Duration = Duration::from_secs(5);

struct PrewrapCache {
    width: u16,
    revision: u64,
    lines: Vec<Line<'static>>,
}

/// Everything the renderer draws from: the transcript, the input line,
/// scroll state, and streaming flags.
pub struct UiState {
    pub messages: VecDeque<Message>,
    next_message_id: MessageId,
    pub input: String,
    pub scroll_offset: u16,
    /// While true the view stays pinned to the transcript bottom as new
    /// content arrives. Scrolling up clears it; returning to the bottom
    /// restores it.
    pub auto_scroll: bool,
    pub is_streaming: bool,
    /// Id of the assistant message the active stream appends into. Stays
    /// `None` until the first delta arrives.
    pub streamed_into: Option<MessageId>,
    pub pulse_start: Instant,
    pub notice: Option<String>,
    notice_set_at: Option<Instant>,
    pub exit_requested: bool,
    prewrap_cache: Option<PrewrapCache>,
    layout_revision: u64,
}

impl UiState {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_message_id: 0,
            input: String::new(),
            scroll_offset: 0,
            auto_scroll: true,
            is_streaming: false,
            streamed_into: None,
            pulse_start: Instant::now(),
            notice: None,
            notice_set_at: None,
            exit_requested: false,
            prewrap_cache: None,
            layout_revision: 0,
        }
    }

    pub fn alloc_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push_back(message);
        self.invalidate_prewrap_cache();
    }

    /// Mutable access to a message by id. Searched from the back because the
    /// only message mutated after append is the one being streamed into.
    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.invalidate_prewrap_cache();
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    pub fn begin_streaming(&mut self) {
        self.is_streaming = true;
        self.streamed_into = None;
        self.pulse_start = Instant::now();
        self.invalidate_prewrap_cache();
    }

    pub fn end_streaming(&mut self) {
        self.is_streaming = false;
        self.streamed_into = None;
        self.invalidate_prewrap_cache();
    }

    /// True between pressing Enter and the first delta of the response, which
    /// is when the pending indicator shows.
    pub fn awaiting_first_delta(&self) -> bool {
        self.is_streaming && self.streamed_into.is_none()
    }

    pub fn set_notice(&mut self, text: String) {
        self.notice = Some(text);
        self.notice_set_at = Some(Instant::now());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
        self.notice_set_at = None;
    }

    pub fn active_notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Drops a notice whose time is up. Returns true when something changed
    /// so the caller knows to redraw.
    pub fn clear_expired_notice(&mut self) -> bool {
        match self.notice_set_at {
            Some(at) if at.elapsed() >= NOTICE_TTL => {
                self.clear_notice();
                true
            }
            _ => false,
        }
    }

    pub fn invalidate_prewrap_cache(&mut self) {
        self.layout_revision = self.layout_revision.wrapping_add(1);
    }

    /// Transcript lines wrapped to the given width. Rebuilt only when the
    /// width or the transcript changed since the last call.
    pub fn get_prewrapped_lines_cached(&mut self, terminal_width: u16) -> &[Line<'static>] {
        let stale = match &self.prewrap_cache {
            Some(cache) => {
                cache.width != terminal_width || cache.revision != self.layout_revision
            }
            None => true,
        };
        if stale {
            let units = build_render_units(
                &self.messages,
                self.streamed_into,
                self.awaiting_first_delta(),
            );
            let mut flat: Vec<Line<'static>> = Vec::new();
            for unit in units {
                flat.extend(unit.lines);
            }
            let lines = ScrollCalculator::prewrap_lines(&flat, terminal_width);
            self.prewrap_cache = Some(PrewrapCache {
                width: terminal_width,
                revision: self.layout_revision,
                lines,
            });
        }
        self.prewrap_cache
            .as_ref()
            .map(|cache| cache.lines.as_slice())
            .unwrap_or(&[])
    }

    pub fn calculate_wrapped_line_count(&mut self, terminal_width: u16) -> u16 {
        self.get_prewrapped_lines_cached(terminal_width).len() as u16
    }

    pub fn calculate_max_scroll_offset(
        &mut self,
        terminal_width: u16,
        available_height: u16,
    ) -> u16 {
        let total = self.calculate_wrapped_line_count(terminal_width);
        ScrollCalculator::max_scroll_offset(total, available_height)
    }

    #[cfg(test)]
    pub(crate) fn backdate_notice(&mut self, age: Duration) {
        if let Some(past) = Instant::now().checked_sub(age) {
            self.notice_set_at = Some(past);
        }
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}
