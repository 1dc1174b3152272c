use ratatui::style::Style;
use ratatui::text::{Line, Span};

/// Scroll math for the transcript view.
///
/// The renderer draws pre-wrapped lines instead of relying on ratatui's
/// built-in wrapping, so wrapped line counts and scroll offsets always agree
/// with what is on screen.
pub struct ScrollCalculator;

impl ScrollCalculator {
    /// Wrap styled lines to a given width at word boundaries, breaking tokens
    /// longer than the width. Styles survive wrapping; adjacent runs with the
    /// same style are merged.
    pub fn prewrap_lines(lines: &[Line], terminal_width: u16) -> Vec<Line<'static>> {
        let width = terminal_width as usize;
        if width == 0 {
            // Nothing sensible to wrap to; just return owned clones.
            return lines.iter().map(owned_line).collect();
        }

        let mut out: Vec<Line<'static>> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.spans.is_empty() {
                out.push(Line::from(""));
                continue;
            }
            wrap_line(line, width, &mut out);
        }
        out
    }

    /// The offset that puts the transcript bottom at the viewport bottom.
    pub fn max_scroll_offset(total_wrapped_lines: u16, available_height: u16) -> u16 {
        total_wrapped_lines.saturating_sub(available_height)
    }
}

fn owned_line(line: &Line) -> Line<'static> {
    if line.spans.is_empty() {
        return Line::from("");
    }
    let spans: Vec<Span<'static>> = line
        .spans
        .iter()
        .map(|s| Span::styled(s.content.to_string(), s.style))
        .collect();
    Line::from(spans)
}

fn append_run(spans: &mut Vec<Span<'static>>, style: Style, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = spans.last_mut() {
        if last.style == style {
            let mut combined = String::with_capacity(last.content.len() + text.len());
            combined.push_str(&last.content);
            combined.push_str(text);
            *last = Span::styled(combined, style);
            return;
        }
    }
    spans.push(Span::styled(text.to_string(), style));
}

/// A word accumulated as styled character runs, so a wrap point inside the
/// word keeps each character's original style.
type StyledWord = Vec<(Vec<char>, Style)>;

struct WrapState {
    spans: Vec<Span<'static>>,
    len: usize,
    emitted_any: bool,
}

impl WrapState {
    fn emit(&mut self, out: &mut Vec<Line<'static>>) {
        out.push(Line::from(std::mem::take(&mut self.spans)));
        self.len = 0;
        self.emitted_any = true;
    }

    /// Place the accumulated word, wrapping before it when it does not fit
    /// and chunking it across lines when it is wider than the viewport.
    fn place_word(
        &mut self,
        word: &mut StyledWord,
        word_len: &mut usize,
        width: usize,
        out: &mut Vec<Line<'static>>,
    ) {
        if *word_len == 0 {
            return;
        }

        if self.len > 0 && self.len + *word_len > width {
            self.emit(out);
        }

        let mut seg_idx = 0usize;
        let mut seg_pos = 0usize;
        let mut remaining = *word_len;
        while remaining > 0 {
            let space_left = width.saturating_sub(self.len);
            let take = remaining.min(space_left.max(1));
            let mut to_take = take;
            while to_take > 0 && seg_idx < word.len() {
                let (chars, style) = &word[seg_idx];
                let seg_rem = chars.len().saturating_sub(seg_pos);
                let here = to_take.min(seg_rem);
                if here > 0 {
                    let slice: String = chars[seg_pos..seg_pos + here].iter().collect();
                    append_run(&mut self.spans, *style, &slice);
                    self.len += here;
                    to_take -= here;
                    seg_pos += here;
                }
                if seg_pos >= chars.len() {
                    seg_idx += 1;
                    seg_pos = 0;
                }
            }
            remaining -= take;
            if remaining > 0 {
                self.emit(out);
            }
        }

        word.clear();
        *word_len = 0;
    }
}

fn wrap_line(line: &Line, width: usize, out: &mut Vec<Line<'static>>) {
    let mut state = WrapState {
        spans: Vec::with_capacity(line.spans.len() + 4),
        len: 0,
        emitted_any: false,
    };
    let mut word: StyledWord = Vec::new();
    let mut word_len = 0usize;

    for span in &line.spans {
        for ch in span.content.chars() {
            if ch == ' ' {
                state.place_word(&mut word, &mut word_len, width, out);

                // A space that fits is kept; one at the boundary wraps and is
                // dropped so continuation lines never start with whitespace.
                if state.len < width {
                    append_run(&mut state.spans, span.style, " ");
                    state.len += 1;
                } else {
                    state.emit(out);
                }
            } else {
                match word.last_mut() {
                    Some((chars, style)) if *style == span.style => chars.push(ch),
                    _ => word.push((vec![ch], span.style)),
                }
                word_len += 1;
            }
        }
    }

    state.place_word(&mut word, &mut word_len, width, out);
    if !state.spans.is_empty() {
        state.emit(out);
    }
    if !state.emitted_any {
        // Whitespace-only input still occupies one visual line.
        out.push(Line::from(""));
    }
}
