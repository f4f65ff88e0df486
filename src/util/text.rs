use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

const ELLIPSIS: &str = "...";

/// Fit `s` into exactly `width` terminal columns.
///
/// Longer strings are cut and end in "...", shorter ones are right-padded with
/// spaces. Widths come from `unicode-width`, so CJK titles (two columns per
/// character) line up with ASCII ones.
///
/// ```
/// use photoview::util::fit_width;
///
/// assert_eq!(fit_width("cat", 5), "cat  ");
/// assert_eq!(fit_width("Hello World", 8), "Hello...");
/// assert_eq!(fit_width("你好世界", 7), "你好...");
/// ```
pub fn fit_width(s: &str, width: usize) -> String {
    let total: usize = s.chars().map(char_width).sum();
    if total <= width {
        let mut out = String::with_capacity(s.len() + width - total);
        out.push_str(s);
        out.extend(std::iter::repeat(' ').take(width - total));
        return out;
    }

    if width <= ELLIPSIS.len() {
        return take_columns(s, width).0.to_string();
    }

    let (head, used) = take_columns(s, width - ELLIPSIS.len());
    let mut out = String::with_capacity(head.len() + width);
    out.push_str(head);
    out.push_str(ELLIPSIS);
    // A wide char that did not fit leaves a one-column hole
    out.extend(std::iter::repeat(' ').take(width - ELLIPSIS.len() - used));
    out
}

/// Replace control characters (including ESC) with spaces.
///
/// Article text comes from a downloaded database and is printed straight to
/// the terminal.
pub fn sanitize_line(s: &str) -> Cow<'_, str> {
    if !s.chars().any(char::is_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(
        s.chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect(),
    )
}

fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0)
}

/// Longest prefix of `s` within `max` columns, and its width.
fn take_columns(s: &str, max: usize) -> (&str, usize) {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        let w = char_width(c);
        if used + w > max {
            return (&s[..idx], used);
        }
        used += w;
    }
    (s, used)
}
