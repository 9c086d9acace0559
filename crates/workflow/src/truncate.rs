//! FIFO truncation of persisted profile text.

/// Separator placed between existing text and the new section.
const SEPARATOR: char = '\n';

/// Append `new` to `existing`, dropping the oldest content until the result
/// fits in `ceiling` characters.
///
/// The cut prefers a line boundary. The new section is always kept whole;
/// if it alone exceeds the ceiling it is cut to the ceiling.
pub fn truncate_fifo(existing: &str, new: &str, ceiling: usize) -> String {
    let new = new.trim_end();
    let new_len = new.chars().count();
    if new_len >= ceiling {
        return new.chars().take(ceiling).collect();
    }

    let existing = existing.trim_end();
    if existing.is_empty() {
        return new.to_string();
    }

    let existing_len = existing.chars().count();
    if existing_len + 1 + new_len <= ceiling {
        return format!("{existing}{SEPARATOR}{new}");
    }

    let budget = ceiling - new_len - 1;
    let kept = tail_at_line_boundary(existing, budget);
    if kept.is_empty() {
        new.to_string()
    } else {
        format!("{kept}{SEPARATOR}{new}")
    }
}

/// The last `max` characters of `text`, advanced past the first line break
/// when the cut lands mid-line and a break exists.
pub fn tail_at_line_boundary(text: &str, max: usize) -> &str {
    let len = text.chars().count();
    if len <= max {
        return text;
    }
    let start = text
        .char_indices()
        .nth(len - max)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let tail = &text[start..];
    if text[..start].ends_with(SEPARATOR) {
        return tail;
    }
    match tail.find(SEPARATOR) {
        Some(i) => &tail[i + 1..],
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(count: usize, width: usize) -> String {
        (0..count)
            .map(|i| format!("{i:0>width$}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn fits_without_truncation() {
        assert_eq!(truncate_fifo("old", "new", 100), "old\nnew");
        assert_eq!(truncate_fifo("", "new", 100), "new");
    }

    #[test]
    fn overflow_keeps_new_section_at_tail() {
        // 199 lines of 9 chars + 198 breaks = 1989... pad to 1990
        let existing = format!("{}x", lines(199, 9));
        assert_eq!(existing.chars().count(), 1990);
        let new = "N".repeat(50);

        let result = truncate_fifo(&existing, &new, 2000);
        assert!(result.chars().count() <= 2000);
        assert!(result.ends_with(&new));
        // Cut landed on a line boundary: the kept head is a whole line.
        let first_line = result.lines().next().unwrap();
        assert_eq!(first_line.len(), 9);
    }

    #[test]
    fn without_line_breaks_cuts_by_chars() {
        let existing = "a".repeat(1990);
        let new = "b".repeat(50);
        let result = truncate_fifo(&existing, &new, 2000);
        assert_eq!(result.chars().count(), 2000);
        assert!(result.ends_with(&new));
    }

    #[test]
    fn oversize_new_section_is_capped() {
        let result = truncate_fifo("old", &"z".repeat(30), 10);
        assert_eq!(result, "z".repeat(10));
    }

    #[test]
    fn result_never_exceeds_ceiling() {
        for existing_len in [0, 5, 50, 150] {
            for new_len in [1, 20, 99] {
                let existing = lines(existing_len, 3);
                let new = "n".repeat(new_len);
                let result = truncate_fifo(&existing, &new, 100);
                assert!(result.chars().count() <= 100, "{existing_len}/{new_len}");
                assert!(result.ends_with(&new));
            }
        }
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let existing = "é".repeat(30);
        let result = truncate_fifo(&existing, "ü", 10);
        assert_eq!(result.chars().count(), 10);
        assert!(result.ends_with('ü'));
    }
}
