/// Joins recognised words into line text. CJK neighbours are joined without a space.
pub(super) fn join_words<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let mut text = String::new();
    for word in words {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        if !text.is_empty() && needs_space(&text, word) {
            text.push(' ');
        }
        text.push_str(word);
    }
    text
}

pub(super) fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => !(is_cjk_or_kana(a) && is_cjk_or_kana(b)),
        _ => false,
    }
}

/// Collapses runs of whitespace (including the line breaks hOCR puts between spans).
pub(super) fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cjk_or_kana(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0x3400..=0x4DBF
    )
}
