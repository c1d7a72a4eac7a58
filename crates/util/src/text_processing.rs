/// Fuzzy subsequence scorer used to rank palette candidates.
///
/// Every whitespace-separated token of `needle` must appear, in order and
/// case-insensitively, as a subsequence of `hay`. Returns `None` when any
/// token fails to match. Consecutive runs, word-boundary hits, prefix
/// matches and early matches raise the score; long candidates lower it.
///
/// ```rust
/// use stepflow_util::fuzzy_score;
///
/// assert!(fuzzy_score("control.while", "while").is_some());
/// assert!(fuzzy_score("time.wait", "wt").is_some());
/// assert!(fuzzy_score("time.wait", "zz").is_none());
/// assert_eq!(fuzzy_score("anything", ""), Some(0));
/// ```
pub fn fuzzy_score(hay: &str, needle: &str) -> Option<i64> {
    let tokens: Vec<Vec<char>> = needle
        .split_whitespace()
        .map(|token| token.chars().flat_map(char::to_lowercase).collect())
        .collect();
    if tokens.is_empty() {
        return Some(0);
    }
    if hay.is_empty() {
        return None;
    }

    let lower: String = hay.chars().flat_map(char::to_lowercase).collect();
    let chars: Vec<char> = lower.chars().collect();

    let mut cursor = 0usize;
    let mut total = 0i64;
    for token in &tokens {
        total += score_token(&lower, &chars, token, &mut cursor)?;
    }

    Some(total - chars.len() as i64 / 8)
}

fn score_token(lower: &str, chars: &[char], token: &[char], cursor: &mut usize) -> Option<i64> {
    let mut score = 0i64;
    let mut streak = 0i64;
    let mut first_hit = None;
    let mut previous_hit: Option<usize> = None;

    for needle_char in token {
        let offset = chars[*cursor..].iter().position(|character| character == needle_char)?;
        let index = *cursor + offset;
        first_hit.get_or_insert(index);

        if let Some(previous) = previous_hit {
            streak = if index == previous + 1 { streak + 1 } else { 1 };
            // gap penalty
            score -= (index - previous - 1) as i64 / 2;
        }
        score += 6 * streak;
        if is_word_boundary(chars, index) {
            score += 10;
        }

        previous_hit = Some(index);
        *cursor = index + 1;
    }

    let token_text: String = token.iter().collect();
    if lower.starts_with(&token_text) {
        score += 30;
    }
    if let Some(start) = first_hit {
        score += (20 - start as i64).max(0);
    }
    Some(score)
}

fn is_word_boundary(chars: &[char], index: usize) -> bool {
    index == 0
        || chars
            .get(index - 1)
            .is_some_and(|character| character.is_whitespace() || character.is_ascii_punctuation())
}
