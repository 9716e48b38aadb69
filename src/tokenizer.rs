//! Source text to tokens.
//!
//! Tokenizing is plain text substitution followed by a split on spaces.
//! Brace and bracket sugar become ordinary forms, parentheses are padded so
//! they split into their own tokens, and line breaks and tabs act as spaces.
//! There is no quoting or escaping.

/// Substitutions applied in order. The space after `map` and `list` keeps
/// `{@k 1}` from fusing into the single token `map@k`.
const REWRITES: [(&str, &str); 9] = [
    ("{", " (map "),
    ("}", ")"),
    ("[", " (list "),
    ("]", ")"),
    ("(", " ( "),
    (")", " ) "),
    ("\n", " "),
    ("\t", " "),
    ("\r", " "),
];

/// Split `source` into tokens.
///
/// The rewrites are applied to the caller's buffer in place, so after the
/// call `source` holds the desugared text.
pub fn tokenize(source: &mut String) -> Vec<String> {
    for (from, to) in REWRITES {
        if source.contains(from) {
            *source = source.replace(from, to);
        }
    }
    source
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}
