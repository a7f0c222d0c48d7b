use proc_macro::TokenTree;

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Each argument is returned as a `Vec<TokenTree>`. Commas inside groups
/// belong to the group's token and are not separators.
pub(crate) fn split_args(input: proc_macro::TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(current);
                    current = Vec::new();
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Converts a slice of tokens into a Rust source string.
///
/// Consecutive identifiers are separated by a space so they do not merge
/// (`foo bar` vs `foobar`).
pub(crate) fn tokens_to_string(tokens: &[TokenTree]) -> String {
    let mut out = String::new();
    let mut prev_was_ident = false;

    for t in tokens {
        let needs_space = prev_was_ident && matches!(t, TokenTree::Ident(_));
        if needs_space {
            out.push(' ');
        }

        out.push_str(&t.to_string());
        prev_was_ident = matches!(t, TokenTree::Ident(_));
    }

    out
}

/// Returns `true` if a function signature contains a top-level `->`.
pub(crate) fn has_return_type(signature: &[TokenTree]) -> bool {
    signature.windows(2).any(|pair| {
        matches!(
            (&pair[0], &pair[1]),
            (TokenTree::Punct(p1), TokenTree::Punct(p2))
                if p1.as_char() == '-' && p2.as_char() == '>'
        )
    })
}
