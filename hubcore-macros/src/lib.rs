mod utils;

use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Builder options accepted by `#[hubcore::main(...)]` and
/// `#[hubcore::test(...)]`.
const OPTIONS: &[&str] = &["threadpool_size", "monitor_thread", "track_task_tree"];

/// Runs an `async fn main` as the root task of the main thread's hub.
///
/// The function must return `hubcore::Result<T>`, or nothing. The hub is
/// installed as the current thread's hub, so code running after the
/// function can still reach it through `hubcore::get_hub()`.
///
/// ```rust,ignore
/// #[hubcore::main(threadpool_size = 4)]
/// async fn main() -> hubcore::Result<()> {
///     hubcore::sleep(Duration::from_millis(10)).await
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let builder = match builder_expr(attr) {
        Ok(builder) => builder,
        Err(msg) => return compile_error(&msg),
    };

    let Some((mut tokens, pos, block, returns)) = split_async_fn(item) else {
        return compile_error("#[hubcore::main] expects an `async fn`");
    };

    let body = if returns {
        format!(
            "{{
                let hub = {builder}.install().expect(\"failed to start the hub\");
                hub.block_on(async move {{ {block} }})
            }}"
        )
    } else {
        format!(
            "{{
                let hub = {builder}.install().expect(\"failed to start the hub\");
                hub.block_on(async move {{
                    {{ {block} }};
                    ::core::result::Result::Ok::<(), ::hubcore::Error>(())
                }})
                .expect(\"the main task failed\");
            }}"
        )
    };

    match replace_block(&mut tokens, pos, &body) {
        Ok(()) => tokens.into_iter().collect(),
        Err(msg) => compile_error(&msg),
    }
}

/// Runs an `async fn` test on a fresh hub, destroyed when the test ends.
///
/// ```rust,ignore
/// #[hubcore::test]
/// async fn sleeps() -> hubcore::Result<()> {
///     hubcore::sleep(Duration::from_millis(1)).await
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let builder = match builder_expr(attr) {
        Ok(builder) => builder,
        Err(msg) => return compile_error(&msg),
    };

    let Some((mut tokens, pos, block, returns)) = split_async_fn(item) else {
        return compile_error("#[hubcore::test] expects an `async fn`");
    };

    let run = if returns {
        format!("hub.block_on(async move {{ {block} }})")
    } else {
        format!(
            "hub.block_on(async move {{
                {{ {block} }};
                ::core::result::Result::Ok::<(), ::hubcore::Error>(())
            }})"
        )
    };

    let finish = if returns {
        "outcome"
    } else {
        "outcome.expect(\"the test task failed\");"
    };

    let body = format!(
        "{{
            let hub = {builder}.build().expect(\"failed to build the hub\");
            let outcome = {run};
            hub.destroy(::core::option::Option::Some(true));
            {finish}
        }}"
    );

    if let Err(msg) = replace_block(&mut tokens, pos, &body) {
        return compile_error(&msg);
    }

    let test_attr: TokenStream = "#[test]".parse().unwrap();
    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(tokens);

    result.into_iter().collect()
}

/// Turns `key = value, ...` into a `HubBuilder` expression.
fn builder_expr(attr: TokenStream) -> Result<String, String> {
    let mut builder = String::from("::hubcore::HubBuilder::new()");

    for arg in utils::split_args(attr) {
        let arg = utils::tokens_to_string(&arg);
        let Some((key, value)) = arg.split_once('=') else {
            return Err(format!("expected `option = value`, found `{arg}`"));
        };

        let key = key.trim();
        let value = value.trim();
        if !OPTIONS.contains(&key) {
            return Err(format!(
                "unknown option `{key}`, expected one of: {}",
                OPTIONS.join(", ")
            ));
        }
        if value.is_empty() {
            return Err(format!("missing value for `{key}`"));
        }

        builder.push_str(&format!(".{key}({value})"));
    }

    Ok(builder)
}

/// Strips `async` from a function item.
///
/// Returns the remaining tokens, the position of the body, the body's
/// source and whether the function declares a return type.
fn split_async_fn(item: TokenStream) -> Option<(Vec<TokenTree>, usize, String, bool)> {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    let async_pos = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))?;
    tokens.remove(async_pos);

    let pos = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))?;

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => return None,
    };

    let returns = utils::has_return_type(&tokens[..pos]);

    Some((tokens, pos, block, returns))
}

fn replace_block(tokens: &mut [TokenTree], pos: usize, body: &str) -> Result<(), String> {
    let body: TokenStream = body
        .parse()
        .map_err(|err| format!("hubcore macro error: {err}"))?;

    let TokenTree::Group(inner) = body
        .into_iter()
        .next()
        .ok_or_else(|| String::from("hubcore macro error: empty body"))?
    else {
        return Err(String::from("hubcore macro error: malformed body"));
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, inner.stream()));
    Ok(())
}

fn compile_error(msg: &str) -> TokenStream {
    format!("compile_error!({msg:?});").parse().unwrap()
}
