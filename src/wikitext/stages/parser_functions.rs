//! Built-in parser functions
//!
//! `{{#if:…}}`, `{{lc:…}}` and friends. The template handler resolves the
//! function name and the text after the colon; argument keys arrive
//! expanded, argument values are expanded here on demand so untaken
//! branches are never expanded.

use super::attribute_expander::ExpansionScope;
use crate::wikitext::token::utils::{tokens_to_string, trim_tokens};
use crate::wikitext::token::{Kv, KvValue, TagToken, Token};
use std::collections::HashMap;
use tracing::debug;

/// Canonical names of the functions implemented here.
pub const IMPLEMENTED: &[&str] = &[
    "if", "ifeq", "switch", "iferror", "tag", "lc", "uc", "lcfirst", "ucfirst", "padleft",
    "padright",
];

pub fn is_implemented(name: &str) -> bool {
    IMPLEMENTED.contains(&name)
}

/// One parser function invocation.
#[derive(Debug, Clone)]
pub struct ParserFunctionCall {
    /// Canonical function name
    pub name: String,
    /// Text after the colon
    pub target: String,
    /// Tokens after the colon
    pub target_tokens: Vec<Token>,
    /// Remaining arguments
    pub args: Vec<Kv>,
}

impl ParserFunctionCall {
    fn arg(&self, i: usize) -> Option<&Kv> {
        self.args.get(i)
    }
}

/// Run an implemented function. Unknown names produce no output.
pub async fn invoke(call: ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    debug!(function = %call.name, "parser function");
    match call.name.as_str() {
        "if" => pf_if(&call, scope).await,
        "ifeq" => pf_ifeq(&call, scope).await,
        "switch" => pf_switch(&call, scope).await,
        "iferror" => pf_iferror(&call, scope).await,
        "tag" => pf_tag(&call, scope).await,
        "lc" => text(call.target.to_lowercase()),
        "uc" => text(call.target.to_uppercase()),
        "lcfirst" => text(map_first(&call.target, |c| c.to_lowercase().collect())),
        "ucfirst" => text(map_first(&call.target, |c| c.to_uppercase().collect())),
        "padleft" => pad(&call, scope, true).await,
        "padright" => pad(&call, scope, false).await,
        _ => Vec::new(),
    }
}

fn text(s: String) -> Vec<Token> {
    if s.is_empty() {
        Vec::new()
    } else {
        vec![Token::text(s)]
    }
}

fn map_first(s: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => f(c) + chars.as_str(),
        None => String::new(),
    }
}

async fn value_tokens(value: &KvValue, scope: &ExpansionScope) -> Vec<Token> {
    if value.needs_expansion() {
        scope.expand_value(value.to_tokens()).await
    } else {
        value.to_tokens()
    }
}

/// An argument as the function sees it: `k=v` rejoined for named
/// arguments, the trimmed value for positional ones.
async fn expand_kv(kv: Option<&Kv>, default: Vec<Token>, scope: &ExpansionScope) -> Vec<Token> {
    let Some(kv) = kv else {
        return default;
    };
    let value = value_tokens(&kv.v, scope).await;
    if kv.k.is_empty() {
        return trim_tokens(value);
    }
    let mut out = kv.k.to_tokens();
    out.push(Token::text("="));
    out.extend(value);
    out
}

async fn expand_kv_text(kv: Option<&Kv>, scope: &ExpansionScope) -> String {
    tokens_to_string(&expand_kv(kv, Vec::new(), scope).await)
}

async fn pf_if(call: &ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    let branch = if call.target.trim().is_empty() { 1 } else { 0 };
    expand_kv(call.arg(branch), Vec::new(), scope).await
}

async fn pf_ifeq(call: &ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    if call.args.len() < 2 {
        return Vec::new();
    }
    let other = expand_kv_text(call.arg(0), scope).await;
    let branch = if call.target.trim() == other.trim() { 1 } else { 2 };
    expand_kv(call.arg(branch), Vec::new(), scope).await
}

async fn pf_iferror(call: &ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    let is_error = call.target.contains("class=\"error\"")
        || call.target_tokens.iter().any(|t| {
            t.attribute_string("class")
                .map(|c| c.split_whitespace().any(|w| w == "error"))
                .unwrap_or(false)
        });
    if is_error {
        expand_kv(call.arg(0), Vec::new(), scope).await
    } else {
        expand_kv(call.arg(1), call.target_tokens.clone(), scope).await
    }
}

async fn pf_switch(call: &ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    let target = call.target.trim();
    let named: HashMap<String, &Kv> = call
        .args
        .iter()
        .filter(|kv| !kv.k.is_empty())
        .map(|kv| (kv.key_text().trim().to_string(), kv))
        .collect();

    if !target.is_empty() {
        if let Some(kv) = named.get(target) {
            return trim_tokens(value_tokens(&kv.v, scope).await);
        }
    }

    // `| c1 | c2 = v` falls through from a matching bare case to the next
    // named entry.
    let mut matched = false;
    for kv in &call.args {
        if !kv.k.is_empty() {
            if matched {
                return trim_tokens(value_tokens(&kv.v, scope).await);
            }
            continue;
        }
        if kv.v.is_empty() {
            continue;
        }
        let case = tokens_to_string(&value_tokens(&kv.v, scope).await);
        if case.trim() == target {
            matched = true;
        }
    }
    if matched {
        return Vec::new();
    }

    if let Some(kv) = named.get("#default") {
        return trim_tokens(value_tokens(&kv.v, scope).await);
    }
    match call.args.last() {
        Some(last) if last.k.is_empty() => value_tokens(&last.v, scope).await,
        _ => Vec::new(),
    }
}

async fn pf_tag(call: &ParserFunctionCall, scope: &ExpansionScope) -> Vec<Token> {
    let name = call.target.trim();
    if name.is_empty() {
        return Vec::new();
    }
    let mut content = Vec::new();
    let mut attribs = Vec::new();
    for kv in &call.args {
        let value = value_tokens(&kv.v, scope).await;
        if kv.k.is_empty() {
            content.extend(value);
        } else {
            attribs.push(Kv::new(kv.key_text().trim(), tokens_to_string(&value)));
        }
    }
    let mut out = vec![Token::StartTag(TagToken::with_attribs(name, attribs))];
    out.extend(content);
    out.push(Token::end_tag(name));
    out
}

/// Widest result `padleft`/`padright` produce.
const MAX_PAD_WIDTH: usize = 500;

async fn pad(call: &ParserFunctionCall, scope: &ExpansionScope, left: bool) -> Vec<Token> {
    if call.args.is_empty() {
        return Vec::new();
    }
    let width = expand_kv_text(call.arg(0), scope).await;
    let Ok(width) = width.trim().parse::<usize>() else {
        debug!(width = %width, "pad without a width");
        return Vec::new();
    };
    let pad = match expand_kv_text(call.arg(1), scope).await {
        p if p.is_empty() => "0".to_string(),
        p => p,
    };
    let width = width.min(MAX_PAD_WIDTH);
    let target = call.target.as_str();
    let missing = width.saturating_sub(target.chars().count());
    let padding: String = pad.chars().cycle().take(missing).collect();
    if left {
        text(padding + target)
    } else {
        text(target.to_string() + &padding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::frame::Frame;
    use crate::wikitext::pipeline::handler::StageOptions;
    use crate::wikitext::testing;
    use rstest::rstest;
    use std::rc::Rc;

    fn scope() -> ExpansionScope {
        let (env, invoker) = testing::env_and_invoker();
        ExpansionScope {
            env,
            frame: Frame::top(""),
            invoker,
            options: StageOptions::template_body(),
        }
    }

    fn call(name: &str, target: &str, args: Vec<Kv>) -> ParserFunctionCall {
        ParserFunctionCall {
            name: name.to_string(),
            target: target.to_string(),
            target_tokens: vec![Token::text(target)],
            args,
        }
    }

    fn run(call: ParserFunctionCall) -> String {
        let scope = scope();
        testing::block_on_local(async move { tokens_to_string(&invoke(call, &scope).await) })
    }

    fn pos(v: &str) -> Kv {
        Kv::new("", v)
    }

    #[rstest]
    #[case("x", "yes")]
    #[case("  ", "no")]
    #[case("", "no")]
    fn test_if(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(run(call("if", target, vec![pos(" yes "), pos(" no ")])), expected);
    }

    #[test]
    fn test_if_named_branch_is_rejoined() {
        assert_eq!(run(call("if", "x", vec![Kv::new("a", "b")])), "a=b");
    }

    #[test]
    fn test_ifeq() {
        assert_eq!(run(call("ifeq", " a ", vec![pos("a"), pos("same"), pos("diff")])), "same");
        assert_eq!(run(call("ifeq", "a", vec![pos("b"), pos("same"), pos("diff")])), "diff");
        assert_eq!(run(call("ifeq", "a", vec![pos("a")])), "");
    }

    #[test]
    fn test_switch_direct_fallthrough_and_default() {
        let args = || {
            vec![
                Kv::new("a", " one "),
                pos("b"),
                pos("c"),
                Kv::new("d", "bcd"),
                Kv::new("#default", " other "),
            ]
        };
        assert_eq!(run(call("switch", "a", args())), "one");
        assert_eq!(run(call("switch", "c", args())), "bcd");
        assert_eq!(run(call("switch", "zz", args())), "other");
    }

    #[test]
    fn test_switch_last_bare_value_is_default() {
        let args = vec![Kv::new("a", "one"), pos("fallback")];
        assert_eq!(run(call("switch", "q", args)), "fallback");
        assert_eq!(run(call("switch", "q", vec![Kv::new("a", "one")])), "");
    }

    #[test]
    fn test_iferror() {
        let mut err = call("iferror", "", vec![pos("bad"), pos("good")]);
        err.target_tokens = vec![
            Token::start_tag("span").with_attr("class", "error"),
            Token::text("boom"),
            Token::end_tag("span"),
        ];
        assert_eq!(run(err), "bad");
        assert_eq!(run(call("iferror", "fine", vec![pos("bad"), pos("good")])), "good");
        assert_eq!(run(call("iferror", "fine", vec![pos("bad")])), "fine");
    }

    #[test]
    fn test_tag_builds_element() {
        let scope = scope();
        let out = testing::block_on_local(async move {
            invoke(
                call("tag", "span", vec![pos("body"), Kv::new(" class ", "x")]),
                &scope,
            )
            .await
        });
        assert_eq!(testing::tag_names(&out), vec!["span", "/span"]);
        assert_eq!(out[0].attribute_string("class").as_deref(), Some("x"));
        assert_eq!(out[1], Token::text("body"));
    }

    #[rstest]
    #[case("lc", "ÀBC", "àbc")]
    #[case("uc", "abc", "ABC")]
    #[case("lcfirst", "ABC", "aBC")]
    #[case("ucfirst", "éa", "Éa")]
    #[case("ucfirst", "", "")]
    fn test_case_functions(#[case] name: &str, #[case] target: &str, #[case] expected: &str) {
        assert_eq!(run(call(name, target, Vec::new())), expected);
    }

    #[test]
    fn test_padding() {
        assert_eq!(run(call("padleft", "7", vec![pos("3")])), "007");
        assert_eq!(run(call("padleft", "7", vec![pos("5"), pos("ab")])), "abab7");
        assert_eq!(run(call("padright", "7", vec![pos("4"), pos("xy")])), "7xyx");
        assert_eq!(run(call("padright", "long", vec![pos("2")])), "long");
        assert_eq!(run(call("padleft", "7", vec![pos("wide")])), "");
        assert_eq!(run(call("padleft", "7", Vec::new())), "");
    }

    #[test]
    fn test_padding_width_is_capped() {
        let out = run(call("padleft", "x", vec![pos("1000000000")]));
        assert_eq!(out.chars().count(), MAX_PAD_WIDTH);
        assert!(out.ends_with('x'));
    }

    #[test]
    fn test_untaken_branch_is_not_expanded() {
        let data = testing::mock_data_access();
        let (env, invoker) = {
            let env = testing::env(data.clone());
            let invoker: Rc<dyn crate::wikitext::pipeline::SubPipelineInvoker> =
                Rc::new(crate::wikitext::pipeline::PipelineFactory::new(Rc::clone(&env)));
            (env, invoker)
        };
        let scope = ExpansionScope {
            env,
            frame: Frame::top(""),
            invoker,
            options: StageOptions::template_body(),
        };
        let template = Token::SelfClosingTag(TagToken::with_attribs(
            "template",
            vec![Kv::new("Never", "")],
        ));
        let branch = Kv::new("", KvValue::Tokens(vec![template]));
        let out = testing::block_on_local(async move {
            invoke(call("if", "x", vec![pos("taken"), branch]), &scope).await
        });
        assert_eq!(out, vec![Token::text("taken")]);
        assert!(data.fetches().is_empty());
    }
}
