//! Template and template argument expansion
//!
//! `template` tokens (`{{target|args}}`) are resolved to a parser function,
//! a magic word or a template title. Templates are fetched through the
//! data-access collaborator (or the page cache), tokenized and expanded in
//! a nested `text/wiki` pipeline under a child frame that holds the
//! arguments. `templatearg` tokens (`{{{name|default}}}`) are looked up in
//! the current frame.
//!
//! At top level the output is wrapped in `mw:Transclusion` (or `mw:Param`)
//! markers sharing a fresh `about` id. The argument info record needed to
//! round-trip the invocation is kept in the start marker's scratch entry.
//!
//! Nothing here fails the pipeline:
//!
//! - an unresolvable target is re-emitted as literal `{{…}}` text with its
//!   nested constructs expanded
//! - loops and excessive depth become an inline error span
//! - missing pages and disabled fetching become an `mw:Error` wrapper around
//!   the literal invocation

use super::attribute_expander::{expand_token, ExpansionScope};
use super::parser_functions::{self, ParserFunctionCall};
use crate::wikitext::config::SiteConfig;
use crate::wikitext::errors::FetchError;
use crate::wikitext::frame::DEPTH_LIMIT_MESSAGE;
use crate::wikitext::pipeline::handler::{
    Dispatch, HandlerContext, StageOptions, TokenHandler, TokenOutput, TokenResult,
};
use crate::wikitext::pipeline::{recipes, LocalFuture, SubPipelineRequest};
use crate::wikitext::token::utils::{
    is_template_token, normalize_text, strip_tsr, tokens_to_string, tokens_to_string_strict,
    trim_tokens, wrapper_markers,
};
use crate::wikitext::token::{Kv, KvValue, TagToken, Token, TokenId};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace, warn};

pub const RANK: f64 = 1.1;
/// Rank a token with a freshly expanded target is re-dispatched at, so this
/// stage sees it again.
const REPROCESS_RANK: f64 = RANK - 0.0001;

pub const FETCH_ERROR_KEY: &str = "mw-api-tplfetch-error";
pub const FETCH_DISABLED_MESSAGE: &str = "Page / template fetching disabled, and no cache for ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicWord {
    /// `{{!}}`
    Pipe,
    /// Page properties such as `DEFAULTSORT`
    PageProp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTarget {
    Function {
        /// Canonical name
        name: String,
        /// Trimmed text after the colon
        arg: String,
        arg_tokens: Vec<Token>,
        magic: Option<MagicWord>,
    },
    Template {
        /// Namespaced title, `Template:Foo`
        title: String,
        href: String,
    },
}

/// Flatten target tokens. Comments, quotes and nested invocations are
/// allowed; a newline is only allowed when one side of it is blank.
fn target_text(tokens: &[Token]) -> Option<String> {
    let mut buf = String::new();
    let mut pre_nl: Option<String> = None;
    for token in tokens {
        match token {
            Token::Text(s) => buf.push_str(s),
            Token::SelfClosingTag(tag) if tag.name == "mw-quote" => {
                buf.push_str(&tag.attribute_string("value").unwrap_or_default());
            }
            Token::SelfClosingTag(tag)
                if tag.name == "template"
                    || tag.name == "templatearg"
                    || tag.has_typeof("mw:EmptyLine") => {}
            Token::StartTag(_) | Token::EndTag(_) | Token::SelfClosingTag(_) => return None,
            Token::Comment { .. } | Token::EndOfInput => {}
            Token::Newline { .. } => {
                if buf.trim().is_empty() {
                    continue;
                }
                if pre_nl.is_some() {
                    return None;
                }
                pre_nl = Some(std::mem::take(&mut buf));
            }
        }
    }
    match pre_nl {
        Some(_) if !buf.trim().is_empty() => None,
        Some(pre) => Some(pre + &buf),
        None => Some(buf),
    }
}

/// Tokens after the `skip + 1`-th colon.
fn tokens_after_colon(tokens: &[Token], skip: usize) -> Vec<Token> {
    let mut seen = 0;
    for (i, token) in tokens.iter().enumerate() {
        let Token::Text(s) = token else { continue };
        for (pos, _) in s.match_indices(':') {
            if seen == skip {
                let mut out = Vec::new();
                if pos + 1 < s.len() {
                    out.push(Token::text(&s[pos + 1..]));
                }
                out.extend(tokens[i + 1..].iter().cloned());
                return out;
            }
            seen += 1;
        }
    }
    Vec::new()
}

/// Normalize a template target to a title and link.
fn template_title(site: &SiteConfig, target: &str) -> Option<(String, String)> {
    let target = target.split('#').next().unwrap_or_default().trim();
    if target.is_empty() || target.chars().any(|c| "<>[]{}|".contains(c)) {
        return None;
    }
    let (namespace, name) = match target.strip_prefix(':') {
        Some(rest) => (None, rest),
        None => match target.split_once(':') {
            Some((ns, rest)) if ns.trim().eq_ignore_ascii_case(&site.template_namespace) => {
                (Some(site.template_namespace.as_str()), rest)
            }
            _ => (Some(site.template_namespace.as_str()), target),
        },
    };
    let name = name
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut chars = name.chars();
    let first = chars.next()?;
    let name: String = first.to_uppercase().chain(chars).collect();
    let title = match namespace {
        Some(ns) => format!("{}:{}", ns, name),
        None => name,
    };
    let href = format!("./{}", title.replace(' ', "_"));
    Some((title, href))
}

/// Work out what `{{…}}` with these target tokens refers to.
pub fn resolve_target(site: &SiteConfig, tokens: &[Token]) -> Option<ResolvedTarget> {
    let strict = target_text(tokens);
    let is_template = strict.is_some();
    let text = strict.unwrap_or_else(|| tokens_to_string(tokens));
    let trimmed = text.trim();
    let (target, skip) = match trimmed.strip_prefix("safesubst:") {
        Some(rest) => (rest, 1),
        None => (trimmed, 0),
    };

    let (prefix, arg) = match target.split_once(':') {
        Some((prefix, arg)) => (prefix.trim(), Some(arg)),
        None => (target.trim(), None),
    };
    // `{{lc:x}}` is a function call, `{{lc|x}}` a transclusion.
    let canonical = match arg {
        Some(_) => site.function_hook(prefix).or_else(|| site.variable(prefix)),
        None => site.variable(prefix),
    };
    if let Some(name) = canonical {
        let magic = if name == "!" {
            Some(MagicWord::Pipe)
        } else if site.is_magic_masq(name) {
            Some(MagicWord::PageProp)
        } else {
            None
        };
        return Some(ResolvedTarget::Function {
            name: name.to_string(),
            arg: arg.unwrap_or_default().trim().to_string(),
            arg_tokens: match arg {
                Some(_) => trim_tokens(tokens_after_colon(tokens, skip)),
                None => Vec::new(),
            },
            magic,
        });
    }

    if !is_template {
        return None;
    }
    template_title(site, target).map(|(title, href)| ResolvedTarget::Template { title, href })
}

/// `(leading, trailing)` whitespace of `s`; all of it leads when blank.
fn outer_space(s: &str) -> (String, String) {
    let body = s.trim_start();
    if body.is_empty() {
        return (s.to_string(), String::new());
    }
    let lead = &s[..s.len() - body.len()];
    let trail = &body[body.trim_end().len()..];
    (lead.to_string(), trail.to_string())
}

/// What a wrapped invocation's target resolved to.
#[derive(Debug, Clone)]
enum TargetInfo {
    Function(String),
    Template(String),
    Unresolved,
}

/// Round-trip record of an invocation: target and parameter wikitext plus
/// the spacing needed to reproduce it.
fn arg_info(src: &str, attribs: &[Kv], target: &TargetInfo) -> Value {
    let slice = |o: Option<[usize; 4]>, a: usize, b: usize| -> Option<String> {
        o.and_then(|o| src.get(o[a]..o[b])).map(str::to_string)
    };
    let mut params = Map::new();
    let mut infos = Vec::new();
    let mut position = 1;

    for kv in attribs.iter().skip(1) {
        let k_src = slice(kv.src_offsets, 0, 1)
            .or_else(|| kv.ksrc.clone())
            .unwrap_or_else(|| kv.key_text());
        let v_src = slice(kv.src_offsets, 2, 3)
            .or_else(|| kv.vsrc.clone())
            .unwrap_or_else(|| kv.value_text());
        let k_wt = k_src.trim().to_string();
        let mut k = match tokens_to_string_strict(&kv.k.to_tokens()) {
            Ok(s) => s.trim().to_string(),
            Err(_) => k_wt.clone(),
        };
        let touching = kv.src_offsets.map(|o| o[1] == o[2]).unwrap_or(true);
        let positional = k.is_empty() && touching;
        let v = if positional {
            k = position.to_string();
            position += 1;
            v_src.clone()
        } else {
            v_src.trim().to_string()
        };

        if !params.contains_key(&k) {
            let mut info = json!({ "k": k });
            if let Some(o) = kv.src_offsets {
                info["srcOffsets"] = json!(o);
            }
            let (k_lead, k_trail) = outer_space(&k_src);
            let (v_lead, v_trail) = if positional {
                (String::new(), String::new())
            } else {
                info["named"] = json!(true);
                if v.is_empty() {
                    (String::new(), v_src.clone())
                } else {
                    outer_space(&v_src)
                }
            };
            if !(k_lead.is_empty() && k_trail.is_empty() && v_lead.is_empty() && v_trail.is_empty())
            {
                info["spc"] = json!([k_lead, k_trail, v_lead, v_trail]);
            }
            infos.push(info);
        }

        let mut param = json!({ "wt": v });
        if !positional && k_wt != k {
            param["key"] = json!({ "wt": k_wt });
        }
        params.insert(k, param);
    }

    let target_wt = attribs
        .first()
        .and_then(|kv| slice(kv.src_offsets, 0, 1).or_else(|| Some(kv.key_text())))
        .unwrap_or_default();
    let mut target_json = json!({ "wt": target_wt });
    match target {
        TargetInfo::Function(name) => target_json["function"] = json!(name),
        TargetInfo::Template(href) => target_json["href"] = json!(href),
        TargetInfo::Unresolved => {}
    }
    json!({
        "dict": { "target": target_json, "params": params },
        "paramInfos": infos,
    })
}

fn limit_error(message: &str, title: &str) -> Vec<Token> {
    vec![
        Token::start_tag("span").with_attr("class", "error"),
        Token::text(format!("{}{}", message, title)),
        Token::self_closing("wikilink").with_attr("href", title),
        Token::end_tag("span"),
    ]
}

/// Child output as it is spliced into the parent: no source ranges,
/// placeholders blanked, and no comments when nothing is wrapped.
fn clean_body(mut tokens: Vec<Token>, keep_comments: bool) -> Vec<Token> {
    strip_tsr(&mut tokens);
    tokens
        .into_iter()
        .filter(|t| keep_comments || !matches!(t, Token::Comment { .. }))
        .map(|t| {
            let placeholder = t.is_self_closing()
                && t.name() == Some("meta")
                && t.attribute_string("typeof").as_deref() == Some("mw:Placeholder");
            if placeholder {
                Token::text("")
            } else {
                t
            }
        })
        .collect()
}

/// `k=v` for named entries, the value alone otherwise.
fn rejoin(kv: &Kv) -> Vec<Token> {
    let mut out = kv.k.to_tokens();
    if !kv.k.is_empty() {
        out.push(Token::text("="));
    }
    out.extend(kv.v.to_tokens());
    out
}

/// Everything one invocation needs once it leaves the stage.
struct Invocation {
    token: Token,
    scope: ExpansionScope,
    phase_end: f64,
    wrapper: Option<Wrapper>,
}

struct Wrapper {
    ty: &'static str,
    about: String,
}

impl Invocation {
    fn attribs(&self) -> Vec<Kv> {
        self.token.tag().map(|t| t.attribs.clone()).unwrap_or_default()
    }

    fn source(&self) -> String {
        self.token
            .data()
            .and_then(|d| d.src.clone())
            .unwrap_or_default()
    }

    /// Scope for argument expansion: nested invocations are not wrapped.
    fn arg_scope(&self) -> ExpansionScope {
        ExpansionScope {
            options: StageOptions {
                inline_context: self.scope.options.inline_context,
                ..StageOptions::template_body()
            },
            ..self.scope.clone()
        }
    }

    fn output(&self, tokens: Vec<Token>) -> TokenOutput {
        TokenOutput::with_rank(tokens, self.phase_end)
    }

    /// Wrap `content` in this invocation's markers, recording `info` for the
    /// start marker.
    fn encapsulate(&self, wrapper: &Wrapper, content: Vec<Token>, info: Option<Value>) -> Vec<Token> {
        let (start, end) = wrapper_markers(
            wrapper.ty,
            &wrapper.about,
            self.token.tsr(),
            Some(self.source()),
        );
        if let (Some(info), Some(id)) = (info, start.id()) {
            self.scope
                .env
                .with_scratch(id, |s| s.tplarginfo = Some(info.to_string()));
        }
        let mut out = Vec::with_capacity(content.len() + 2);
        out.push(start);
        out.extend(content);
        out.push(end);
        out
    }

    fn finish(&self, content: Vec<Token>, target: TargetInfo) -> TokenOutput {
        match &self.wrapper {
            Some(wrapper) => {
                let info = arg_info(self.scope.frame.src_text(), &self.attribs(), &target);
                self.output(self.encapsulate(wrapper, content, Some(info)))
            }
            None => self.output(content),
        }
    }

    /// Expand argument keys, resolve the target again and dispatch.
    async fn expand(self) -> TokenOutput {
        let scope = self.arg_scope();
        let mut expanded = Vec::new();
        for kv in self.attribs() {
            let mut kv = kv;
            if kv.k.needs_expansion() {
                kv.k = KvValue::Tokens(scope.expand_value(kv.k.to_tokens()).await);
            }
            expanded.push(kv);
        }
        let target = expanded.first().map(|kv| kv.k.to_tokens()).unwrap_or_default();
        match resolve_target(self.scope.env.site(), &target) {
            None => self.literal(expanded).await,
            Some(ResolvedTarget::Function {
                name,
                arg,
                arg_tokens,
                ..
            }) => self.parser_function(name, arg, arg_tokens, expanded).await,
            Some(ResolvedTarget::Template { title, href }) => {
                self.template(title, href, expanded).await
            }
        }
    }

    async fn parser_function(
        self,
        name: String,
        arg: String,
        arg_tokens: Vec<Token>,
        mut attribs: Vec<Kv>,
    ) -> TokenOutput {
        if !parser_functions::is_implemented(&name) {
            warn!(function = %name, "parser function not implemented");
            let message = format!("Parser function implementation for pf_{} missing.", name);
            return self.finish(vec![Token::text(message)], TargetInfo::Function(name));
        }
        let args = if attribs.is_empty() {
            Vec::new()
        } else {
            attribs.split_off(1)
        };
        let call = ParserFunctionCall {
            name: name.clone(),
            target: arg,
            target_tokens: arg_tokens,
            args,
        };
        let out = parser_functions::invoke(call, &self.arg_scope()).await;
        self.finish(out, TargetInfo::Function(name))
    }

    async fn template(self, title: String, href: String, attribs: Vec<Kv>) -> TokenOutput {
        let max_depth = self.scope.env.options().max_depth;
        if let Some(message) = self.scope.frame.loop_and_depth_check(&title, max_depth) {
            warn!(template = %title, "{}", message.trim_end());
            return self.output(limit_error(message, &title));
        }

        let source = match self.fetch(&title).await {
            Ok(source) => source,
            Err(tokens) => return self.output(tokens),
        };

        let scope = self.arg_scope();
        let mut args = Vec::with_capacity(attribs.len().saturating_sub(1));
        for kv in attribs.into_iter().skip(1) {
            let mut kv = kv;
            if kv.v.needs_expansion() {
                kv.v = KvValue::Tokens(scope.expand_value(kv.v.to_tokens()).await);
            }
            args.push(kv);
        }

        debug!(template = %title, args = args.len(), "expanding template");
        let child = self.scope.frame.child(title.as_str(), args, source.as_str());
        let request = SubPipelineRequest::new(recipes::TEXT, child, scope.options);
        let body = self.scope.invoker.process_text(source, request).await;
        let body = clean_body(body, self.scope.options.expand_templates);
        self.finish(body, TargetInfo::Template(href))
    }

    /// Template source from the page cache or the data-access collaborator.
    /// On failure returns the replacement tokens.
    async fn fetch(&self, title: &str) -> Result<String, Vec<Token>> {
        let env = &self.scope.env;
        if let Some(source) = env.cached_page(title) {
            trace!(template = %title, "page cache hit");
            return Ok(source);
        }
        if !env.options().fetch_templates {
            return Err(self.fetch_error(format!("{}{}", FETCH_DISABLED_MESSAGE, title)));
        }
        match env.data_access().fetch_template_source(title).await {
            Ok(source) => {
                env.cache_page(title, &source);
                Ok(source)
            }
            Err(err @ FetchError::NotFound(_)) | Err(err @ FetchError::Disabled(_)) => {
                Err(self.fetch_error(err.to_string()))
            }
            Err(err) => {
                warn!(template = %title, error = %err, "template fetch failed; expanding as empty");
                Ok(String::new())
            }
        }
    }

    /// The literal invocation, wrapped as an error at top level.
    fn fetch_error(&self, message: String) -> Vec<Token> {
        warn!(error = %message, "template not expanded");
        let literal = vec![Token::text(self.source())];
        if self.wrapper.is_none() {
            return literal;
        }
        let wrapper = Wrapper {
            ty: "mw:Transclusion",
            about: self.scope.env.new_about_id(),
        };
        let mut info = arg_info(self.scope.frame.src_text(), &self.attribs(), &TargetInfo::Unresolved);
        info["dict"]["errors"] = json!([{ "key": FETCH_ERROR_KEY, "message": message }]);
        let mut out = self.encapsulate(&wrapper, literal, Some(info));
        if let Some(tag) = out[0].tag_mut() {
            tag.set_attribute("typeof", "mw:Error mw:Transclusion");
        }
        out
    }

    /// Re-emit the invocation as text around its (expanded) parts.
    async fn literal(self, attribs: Vec<Kv>) -> TokenOutput {
        let scratch = self.token.id().and_then(|id| self.scope.env.scratch(id));
        let mut tokens = vec![Token::text("{{")];
        if let Some(ws) = scratch.as_ref().and_then(|s| s.lead_ws.clone()) {
            tokens.push(Token::text(ws));
        }
        for (i, kv) in attribs.iter().enumerate() {
            if i > 0 {
                tokens.push(Token::text("|"));
            }
            tokens.extend(rejoin(kv));
        }
        if let Some(ws) = scratch.as_ref().and_then(|s| s.trail_ws.clone()) {
            tokens.push(Token::text(ws));
        }
        tokens.push(Token::text("}}"));

        debug!(source = %self.source(), "unresolvable target; emitting literal");
        let request = SubPipelineRequest::new(
            recipes::TOKENS,
            Rc::clone(&self.scope.frame),
            self.scope.options,
        );
        let out = self
            .scope
            .invoker
            .process_tokens(normalize_text(tokens), request)
            .await;

        let templated = scratch.map(|s| s.templated_attribs.is_some()).unwrap_or(false);
        if templated && self.scope.options.wrap_templates() {
            let wrapper = Wrapper {
                ty: "mw:Transclusion",
                about: self.scope.env.new_about_id(),
            };
            let info = arg_info(self.scope.frame.src_text(), &attribs, &TargetInfo::Unresolved);
            return self.output(self.encapsulate(&wrapper, out, Some(info)));
        }
        self.output(out)
    }

    /// Expand the whole invocation through the remote preprocessor, reusing
    /// earlier expansions of identical source.
    async fn remote(self, resolved: ResolvedTarget) -> TokenOutput {
        let env = Rc::clone(&self.scope.env);
        let text = self.source();
        let (title, info) = match &resolved {
            ResolvedTarget::Template { title, href } => {
                (title.clone(), TargetInfo::Template(href.clone()))
            }
            ResolvedTarget::Function { name, .. } => {
                (format!("pf_{}", name), TargetInfo::Function(name.clone()))
            }
        };
        if self.scope.frame.depth() > env.options().max_depth {
            return self.output(limit_error(DEPTH_LIMIT_MESSAGE, &title));
        }
        if let Some(cached) = env.cached_expansion(&text) {
            trace!(source = %text, "expansion cache hit");
            return self.finish(cached, info);
        }
        if !env.options().fetch_templates {
            let warning = format!("Warning: Page/template fetching disabled cannot expand {}", text);
            return self.finish(vec![Token::text(warning)], info);
        }

        let page = self.scope.frame.title().unwrap_or_default().to_string();
        let expanded = match env.data_access().preprocess(&page, &text).await {
            Ok(expanded) => expanded,
            Err(err) => {
                warn!(source = %text, error = %err, "remote expansion failed; expanding as empty");
                String::new()
            }
        };
        let scope = self.arg_scope();
        let child = self.scope.frame.child(title.as_str(), Vec::new(), expanded.as_str());
        let request = SubPipelineRequest::new(recipes::TEXT, child, scope.options);
        let body = self.scope.invoker.process_text(expanded, request).await;
        let body = clean_body(body, self.scope.options.expand_templates);
        env.cache_expansion(&text, body.clone());
        self.finish(body, info)
    }

    /// `{{{name|default}}}` against the current frame.
    async fn argument(self) -> TokenOutput {
        let attribs = self.attribs();
        let scope = self.arg_scope();
        let name_tokens = match attribs.first() {
            Some(kv) if kv.k.needs_expansion() => scope.expand_value(kv.k.to_tokens()).await,
            Some(kv) => kv.k.to_tokens(),
            None => Vec::new(),
        };
        let name = tokens_to_string(&name_tokens).trim().to_string();

        let value = match self.scope.frame.named_args().remove(&name) {
            Some(value) => value.to_tokens(),
            None => match attribs.get(1) {
                Some(default) => {
                    let tokens = rejoin(default);
                    if tokens.iter().any(|t| t.as_text().is_none()) {
                        scope.expand_value(tokens).await
                    } else {
                        tokens
                    }
                }
                None => vec![Token::text(format!("{{{{{{{}}}}}}}", name))],
            },
        };
        trace!(argument = %name, "template argument");
        match &self.wrapper {
            Some(wrapper) => {
                let info = arg_info(self.scope.frame.src_text(), &attribs, &TargetInfo::Unresolved);
                self.output(self.encapsulate(wrapper, value, Some(info)))
            }
            None => self.output(value),
        }
    }
}

#[derive(Default)]
pub struct TemplateHandler {
    /// Tokens whose templated target has already been expanded
    target_expanded: HashSet<TokenId>,
}

impl TemplateHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn invocation(&self, token: Token, cx: &HandlerContext, ty: &'static str) -> Invocation {
        let wrap = cx.options.expand_templates && cx.options.wrap_templates();
        Invocation {
            token,
            scope: ExpansionScope::from_context(cx),
            phase_end: cx.phase_end,
            wrapper: wrap.then(|| Wrapper {
                ty,
                about: cx.env.new_about_id(),
            }),
        }
    }

    fn on_template(&mut self, token: Token, cx: &mut HandlerContext) -> TokenResult {
        let target = token
            .tag()
            .and_then(|t| t.attribs.first())
            .map(|kv| kv.k.to_tokens())
            .unwrap_or_default();

        if target.iter().any(is_template_token) {
            if let Some(id) = token.id() {
                if self.target_expanded.insert(id) {
                    trace!("expanding templated target");
                    let scope = ExpansionScope::from_context(cx);
                    return TokenResult::suspend(
                        Vec::new(),
                        Box::pin(async move {
                            let mut out = expand_token(token, scope).await;
                            out.rank = Some(REPROCESS_RANK);
                            out
                        }),
                    );
                }
            }
        }

        let resolved = resolve_target(cx.env.site(), &target);
        if let Some(ResolvedTarget::Function {
            name,
            arg,
            arg_tokens,
            magic: Some(magic),
        }) = &resolved
        {
            return TokenResult::tokens(self.magic_word(&token, cx, *magic, name, arg, arg_tokens));
        }

        let expand_templates = cx.options.expand_templates;
        let remote = cx.env.options().use_remote_preprocessor;
        let invocation = self.invocation(token, cx, "mw:Transclusion");
        let pending: LocalFuture<TokenOutput> = match resolved {
            None if expand_templates => {
                let attribs = invocation.attribs();
                Box::pin(invocation.literal(attribs))
            }
            Some(resolved) if remote && expand_templates => Box::pin(invocation.remote(resolved)),
            _ if remote => {
                let attribs = invocation.attribs();
                Box::pin(invocation.literal(attribs))
            }
            _ => Box::pin(invocation.expand()),
        };
        TokenResult::suspend(Vec::new(), pending)
    }

    fn magic_word(
        &self,
        token: &Token,
        cx: &HandlerContext,
        magic: MagicWord,
        name: &str,
        arg: &str,
        arg_tokens: &[Token],
    ) -> Vec<Token> {
        match magic {
            MagicWord::Pipe => {
                if !cx.at_top_level() {
                    return vec![Token::start_tag("td")];
                }
                let invocation = Invocation {
                    token: token.clone(),
                    scope: ExpansionScope::from_context(cx),
                    phase_end: cx.phase_end,
                    wrapper: None,
                };
                let wrapper = Wrapper {
                    ty: "mw:Transclusion",
                    about: cx.env.new_about_id(),
                };
                let info = arg_info(
                    cx.frame.src_text(),
                    &invocation.attribs(),
                    &TargetInfo::Function(name.to_string()),
                );
                invocation.encapsulate(&wrapper, vec![Token::text("|")], Some(info))
            }
            MagicWord::PageProp => {
                let property = if name == "defaultsort" {
                    format!("mw:PageProp/category{}", name)
                } else {
                    format!("mw:PageProp/{}", name)
                };
                let data = token.data().cloned().unwrap_or_default();
                let mut meta =
                    TagToken::with_attribs("meta", vec![Kv::new("property", property)]).with_data(data);
                let templated = token
                    .id()
                    .and_then(|id| cx.env.scratch(id))
                    .and_then(|s| s.templated_attribs);
                match templated {
                    Some(Value::Array(mut records)) if !records.is_empty() => {
                        meta.add_attribute("content", arg_tokens.to_vec());
                        meta.add_attribute("about", cx.env.new_about_id());
                        meta.add_space_separated_attribute("typeof", "mw:ExpandedAttrs");
                        if let Some(first) = records.first_mut() {
                            let key_html = first[0].get("html").cloned().unwrap_or(Value::Null);
                            first[0]["txt"] = json!("content");
                            first[1]["html"] = key_html;
                            if let Some(obj) = first[0].as_object_mut() {
                                obj.remove("html");
                            }
                        }
                        meta.add_attribute("data-mw", json!({ "attribs": records }).to_string());
                    }
                    _ => meta.add_attribute("content", arg.trim()),
                }
                vec![Token::SelfClosingTag(meta)]
            }
        }
    }

    fn on_template_arg(&mut self, token: Token, cx: &mut HandlerContext) -> TokenResult {
        let invocation = self.invocation(token, cx, "mw:Param");
        TokenResult::suspend(Vec::new(), Box::pin(invocation.argument()))
    }
}

impl TokenHandler for TemplateHandler {
    fn name(&self) -> &'static str {
        "TemplateHandler"
    }

    fn rank(&self) -> f64 {
        RANK
    }

    fn registrations(&self) -> Vec<Dispatch> {
        vec![Dispatch::tag("template"), Dispatch::tag("templatearg")]
    }

    fn on_tag(&mut self, token: Token, cx: &mut HandlerContext) -> TokenResult {
        if !token.is_self_closing() {
            return TokenResult::Unchanged(token);
        }
        match token.name() {
            Some("template") => self.on_template(token, cx),
            Some("templatearg") => self.on_template_arg(token, cx),
            _ => TokenResult::Unchanged(token),
        }
    }

    fn reset_state(&mut self) {
        self.target_expanded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::config::PipelineOptions;
    use crate::wikitext::data_access::MockDataAccess;
    use crate::wikitext::env::Env;
    use crate::wikitext::testing;

    fn expand(source: &str, data: MockDataAccess) -> (Vec<Token>, Rc<Env>) {
        expand_with(source, PipelineOptions::default(), data)
    }

    fn expand_with(
        source: &str,
        options: PipelineOptions,
        data: MockDataAccess,
    ) -> (Vec<Token>, Rc<Env>) {
        let env = testing::env_with_options(options, data);
        let out = testing::run_recipe_env(recipes::TEXT, source, Rc::clone(&env));
        (out, env)
    }

    fn arg_info_of(env: &Env, marker: &Token) -> Value {
        let info = env
            .scratch(marker.id().unwrap())
            .and_then(|s| s.tplarginfo)
            .expect("argument info");
        serde_json::from_str(&info).unwrap()
    }

    #[test]
    fn test_resolve_template_titles() {
        let site = SiteConfig::default();
        let resolve = |s: &str| resolve_target(&site, &[Token::text(s)]);
        assert_eq!(
            resolve(" foo_bar "),
            Some(ResolvedTarget::Template {
                title: "Template:Foo bar".into(),
                href: "./Template:Foo_bar".into()
            })
        );
        assert_eq!(
            resolve(":main"),
            Some(ResolvedTarget::Template {
                title: "Main".into(),
                href: "./Main".into()
            })
        );
        assert_eq!(
            resolve("template:x"),
            Some(ResolvedTarget::Template {
                title: "Template:X".into(),
                href: "./Template:X".into()
            })
        );
        assert_eq!(resolve("a[b"), None);
        assert_eq!(
            resolve_target(&site, &[Token::text("a"), Token::start_tag("b")]),
            None
        );
    }

    #[test]
    fn test_resolve_functions_need_a_colon() {
        let site = SiteConfig::default();
        let resolved = resolve_target(&site, &[Token::text("safesubst:LC: ABC ")]);
        assert_eq!(
            resolved,
            Some(ResolvedTarget::Function {
                name: "lc".into(),
                arg: "ABC".into(),
                arg_tokens: vec![Token::text("ABC")],
                magic: None,
            })
        );
        assert!(matches!(
            resolve_target(&site, &[Token::text("lc")]),
            Some(ResolvedTarget::Template { .. })
        ));
        assert!(matches!(
            resolve_target(&site, &[Token::text("!")]),
            Some(ResolvedTarget::Function { magic: Some(MagicWord::Pipe), .. })
        ));
    }

    #[test]
    fn test_target_newlines() {
        assert_eq!(
            target_text(&[Token::text("a"), Token::newline(None), Token::text(" ")]).as_deref(),
            Some("a ")
        );
        assert_eq!(
            target_text(&[Token::text("a"), Token::newline(None), Token::text("b")]),
            None
        );
        assert_eq!(
            target_text(&[Token::comment("c", None), Token::newline(None), Token::text("b")])
                .as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_arg_info_records_spacing() {
        let src = "{{foo| a |k = v}}";
        let attribs = vec![
            Kv::new("foo", "").with_offsets([2, 5, 5, 5]),
            Kv::new("", " a ").with_offsets([6, 6, 6, 9]),
            Kv::new("k ", " v").with_offsets([10, 12, 13, 15]),
        ];
        let info = arg_info(src, &attribs, &TargetInfo::Template("./Template:Foo".into()));
        assert_eq!(info["dict"]["target"]["wt"], "foo");
        assert_eq!(info["dict"]["target"]["href"], "./Template:Foo");
        assert_eq!(info["dict"]["params"]["1"]["wt"], " a ");
        assert_eq!(info["dict"]["params"]["k"]["wt"], "v");
        assert!(info["dict"]["params"]["k"].get("key").is_none());
        assert_eq!(info["paramInfos"][0]["k"], "1");
        assert!(info["paramInfos"][0].get("spc").is_none());
        assert_eq!(info["paramInfos"][1]["named"], true);
        assert_eq!(info["paramInfos"][1]["spc"], json!(["", " ", " ", ""]));
    }

    #[test]
    fn test_transclusion_is_wrapped() {
        let data = testing::mock_data_access().with_page("Template:Echo", "{{{1}}}");
        let (out, env) = expand("{{echo|hi}}", data);
        insta::assert_snapshot!(testing::compact(&out), @r###"<meta typeof="mw:Transclusion" about="#mwt1"/>hi<meta typeof="mw:Transclusion/End" about="#mwt1"/><EOF>"###);
        assert_eq!(out[0].tsr().map(|r| (r.start, r.end)), Some((0, 11)));
        let info = arg_info_of(&env, &out[0]);
        assert_eq!(info["dict"]["target"]["href"], "./Template:Echo");
        assert_eq!(info["dict"]["params"]["1"]["wt"], "hi");
    }

    #[test]
    fn test_page_cache_avoids_refetch() {
        let data = testing::mock_data_access().with_page("Template:T", "x");
        let (out, _) = expand("{{t}}{{t}}", data.clone());
        assert_eq!(out.iter().filter(|t| t.as_text() == Some("x")).count(), 2);
        assert_eq!(data.fetches(), vec!["Template:T".to_string()]);
    }

    #[test]
    fn test_parser_function_call() {
        let (out, env) = expand("{{#if: x | yes | no}}", testing::mock_data_access());
        assert_eq!(out[1], Token::text("yes"));
        let info = arg_info_of(&env, &out[0]);
        assert_eq!(info["dict"]["target"]["function"], "if");
    }

    #[test]
    fn test_unimplemented_function_is_reported() {
        let mut options = PipelineOptions::default();
        options
            .site
            .function_hooks
            .insert("#expr".into(), "expr".into());
        let (out, _) = expand_with("{{#expr: 1+1}}", options, testing::mock_data_access());
        assert_eq!(
            out[1],
            Token::text("Parser function implementation for pf_expr missing.")
        );
        assert_eq!(
            out[2].attribute_string("typeof").as_deref(),
            Some("mw:Transclusion/End")
        );
    }

    #[test]
    fn test_missing_page_is_an_error_wrapper() {
        let (out, env) = expand("{{nope}}", testing::mock_data_access());
        assert_eq!(
            out[0].attribute_string("typeof").as_deref(),
            Some("mw:Error mw:Transclusion")
        );
        assert_eq!(out[1], Token::text("{{nope}}"));
        let info = arg_info_of(&env, &out[0]);
        assert_eq!(info["dict"]["errors"][0]["key"], FETCH_ERROR_KEY);
    }

    #[test]
    fn test_disabled_fetching_message() {
        let options = PipelineOptions {
            fetch_templates: false,
            ..PipelineOptions::default()
        };
        let (out, env) = expand_with("{{foo}}", options, testing::mock_data_access());
        let info = arg_info_of(&env, &out[0]);
        assert_eq!(
            info["dict"]["errors"][0]["message"],
            "Page / template fetching disabled, and no cache for Template:Foo"
        );
    }

    #[test]
    fn test_loop_becomes_error_span() {
        let data = testing::mock_data_access().with_page("Template:Loop", "a{{loop}}");
        let (out, _) = expand("{{loop}}", data);
        assert_eq!(
            testing::tag_names(&out),
            vec!["meta", "span", "wikilink", "/span", "meta"]
        );
        assert!(out.contains(&Token::text("Error: Expansion loop detected at Template:Loop")));
    }

    #[test]
    fn test_depth_limit() {
        let options = PipelineOptions {
            max_depth: 2,
            ..PipelineOptions::default()
        };
        let data = testing::mock_data_access()
            .with_page("Template:A", "{{b}}")
            .with_page("Template:B", "{{c}}")
            .with_page("Template:C", "{{d}}")
            .with_page("Template:D", "deep");
        let (out, _) = expand_with("{{a}}", options, data);
        assert!(out
            .iter()
            .any(|t| t.as_text().map(|s| s.starts_with(DEPTH_LIMIT_MESSAGE)).unwrap_or(false)));
        assert!(!out.contains(&Token::text("deep")));
    }

    #[test]
    fn test_unresolvable_target_stays_literal() {
        let (out, _) = expand("{{a<b>c}}", testing::mock_data_access());
        let text: String = out.iter().filter_map(|t| t.as_text()).collect();
        assert_eq!(text, "{{ac}}");
        assert_eq!(testing::tag_names(&out), vec!["b"]);
    }

    #[test]
    fn test_templated_target() {
        let data = testing::mock_data_access()
            .with_page("Template:Name", "echo")
            .with_page("Template:Echo", "{{{1}}}");
        let (out, _) = expand("{{ {{name}}|x}}", data);
        let texts: Vec<&str> = out.iter().filter_map(|t| t.as_text()).collect();
        assert_eq!(texts, vec!["x"]);
        assert_eq!(
            out[0].attribute_string("typeof").as_deref(),
            Some("mw:Transclusion")
        );
    }

    #[test]
    fn test_top_level_argument() {
        let (out, _) = expand("{{{1|def}}}", testing::mock_data_access());
        insta::assert_snapshot!(testing::compact(&out), @r###"<meta typeof="mw:Param" about="#mwt1"/>def<meta typeof="mw:Param/End" about="#mwt1"/><EOF>"###);
        let (out, _) = expand("{{{x}}}", testing::mock_data_access());
        assert_eq!(out[1], Token::text("{{{x}}}"));
    }

    #[test]
    fn test_named_arguments_are_trimmed() {
        let data = testing::mock_data_access().with_page("Template:Greet", "[{{{who}}}]");
        let (out, _) = expand("{{greet| who = you }}", data);
        let text: String = out.iter().filter_map(|t| t.as_text()).collect();
        assert_eq!(text, "[you]");
    }

    #[test]
    fn test_magic_words() {
        let (out, _) = expand("{{!}}", testing::mock_data_access());
        assert_eq!(out[1], Token::text("|"));
        assert_eq!(out.len(), 4);

        let (out, _) = expand("{{DEFAULTSORT: Key }}", testing::mock_data_access());
        assert_eq!(
            out[0].attribute_string("property").as_deref(),
            Some("mw:PageProp/categorydefaultsort")
        );
        assert_eq!(out[0].attribute_string("content").as_deref(), Some("Key"));
    }

    #[test]
    fn test_remote_preprocessor_caches_by_source() {
        let options = PipelineOptions {
            use_remote_preprocessor: true,
            ..PipelineOptions::default()
        };
        let data = testing::mock_data_access().with_expansion("{{x}}", "ex");
        let (out, env) = expand_with("{{x}}", options, data);
        assert_eq!(out[1], Token::text("ex"));
        assert_eq!(env.cached_expansion("{{x}}"), Some(vec![Token::text("ex")]));
    }
}
