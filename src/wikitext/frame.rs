//! Template expansion scopes
//!
//! A frame is one level of template expansion: the title being expanded,
//! the arguments it was invoked with and a link to the invoking frame. The
//! top-level document runs in a frame without a title.

use crate::wikitext::token::utils::trim_tokens;
use crate::wikitext::token::{Kv, KvValue};
use std::collections::HashMap;
use std::rc::Rc;

pub const DEPTH_LIMIT_MESSAGE: &str = "Error: Expansion depth limit exceeded at ";
pub const LOOP_MESSAGE: &str = "Error: Expansion loop detected at ";

#[derive(Debug)]
pub struct Frame {
    title: Option<String>,
    args: Vec<Kv>,
    depth: usize,
    parent: Option<Rc<Frame>>,
    src_text: Rc<str>,
}

impl Frame {
    /// The frame of a top-level document.
    pub fn top(src_text: impl Into<Rc<str>>) -> Rc<Self> {
        Rc::new(Frame {
            title: None,
            args: Vec::new(),
            depth: 0,
            parent: None,
            src_text: src_text.into(),
        })
    }

    /// A frame for expanding `title` with `args`; `src_text` is the
    /// template source.
    pub fn child(
        self: &Rc<Self>,
        title: impl Into<String>,
        args: Vec<Kv>,
        src_text: impl Into<Rc<str>>,
    ) -> Rc<Self> {
        Rc::new(Frame {
            title: Some(title.into()),
            args,
            depth: self.depth + 1,
            parent: Some(Rc::clone(self)),
            src_text: src_text.into(),
        })
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn args(&self) -> &[Kv] {
        &self.args
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn parent(&self) -> Option<&Rc<Frame>> {
        self.parent.as_ref()
    }

    /// Source text of the page or template this frame expands.
    pub fn src_text(&self) -> &str {
        &self.src_text
    }

    /// Refuse an expansion of `title` that would be too deep or recursive.
    /// Returns the error message prefix; the caller appends the target.
    pub fn loop_and_depth_check(&self, title: &str, max_depth: usize) -> Option<&'static str> {
        if self.depth > max_depth {
            return Some(DEPTH_LIMIT_MESSAGE);
        }
        let mut elem = Some(self);
        while let Some(frame) = elem {
            if frame.title.as_deref() == Some(title) {
                return Some(LOOP_MESSAGE);
            }
            elem = frame.parent.as_deref();
        }
        None
    }

    /// Arguments by name. Positional arguments are numbered from 1; named
    /// keys and values are trimmed. Later arguments win.
    pub fn named_args(&self) -> HashMap<String, KvValue> {
        let mut out = HashMap::new();
        let mut position = 1;
        for kv in &self.args {
            let key = kv.key_text();
            if key.is_empty() {
                out.insert(position.to_string(), kv.v.clone());
                position += 1;
            } else {
                out.insert(key.trim().to_string(), trim_value(&kv.v));
            }
        }
        out
    }

    pub fn arg(&self, name: &str) -> Option<KvValue> {
        self.named_args().remove(name.trim())
    }
}

fn trim_value(v: &KvValue) -> KvValue {
    match v {
        KvValue::Str(s) => KvValue::Str(s.trim().to_string()),
        KvValue::Tokens(tokens) => KvValue::Tokens(trim_tokens(tokens.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikitext::token::Token;

    #[test]
    fn test_depth_and_parent() {
        let top = Frame::top("{{A}}");
        let a = top.child("Template:A", Vec::new(), "{{B}}");
        let b = a.child("Template:B", Vec::new(), "x");
        assert_eq!(top.depth(), 0);
        assert_eq!(b.depth(), 2);
        assert_eq!(b.parent().and_then(|p| p.title()), Some("Template:A"));
        assert_eq!(b.src_text(), "x");
    }

    #[test]
    fn test_loop_detected_on_chain() {
        let top = Frame::top("");
        let a = top.child("Template:A", Vec::new(), "");
        let b = a.child("Template:B", Vec::new(), "");
        assert_eq!(b.loop_and_depth_check("Template:A", 40), Some(LOOP_MESSAGE));
        assert_eq!(b.loop_and_depth_check("Template:C", 40), None);
    }

    #[test]
    fn test_depth_limit() {
        let mut frame = Frame::top("");
        for i in 0..3 {
            frame = frame.child(format!("Template:T{}", i), Vec::new(), "");
        }
        assert_eq!(frame.loop_and_depth_check("Template:X", 2), Some(DEPTH_LIMIT_MESSAGE));
        assert_eq!(frame.loop_and_depth_check("Template:X", 3), None);
    }

    #[test]
    fn test_named_args() {
        let args = vec![
            Kv::new("", "first"),
            Kv::new(" name ", "  spaced  "),
            Kv::new("", vec![Token::text(" kept ")]),
            Kv::new("1", "override"),
        ];
        let frame = Frame::top("").child("Template:T", args, "");
        let named = frame.named_args();
        assert_eq!(named["name"].to_text(), "spaced");
        assert_eq!(named["2"].to_text(), " kept ");
        assert_eq!(named["1"].to_text(), "override");
        assert!(frame.arg("3").is_none());
    }
}
