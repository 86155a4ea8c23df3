//! Document environment
//!
//! One [`Env`] is shared (through `Rc`) by every pipeline working on the same
//! document, nested template pipelines included. It holds read-only
//! configuration and collaborators, plus the document-scoped services that
//! must never live in stage state: id counters, the scratch side-table and
//! the page and expansion caches.

use crate::wikitext::config::{PipelineOptions, SiteConfig};
use crate::wikitext::data_access::DataAccess;
use crate::wikitext::stages::extension_handler::{ExtensionRegistry, ExtensionRenderer};
use crate::wikitext::token::{Token, TokenId};
use crate::wikitext::tokenizer::{Tokenizer, WikiTokenizer};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Per-token data that is needed while processing but never serialized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scratch {
    /// Argument info JSON of a transclusion start marker
    pub tplarginfo: Option<String>,
    /// Templated attribute records of a template token
    pub templated_attribs: Option<serde_json::Value>,
    /// Source prefix in front of a hoisted start marker
    pub unwrapped_wt: Option<String>,
    /// Name of the wikitext node a hoisted marker belongs to
    pub first_wikitext_node: Option<String>,
    pub lead_ws: Option<String>,
    pub trail_ws: Option<String>,
}

/// Side-table of [`Scratch`] entries keyed by token id.
#[derive(Debug, Default)]
pub struct ScratchTable {
    entries: HashMap<TokenId, Scratch>,
}

impl ScratchTable {
    pub fn get(&self, id: TokenId) -> Option<&Scratch> {
        self.entries.get(&id)
    }

    pub fn entry(&mut self, id: TokenId) -> &mut Scratch {
        self.entries.entry(id).or_default()
    }

    pub fn remove(&mut self, id: TokenId) -> Option<Scratch> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct Env {
    options: PipelineOptions,
    data_access: Rc<dyn DataAccess>,
    tokenizer: Rc<dyn Tokenizer>,
    extensions: ExtensionRegistry,
    uid: Cell<u64>,
    scratch: RefCell<ScratchTable>,
    page_cache: RefCell<HashMap<String, String>>,
    expansion_cache: RefCell<HashMap<String, Vec<Token>>>,
}

impl Env {
    pub fn new(options: PipelineOptions, data_access: Rc<dyn DataAccess>) -> Self {
        let tokenizer = Rc::new(WikiTokenizer::new(&options.site));
        Env {
            options,
            data_access,
            tokenizer,
            extensions: ExtensionRegistry::with_defaults(),
            uid: Cell::new(0),
            scratch: RefCell::new(ScratchTable::default()),
            page_cache: RefCell::new(HashMap::new()),
            expansion_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Rc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_extension(mut self, name: &str, renderer: Rc<dyn ExtensionRenderer>) -> Self {
        self.extensions.register(name, renderer);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn site(&self) -> &SiteConfig {
        &self.options.site
    }

    pub fn data_access(&self) -> Rc<dyn DataAccess> {
        Rc::clone(&self.data_access)
    }

    pub fn tokenizer(&self) -> Rc<dyn Tokenizer> {
        Rc::clone(&self.tokenizer)
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Fresh document-unique object id (`mwt1`, `mwt2`, ...).
    pub fn new_object_id(&self) -> String {
        let next = self.uid.get() + 1;
        self.uid.set(next);
        format!("mwt{}", next)
    }

    /// Fresh `about` id for wrapper markers (`#mwt1`, ...).
    pub fn new_about_id(&self) -> String {
        format!("#{}", self.new_object_id())
    }

    pub fn scratch(&self, id: TokenId) -> Option<Scratch> {
        self.scratch.borrow().get(id).cloned()
    }

    pub fn with_scratch<R>(&self, id: TokenId, f: impl FnOnce(&mut Scratch) -> R) -> R {
        f(self.scratch.borrow_mut().entry(id))
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.borrow().len()
    }

    pub fn cache_page(&self, title: &str, source: &str) {
        self.page_cache
            .borrow_mut()
            .insert(title.to_string(), source.to_string());
    }

    pub fn cached_page(&self, title: &str) -> Option<String> {
        self.page_cache.borrow().get(title).cloned()
    }

    pub fn cache_expansion(&self, source: &str, tokens: Vec<Token>) {
        self.expansion_cache
            .borrow_mut()
            .insert(source.to_string(), tokens);
    }

    pub fn cached_expansion(&self, source: &str) -> Option<Vec<Token>> {
        self.expansion_cache.borrow().get(source).cloned()
    }

    /// Forget everything scoped to the current document. Cached page
    /// sources survive.
    pub fn reset(&self) {
        self.uid.set(0);
        self.scratch.borrow_mut().clear();
        self.expansion_cache.borrow_mut().clear();
    }
}
