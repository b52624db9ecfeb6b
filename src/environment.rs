use std::collections::HashSet;

/// Finalize hook applied to folded constants before they are inlined as
/// literal text. Returning `None` marks the fold as failed; the fragment is
/// then emitted as a dynamic expression instead.
pub type Finalize = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration consumed by one compilation. Supplied by the embedding host;
/// borrowed read-only for the duration of a `generate` call.
pub struct Environment {
    /// When true, intercepted operators compile to calls through the
    /// sandbox's operator hooks instead of plain target-language operators.
    pub sandboxed: bool,
    /// Source-language binary operator symbols subject to interception
    /// (`"+"`, `"//"`, `"**"`, `"and"`, ...).
    pub intercepted_binops: HashSet<&'static str>,
    /// Source-language unary operator symbols subject to interception.
    pub intercepted_unops: HashSet<&'static str>,
    /// HTML-escape folded constants before inlining them.
    pub autoescape: bool,
    pub finalize: Option<Finalize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intercepts_binop(&self, symbol: &str) -> bool {
        self.sandboxed && self.intercepted_binops.contains(symbol)
    }

    pub fn intercepts_unop(&self, symbol: &str) -> bool {
        self.sandboxed && self.intercepted_unops.contains(symbol)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            sandboxed: false,
            intercepted_binops: HashSet::new(),
            intercepted_unops: HashSet::new(),
            autoescape: false,
            finalize: None,
        }
    }
}
