use serde::Deserialize;

/// Default bound on block nesting and inclusion depth.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Default bound, in bytes, on what a single repeating block may emit.
pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024 * 1024;

/// Engine behaviour switches.
///
/// Deserializable so hosts can keep it in their own config files; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject registering a directive name twice.
    pub strict: bool,
    /// Maximum nesting of block directives and inclusions.
    pub max_depth: usize,
    /// Strip newline-bearing whitespace at the edges of block bodies.
    pub trim_blocks: bool,
    /// Largest output a repeating block may produce.
    pub max_output: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_depth: DEFAULT_MAX_DEPTH,
            trim_blocks: false,
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl EngineConfig {
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn trim_blocks(mut self, trim_blocks: bool) -> Self {
        self.trim_blocks = trim_blocks;
        self
    }

    pub fn max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}
