use super::{Block, Node};

/// The chain of enclosing blocks in which a nested block resolves the values
/// it captures.
///
/// Blocks owned by control flow ops (`cond`, `while_loop`) may contain value
/// nodes which capture their values from enclosing blocks, like a captured
/// variable in a Rust closure. Lookups try the environment's block first and
/// then the parent environment and so on, outwards to the function's root
/// block.
#[derive(Clone, Copy)]
pub struct ScopeEnv<'a> {
    parent: Option<&'a ScopeEnv<'a>>,
    block: &'a Block,
}

impl<'a> ScopeEnv<'a> {
    /// Create an environment for the root block of a function.
    pub fn new(block: &'a Block) -> ScopeEnv<'a> {
        ScopeEnv {
            parent: None,
            block,
        }
    }

    /// Return a new environment for `block`, nested inside `self`.
    pub fn child<'b>(&'b self, block: &'b Block) -> ScopeEnv<'b> {
        ScopeEnv {
            parent: Some(self),
            block,
        }
    }

    pub fn block(&self) -> &'a Block {
        self.block
    }

    /// Look up a value or constant node by name in this environment.
    pub fn get_node(&self, name: &str) -> Option<&'a Node> {
        if let Some(node_id) = self.block.node_id(name) {
            // If a node by this name exists in this block, but is a placeholder
            // for a value captured from an enclosing block, then ignore it.
            if !self.block.is_capture(node_id) {
                return self.block.node(node_id);
            }
        }
        self.parent.and_then(|parent| parent.get_node(name))
    }

    /// Return true if any block in the environment, or a block nested
    /// inside one, uses `name`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.block.uses_name(name)
            || self.parent.is_some_and(|parent| parent.contains_name(name))
    }
}
