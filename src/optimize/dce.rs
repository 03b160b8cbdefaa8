use crate::graph::{Block, Node, NodeId};

use super::{BlockPass, GraphMutator, OptimizeError, PassContext};

/// Remove operations whose outputs are unused, and constants and captures
/// with no consumers.
///
/// Nested blocks are cleaned up before their parent, so values which are
/// only captured by dead code in a nested block are removed too.
pub struct DeadCodeElimination {}

impl BlockPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn rewrite(&self, block: Block, _ctx: &PassContext) -> Result<Block, OptimizeError> {
        let mut block = GraphMutator::from_block(block);

        // Visit op outputs latest-first so chains of dead ops are removed
        // with few revisits.
        let mut candidates: Vec<NodeId> = block
            .block()
            .iter()
            .filter(|(_, node)| !matches!(node, Node::Operator(_)))
            .map(|(id, _)| id)
            .collect();
        candidates.reverse();

        let removed = block.remove_dead(candidates);
        if removed > 0 {
            log::debug!(target: "milc::optimize", "removed {} dead ops", removed);
        }

        Ok(block.into_block())
    }
}
