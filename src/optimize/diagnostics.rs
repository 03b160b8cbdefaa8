use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use rustc_hash::FxHashSet;

use crate::graph::{Block, NodeId};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't show any diagnostics.
    #[default]
    Off,
    /// Report only unsuccessful optimizations.
    Warn,
    /// Report all optimizations.
    Info,
}

/// Error returned when parsing an unrecognized [`DiagnosticLevel`].
#[derive(Clone, Debug, PartialEq)]
pub struct ParseLevelError(String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown diagnostic level \"{}\"", self.0)
    }
}

impl std::error::Error for ParseLevelError {}

impl FromStr for DiagnosticLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(DiagnosticLevel::Off),
            "warn" => Ok(DiagnosticLevel::Warn),
            "info" => Ok(DiagnosticLevel::Info),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Diagnostic reporter for block optimizations.
///
/// Messages are emitted through the `log` crate with the "milc::optimize"
/// target. Warnings are reported at most once per node.
pub struct Diagnostics {
    /// Names of nodes against which diagnostics have been reported at the
    /// `Warn` level or higher. Names are used rather than IDs because IDs
    /// are local to a block.
    warned_nodes: Mutex<FxHashSet<String>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: Mutex::new(FxHashSet::default()),
            level,
        }
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        self.level >= level
    }

    /// Log a diagnostic message for a given node at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, block: &Block, node: NodeId, message: fmt::Arguments<'_>) {
        if self.level < DiagnosticLevel::Info {
            return;
        }
        log::info!(target: "milc::optimize", "{}: {}", block.node_name(node), message);
    }

    /// Log a diagnostic message for a given node at the [`Warn`](DiagnosticLevel::Warn) level.
    pub fn warn(&self, block: &Block, node: NodeId, message: fmt::Arguments<'_>) {
        if self.level < DiagnosticLevel::Warn {
            return;
        }
        let name = block.node_name(node);
        let first = self
            .warned_nodes
            .lock()
            .map(|mut warned| warned.insert(name.clone()))
            .unwrap_or(true);
        if first {
            log::warn!(target: "milc::optimize", "{}: {}", name, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticLevel, Diagnostics};
    use crate::graph::builder::Expr;
    use crate::types::{DataType, TensorType};

    #[test]
    fn test_parse_level() {
        assert_eq!("off".parse(), Ok(DiagnosticLevel::Off));
        assert_eq!("warn".parse(), Ok(DiagnosticLevel::Warn));
        assert_eq!("info".parse(), Ok(DiagnosticLevel::Info));
        assert!("verbose".parse::<DiagnosticLevel>().is_err());
    }

    #[test]
    fn test_warn_once_per_node() {
        let x = Expr::value("x", TensorType::fixed(DataType::Float32, &[2]));
        let block = x.unary("relu").build_block(&[x]);
        let op_id = block.op_order()[0];

        let diagnostics = Diagnostics::new(DiagnosticLevel::Warn);
        assert!(diagnostics.enabled(DiagnosticLevel::Warn));
        assert!(!diagnostics.enabled(DiagnosticLevel::Info));

        diagnostics.warn(&block, op_id, format_args!("first"));
        diagnostics.warn(&block, op_id, format_args!("second"));
        let warned = diagnostics.warned_nodes.lock().unwrap();
        assert_eq!(warned.len(), 1);
        assert!(warned.contains("relu_0"));
    }
}
