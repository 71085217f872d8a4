//! Grammar tables and syntax hooks shared by every extractor.
//!
//! Each language describes its grammar once, as a [`LanguageProfile`] of node
//! kinds plus a [`BodySyntax`] implementation for the constructs that need
//! real inspection. The shared walker in [`crate::extract`] turns a function
//! body into language-neutral facts from those two descriptions.

use tree_sitter::Node;

use crate::extract::FunctionDraft;
use crate::types::{CallSite, LineRange};

/// Node-kind tables for one grammar.
#[derive(Debug)]
pub struct LanguageProfile {
    /// Conditional branches: `if`, `elif`, ternaries.
    pub branch_kinds: &'static [&'static str],
    pub loop_kinds: &'static [&'static str],
    /// Case/match arms; every arm after the first is a decision point.
    pub arm_kinds: &'static [&'static str],
    /// Catch / except clauses.
    pub handler_kinds: &'static [&'static str],
    /// Binary nodes that may carry a short-circuit operator.
    pub logical_kinds: &'static [&'static str],
    pub logical_operators: &'static [&'static str],
    /// Statements that deepen nesting.
    pub nesting_kinds: &'static [&'static str],
    /// Nested definitions the body walker does not enter. Functions among
    /// them are built separately through [`BodySyntax::nested_function`].
    pub definition_kinds: &'static [&'static str],
    /// Nodes that open a block scope.
    pub block_scope_kinds: &'static [&'static str],
    pub call_kinds: &'static [&'static str],
    pub return_kinds: &'static [&'static str],
    pub yield_kinds: &'static [&'static str],
    pub await_kinds: &'static [&'static str],
    /// Callee patterns treated as I/O. `name`, `recv.name`, or `prefix.*`.
    pub io_calls: &'static [&'static str],
    pub nondeterministic_calls: &'static [&'static str],
    /// Identifiers whose mere use is I/O (`std::cout`).
    pub io_identifiers: &'static [&'static str],
    /// Receivers that denote the current instance.
    pub self_names: &'static [&'static str],
    /// Plain assignment to an unknown name declares a local.
    pub assignment_declares: bool,
}

impl LanguageProfile {
    /// Decision points contributed by this node alone.
    pub fn decision_points(&self, node: Node<'_>) -> u32 {
        let kind = node.kind();
        if self.branch_kinds.contains(&kind)
            || self.loop_kinds.contains(&kind)
            || self.handler_kinds.contains(&kind)
        {
            return 1;
        }
        if self.arm_kinds.contains(&kind) && has_previous_sibling_of(node, self.arm_kinds) {
            return 1;
        }
        if self.logical_kinds.contains(&kind) && self.has_logical_operator(node) {
            return 1;
        }
        0
    }

    fn has_logical_operator(&self, node: Node<'_>) -> bool {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .any(|child| !child.is_named() && self.logical_operators.contains(&child.kind()));
        found
    }

    pub fn is_io_call(&self, site: &CallSite) -> bool {
        matches_call_pattern(self.io_calls, site)
    }

    pub fn is_nondeterministic_call(&self, site: &CallSite) -> bool {
        matches_call_pattern(self.nondeterministic_calls, site)
    }

    pub fn is_self_name(&self, name: &str) -> bool {
        self.self_names.contains(&name)
    }
}

fn matches_call_pattern(patterns: &[&str], site: &CallSite) -> bool {
    let raw = site.raw.as_str();
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix(".*") {
            raw.strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with("::"))
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            raw.starts_with(prefix)
        } else if pattern.contains('.') || pattern.contains("::") {
            raw == *pattern
        } else {
            raw == *pattern
                || (site.name == *pattern && matches!(site.receiver, crate::types::CallReceiver::Bare))
        }
    })
}

fn has_previous_sibling_of(node: Node<'_>, kinds: &[&str]) -> bool {
    let mut current = node.prev_named_sibling();
    while let Some(sibling) = current {
        if kinds.contains(&sibling.kind()) {
            return true;
        }
        current = sibling.prev_named_sibling();
    }
    false
}

/// A name introduced into the current scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub type_hint: Option<String>,
    pub is_const: bool,
    pub initialized: bool,
    /// Identifier node that spells the name; not counted as a read.
    pub node_id: usize,
    pub line: usize,
}

/// The target of an assignment-like node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTarget {
    /// Base identifier: `x` in `x = 1`, `self` in `self.count += 1`.
    pub base: String,
    /// Member or index written through the base, if any.
    pub member: Option<String>,
    pub type_hint: Option<String>,
    pub node_id: usize,
    pub line: usize,
}

impl WriteTarget {
    /// `base.member`, `base[]`, or just `base`.
    pub fn path(&self) -> String {
        match self.member.as_deref() {
            Some(member) if member.starts_with('[') => format!("{}{member}", self.base),
            Some(member) => format!("{}.{member}", self.base),
            None => self.base.clone(),
        }
    }
}

/// Language hooks consulted by the shared body walker.
pub trait BodySyntax {
    fn profile(&self) -> &'static LanguageProfile;

    /// Describe a call node (one of `profile().call_kinds`).
    fn call_site(&self, node: Node<'_>, source: &str) -> Option<CallSite>;

    /// Type name constructed by this node, if it is an instantiation.
    fn instantiation(&self, node: Node<'_>, source: &str) -> Option<String>;

    /// Names declared by this node.
    fn declarations(&self, node: Node<'_>, source: &str) -> Vec<Binding>;

    /// Targets written by this node.
    fn writes(&self, node: Node<'_>, source: &str) -> Vec<WriteTarget>;

    /// Names rebound to an enclosing scope (`global x`, `nonlocal x`).
    fn outer_bindings(&self, _node: Node<'_>, _source: &str) -> Vec<String> {
        Vec::new()
    }

    /// Draft for a function defined inside a body or a module-level block
    /// (`def` within `def`, a local function). `None` leaves it out.
    fn nested_function<'t>(&self, _node: Node<'t>, _source: &str) -> Option<FunctionDraft<'t>> {
        None
    }

    /// Name read by an identifier node.
    fn identifier(&self, node: Node<'_>, source: &str) -> Option<String> {
        (node.kind() == "identifier").then(|| node_text(node, source))
    }
}

pub fn node_text(node: Node<'_>, source: &str) -> String {
    node_str(node, source).to_string()
}

pub fn node_str<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or_default()
}

/// 1-based inclusive line range of a node.
pub fn line_range(node: Node<'_>) -> LineRange {
    LineRange::new(node.start_position().row + 1, node.end_position().row + 1)
}

pub fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// All children, including anonymous tokens.
pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// True if an anonymous child token of this kind is present (`async`, `static`, `*`).
pub fn has_token(node: Node<'_>, token: &str) -> bool {
    children(node)
        .iter()
        .any(|child| !child.is_named() && child.kind() == token)
}

/// First descendant (depth-first, including `node`) of one of the given kinds.
pub fn find_descendant<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if kinds.contains(&current.kind()) {
            return Some(current);
        }
        let mut cursor = current.walk();
        let kids: Vec<Node<'t>> = current.named_children(&mut cursor).collect();
        stack.extend(kids.into_iter().rev());
    }
    None
}

/// First error or missing node, for diagnostics.
pub fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.is_error() || current.is_missing() {
            return Some(current);
        }
        if !current.has_error() {
            continue;
        }
        let mut cursor = current.walk();
        let kids: Vec<Node<'_>> = current.children(&mut cursor).collect();
        stack.extend(kids.into_iter().rev());
    }
    None
}

/// Trim matching quotes from a string literal.
pub fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ["\"\"\"", "'''", "\"", "'", "`"] {
        if trimmed.len() >= 2 * quote.len() && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[quote.len()..trimmed.len() - quote.len()].to_string();
        }
    }
    trimmed.to_string()
}

/// Contiguous comment block directly above `node`, filtered by `accept`.
///
/// Comments separated from the node (or from each other) by a blank line are ignored.
pub fn leading_comment(node: Node<'_>, source: &str, accept: fn(&str) -> bool) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_end = node.start_position().row;
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if sibling.kind() != "comment" {
            break;
        }
        let end = sibling.end_position().row;
        if end + 1 < expected_end {
            break;
        }
        let text = node_str(sibling, source);
        if !accept(text) {
            break;
        }
        lines.push(text);
        expected_end = sibling.start_position().row;
        current = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let cleaned = clean_comment(&lines.join("\n"));
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Remove comment markers and leading `*` gutters.
pub fn clean_comment(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_start_matches("///")
                .trim_start_matches("//")
                .trim_end_matches("*/");
            line.trim_start_matches('*').trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallReceiver;

    static PROFILE: LanguageProfile = LanguageProfile {
        branch_kinds: &[],
        loop_kinds: &[],
        arm_kinds: &[],
        handler_kinds: &[],
        logical_kinds: &[],
        logical_operators: &[],
        nesting_kinds: &[],
        definition_kinds: &[],
        block_scope_kinds: &[],
        call_kinds: &[],
        return_kinds: &[],
        yield_kinds: &[],
        await_kinds: &[],
        io_calls: &["print", "console.*", "Console.Write*", "fs.writeFileSync"],
        nondeterministic_calls: &["random.*", "Date.now"],
        io_identifiers: &[],
        self_names: &["self"],
        assignment_declares: true,
    };

    #[test]
    fn test_call_patterns() {
        let print = CallSite::new("print", CallReceiver::Bare, 1);
        assert!(PROFILE.is_io_call(&print));

        let method_print = CallSite::new("print", CallReceiver::Named("doc".into()), 1);
        assert!(!PROFILE.is_io_call(&method_print));

        let log = CallSite::new("log", CallReceiver::Named("console".into()), 1);
        assert!(PROFILE.is_io_call(&log));

        let write_line = CallSite::new("WriteLine", CallReceiver::Named("Console".into()), 1);
        assert!(PROFILE.is_io_call(&write_line));

        let rand = CallSite::new("randint", CallReceiver::Named("random".into()), 1);
        assert!(PROFILE.is_nondeterministic_call(&rand));

        let now = CallSite::new("now", CallReceiver::Named("Date".into()), 1);
        assert!(PROFILE.is_nondeterministic_call(&now));

        let consolidate = CallSite::new("consolidate", CallReceiver::Bare, 1);
        assert!(!PROFILE.is_io_call(&consolidate));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'./util'"), "./util");
        assert_eq!(strip_quotes("\"a.h\""), "a.h");
        assert_eq!(strip_quotes("\"\"\"doc\"\"\""), "doc");
        assert_eq!(strip_quotes("bare"), "bare");
    }

    #[test]
    fn test_clean_comment() {
        let raw = "/**\n * Adds two numbers.\n * @param a first\n */";
        assert_eq!(clean_comment(raw), "Adds two numbers.\n@param a first");
        assert_eq!(clean_comment("/// Summary line"), "Summary line");
    }
}
