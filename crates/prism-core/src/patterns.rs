//! Heuristic design-pattern detection.
//!
//! Every detector scores a fixed list of weighted structural clauses and
//! reports which ones fired. Scores only ever add up, so more corroborating
//! structure never lowers a match's confidence. Nothing here claims a class
//! *is* a pattern; consumers threshold on `confidence`.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PatternConfig;
use crate::types::{short_name, CallReceiver, ClassSymbol, FileRecord, FunctionSymbol, Visibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKind {
    Singleton,
    Factory,
    Observer,
    Strategy,
    Decorator,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternKind::Singleton => "Singleton",
            PatternKind::Factory => "Factory",
            PatternKind::Observer => "Observer",
            PatternKind::Strategy => "Strategy",
            PatternKind::Decorator => "Decorator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// File of the primary symbol.
    pub path: String,
    /// Qualified names involved, primary symbol first.
    pub symbols: Vec<String>,
    pub evidence: Vec<String>,
    pub confidence: f64,
}

/// Accumulates fired clauses for one candidate.
#[derive(Debug, Default)]
struct Score {
    total: f64,
    evidence: Vec<String>,
}

impl Score {
    fn add(&mut self, weight: f64, evidence: impl Into<String>) {
        self.total += weight;
        self.evidence.push(evidence.into());
    }

    fn confidence(&self) -> f64 {
        (self.total.clamp(0.0, 1.0) * 100.0).round() / 100.0
    }
}

const INSTANCE_FIELD_NAMES: &[&str] = &["_instance", "__instance", "instance", "INSTANCE", "_shared", "shared"];
const ACCESSOR_NAMES: &[&str] = &[
    "get_instance",
    "getInstance",
    "GetInstance",
    "instance",
    "Instance",
    "shared",
    "get",
    "default",
];
const FACTORY_WORDS: &[&str] = &["create", "make", "build", "factory", "new_", "produce"];
const LISTENER_WORDS: &[&str] = &["observer", "listener", "subscriber", "handler", "callback", "watcher"];
const SUBSCRIBE_WORDS: &[&str] = &["subscribe", "attach", "add_listener", "addlistener", "add_observer", "addobserver", "register", "addeventlistener", "on"];
const NOTIFY_WORDS: &[&str] = &["notify", "emit", "publish", "dispatch", "fire", "trigger", "broadcast"];

/// Run every detector and keep matches at or above the configured confidence.
pub fn detect_patterns(files: &IndexMap<String, FileRecord>, config: &PatternConfig) -> Vec<PatternMatch> {
    let classes: Vec<(&str, &ClassSymbol)> = files
        .values()
        .flat_map(|f| f.classes.iter().map(move |c| (f.path.as_str(), c)))
        .collect();

    let mut matches = Vec::new();
    for (path, class) in &classes {
        matches.extend(singleton(path, class));
        matches.extend(observer(path, class));
        matches.extend(decorator(path, class));
    }
    for (path, interface) in &classes {
        matches.extend(strategy(path, interface, &classes));
    }
    for record in files.values() {
        for function in record.all_functions() {
            matches.extend(factory(&record.path, function));
        }
    }

    let before = matches.len();
    matches.retain(|m| m.confidence >= config.min_confidence);
    debug!(
        kept = matches.len(),
        dropped = before - matches.len(),
        "pattern detection finished"
    );
    matches
}

fn matched(kind: PatternKind, path: &str, symbols: Vec<String>, score: Score) -> Option<PatternMatch> {
    if score.total <= 0.0 {
        return None;
    }
    Some(PatternMatch {
        kind,
        path: path.to_string(),
        symbols,
        confidence: score.confidence(),
        evidence: score.evidence,
    })
}

fn contains_word(name: &str, words: &[&str]) -> bool {
    let lower = name.to_lowercase();
    words.iter().any(|w| lower.contains(w))
}

fn type_mentions(type_hint: Option<&str>, name: &str) -> bool {
    type_hint.is_some_and(|t| {
        t.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .any(|part| part == name)
    })
}

fn strip_self(receiver: &str) -> &str {
    for prefix in ["self.", "this.", "this->", "cls."] {
        if let Some(rest) = receiver.strip_prefix(prefix) {
            return rest;
        }
    }
    receiver
}

fn singleton(path: &str, class: &ClassSymbol) -> Option<PatternMatch> {
    let mut score = Score::default();
    let self_typed = class.fields.iter().find(|f| {
        f.is_static && (type_mentions(f.type_hint.as_deref(), &class.name) || INSTANCE_FIELD_NAMES.contains(&f.name.as_str()))
    });
    let field = self_typed?;
    score.add(0.35, format!("static field `{}` holds the instance", field.name));

    let accessor = class.methods.iter().find(|m| {
        (m.is_static || m.decorators.iter().any(|d| d == "classmethod" || d == "staticmethod"))
            && !m.is_constructor
            && (ACCESSOR_NAMES.contains(&m.name.as_str())
                || type_mentions(m.return_type.as_deref(), &class.name)
                || m.returns_new.iter().any(|t| t == &class.name))
    });
    if let Some(accessor) = accessor {
        score.add(0.35, format!("static accessor `{}`", accessor.name));
    }

    match class.constructor() {
        Some(ctor) if ctor.visibility != Visibility::Public => {
            score.add(0.3, format!("constructor is {:?}", ctor.visibility).to_lowercase());
        }
        _ => {
            if class.methods.iter().any(|m| m.name == "__new__") {
                score.add(0.3, "overrides __new__ to control construction");
            }
        }
    }

    let mut symbols = vec![class.qualified_name.0.clone()];
    symbols.extend(accessor.map(|a| a.qualified_name.0.clone()));
    matched(PatternKind::Singleton, path, symbols, score)
}

fn factory(path: &str, function: &FunctionSymbol) -> Option<PatternMatch> {
    let returned: BTreeSet<&str> = function.returns_new.iter().map(String::as_str).collect();
    let constructed: BTreeSet<&str> = function
        .instantiates
        .iter()
        .map(String::as_str)
        .filter(|t| !returned.contains(t))
        .collect();
    let total = returned.len() + constructed.len();
    if total == 0 {
        return None;
    }
    let named = contains_word(&function.name, FACTORY_WORDS);
    if total < 2 && !named {
        return None;
    }

    // Every product counts; one handed back to the caller counts more.
    let mut score = Score::default();
    let type_weight = 0.15 * returned.len() as f64 + 0.1 * constructed.len() as f64;
    let mut evidence = Vec::new();
    if !returned.is_empty() {
        evidence.push(format!("returns new `{}`", returned.iter().copied().collect::<Vec<_>>().join("`, `")));
    }
    if !constructed.is_empty() {
        evidence.push(format!("constructs `{}`", constructed.iter().copied().collect::<Vec<_>>().join("`, `")));
    }
    score.add(type_weight.min(0.5), evidence.join("; "));
    if named {
        score.add(0.25, format!("name `{}` reads as a factory", function.name));
    }
    if function.complexity > 1 && !function.parameters.is_empty() {
        score.add(0.25, "chooses the product by a branch on its parameters");
    }
    matched(PatternKind::Factory, path, vec![function.qualified_name.0.clone()], score)
}

fn observer(path: &str, class: &ClassSymbol) -> Option<PatternMatch> {
    let mut score = Score::default();
    let listeners = class.fields.iter().find(|f| contains_word(&f.name, LISTENER_WORDS));
    if let Some(field) = listeners {
        score.add(0.35, format!("holds listeners in `{}`", field.name));
    }
    let subscribe = class.methods.iter().find(|m| {
        let lower = m.name.to_lowercase();
        SUBSCRIBE_WORDS
            .iter()
            .any(|w| if *w == "on" { lower == "on" } else { lower.contains(w) })
    });
    if let Some(method) = subscribe {
        score.add(0.3, format!("subscription method `{}`", method.name));
    }
    let notify = class.methods.iter().find(|m| contains_word(&m.name, NOTIFY_WORDS));
    if let Some(method) = notify {
        score.add(0.35, format!("notification method `{}`", method.name));
    }
    // Notification alone is common in plain code.
    if listeners.is_none() && subscribe.is_none() {
        return None;
    }
    let mut symbols = vec![class.qualified_name.0.clone()];
    symbols.extend(subscribe.map(|m| m.qualified_name.0.clone()));
    symbols.extend(notify.map(|m| m.qualified_name.0.clone()));
    matched(PatternKind::Observer, path, symbols, score)
}

/// Whether `class` lists `base` among its bases, by qualified or short name.
fn extends(class: &ClassSymbol, base: &ClassSymbol) -> bool {
    class
        .bases
        .iter()
        .any(|b| b == base.qualified_name.as_str() || short_name(b) == base.name)
}

fn strategy(path: &str, interface: &ClassSymbol, classes: &[(&str, &ClassSymbol)]) -> Option<PatternMatch> {
    let implementers: Vec<&ClassSymbol> = classes
        .iter()
        .map(|(_, c)| *c)
        .filter(|c| c.qualified_name != interface.qualified_name && extends(c, interface))
        .collect();
    if implementers.len() < 2 {
        return None;
    }

    let mut score = Score::default();
    if interface.is_interface_like() || interface.is_abstract {
        score.add(0.3, format!("`{}` is interface-shaped", interface.name));
    }
    let k = implementers.len() as f64;
    score.add(
        (0.3 + 0.05 * (k - 2.0)).min(0.4),
        format!(
            "{} variants: {}",
            implementers.len(),
            implementers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        ),
    );

    let consumer = classes.iter().map(|(_, c)| *c).find(|c| {
        !extends(c, interface)
            && c.qualified_name != interface.qualified_name
            && (c.fields.iter().any(|f| type_mentions(f.type_hint.as_deref(), &interface.name))
                || c.constructor().is_some_and(|ctor| {
                    ctor.parameters
                        .iter()
                        .any(|p| type_mentions(p.type_hint.as_deref(), &interface.name))
                }))
    });
    if let Some(consumer) = consumer {
        score.add(0.3, format!("`{}` receives a {} by injection", consumer.name, interface.name));
    }

    let mut symbols = vec![interface.qualified_name.0.clone()];
    symbols.extend(implementers.iter().map(|c| c.qualified_name.0.clone()));
    symbols.extend(consumer.map(|c| c.qualified_name.0.clone()));
    matched(PatternKind::Strategy, path, symbols, score)
}

fn decorator(path: &str, class: &ClassSymbol) -> Option<PatternMatch> {
    let mut best: Option<(Score, String)> = None;
    for base in &class.bases {
        let base_name = short_name(base);
        let wrapped = class
            .fields
            .iter()
            .find(|f| type_mentions(f.type_hint.as_deref(), base_name))
            .map(|f| f.name.clone())
            .or_else(|| {
                class.constructor().and_then(|ctor| {
                    ctor.parameters
                        .iter()
                        .find(|p| type_mentions(p.type_hint.as_deref(), base_name))
                        .map(|p| p.name.clone())
                })
            });
        let Some(wrapped) = wrapped else {
            continue;
        };

        let mut score = Score::default();
        score.add(0.4, format!("wraps a `{base_name}` in `{wrapped}`"));

        let forwarding: Vec<&str> = class
            .methods
            .iter()
            .filter(|m| {
                m.call_sites.iter().any(|site| {
                    site.name == m.name
                        && matches!(&site.receiver, CallReceiver::Named(recv)
                            if strip_self(recv).trim_start_matches('_') == wrapped.trim_start_matches('_'))
                })
            })
            .map(|m| m.name.as_str())
            .collect();
        if !forwarding.is_empty() {
            let weight = 0.25 + 0.05 * (forwarding.len() as f64 - 1.0);
            score.add(weight.min(0.35), format!("forwards {} to `{wrapped}`", forwarding.join(", ")));
        }
        if class.methods.iter().any(|m| m.is_special && !m.is_constructor) {
            score.add(0.25, format!("overrides methods of `{base_name}`"));
        }

        if best.as_ref().map_or(true, |(b, _)| score.total > b.total) {
            best = Some((score, base.clone()));
        }
    }
    let (score, base) = best?;
    matched(
        PatternKind::Decorator,
        path,
        vec![class.qualified_name.0.clone(), base],
        score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallSite, ClassKind, FieldDecl, Language, LineRange, Parameter, QualifiedName};

    fn class(name: &str) -> ClassSymbol {
        let mut c = ClassSymbol::new(name, ClassKind::Class, LineRange::new(1, 20));
        c.qualified_name = QualifiedName::new("a.py", None, name);
        c
    }

    fn method(class: &str, name: &str) -> FunctionSymbol {
        FunctionSymbol::new("a.py", Some(class), name, LineRange::new(2, 4))
    }

    fn field(name: &str, type_hint: Option<&str>, is_static: bool) -> FieldDecl {
        FieldDecl {
            name: name.to_string(),
            type_hint: type_hint.map(str::to_string),
            is_static,
            visibility: Visibility::Public,
            line: 1,
        }
    }

    fn files(classes: Vec<ClassSymbol>, functions: Vec<FunctionSymbol>) -> IndexMap<String, FileRecord> {
        let mut record = FileRecord::empty("a.py", Language::Python);
        record.classes = classes;
        record.functions = functions;
        [("a.py".to_string(), record)].into_iter().collect()
    }

    fn detect(files: &IndexMap<String, FileRecord>) -> Vec<PatternMatch> {
        detect_patterns(files, &PatternConfig { min_confidence: 0.0 })
    }

    fn factory_function(types: &[&str]) -> FunctionSymbol {
        let mut f = FunctionSymbol::new("a.py", None, "create_shape", LineRange::new(1, 9));
        f.parameters.push(Parameter::new("kind", None));
        f.complexity = 3;
        f.returns_new = types.iter().map(|t| t.to_string()).collect();
        f.instantiates = f.returns_new.clone();
        f
    }

    #[test]
    fn test_singleton_detected_with_evidence() {
        let mut config = class("Config");
        config.fields.push(field("_instance", None, true));
        let mut accessor = method("Config", "get_instance");
        accessor.decorators.push("classmethod".to_string());
        config.methods.push(accessor);
        config.methods.push(method("Config", "__new__"));

        let found = detect(&files(vec![config], vec![]));
        let singleton = found.iter().find(|m| m.kind == PatternKind::Singleton).unwrap();
        assert_eq!(singleton.evidence.len(), 3);
        assert!((singleton.confidence - 1.0).abs() < 1e-9);
        assert!(singleton.symbols[1].ends_with("get_instance"));
    }

    #[test]
    fn test_factory_confidence_monotone_in_types() {
        let one = detect(&files(vec![], vec![factory_function(&["Circle"])]));
        let two = detect(&files(vec![], vec![factory_function(&["Circle", "Square"])]));
        let three = detect(&files(vec![], vec![factory_function(&["Circle", "Square", "Triangle"])]));

        let c1 = one[0].confidence;
        let c2 = two[0].confidence;
        let c3 = three[0].confidence;
        assert!(c2 >= c1, "{c2} < {c1}");
        assert!(c3 >= c2, "{c3} < {c2}");
        assert!(c1 < 1.0);

        // Returning one of several constructed products must not hide the rest.
        let mut plain = FunctionSymbol::new("a.py", None, "assemble", LineRange::new(1, 9));
        plain.instantiates = vec!["Engine".into(), "Wheel".into(), "Frame".into()];
        let mut returning = plain.clone();
        returning.returns_new = vec!["Frame".into()];
        let mut returning_two = returning.clone();
        returning_two.returns_new.push("Engine".into());

        let c_plain = detect(&files(vec![], vec![plain]))[0].confidence;
        let c_returning = detect(&files(vec![], vec![returning]))[0].confidence;
        let c_returning_two = detect(&files(vec![], vec![returning_two]))[0].confidence;
        assert!(c_returning >= c_plain, "{c_returning} < {c_plain}");
        assert!(c_returning_two >= c_returning, "{c_returning_two} < {c_returning}");

        let mut wider = factory_function(&["Circle"]);
        wider.instantiates.push("Palette".into());
        let c_wider = detect(&files(vec![], vec![wider]))[0].confidence;
        assert!(c_wider >= c1, "{c_wider} < {c1}");
    }

    #[test]
    fn test_single_construction_without_factory_name_is_ignored() {
        let mut f = FunctionSymbol::new("a.py", None, "load", LineRange::new(1, 3));
        f.instantiates.push("Path".to_string());
        assert!(detect(&files(vec![], vec![f])).is_empty());
    }

    #[test]
    fn test_observer() {
        let mut subject = class("EventBus");
        subject.fields.push(field("listeners", Some("list"), false));
        subject.methods.push(method("EventBus", "subscribe"));
        subject.methods.push(method("EventBus", "notify_all"));

        let found = detect(&files(vec![subject], vec![]));
        let observer = found.iter().find(|m| m.kind == PatternKind::Observer).unwrap();
        assert!((observer.confidence - 1.0).abs() < 1e-9);
        assert_eq!(observer.symbols.len(), 3);
    }

    #[test]
    fn test_strategy_needs_two_variants() {
        let mut interface = class("Sorter");
        interface.is_abstract = true;
        let mut quick = class("QuickSort");
        quick.bases.push("a.py::Sorter".to_string());
        let mut merge = class("MergeSort");
        merge.bases.push("Sorter".to_string());
        let mut consumer = class("Report");
        consumer.fields.push(field("sorter", Some("Sorter"), false));

        let found = detect(&files(vec![interface.clone(), quick.clone(), consumer.clone()], vec![]));
        assert!(found.iter().all(|m| m.kind != PatternKind::Strategy));

        let found = detect(&files(vec![interface, quick, merge, consumer], vec![]));
        let strategy = found.iter().find(|m| m.kind == PatternKind::Strategy).unwrap();
        assert!((strategy.confidence - 0.9).abs() < 1e-9);
        assert!(strategy.symbols.iter().any(|s| s.ends_with("Report")));
    }

    #[test]
    fn test_decorator_forwarding() {
        let mut wrapper = class("LoggingStore");
        wrapper.bases.push("Store".to_string());
        wrapper.fields.push(field("_inner", Some("Store"), false));
        let mut save = method("LoggingStore", "save");
        save.is_special = true;
        save.call_sites
            .push(CallSite::new("save", CallReceiver::Named("self._inner".into()), 3));
        wrapper.methods.push(save);

        let found = detect(&files(vec![wrapper], vec![]));
        let decorator = found.iter().find(|m| m.kind == PatternKind::Decorator).unwrap();
        assert_eq!(decorator.evidence.len(), 3);
        assert!((decorator.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_min_confidence_filters() {
        let files = files(vec![], vec![factory_function(&["Circle"])]);
        let all = detect_patterns(&files, &PatternConfig { min_confidence: 0.0 });
        let strict = detect_patterns(&files, &PatternConfig { min_confidence: 0.99 });
        assert_eq!(all.len(), 1);
        assert!(strict.is_empty());
    }
}
