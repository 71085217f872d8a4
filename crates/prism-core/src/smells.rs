use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::SmellConfig;
use crate::types::{ClassSymbol, FileRecord, FunctionSymbol, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmellKind {
    LongMethod,
    LargeClass,
    TooManyParameters,
    HighComplexity,
    DeepNesting,
    GodClass,
}

impl fmt::Display for SmellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SmellKind::LongMethod => "long method",
            SmellKind::LargeClass => "large class",
            SmellKind::TooManyParameters => "too many parameters",
            SmellKind::HighComplexity => "high complexity",
            SmellKind::DeepNesting => "deep nesting",
            SmellKind::GodClass => "god class",
        };
        f.write_str(name)
    }
}

/// A threshold violation on one function or class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSmell {
    pub kind: SmellKind,
    pub symbol: String,
    pub path: String,
    pub line: usize,
    pub message: String,
    pub severity: Severity,
    pub evidence: Vec<String>,
    pub confidence: f64,
}

/// Detect smells across all files, in file then declaration order.
pub fn detect_smells(files: &IndexMap<String, FileRecord>, config: &SmellConfig) -> Vec<CodeSmell> {
    let mut smells = Vec::new();
    for record in files.values() {
        for function in record.all_functions() {
            function_smells(&record.path, function, config, &mut smells);
        }
        for class in &record.classes {
            class_smells(&record.path, class, config, &mut smells);
        }
    }
    smells
}

/// Over-threshold measurement; confidence grows with the overshoot.
fn exceeded(value: usize, threshold: usize) -> Option<(f64, Severity)> {
    if value <= threshold {
        return None;
    }
    let threshold = threshold.max(1) as f64;
    let overshoot = (value as f64 - threshold) / threshold;
    let confidence = ((0.5 + 0.5 * overshoot).min(1.0) * 100.0).round() / 100.0;
    let severity = if overshoot >= 1.0 {
        Severity::Error
    } else {
        Severity::Warning
    };
    Some((confidence, severity))
}

fn function_smells(path: &str, function: &FunctionSymbol, config: &SmellConfig, out: &mut Vec<CodeSmell>) {
    if function.is_declaration {
        return;
    }
    let what = if function.is_method() { "Method" } else { "Function" };
    let checks = [
        (
            SmellKind::LongMethod,
            function.lines.len(),
            config.max_function_length,
            "lines long",
        ),
        (
            SmellKind::TooManyParameters,
            function.parameters.len(),
            config.max_parameters,
            "parameters",
        ),
        (
            SmellKind::HighComplexity,
            function.complexity as usize,
            config.max_complexity as usize,
            "cyclomatic complexity",
        ),
        (
            SmellKind::DeepNesting,
            function.max_nesting as usize,
            config.max_nesting_depth as usize,
            "levels of nesting",
        ),
    ];
    for (kind, value, threshold, unit) in checks {
        if let Some((confidence, severity)) = exceeded(value, threshold) {
            let message = match kind {
                SmellKind::LongMethod => format!("{what} `{}` is {value} lines long (max {threshold})", function.name),
                SmellKind::TooManyParameters => {
                    format!("{what} `{}` has {value} parameters (max {threshold})", function.name)
                }
                SmellKind::HighComplexity => {
                    format!("{what} `{}` has complexity {value} (max {threshold})", function.name)
                }
                _ => format!("{what} `{}` is nested {value} levels deep (max {threshold})", function.name),
            };
            out.push(CodeSmell {
                kind,
                symbol: function.qualified_name.0.clone(),
                path: path.to_string(),
                line: function.lines.start,
                message,
                severity,
                evidence: vec![format!("{value} {unit}, threshold {threshold}")],
                confidence,
            });
        }
    }
}

fn class_smells(path: &str, class: &ClassSymbol, config: &SmellConfig, out: &mut Vec<CodeSmell>) {
    let length = class.lines.len();
    if let Some((confidence, severity)) = exceeded(length, config.max_class_length) {
        out.push(CodeSmell {
            kind: SmellKind::LargeClass,
            symbol: class.qualified_name.0.clone(),
            path: path.to_string(),
            line: class.lines.start,
            message: format!(
                "Class `{}` is {length} lines long (max {})",
                class.name, config.max_class_length
            ),
            severity,
            evidence: vec![format!("{length} lines, threshold {}", config.max_class_length)],
            confidence,
        });
    }

    // Reaching the limit is enough here, unlike the other checks.
    let methods = exceeded(class.methods.len() + 1, config.max_methods);
    let fields = exceeded(class.fields.len() + 1, config.max_fields);
    if methods.is_some() || fields.is_some() {
        let mut evidence = Vec::new();
        if methods.is_some() {
            evidence.push(format!("{} methods, threshold {}", class.methods.len(), config.max_methods));
        }
        if fields.is_some() {
            evidence.push(format!("{} fields, threshold {}", class.fields.len(), config.max_fields));
        }
        let (confidence, severity) = [methods, fields]
            .into_iter()
            .flatten()
            .fold((0.0_f64, Severity::Warning), |(c, s), (c2, s2)| (c.max(c2), s.max(s2)));
        out.push(CodeSmell {
            kind: SmellKind::GodClass,
            symbol: class.qualified_name.0.clone(),
            path: path.to_string(),
            line: class.lines.start,
            message: format!(
                "Class `{}` has {} methods and {} fields",
                class.name,
                class.methods.len(),
                class.fields.len()
            ),
            severity,
            evidence,
            confidence,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassKind, FieldDecl, Language, LineRange, Parameter, QualifiedName, Visibility};

    fn files(record: FileRecord) -> IndexMap<String, FileRecord> {
        [(record.path.clone(), record)].into_iter().collect()
    }

    #[test]
    fn test_long_function_and_parameters() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        let mut f = FunctionSymbol::new("a.py", None, "process", LineRange::new(10, 69));
        for i in 0..7 {
            f.parameters.push(Parameter::new(format!("p{i}"), None));
        }
        record.functions.push(f);

        let smells = detect_smells(&files(record), &SmellConfig::default());
        let kinds: Vec<SmellKind> = smells.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SmellKind::LongMethod, SmellKind::TooManyParameters]);
        assert_eq!(smells[0].line, 10);
        assert!(smells[0].message.contains("60 lines"));
        assert_eq!(smells[0].severity, Severity::Warning);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        let mut f = FunctionSymbol::new("a.py", None, "ok", LineRange::new(1, 50));
        f.complexity = 10;
        f.max_nesting = 3;
        record.functions.push(f);
        assert!(detect_smells(&files(record), &SmellConfig::default()).is_empty());
    }

    #[test]
    fn test_confidence_grows_with_overshoot() {
        let (low, _) = exceeded(11, 10).unwrap();
        let (high, severity) = exceeded(25, 10).unwrap();
        assert!(high > low);
        assert_eq!(severity, Severity::Error);
        assert!(exceeded(10, 10).is_none());
    }

    #[test]
    fn test_god_class() {
        let mut record = FileRecord::empty("a.py", Language::Python);
        let mut class = ClassSymbol::new("Manager", ClassKind::Class, LineRange::new(1, 100));
        class.qualified_name = QualifiedName::new("a.py", None, "Manager");
        for i in 0..20 {
            class
                .methods
                .push(FunctionSymbol::new("a.py", Some("Manager"), format!("m{i}"), LineRange::new(2, 3)));
        }
        class.fields.push(FieldDecl {
            name: "state".into(),
            type_hint: None,
            is_static: false,
            visibility: Visibility::Public,
            line: 2,
        });
        record.classes.push(class);

        let smells = detect_smells(&files(record), &SmellConfig::default());
        let god = smells.iter().find(|s| s.kind == SmellKind::GodClass).unwrap();
        assert_eq!(god.evidence, vec!["20 methods, threshold 20".to_string()]);
    }
}
