//! Synthetic `EXPLAIN` plan rendering (spec.md §4.4 EXPLAIN handler).

use crate::errors::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainFormat {
    Text,
    Json,
    Xml,
    Yaml,
}

impl ExplainFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(ExplainFormat::Text),
            "JSON" => Some(ExplainFormat::Json),
            "XML" => Some(ExplainFormat::Xml),
            "YAML" => Some(ExplainFormat::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExplainOptions {
    pub format: Option<String>,
    pub analyze: bool,
    pub verbose: bool,
    pub costs: bool,
}

/// Parse the `(FORMAT json, ANALYZE, VERBOSE)`-style option list, if present.
fn parse_options(opts_src: &str) -> ExplainOptions {
    let mut opts = ExplainOptions::default();
    for raw in opts_src.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            continue;
        }
        let mut parts = token.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or("").to_ascii_uppercase();
        let value = parts.next().unwrap_or("").trim();
        match keyword.as_str() {
            "FORMAT" => opts.format = Some(value.to_string()),
            "ANALYZE" => opts.analyze = value.is_empty() || value.eq_ignore_ascii_case("true"),
            "VERBOSE" => opts.verbose = value.is_empty() || value.eq_ignore_ascii_case("true"),
            "COSTS" => opts.costs = value.is_empty() || value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
    opts
}

/// Parse `EXPLAIN [ANALYZE] [(options)] <inner>`, returning the options and
/// the trailing inner statement text.
pub fn parse_explain<'a>(sql: &'a str) -> Result<(ExplainOptions, &'a str), DispatchError> {
    let rest = sql["EXPLAIN".len()..].trim_start();
    let mut opts = ExplainOptions::default();
    let mut rest = rest;

    if let Some(stripped) = rest.strip_prefix('(') {
        let close = stripped
            .find(')')
            .ok_or_else(|| DispatchError::Syntax("unterminated EXPLAIN option list".to_string()))?;
        opts = parse_options(&stripped[..close]);
        rest = stripped[close + 1..].trim_start();
    } else if rest.len() >= "ANALYZE".len() && rest[.."ANALYZE".len()].eq_ignore_ascii_case("ANALYZE") {
        opts.analyze = true;
        rest = rest["ANALYZE".len()..].trim_start();
    }

    if let Some(format) = &opts.format {
        if ExplainFormat::parse(format).is_none() {
            return Err(DispatchError::NotSupported(format!(
                "EXPLAIN FORMAT {format}"
            )));
        }
    }

    Ok((opts, rest))
}

/// Render a synthetic query plan reflecting the inner query's shape.
pub fn render_plan(inner: &str, opts: &ExplainOptions) -> String {
    let upper = inner.to_ascii_uppercase();
    let mut lines = Vec::new();

    let root = if upper.starts_with("INSERT") {
        "Insert on mock_relation".to_string()
    } else if upper.starts_with("UPDATE") {
        "Update on mock_relation".to_string()
    } else if upper.starts_with("DELETE") {
        "Delete on mock_relation".to_string()
    } else if upper.contains(" JOIN ") {
        "Hash Join".to_string()
    } else {
        "Seq Scan on mock_relation".to_string()
    };
    let mut root_line = format!("{root}");
    if opts.costs {
        root_line.push_str("  (cost=0.00..1.05 rows=1 width=4)");
    }
    if opts.analyze {
        root_line.push_str("  (actual time=0.010..0.012 rows=1 loops=1)");
    }
    lines.push(root_line);

    if upper.contains("WHERE") {
        lines.push("  Filter: true".to_string());
    }
    if upper.contains("ORDER BY") {
        let mut sort_line = "  Sort Key: mock_relation.id".to_string();
        if opts.analyze {
            sort_line.push_str("  (actual time=0.002..0.002 rows=1 loops=1)");
        }
        lines.insert(0, sort_line);
        lines.insert(0, "Sort".to_string());
    }

    if opts.analyze {
        lines.push("Planning Time: 0.050 ms".to_string());
        lines.push("Execution Time: 0.025 ms".to_string());
    }
    lines.join("\n")
}
