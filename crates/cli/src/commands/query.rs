use crate::OutputFormat;
use crate::util::{CliResult, context_documents, load_configuration, open_store, yes_no};
use clap::Args;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;
use xmldb_core::{Database, IndexStatsSnapshot, MemoryStore, NodeKind, NodeStore};
use xmldb_xquery::{CompiledQuery, Item, QueryContext, Sequence, compile};

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(value_name = "EXPR")]
    pub expression: String,
    /// JSON database configuration (index policy and collection indexes).
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Directory of `*.xml` files, stored as collection `/db/<dir name>`.
    #[arg(long = "data", value_name = "DIR")]
    pub data: Vec<PathBuf>,
    /// Restrict the context to these collections.
    #[arg(long = "collection", value_name = "URI")]
    pub collections: Vec<String>,
    /// Also bind the context documents to `$NAME`.
    #[arg(long = "bind", value_name = "NAME")]
    pub bind: Option<String>,
    /// Evaluate the expression this many times in one query context.
    #[arg(long = "repeat", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ItemSummary {
    Node { path: String, kind: String, name: Option<String>, value: String },
    Value { value: String },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PragmaSummary {
    pub id: u32,
    pub pragma: String,
    pub phase: String,
    pub optimize: Option<OptimizeSummary>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OptimizeSummary {
    pub enabled: bool,
    pub optimizables: usize,
    pub context_step: Option<String>,
    pub cached_verdict: Option<bool>,
    pub evaluations: u64,
    pub optimized: u64,
    pub fallbacks: u64,
    pub cache_hits: u64,
    pub verdict_recomputations: u64,
    pub pre_selections: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QuerySummary {
    pub items: Vec<ItemSummary>,
    pub evaluations: u32,
    pub index: IndexStatsSnapshot,
    pub pragmas: Vec<PragmaSummary>,
}

pub fn run(args: &QueryArgs) -> CliResult<String> {
    let config = load_configuration(args.config.as_deref())?;
    let store = open_store(&config, &args.data)?;
    let documents = context_documents(&store, &args.collections)?;
    let compiled = compile(&args.expression, &config)?;

    let mut ctx = QueryContext::new(store.clone());
    let context = Sequence::from_nodes(documents);
    if let Some(name) = &args.bind {
        ctx.declare_variable(name.trim_start_matches('$'), context.clone());
    }

    store.reset_stats();
    let mut result = Sequence::empty();
    for round in 0..args.repeat {
        result = compiled.evaluate(&mut ctx, Some(&context))?;
        tracing::debug!(round, items = result.len(), "expression evaluated");
    }

    let summary = summarize(&store, &compiled, &ctx, &result, args.repeat)?;
    let output = match args.format {
        OutputFormat::Text => render_query_text(&summary),
        OutputFormat::Json => render_query_json(&summary)?,
    };
    Ok(output)
}

pub(crate) fn summarize(
    store: &MemoryStore,
    compiled: &CompiledQuery,
    ctx: &QueryContext,
    result: &Sequence,
    evaluations: u32,
) -> CliResult<QuerySummary> {
    let items = result.items().iter().map(|item| summarize_item(store, item)).collect::<CliResult<Vec<_>>>()?;

    let pragmas = compiled
        .pragmas()
        .into_iter()
        .map(|pragma| {
            let optimize = pragma.as_optimize().map(|optimize| {
                let state = ctx.optimize_state(pragma.id);
                let stats = state.map(xmldb_xquery::OptimizeState::stats).unwrap_or_default();
                OptimizeSummary {
                    enabled: optimize.enabled,
                    optimizables: state.map_or(0, |s| s.optimizables().len()),
                    context_step: state.and_then(|s| s.context_step()).map(|step| step.qname.to_string()),
                    cached_verdict: state.and_then(xmldb_xquery::OptimizeState::cached_verdict),
                    evaluations: stats.evaluations,
                    optimized: stats.optimized,
                    fallbacks: stats.fallbacks,
                    cache_hits: stats.cache_hits,
                    verdict_recomputations: stats.verdict_recomputations,
                    pre_selections: stats.pre_selections,
                }
            });
            PragmaSummary { id: pragma.id.0, pragma: pragma.to_string(), phase: pragma.phase(ctx).to_string(), optimize }
        })
        .collect();

    Ok(QuerySummary { items, evaluations, index: store.stats().snapshot(), pragmas })
}

fn summarize_item(store: &MemoryStore, item: &Item) -> CliResult<ItemSummary> {
    Ok(match item {
        Item::Node(node) => {
            let kind = match store.node_kind(node)? {
                NodeKind::Document => "document",
                NodeKind::Element => "element",
                NodeKind::Attribute => "attribute",
                NodeKind::Text => "text",
            };
            ItemSummary::Node {
                path: format!("{}#{}", store.document_uri(node.doc)?, node.id),
                kind: kind.to_owned(),
                name: store.node_name(node)?.map(|name| name.to_string()),
                value: store.string_value(node)?,
            }
        }
        Item::Atomic(value) => ItemSummary::Value { value: value.to_string() },
    })
}

fn format_node_label(kind: &str, name: Option<&str>) -> String {
    match (kind, name) {
        ("attribute", Some(name)) => format!("@{name}"),
        (_, Some(name)) => format!("<{name}>"),
        ("text", None) => "text()".to_owned(),
        _ => format!("{kind}()"),
    }
}

fn colorize_node_label(label: &str) -> String {
    label.if_supports_color(Stream::Stdout, |text| text.bold().fg_rgb::<79, 166, 255>().to_string()).to_string()
}

fn colorize_value(value: &str) -> String {
    value.if_supports_color(Stream::Stdout, |text| text.fg_rgb::<136, 192, 74>().to_string()).to_string()
}

fn colorize_dimmed(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |text| text.dimmed().to_string()).to_string()
}

fn colorize_heading(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |text| text.bold().to_string()).to_string()
}

pub(crate) fn render_query_text(summary: &QuerySummary) -> String {
    let mut output = String::new();
    for item in &summary.items {
        match item {
            ItemSummary::Node { path, kind, name, value } => {
                let label = colorize_node_label(&format_node_label(kind, name.as_deref()));
                let quoted = serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""));
                let _ = writeln!(&mut output, "{label} = {} {}", colorize_value(&quoted), colorize_dimmed(path));
            }
            ItemSummary::Value { value } => {
                let _ = writeln!(&mut output, "{}", colorize_value(value));
            }
        }
    }

    let _ = writeln!(&mut output);
    let _ = writeln!(
        &mut output,
        "{} {} item(s), {} evaluation(s)",
        colorize_heading("Result:"),
        summary.items.len(),
        summary.evaluations
    );
    let _ = writeln!(&mut output, "{} {}", colorize_heading("Index:"), summary.index);

    for pragma in &summary.pragmas {
        let _ = writeln!(
            &mut output,
            "{} {} {}",
            colorize_heading(&format!("Pragma #{}:", pragma.id)),
            pragma.pragma,
            colorize_dimmed(&format!("[{}]", pragma.phase))
        );
        if let Some(optimize) = &pragma.optimize {
            let _ = writeln!(
                &mut output,
                "    enabled={} optimizables={} context_step={} verdict={}",
                yes_no(optimize.enabled),
                optimize.optimizables,
                optimize.context_step.as_deref().unwrap_or("-"),
                optimize.cached_verdict.map_or("-", yes_no)
            );
            let _ = writeln!(
                &mut output,
                "    evaluations={} optimized={} fallbacks={} cache_hits={} verdicts={} pre_selections={}",
                optimize.evaluations,
                optimize.optimized,
                optimize.fallbacks,
                optimize.cache_hits,
                optimize.verdict_recomputations,
                optimize.pre_selections
            );
        }
    }

    output.trim_end().to_owned()
}

pub(crate) fn render_query_json(summary: &QuerySummary) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::borrow::Cow;
    use std::fs;
    use tempfile::TempDir;

    fn strip_ansi(input: &str) -> Cow<'_, str> {
        if !input.contains('\u{1b}') {
            return Cow::Borrowed(input);
        }

        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars();
        loop {
            match chars.next() {
                Some('\u{1b}') => {
                    for next in chars.by_ref() {
                        if next == 'm' {
                            break;
                        }
                    }
                }
                Some(ch) => result.push(ch),
                None => break,
            }
        }
        Cow::Owned(result)
    }

    #[fixture]
    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let books = dir.path().join("books");
        fs::create_dir(&books).expect("mkdir");
        fs::write(
            books.join("library.xml"),
            r#"<library>
                 <book lang="en"><title>Dune</title><year>1965</year></book>
                 <book lang="de"><title>Momo</title><year>1973</year></book>
               </library>"#,
        )
        .expect("write");
        fs::write(
            dir.path().join("config.json"),
            r#"{"collections":[{"uri":"/db/books","range_indexes":[{"name":"title","type":"xs:string"}]}]}"#,
        )
        .expect("write");
        dir
    }

    fn args(dir: &TempDir, expression: &str, format: OutputFormat) -> QueryArgs {
        QueryArgs {
            expression: expression.to_owned(),
            config: Some(dir.path().join("config.json")),
            data: vec![dir.path().join("books")],
            collections: vec![],
            bind: None,
            repeat: 1,
            format,
        }
    }

    #[rstest]
    fn query_text_lists_nodes(workspace: TempDir) {
        let output = run(&args(&workspace, "//book[title = 'Momo']/title", OutputFormat::Text)).expect("query");
        let plain = strip_ansi(&output);
        assert!(plain.contains("<title> = \"Momo\" /db/books/library.xml#"), "{plain}");
        assert!(plain.contains("Result: 1 item(s), 1 evaluation(s)"));
        assert!(plain.contains("range lookups: 1"));
    }

    #[rstest]
    fn query_text_renders_atomic_values(workspace: TempDir) {
        let output = run(&args(&workspace, "count(//book)", OutputFormat::Text)).expect("query");
        assert_eq!(strip_ansi(&output).lines().next(), Some("2"));
    }

    #[rstest]
    fn repeated_optimize_hits_the_cache(workspace: TempDir) {
        let mut query = args(&workspace, "(# exist:optimize #) { //book[title = 'Dune'] }", OutputFormat::Json);
        query.repeat = 3;
        let output = run(&query).expect("query");
        let json: serde_json::Value = serde_json::from_str(&output).expect("json");

        assert_eq!(json["evaluations"], 3);
        assert_eq!(json["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["items"][0]["type"], "Node");
        assert_eq!(json["items"][0]["name"], "book");

        let optimize = &json["pragmas"][0]["optimize"];
        assert_eq!(optimize["evaluations"], 3);
        assert_eq!(optimize["optimized"], 3);
        assert_eq!(optimize["cache_hits"], 2);
        assert_eq!(optimize["verdict_recomputations"], 1);
        assert_eq!(optimize["cached_verdict"], true);
        assert_eq!(optimize["context_step"], "book");
    }

    #[rstest]
    fn bound_context_variable(workspace: TempDir) {
        let mut query = args(&workspace, "$books//book[title = 'Momo']/year", OutputFormat::Json);
        query.bind = Some("$books".to_owned());
        let output = run(&query).expect("query");
        let json: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(json["items"][0]["value"], "1973");
    }

    #[rstest]
    fn compile_errors_are_reported(workspace: TempDir) {
        let err = run(&args(&workspace, "(# exist:optimize enable #) { //book }", OutputFormat::Text)).unwrap_err();
        assert!(err.to_string().contains("EXXQDY0003"), "{err}");
    }

    #[rstest]
    fn unknown_collection_is_an_error(workspace: TempDir) {
        let mut query = args(&workspace, "//book", OutputFormat::Text);
        query.collections = vec!["/db/magazines".to_owned()];
        assert!(run(&query).is_err());
    }
}
