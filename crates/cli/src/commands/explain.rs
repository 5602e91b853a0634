use crate::OutputFormat;
use crate::util::{CliResult, load_configuration, yes_no};
use clap::Args;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;
use xmldb_xquery::{PragmaKind, compile};

#[derive(Args, Debug, Clone)]
pub struct ExplainArgs {
    #[arg(value_name = "EXPR")]
    pub expression: String,
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PragmaInfo {
    pub id: u32,
    pub pragma: String,
    pub kind: &'static str,
    pub enabled: Option<bool>,
    pub explicit: Option<bool>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ExplainSummary {
    pub source: String,
    pub plan: Vec<String>,
    pub pragmas: Vec<PragmaInfo>,
}

pub fn run(args: &ExplainArgs) -> CliResult<String> {
    let config = load_configuration(args.config.as_deref())?;
    let compiled = compile(&args.expression, &config)?;

    let pragmas = compiled
        .pragmas()
        .into_iter()
        .map(|pragma| {
            let (kind, enabled, explicit) = match &pragma.kind {
                PragmaKind::Optimize(optimize) => ("optimize", Some(optimize.enabled), Some(optimize.explicit)),
                PragmaKind::NoIndex => ("no-index", None, None),
                PragmaKind::ForceIndexUse => ("force-index-use", None, None),
            };
            PragmaInfo { id: pragma.id.0, pragma: pragma.to_string(), kind, enabled, explicit }
        })
        .collect();

    let summary = ExplainSummary {
        source: compiled.source().to_owned(),
        plan: compiled.explain().lines().map(str::to_owned).collect(),
        pragmas,
    };

    Ok(match args.format {
        OutputFormat::Text => render_explain_text(&summary),
        OutputFormat::Json => serde_json::to_string_pretty(&summary)?,
    })
}

fn render_explain_text(summary: &ExplainSummary) -> String {
    let mut output = String::new();
    for line in &summary.plan {
        let _ = writeln!(&mut output, "{line}");
    }
    if !summary.pragmas.is_empty() {
        let _ = writeln!(&mut output);
        let heading = "Pragmas (outermost first):";
        let _ = writeln!(
            &mut output,
            "{}",
            heading.if_supports_color(Stream::Stdout, |text| text.bold().to_string())
        );
        for pragma in &summary.pragmas {
            let _ = write!(&mut output, "  #{} {}", pragma.id, pragma.pragma);
            if let (Some(enabled), Some(explicit)) = (pragma.enabled, pragma.explicit) {
                let _ = write!(&mut output, " enabled={} explicit={}", yes_no(enabled), yes_no(explicit));
            }
            let _ = writeln!(&mut output);
        }
    }
    output.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn explain(expression: &str, format: OutputFormat) -> CliResult<String> {
        run(&ExplainArgs { expression: expression.to_owned(), config: None, format })
    }

    #[rstest]
    fn lists_pragmas_outermost_first() {
        let output = explain("(# exist:force-index-use #) (# exist:optimize #) { //book[title = 'Dune'] }", OutputFormat::Json)
            .expect("explain");
        let json: serde_json::Value = serde_json::from_str(&output).expect("json");
        let kinds = json["pragmas"]
            .as_array()
            .expect("pragmas")
            .iter()
            .map(|p| p["kind"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(kinds, ["force-index-use", "optimize"]);
        assert_eq!(json["pragmas"][1]["explicit"], true);
    }

    #[rstest]
    fn text_plan_shows_index_probes() {
        let output = explain("//book[title = 'Dune']", OutputFormat::Text).expect("explain");
        assert!(output.contains("[index child::title = \"Dune\"]"), "{output}");
        assert!(!output.contains("Pragmas"));
    }

    #[rstest]
    #[case("(# exist:optimize enable #) { //book }")]
    #[case("//book[")]
    fn invalid_expressions_fail(#[case] expression: &str) {
        assert!(explain(expression, OutputFormat::Text).is_err());
    }
}
