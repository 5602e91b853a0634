use std::sync::Arc;

use rstest::{fixture, rstest};
use xmldb_core::{Configuration, IndexConfiguration, IndexType, IndexedName, MemoryStore, NodeStore};
use xmldb_xquery::{ErrorCode, QueryContext, Sequence, compile};

#[fixture]
fn store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.configure_collection(
        "/db/books",
        IndexConfiguration::default()
            .with_range_index(IndexedName::element("year"), IndexType::Integer)
            .with_range_index(IndexedName::attribute("lang"), IndexType::String),
    );
    store
        .store_xml(
            "/db/books",
            "library.xml",
            "<library>\
               <book lang=\"en\"><title>Dune</title><year>1965</year></book>\
               <book lang=\"de\"><title>Momo</title><year>1973</year></book>\
               <shelf><book lang=\"en\"><title>Solaris</title><year>1961</year></book></shelf>\
             </library>",
        )
        .unwrap();
    store
}

fn eval(store: &Arc<MemoryStore>, query: &str) -> xmldb_xquery::Result<Vec<String>> {
    let compiled = compile(query, &Configuration::default())?;
    let mut ctx = QueryContext::new(store.clone());
    let context = Sequence::from_nodes(store.all_documents());
    let result = compiled.evaluate(&mut ctx, Some(&context))?;
    Ok(result
        .items()
        .iter()
        .map(|item| match item.as_node() {
            Some(node) => store.string_value(node).unwrap(),
            None => item.to_string(),
        })
        .collect())
}

#[rstest]
#[case("/library/book/title", &["Dune", "Momo"])]
#[case("//book/title", &["Dune", "Momo", "Solaris"])]
#[case("//book[1]/title", &["Dune", "Solaris"])]
#[case("//book[2]/title", &["Momo"])]
#[case("(//book)[2]/title", &["Momo"])]
#[case("//book[@lang = 'en']/title", &["Dune", "Solaris"])]
#[case("//book[year > 1962 and year < 1970]/title", &["Dune"])]
#[case("//book[year < 1962 or title = 'Momo']/title", &["Momo", "Solaris"])]
#[case("//title[. = 'Momo']/../year", &["1973"])]
#[case("//year[. = 1961]/ancestor::shelf", &["Solaris1961"])]
#[case("//book[title = 'Dune']/following-sibling::book/title", &["Momo"])]
#[case("//book[title = 'Momo']/preceding-sibling::*/title", &["Dune"])]
#[case("//@lang[. = 'de']", &["de"])]
#[case("//book[not(@lang = 'en')]/title/text()", &["Momo"])]
#[case("//shelf//title", &["Solaris"])]
#[case("//book[contains(title, 'ol')]/year", &["1961"])]
#[case("//book/descendant-or-self::node()[self::year][. >= 1965]", &["1965", "1973"])]
fn paths(store: Arc<MemoryStore>, #[case] query: &str, #[case] expected: &[&str]) {
    assert_eq!(eval(&store, query).unwrap(), expected);
}

#[rstest]
#[case("count(//book)", "3")]
#[case("count(//book[year > 1962])", "2")]
#[case("exists(//shelf)", "true")]
#[case("empty(//magazine)", "true")]
#[case("string(//book[2]/title)", "\"Momo\"")]
#[case("starts-with('Dune', 'Du')", "true")]
#[case("//book[1]/year = 1965", "true")]
#[case("count(collection('/db/books'))", "1")]
#[case("true() and false()", "false")]
fn values(store: Arc<MemoryStore>, #[case] query: &str, #[case] expected: &str) {
    assert_eq!(eval(&store, query).unwrap(), [expected]);
}

#[rstest]
#[case("//book[title = 1]", ErrorCode::FORG0001)]
#[case("//book['a' = 1]", ErrorCode::XPTY0004)]
#[case("$undeclared", ErrorCode::XPST0008)]
#[case("collection('/db/missing')", ErrorCode::FODC0002)]
#[case("string(//title)", ErrorCode::XPTY0004)]
#[case("//book[(1, 2)]", ErrorCode::FORG0006)]
fn errors(store: Arc<MemoryStore>, #[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(eval(&store, query).unwrap_err().code, code);
}

#[rstest]
fn relative_path_without_context_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    let compiled = compile("book", &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(store);
    let err = compiled.evaluate(&mut ctx, None).unwrap_err();
    assert_eq!(err.code, ErrorCode::XPDY0002);
}

#[rstest]
fn set_at_a_time_predicates_report_index_use(store: Arc<MemoryStore>) {
    let compiled = compile("//book[@lang = 'en']", &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(store.clone());
    let context = Sequence::from_nodes(store.all_documents());
    let result = compiled.evaluate(&mut ctx, Some(&context)).unwrap();
    assert_eq!(result.len(), 2);

    let xmldb_xquery::Expr::Path(path) = compiled.root() else { panic!("not a path") };
    let xmldb_xquery::Expr::Step(step) = path.steps.last().unwrap() else { panic!("not a step") };
    let xmldb_xquery::Expr::Comparison(cmp) = &step.predicates[0].expr else { panic!("not a comparison") };
    assert!(ctx.has_used_index(cmp.id));
}
