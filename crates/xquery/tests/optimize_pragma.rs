use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use rstest::{fixture, rstest};
use xmldb_core::{
    Axis, Collection, Configuration, ContextId, Database, DocId, DocumentSet, Generation, IndexConfiguration,
    IndexStats, IndexType, IndexedName, MemoryStore, NameType, NodeKind, NodeProxy, NodeSet, NodeStore, QName,
    RangeIndex, RangeQuery, StoreError, StoreResult, StructuralIndex,
};
use xmldb_xquery::{CompiledQuery, ErrorCode, ExprId, Optimizable, PragmaPhase, QueryContext, Sequence, compile};

const LIBRARY: &str = "<library>\
    <book lang=\"en\"><title>Dune</title><year>1965</year></book>\
    <book lang=\"de\"><title>Momo</title><year>1973</year></book>\
    <shelf><book lang=\"en\"><title>Dune</title><year>1984</year></book></shelf>\
    </library>";

const MORE: &str = "<library>\
    <book lang=\"en\"><title>Solaris</title><year>1961</year></book>\
    <book lang=\"fr\"><title>Momo</title><year>1965</year></book>\
    </library>";

#[fixture]
fn store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.configure_collection(
        "/db/books",
        IndexConfiguration::default()
            .with_range_index(IndexedName::element("title"), IndexType::String)
            .with_range_index(IndexedName::element("year"), IndexType::Integer),
    );
    store.store_xml("/db/books", "library.xml", LIBRARY).unwrap();
    store.store_xml("/db/books", "more.xml", MORE).unwrap();
    store
}

fn books(store: &MemoryStore) -> Sequence {
    Sequence::Nodes(Arc::new(store.documents("/db/books").unwrap()))
}

fn values(ctx: &QueryContext, seq: &Sequence) -> Vec<String> {
    seq.items()
        .iter()
        .map(|item| match item.as_node() {
            Some(node) => ctx.db().string_value(node).unwrap(),
            None => item.to_string(),
        })
        .collect()
}

fn optimize_id(query: &CompiledQuery) -> ExprId {
    query.pragmas().iter().find(|p| p.as_optimize().is_some()).map(|p| p.id).unwrap()
}

fn run(store: &Arc<MemoryStore>, query: &str) -> Vec<String> {
    let compiled = compile(query, &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(store.clone());
    let result = compiled.evaluate(&mut ctx, Some(&books(store))).unwrap();
    values(&ctx, &result)
}

#[rstest]
#[case::all_optimizable("//book[title = 'Dune']")]
#[case::two_rounds("//book[title = 'Dune'][year = 1965]")]
#[case::no_index("//book[@lang = 'en']")]
#[case::partially_indexed("//book[title = 'Dune'][@lang = 'en']")]
#[case::empty_selection("//book[title = 'Neuromancer']")]
#[case::wildcard_first_step("//*[title = 'Momo']")]
#[case::unrelated_first_step("//shelf/book[title = 'Dune']")]
#[case::self_comparison("//title[. = 'Momo']")]
#[case::starts_with("//book[starts-with(title, 'Du')]")]
#[case::range("//book[year > 1970]")]
#[case::positional("//book[title = 'Momo'][1]")]
#[case::position_before_index("descendant::book[1][title = 'Momo']")]
#[case::second_position_before_index("descendant::book[2][year = 1965]")]
#[case::position_between_indexed("descendant::book[year = 1965][1][title = 'Momo']")]
fn optimized_and_direct_evaluation_agree(store: Arc<MemoryStore>, #[case] query: &str) {
    let optimized = run(&store, &format!("(# exist:optimize #) {{ {query} }}"));
    let direct = run(&store, &format!("(# exist:optimize enable=no #) {{ {query} }}"));
    let plain = run(&store, query);
    assert_eq!(optimized, direct);
    assert_eq!(optimized, plain);
}

#[rstest]
#[case("descendant::book[1][title = 'Momo']", None)]
#[case("descendant::book[title = 'Momo'][1]", Some("book"))]
fn positions_before_the_first_index_predicate_keep_the_context_unnarrowed(
    store: Arc<MemoryStore>,
    #[case] inner: &str,
    #[case] expected_step: Option<&str>,
) {
    let query = compile(&format!("(# exist:optimize #) {{ {inner} }}"), &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    query.evaluate(&mut ctx, Some(&books(&store))).unwrap();
    let state = ctx.optimize_state(pragma).unwrap();
    assert_eq!(state.context_step().map(|s| s.qname.local.as_str()), expected_step);
}

#[rstest]
fn dune_scenario(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let context = books(&store);

    store.reset_stats();
    let first = query.evaluate(&mut ctx, Some(&context)).unwrap();
    assert_eq!(values(&ctx, &first), ["Dune1965", "Dune1984"]);
    let probes = store.stats().snapshot();
    assert_eq!(probes.ancestor_queries, 1);
    assert_eq!(probes.descendant_queries, 0);

    let state = ctx.optimize_state(pragma).unwrap();
    assert_eq!(state.stats().pre_selections, 1);
    assert_eq!(state.stats().optimized, 1);
    assert_eq!(state.context_step().map(|s| s.qname.local.as_str()), Some("book"));
    assert_eq!(state.cached_verdict(), Some(true));

    let second = query.evaluate(&mut ctx, Some(&context)).unwrap();
    assert_eq!(values(&ctx, &second), values(&ctx, &first));
    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.evaluations, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.verdict_recomputations, 1);
}

/// Delegates to a [`MemoryStore`] and counts `collection_of` calls, which
/// is how the optimizability check reads index configurations.
struct CountingStore {
    inner: Arc<MemoryStore>,
    collection_lookups: AtomicUsize,
}

impl CountingStore {
    fn lookups(&self) -> usize {
        self.collection_lookups.load(AtomicOrdering::SeqCst)
    }
}

impl NodeStore for CountingStore {
    fn generation(&self) -> Generation {
        self.inner.generation()
    }

    fn node_kind(&self, node: &NodeProxy) -> StoreResult<NodeKind> {
        self.inner.node_kind(node)
    }

    fn node_name(&self, node: &NodeProxy) -> StoreResult<Option<QName>> {
        self.inner.node_name(node)
    }

    fn string_value(&self, node: &NodeProxy) -> StoreResult<String> {
        self.inner.string_value(node)
    }

    fn children(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>> {
        self.inner.children(node)
    }

    fn attributes(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>> {
        self.inner.attributes(node)
    }

    fn document_uri(&self, doc: DocId) -> StoreResult<String> {
        self.inner.document_uri(doc)
    }

    fn collection_of(&self, doc: DocId) -> StoreResult<Arc<Collection>> {
        self.collection_lookups.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.collection_of(doc)
    }

    fn documents(&self, collection_uri: &str) -> StoreResult<NodeSet> {
        self.inner.documents(collection_uri)
    }

    fn all_documents(&self) -> NodeSet {
        self.inner.all_documents()
    }
}

impl StructuralIndex for CountingStore {
    fn find_elements_by_tag_name(&self, name_type: NameType, qname: &QName, docs: &DocumentSet) -> StoreResult<NodeSet> {
        self.inner.find_elements_by_tag_name(name_type, qname, docs)
    }

    fn find_ancestors_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        selection: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet> {
        self.inner.find_ancestors_by_tag_name(name_type, qname, axis, docs, selection, context_id)
    }

    fn find_descendants_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        context: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet> {
        self.inner.find_descendants_by_tag_name(name_type, qname, axis, docs, context, context_id)
    }
}

impl RangeIndex for CountingStore {
    fn find_by_value(&self, query: &RangeQuery<'_>) -> StoreResult<NodeSet> {
        self.inner.find_by_value(query)
    }
}

impl Database for CountingStore {
    fn configuration(&self) -> Arc<Configuration> {
        self.inner.configuration()
    }

    fn stats(&self) -> &IndexStats {
        self.inner.stats()
    }
}

#[rstest]
fn cache_hit_skips_the_optimizability_check(store: Arc<MemoryStore>) {
    let counting = Arc::new(CountingStore { inner: store.clone(), collection_lookups: AtomicUsize::new(0) });
    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(counting.clone());
    let context = books(&store);

    let lookups_of = |ctx: &mut QueryContext| {
        let before = counting.lookups();
        let result = query.evaluate(ctx, Some(&context)).unwrap();
        assert_eq!(values(ctx, &result), ["Dune1965", "Dune1984"]);
        counting.lookups() - before
    };

    let first = lookups_of(&mut ctx);
    let cached = lookups_of(&mut ctx);
    assert!(cached < first, "cache hit looked up {cached} collections, first run {first}");

    store.store_xml("/db/other", "note.xml", "<note/>").unwrap();
    let after_mutation = lookups_of(&mut ctx);
    assert_eq!(after_mutation, first);
}

#[rstest]
fn store_mutation_invalidates_the_cached_verdict(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Momo'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let context = books(&store);

    query.evaluate(&mut ctx, Some(&context)).unwrap();
    store.store_xml("/db/books", "extra.xml", "<library><book><title>Momo</title></book></library>").unwrap();
    query.evaluate(&mut ctx, Some(&context)).unwrap();

    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.verdict_recomputations, 2);
}

#[rstest]
fn a_different_context_set_is_not_a_cache_hit(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Momo'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());

    query.evaluate(&mut ctx, Some(&books(&store))).unwrap();
    query.evaluate(&mut ctx, Some(&books(&store))).unwrap();

    assert_eq!(ctx.optimize_state(pragma).unwrap().stats().cache_hits, 0);
}

#[rstest]
fn reset_state_drops_the_cache(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let context = books(&store);

    assert_eq!(query.pragmas()[0].phase(&ctx), PragmaPhase::Analyzed);
    query.evaluate(&mut ctx, Some(&context)).unwrap();
    assert_eq!(query.pragmas()[0].phase(&ctx), PragmaPhase::Deactivated);

    query.reset_state(&mut ctx);
    assert_eq!(query.pragmas()[0].phase(&ctx), PragmaPhase::Activated);
    assert_eq!(ctx.optimize_state(pragma).unwrap().cached_verdict(), None);

    query.evaluate(&mut ctx, Some(&context)).unwrap();
    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.verdict_recomputations, 2);
    // Discovery survives a reset.
    assert_eq!(ctx.optimize_state(pragma).unwrap().optimizables().len(), 1);
}

#[rstest]
fn reverse_axis_comparisons_are_not_optimizable(store: Arc<MemoryStore>) {
    let query =
        compile("(# exist:optimize #) { //title[parent::book = 'x'][. = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    query.evaluate(&mut ctx, Some(&books(&store))).unwrap();

    let state = ctx.optimize_state(pragma).unwrap();
    assert_eq!(state.optimizables().len(), 1);
    assert!(state.optimizables().iter().all(|o| o.optimize_axis().is_some_and(|a| !a.is_reverse())));
}

#[rstest]
fn narrowing_order_changes_intermediate_sets(store: Arc<MemoryStore>) {
    let mut traces = Vec::new();
    for query in ["//book[title = 'Dune'][year = 1965]", "//book[year = 1965][title = 'Dune']"] {
        let compiled = compile(&format!("(# exist:optimize #) {{ {query} }}"), &Configuration::default()).unwrap();
        let pragma = optimize_id(&compiled);
        let mut ctx = QueryContext::new(store.clone());
        let result = compiled.evaluate(&mut ctx, Some(&books(&store))).unwrap();
        assert_eq!(values(&ctx, &result), ["Dune1965"]);

        let state = ctx.optimize_state(pragma).unwrap();
        let rounds: Vec<(usize, Vec<String>)> = state
            .last_trace()
            .iter()
            .map(|round| {
                let ancestors = round.ancestors.iter().map(|n| ctx.db().string_value(n).unwrap()).collect();
                (round.selection.len(), ancestors)
            })
            .collect();
        traces.push(rounds);
    }

    assert_eq!(traces[0].len(), 2);
    assert_eq!(traces[0][0].1, ["Dune1965", "Dune1984"]);
    assert_eq!(traces[1][0].1, ["Dune1965", "Momo1965"]);
    assert_ne!(traces[0][0], traces[1][0]);
    assert_eq!(traces[0][1].1, traces[1][1].1);
}

#[rstest]
fn context_variable_feeds_the_verdict(store: Arc<MemoryStore>) {
    let all_books = compile("collection('/db/books')//book", &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(store.clone());
    let value = all_books.evaluate(&mut ctx, None).unwrap();
    assert_eq!(value.len(), 5);
    ctx.declare_variable("books", value);

    let query = compile("(# exist:optimize #) { $books[title = 'Momo'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let result = query.evaluate(&mut ctx, None).unwrap();
    assert_eq!(values(&ctx, &result), ["Momo1973", "Momo1965"]);

    let state = ctx.optimize_state(pragma).unwrap();
    assert!(state.context_var().is_some());
    assert!(state.context_step().is_none());
    assert_eq!(state.stats().optimized, 1);
    // Without a context there is nothing to compare against next time.
    assert_eq!(state.cached_verdict(), None);
}

#[rstest]
fn without_context_or_variable_nothing_is_optimized(store: Arc<MemoryStore>) {
    let query =
        compile("(# exist:optimize #) { collection('/db/books')//book[title = 'Momo'] }", &Configuration::default())
            .unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let result = query.evaluate(&mut ctx, None).unwrap();
    assert_eq!(result.len(), 2);

    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.optimized, 0);
}

#[rstest]
fn transient_context_falls_back(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let docs = store.documents("/db/books").unwrap();
    let context = Sequence::Nodes(Arc::new(NodeSet::transient(docs.iter().cloned())));
    let result = query.evaluate(&mut ctx, Some(&context)).unwrap();

    assert_eq!(values(&ctx, &result), ["Dune1965", "Dune1984"]);
    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.verdict_recomputations, 0);
}

#[rstest]
fn partially_covered_context_falls_back_under_always() {
    let store = Arc::new(MemoryStore::with_configuration(Configuration {
        enforce_index_use: xmldb_core::EnforceIndexUse::Always,
        ..Configuration::default()
    }));
    store.configure_collection(
        "/db/indexed",
        IndexConfiguration::default().with_range_index(IndexedName::element("title"), IndexType::String),
    );
    store.store_xml("/db/indexed", "a.xml", "<library><book><title>Dune</title></book></library>").unwrap();
    store.store_xml("/db/plain", "b.xml", "<library><book><title>Dune</title></book></library>").unwrap();

    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    let context = Sequence::Nodes(Arc::new(store.all_documents()));
    let result = query.evaluate(&mut ctx, Some(&context)).unwrap();

    assert_eq!(result.len(), 2);
    let stats = ctx.optimize_state(pragma).unwrap().stats();
    assert_eq!(stats.fallbacks, 1);
    assert_eq!(stats.pre_selections, 0);
}

#[rstest]
fn interrupted_probes_propagate(store: Arc<MemoryStore>) {
    let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let mut ctx = QueryContext::new(store.clone());
    store.interrupt(true);
    let err = query.evaluate(&mut ctx, Some(&books(&store))).unwrap_err();
    assert_eq!(err.code, ErrorCode::ERROR);
    assert!(matches!(err.store_error(), Some(StoreError::Interrupted)));

    store.interrupt(false);
    assert_eq!(query.evaluate(&mut ctx, Some(&books(&store))).unwrap().len(), 2);
}

#[rstest]
fn disabled_pragma_skips_discovery(store: Arc<MemoryStore>) {
    let query =
        compile("(# exist:optimize enable=no #) { //book[title = 'Dune'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    store.reset_stats();
    query.evaluate(&mut ctx, Some(&books(&store))).unwrap();

    let state = ctx.optimize_state(pragma).unwrap();
    assert!(state.optimizables().is_empty());
    assert_eq!(state.stats().fallbacks, 1);
    assert_eq!(store.stats().snapshot().ancestor_queries, 0);
}

#[rstest]
fn empty_selection_yields_no_candidates(store: Arc<MemoryStore>) {
    let query =
        compile("(# exist:optimize #) { //book[title = 'Neuromancer'] }", &Configuration::default()).unwrap();
    let pragma = optimize_id(&query);
    let mut ctx = QueryContext::new(store.clone());
    store.reset_stats();
    let result = query.evaluate(&mut ctx, Some(&books(&store))).unwrap();

    assert!(result.is_empty());
    let state = ctx.optimize_state(pragma).unwrap();
    assert!(state.last_trace()[0].ancestors.is_empty());
    assert_eq!(store.stats().snapshot().ancestor_queries, 0);
}
