//! End-to-end bundling scenarios over the public API.

use weft_bundler::{
    bundler, optimize, Asset, AssetGraph, AssetGraphNode, BundleGraph, Bundler, BundlerOptions,
    Dependency, EnvContext, Environment, Error, NodeId, OutputFormat, Target,
};

fn target() -> Target {
    Target::new("web", "dist")
}

fn asset(g: &mut AssetGraph, name: &str, ty: &str, size: u64) -> NodeId {
    g.add_asset(Asset::new(name, ty, size))
}

fn entry(g: &mut AssetGraph, name: &str, to: NodeId) -> NodeId {
    entry_to(g, name, to, target())
}

fn entry_to(g: &mut AssetGraph, name: &str, to: NodeId, target: Target) -> NodeId {
    let dep = g.add_entry_dependency(Dependency::entry(name, target));
    g.resolve(dep, to);
    dep
}

fn dep(g: &mut AssetGraph, from: NodeId, name: &str, to: NodeId) -> NodeId {
    let dep = g.add_dependency(from, Dependency::new(name));
    g.resolve(dep, to);
    dep
}

fn dynamic(g: &mut AssetGraph, from: NodeId, name: &str, to: NodeId) -> NodeId {
    let dep = g.add_dependency(from, Dependency::dynamic(name));
    g.resolve(dep, to);
    dep
}

/// Invariants that must hold after every pass.
fn check_invariants(graph: &BundleGraph<'_>, options: &BundlerOptions) {
    let assets = graph.asset_graph();

    // Coverage: every asset reachable from the root is in some bundle.
    let mut stack = vec![assets.root()];
    let mut visited = std::collections::HashSet::new();
    while let Some(node) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        if matches!(assets.node(node), AssetGraphNode::Asset(_)) {
            assert!(
                !graph.find_bundles_with_asset(node).is_empty(),
                "asset {} is in no bundle",
                assets.expect_asset(node).id
            );
        }
        stack.extend(assets.graph().outgoing(node));
    }

    // Type homogeneity.
    for bundle in graph.bundles() {
        for member in bundle.assets() {
            assert_eq!(
                assets.expect_asset(member).asset_type,
                bundle.asset_type,
                "bundle {} contains a foreign-typed asset",
                bundle.id
            );
        }
    }

    // Group capacity.
    for group in graph.bundle_groups() {
        assert!(
            graph.get_bundles_in_bundle_group(group.id).len() <= options.max_parallel_requests,
            "group {} exceeds the parallel request limit",
            group.id
        );
    }

    // No orphan groups.
    for group in graph.bundle_groups() {
        let is_entry = assets.expect_dependency(group.dependency).is_entry;
        assert!(
            is_entry || !graph.get_parent_bundles_of_bundle_group(group.id).is_empty(),
            "group {} has no parent bundles",
            group.id
        );
    }
}

/// Postcondition of ancestor dedup: no dependency inside a splittable,
/// non-isolated bundle resolves to an asset both in the bundle and in an
/// ancestor.
fn check_deduped(graph: &BundleGraph<'_>) {
    for bundle in graph.live_bundle_ids() {
        let b = graph.bundle(bundle);
        if b.env.is_isolated() || !b.is_splittable {
            continue;
        }
        for dep in graph.bundle_dependencies(bundle) {
            for &resolved in graph.get_dependency_assets(dep) {
                assert!(
                    !(graph.bundle(bundle).has_asset(resolved)
                        && graph.is_asset_in_ancestor_bundles(bundle, resolved)),
                    "bundle {bundle} still duplicates an ancestor asset"
                );
            }
        }
    }
}

#[test]
fn html_entry_with_script_splits_by_type() {
    let mut g = AssetGraph::new();
    let html = asset(&mut g, "a.html", "html", 100);
    entry(&mut g, "entry-a", html);
    let js = asset(&mut g, "a.js", "js", 1_000);
    dep(&mut g, html, "a.html->a.js", js);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let groups: Vec<_> = graph.bundle_groups().collect();
    assert_eq!(groups.len(), 1);
    let members = graph.get_bundles_in_bundle_group(groups[0].id);
    assert_eq!(members.len(), 2);

    let html_bundle = graph.bundle(members[0]);
    let js_bundle = graph.bundle(members[1]);
    assert_eq!(html_bundle.asset_type.as_str(), "html");
    assert!(html_bundle.is_entry);
    assert!(html_bundle.has_asset(html));
    assert!(!html_bundle.has_asset(js));

    assert_eq!(js_bundle.asset_type.as_str(), "js");
    assert!(!js_bundle.is_entry);
    assert!(js_bundle.has_asset(js));
    // The script bundle is emitted for the same target its group loads at.
    assert_eq!(js_bundle.target, groups[0].target);
    assert_eq!(graph.get_referenced_bundles(members[0]), vec![members[1]]);
}

#[test]
fn dynamic_import_opens_second_group() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let b = asset(&mut g, "b.js", "js", 10_000);
    dynamic(&mut g, a, "import(b)", b);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    assert_eq!(graph.bundle_groups().count(), 2);
    assert_eq!(graph.bundles().count(), 2);

    let async_group = graph.bundle_groups().nth(1).unwrap();
    let members = graph.get_bundles_in_bundle_group(async_group.id);
    assert_eq!(members.len(), 1);
    assert!(graph.bundle(members[0]).has_asset(b));
    assert!(!graph.bundle(members[0]).has_asset(a));
}

#[test]
fn large_shared_asset_moves_to_shared_bundle() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry(&mut g, "entry-c", c);
    let shared = asset(&mut g, "shared.js", "js", 40_000);
    dep(&mut g, a, "a->shared", shared);
    dep(&mut g, c, "c->shared", shared);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let bundles: Vec<_> = graph.bundles().collect();
    assert_eq!(bundles.len(), 3);

    let shared_bundle = bundles
        .iter()
        .find(|b| b.unique_key.is_some())
        .expect("a shared bundle was created");
    assert!(shared_bundle.has_asset(shared));
    assert!(shared_bundle.is_splittable);
    assert!(!shared_bundle.is_entry);
    // Lower bounds the extraction was allowed under.
    assert!(graph.get_total_size(shared) >= options.min_bundle_size);

    // Both entry bundles gave up their copy and load the shared bundle.
    for group in graph.bundle_groups() {
        let members = graph.get_bundles_in_bundle_group(group.id);
        assert_eq!(members.len(), 2);
        assert!(members.contains(&shared_bundle.id));
    }
    assert_eq!(graph.find_bundles_with_asset(shared), vec![shared_bundle.id]);
}

#[test]
fn small_shared_asset_stays_duplicated() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry(&mut g, "entry-c", c);
    let s = asset(&mut g, "s.js", "js", 20_000);
    dep(&mut g, a, "a->s", s);
    dep(&mut g, c, "c->s", s);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    assert_eq!(graph.bundles().count(), 2);
    assert!(graph.bundles().all(|b| b.unique_key.is_none()));
    // Below the size threshold the asset is duplicated into both bundles.
    assert_eq!(graph.find_bundles_with_asset(s).len(), 2);
}

#[test]
fn shared_extraction_rejects_disagreeing_targets() {
    // Same environment and type, but the entries emit to different
    // targets; the candidate's source bundles must agree on all three.
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry_to(&mut g, "entry-a", a, Target::new("web", "dist/web"));
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry_to(&mut g, "entry-c", c, Target::new("kiosk", "dist/kiosk"));
    let shared = asset(&mut g, "shared.js", "js", 40_000);
    dep(&mut g, a, "a->shared", shared);
    dep(&mut g, c, "c->shared", shared);

    let err = Bundler::default().bundle(&g).unwrap_err();
    assert!(matches!(
        err,
        Error::SharedBundleMismatch { what: "target" }
    ));
}

#[test]
fn async_dependency_already_available_is_internalized() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let b = asset(&mut g, "b.js", "js", 2_000);
    dep(&mut g, a, "a->b", b);
    let import = dynamic(&mut g, a, "import(b)", b);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    // The async group collapsed: one group, one bundle, loader elided.
    assert_eq!(graph.bundle_groups().count(), 1);
    assert_eq!(graph.bundles().count(), 1);
    let main = graph.bundles().next().unwrap();
    assert!(main.has_asset(b));
    assert_eq!(graph.internalized_dependencies(main.id), vec![import]);
}

#[test]
fn html_entry_with_script_and_styles_gets_parallel_bundles() {
    let mut g = AssetGraph::new();
    let html = asset(&mut g, "a.html", "html", 100);
    entry(&mut g, "entry-a", html);
    let js = asset(&mut g, "a.js", "js", 1_000);
    let css = asset(&mut g, "a.css", "css", 500);
    let js_dep = dep(&mut g, html, "a.html->a.js", js);
    let css_dep = dep(&mut g, html, "a.html->a.css", css);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let groups: Vec<_> = graph.bundle_groups().collect();
    assert_eq!(groups.len(), 1);
    let members = graph.get_bundles_in_bundle_group(groups[0].id);
    assert_eq!(members.len(), 3);

    let types: Vec<&str> = members
        .iter()
        .map(|&b| graph.bundle(b).asset_type.as_str())
        .collect();
    assert_eq!(types, vec!["html", "js", "css"]);

    // Both parallel bundles are referenced from the page bundle, and the
    // dependencies are rewritten through asset references.
    assert_eq!(
        graph.get_referenced_bundles(members[0]),
        vec![members[1], members[2]]
    );
    assert_eq!(graph.asset_references(), vec![(js_dep, js), (css_dep, css)]);
    assert_eq!(
        graph.get_sibling_bundles(members[0]),
        vec![members[1], members[2]]
    );
    // The script is required from the page bundle, not from its own.
    assert!(graph.is_asset_referenced_by_dependant(members[1], js));
}

#[test]
fn sibling_bundles_attach_to_every_group_sharing_the_subtree() {
    // Two script entries share a module whose subtree pulls in styles.
    // The styles bundle is generated under the first entry but must load
    // with both groups.
    let mut g = AssetGraph::new();
    let e1 = asset(&mut g, "e1.js", "js", 1_000);
    entry(&mut g, "entry-1", e1);
    let e2 = asset(&mut g, "e2.js", "js", 1_000);
    entry(&mut g, "entry-2", e2);
    let main = asset(&mut g, "main.js", "js", 2_000);
    dep(&mut g, e1, "e1->main", main);
    dep(&mut g, e2, "e2->main", main);
    let styles = asset(&mut g, "styles.css", "css", 3_000);
    dep(&mut g, main, "main->styles", styles);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let css_bundle = graph
        .bundles()
        .find(|b| b.asset_type.as_str() == "css")
        .expect("styles got a bundle")
        .id;
    let groups: Vec<_> = graph.bundle_groups().map(|g| g.id).collect();
    assert_eq!(groups.len(), 2);
    for group in groups {
        assert!(
            graph.get_bundles_in_bundle_group(group).contains(&css_bundle),
            "group {group} does not load the styles bundle"
        );
    }
    // The shared module itself is duplicated into both script bundles.
    assert_eq!(graph.find_bundles_with_asset(main).len(), 2);
}

#[test]
fn mixed_type_resolution_does_not_alias_sibling_lists() {
    // One dependency resolves to a script and a stylesheet at once, and
    // the script is later reached same-type from a second entry. A mixed
    // resolution seeds each target asset with its own empty sibling list
    // instead of aliasing the parent's, so the stylesheet bundle attaches
    // to the first group only.
    let mut g = AssetGraph::new();
    let e1 = asset(&mut g, "e1.js", "js", 1_000);
    entry(&mut g, "entry-1", e1);
    let e2 = asset(&mut g, "e2.js", "js", 1_000);
    entry(&mut g, "entry-2", e2);

    let main = asset(&mut g, "main.js", "js", 2_000);
    let widget_css = asset(&mut g, "widget.css", "css", 3_000);
    let mixed = g.add_dependency(e1, Dependency::new("e1->widget"));
    g.resolve(mixed, main);
    g.resolve(mixed, widget_css);
    dep(&mut g, e2, "e2->main", main);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let css_bundle = graph
        .bundles()
        .find(|b| b.asset_type.as_str() == "css")
        .expect("stylesheet got a bundle")
        .id;
    let groups: Vec<_> = graph.bundle_groups().map(|grp| grp.id).collect();
    assert_eq!(groups.len(), 2);
    assert!(graph.get_bundles_in_bundle_group(groups[0]).contains(&css_bundle));
    // Re-entering main.js from the second group attaches main's recorded
    // siblings, and that list is empty.
    assert!(!graph.get_bundles_in_bundle_group(groups[1]).contains(&css_bundle));
    // The script itself flows into both entry bundles.
    assert_eq!(graph.find_bundles_with_asset(main).len(), 2);
    assert_eq!(graph.asset_references(), vec![(mixed, widget_css)]);
}

#[test]
fn duplicated_bundle_entry_is_loaded_instead_of_copied() {
    // x.js is both dynamically imported by the entry and statically pulled
    // into another async bundle; the copy gives way to loading x's own
    // bundle alongside.
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let x = asset(&mut g, "x.js", "js", 5_000);
    dynamic(&mut g, a, "import(x)", x);
    let y = asset(&mut g, "y.js", "js", 4_000);
    dynamic(&mut g, a, "import(y)", y);
    dep(&mut g, y, "y->x", x);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);
    check_deduped(&graph);

    let x_bundle = graph
        .bundles()
        .find(|b| b.main_entry() == Some(x))
        .unwrap()
        .id;
    let y_bundle = graph
        .bundles()
        .find(|b| b.main_entry() == Some(y))
        .unwrap()
        .id;

    assert!(!graph.bundle(y_bundle).has_asset(x));
    let y_groups = graph.get_bundle_groups_containing_bundle(y_bundle);
    assert_eq!(y_groups.len(), 1);
    assert!(graph.get_bundles_in_bundle_group(y_groups[0]).contains(&x_bundle));
}

#[test]
fn isolated_environment_keeps_its_own_copies() {
    let worker_env = Environment {
        context: EnvContext::WebWorker,
        output_format: OutputFormat::Global,
        is_library: false,
    };

    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let util = asset(&mut g, "util.js", "js", 40_000);
    dep(&mut g, a, "a->util", util);
    let worker = g.add_asset(
        Asset::new("worker.js", "js", 2_000)
            .isolated()
            .with_env(worker_env),
    );
    dep(&mut g, a, "a->worker", worker);
    dep(&mut g, worker, "worker->util", util);

    let options = BundlerOptions::default();
    let graph = Bundler::default().bundle(&g).unwrap();
    check_invariants(&graph, &options);

    let worker_bundle = graph
        .bundles()
        .find(|b| b.main_entry() == Some(worker))
        .unwrap();
    assert!(worker_bundle.env.is_isolated());
    assert!(!worker_bundle.is_splittable);
    // Ancestor dedup and shared extraction both leave the worker alone.
    assert!(worker_bundle.has_asset(util));
    let entry_bundle = graph.bundles().find(|b| b.is_entry).unwrap();
    assert!(entry_bundle.has_asset(util));
    assert!(graph.bundles().all(|b| b.unique_key.is_none()));
}

#[test]
fn group_at_capacity_declines_shared_extraction() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry(&mut g, "entry-c", c);
    let shared = asset(&mut g, "shared.js", "js", 40_000);
    dep(&mut g, a, "a->shared", shared);
    dep(&mut g, c, "c->shared", shared);

    let options = BundlerOptions {
        max_parallel_requests: 1,
        ..BundlerOptions::default()
    };
    let graph = Bundler::new(options.clone()).bundle(&g).unwrap();
    check_invariants(&graph, &options);

    // No room for a shared bundle in either group: the candidate is
    // silently skipped and the asset stays duplicated.
    assert_eq!(graph.bundles().count(), 2);
    assert!(graph.bundles().all(|b| b.unique_key.is_none()));
    assert_eq!(graph.find_bundles_with_asset(shared).len(), 2);
}

#[test]
fn invariants_hold_after_every_pass() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry(&mut g, "entry-c", c);
    let shared = asset(&mut g, "shared.js", "js", 40_000);
    dep(&mut g, a, "a->shared", shared);
    dep(&mut g, c, "c->shared", shared);
    let b = asset(&mut g, "b.js", "js", 2_000);
    dep(&mut g, a, "a->b", b);
    dynamic(&mut g, a, "import(b)", b);

    let options = BundlerOptions::default();
    let mut graph = BundleGraph::new(&g);

    bundler::create_initial_bundles(&mut graph).unwrap();
    check_invariants(&graph, &options);

    optimize::reparent_entry_bundles(&mut graph, &options);
    check_invariants(&graph, &options);

    optimize::dedupe_ancestor_assets(&mut graph);
    check_invariants(&graph, &options);
    check_deduped(&graph);

    optimize::extract_shared_bundles(&mut graph, &options).unwrap();
    check_invariants(&graph, &options);
    check_deduped(&graph);

    optimize::internalize_async_dependencies(&mut graph);
    check_invariants(&graph, &options);
}

#[test]
fn optimizer_is_idempotent() {
    let mut g = AssetGraph::new();
    let a = asset(&mut g, "a.js", "js", 1_000);
    entry(&mut g, "entry-a", a);
    let c = asset(&mut g, "c.js", "js", 1_000);
    entry(&mut g, "entry-c", c);
    let shared = asset(&mut g, "shared.js", "js", 40_000);
    dep(&mut g, a, "a->shared", shared);
    dep(&mut g, c, "c->shared", shared);
    let b = asset(&mut g, "b.js", "js", 2_000);
    dep(&mut g, a, "a->b", b);
    dynamic(&mut g, a, "import(b)", b);

    let options = BundlerOptions::default();
    let graph_once = Bundler::default().bundle(&g).unwrap();
    let first = graph_once.to_manifest();

    let mut graph = BundleGraph::new(&g);
    bundler::create_initial_bundles(&mut graph).unwrap();
    optimize::run(&mut graph, &options).unwrap();
    optimize::run(&mut graph, &options).unwrap();
    let second = graph.to_manifest();

    assert_eq!(first, second);
}

#[test]
fn determinism_across_runs() {
    let build = || {
        let mut g = AssetGraph::new();
        let html = asset(&mut g, "a.html", "html", 100);
        entry(&mut g, "entry-a", html);
        let js = asset(&mut g, "a.js", "js", 1_000);
        dep(&mut g, html, "a.html->a.js", js);
        let css = asset(&mut g, "a.css", "css", 500);
        dep(&mut g, html, "a.html->a.css", css);
        let shared = asset(&mut g, "shared.js", "js", 35_000);
        dep(&mut g, js, "a.js->shared", shared);
        let lazy = asset(&mut g, "lazy.js", "js", 8_000);
        dynamic(&mut g, js, "import(lazy)", lazy);
        dep(&mut g, lazy, "lazy->shared", shared);
        let graph = Bundler::default().bundle(&g).unwrap();
        graph.to_manifest().to_json().unwrap()
    };

    assert_eq!(build(), build());
}
