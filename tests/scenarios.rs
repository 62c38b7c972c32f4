//! End-to-end scenarios: correlated resources at scale, create-before-
//! destroy chains, prevent_destroy edge cases, dynamic imports, orphan
//! destruction, and module expansion without providers.

mod common;

use common::{counted_state, engine_with, test_provider, variables};
use groundwork::addrs::parse_resource_instance;
use groundwork::config::from_toml_str;
use groundwork::plan::Action;
use groundwork::{ApplyOpts, PlanMode, PlanOpts, State, Value};

fn correlated_config(count: usize) -> groundwork::Config {
    from_toml_str(&format!(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        count = "{count}"
        [resource.body]
        num = "count.index"

        [[resource]]
        type = "test_thing"
        name = "b"
        count = "length(test_thing.a)"
        [resource.body]
        num = "test_thing.a[count.index].num"
        "#
    ))
    .unwrap()
}

fn correlated_prior(count: usize) -> State {
    let mut state = counted_state("a", count);
    let b = counted_state("b", count);
    state.resources.extend(b.resources);
    state
}

fn run_correlated(count: usize) {
    let provider = test_provider();
    let engine = engine_with(provider.clone(), 10);
    let config = correlated_config(count);
    let prior = correlated_prior(count);

    let (plan, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), count * 2);
    assert!(
        plan.changes.iter().all(|c| c.action == Action::NoOp),
        "expected an all-noop plan"
    );

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(
        !apply_diags.has_errors(),
        "apply failed: {}",
        apply_diags.to_summary()
    );
    assert_eq!(applied, prior, "apply must leave the state untouched");
    assert_eq!(provider.call_count("apply"), 0);
}

#[test]
fn s1_correlated_resources_no_drift() {
    run_correlated(120);
}

#[test]
#[ignore = "full-scale variant of s1_correlated_resources_no_drift"]
fn s1_correlated_resources_full_scale() {
    run_correlated(2500);
}

#[test]
fn s2_create_before_destroy_chain() {
    let provider = test_provider();
    let engine = engine_with(provider.clone(), 4);
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        [resource.body]
        num = "1"
        [resource.lifecycle]
        create_before_destroy = true

        [[resource]]
        type = "test_thing"
        name = "b"
        [resource.body]
        attr = "test_thing.a.id"

        [[resource]]
        type = "test_thing"
        name = "c"
        [resource.body]
        num = "3"
        "#,
    )
    .unwrap();

    let mut prior = State::new();
    prior.set_instance_current(
        &parse_resource_instance("test_thing.a").unwrap(),
        Some(common::object(&[
            ("num", Value::int(1)),
            ("id", Value::string("a-old")),
        ])),
        &common::provider_config(),
    );
    prior.set_instance_current(
        &parse_resource_instance("test_thing.b").unwrap(),
        Some(common::object(&[
            ("attr", Value::string("a-old")),
            ("id", Value::string("b-old")),
        ])),
        &common::provider_config(),
    );
    prior.set_instance_current(
        &parse_resource_instance("test_thing.c").unwrap(),
        Some(common::object(&[
            ("num", Value::int(3)),
            ("id", Value::string("c-old")),
        ])),
        &common::provider_config(),
    );

    let opts = PlanOpts {
        force_replace: vec![parse_resource_instance("test_thing.a").unwrap()],
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &prior, opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());

    let a = parse_resource_instance("test_thing.a").unwrap();
    let b = parse_resource_instance("test_thing.b").unwrap();
    let c = parse_resource_instance("test_thing.c").unwrap();
    assert_eq!(
        plan.changes.get(&a, None).unwrap().action,
        Action::CreateThenDelete
    );
    assert_eq!(plan.changes.get(&b, None).unwrap().action, Action::Update);
    assert_eq!(plan.changes.get(&c, None).unwrap().action, Action::NoOp);

    // The dry apply-graph check already ran inside plan; no cycle errors.
    assert!(plan.applyable);

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(
        !apply_diags.has_errors(),
        "apply failed: {}",
        apply_diags.to_summary()
    );

    // New object exists, dependents switched, old object reaped last.
    let calls = provider.calls();
    let create_pos = calls
        .iter()
        .position(|c| c == "apply test_thing")
        .expect("create call");
    let update_pos = calls
        .iter()
        .position(|c| c == "apply test_thing update b-old")
        .expect("dependent update call");
    let reap_pos = calls
        .iter()
        .position(|c| c == "apply test_thing destroy a-old")
        .expect("deposed destroy call");
    assert!(create_pos < update_pos, "create must precede the switchover");
    assert!(update_pos < reap_pos, "switchover must precede the reap");

    let new_a = applied.current_object(&a).expect("a exists");
    let new_a_id = new_a
        .attrs
        .traverse(&groundwork::ValuePath::attr("id"))
        .unwrap()
        .clone();
    let new_b = applied.current_object(&b).expect("b exists");
    assert_eq!(
        new_b.attrs.traverse(&groundwork::ValuePath::attr("attr")),
        Some(&new_a_id),
        "b must reference the replacement object"
    );
    // No deposed objects survive the apply.
    assert!(applied
        .resource_instance(&a)
        .map(|i| i.deposed.is_empty())
        .unwrap_or(true));
}

#[test]
fn s3_prevent_destroy_with_zero_instances() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = from_toml_str(
        r#"
        [variable.prevent_destroy]
        type = "bool"
        default = true

        [[resource]]
        type = "test_thing"
        name = "a"
        count = "var.prevent_destroy ? 0 : 0"
        [resource.body]
        num = "1"
        [resource.lifecycle]
        prevent_destroy = true
        "#,
    )
    .unwrap();

    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert!(plan.changes.is_empty(), "no instance means nothing to plan");
}

#[test]
fn s4_import_into_dynamic_address() {
    let config = from_toml_str(
        r#"
        [variable.key]
        type = "string"

        [[resource]]
        type = "test_thing"
        name = "a"
        for_each = "{ a = 1 }"
        [resource.body]
        num = "each.value"

        [[import]]
        to = "test_thing.a"
        key = "var.key"
        id = "i-abc"
        "#,
    )
    .unwrap();

    // Known key: the plan records an import at the keyed address.
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let opts = PlanOpts {
        variables: variables(&[("key", Value::string("a"))]),
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &State::new(), opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());

    let addr = parse_resource_instance("test_thing.a[\"a\"]").unwrap();
    let change = plan.changes.get(&addr, None).expect("imported change");
    assert_eq!(change.importing.as_ref().map(|i| i.id.as_str()), Some("i-abc"));

    // Unknown key: a precise error, no plan.
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let opts = PlanOpts {
        variables: variables(&[("key", Value::Unknown)]),
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &State::new(), opts);
    assert!(plan.errored);
    assert!(
        diags
            .errors()
            .any(|d| d.summary == "Import block 'to' address contains an invalid key"),
        "unexpected diagnostics: {}",
        diags.to_summary()
    );
}

#[test]
fn s5_orphan_destruction() {
    let provider = test_provider();
    let engine = engine_with(provider.clone(), 4);
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "x"
        count = "1"
        [resource.body]
        num = "count.index"
        "#,
    )
    .unwrap();
    let prior = counted_state("x", 2);

    let (plan, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), 2);

    let keep = parse_resource_instance("test_thing.x[0]").unwrap();
    let gone = parse_resource_instance("test_thing.x[1]").unwrap();
    assert_eq!(plan.changes.get(&keep, None).unwrap().action, Action::NoOp);
    assert_eq!(plan.changes.get(&gone, None).unwrap().action, Action::Delete);

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(
        !apply_diags.has_errors(),
        "apply failed: {}",
        apply_diags.to_summary()
    );
    assert!(applied.current_object(&keep).is_some());
    assert!(applied.current_object(&gone).is_none());
    assert_eq!(provider.call_count("apply"), 1);
}

#[test]
fn s6_many_module_expansion_without_providers() {
    let provider = test_provider();
    let engine = engine_with(provider.clone(), 8);
    let config = from_toml_str(
        r#"
        [[call]]
        name = "first"
        source = "./child"
        count = "120"
        [call.inputs]
        v = "7"
        [call.config.variable.v]
        type = "number"
        [call.config.output.echo]
        value = "var.v"

        [[call]]
        name = "second"
        source = "./child"
        count = "120"
        [call.inputs]
        v = "9"
        [call.config.variable.v]
        type = "number"
        [call.config.output.echo]
        value = "var.v"
        "#,
    )
    .unwrap();

    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert!(plan.changes.is_empty());
    assert!(
        provider.calls().is_empty(),
        "no provider calls expected, got {:?}",
        provider.calls()
    );
}

#[test]
fn import_without_config_generates_a_body() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = from_toml_str(
        r#"
        [[import]]
        to = "test_thing.gen"
        id = "i-gen"
        "#,
    )
    .unwrap();

    // Without generation enabled the import has nowhere to go.
    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(plan.errored);
    assert!(diags
        .errors()
        .any(|d| d.summary.contains("no configuration")));

    // With an output path the body is emitted instead.
    let out = tempfile::NamedTempFile::new().unwrap();
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let opts = PlanOpts {
        generate_config_path: Some(out.path().to_path_buf()),
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &State::new(), opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());

    let generated = std::fs::read_to_string(out.path()).unwrap();
    assert!(generated.contains("resource \"test_thing\" \"gen\""));
    assert!(generated.contains("i-gen"));

    // The imported object landed in the refreshed prior state.
    let addr = parse_resource_instance("test_thing.gen").unwrap();
    assert!(plan.prior_state.current_object(&addr).is_some());
}

#[test]
fn destroy_mode_plans_deletes_for_everything() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = correlated_config(3);
    let prior = correlated_prior(3);

    let opts = PlanOpts {
        mode: PlanMode::Destroy,
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &prior, opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), 6);
    assert!(plan
        .changes
        .iter()
        .all(|c| c.action == Action::Delete));

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(
        !apply_diags.has_errors(),
        "apply failed: {}",
        apply_diags.to_summary()
    );
    assert!(applied.is_empty());
}

#[test]
fn refresh_only_plans_nothing_but_refreshes() {
    let provider = test_provider();
    let engine = engine_with(provider.clone(), 4);
    let config = correlated_config(2);
    let prior = correlated_prior(2);

    let opts = PlanOpts {
        mode: PlanMode::RefreshOnly,
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &prior, opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert!(plan.changes.is_empty());
    assert!(!plan.applyable);
    assert!(provider.call_count("read") >= 4);
}

#[test]
fn moved_block_renames_before_planning() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "new"
        [resource.body]
        num = "5"

        [[moved]]
        from = "test_thing.old"
        to = "test_thing.new"
        "#,
    )
    .unwrap();

    let mut prior = State::new();
    prior.set_instance_current(
        &parse_resource_instance("test_thing.old").unwrap(),
        Some(common::object(&[
            ("num", Value::int(5)),
            ("id", Value::string("keep-me")),
        ])),
        &common::provider_config(),
    );

    let (plan, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());

    let new_addr = parse_resource_instance("test_thing.new").unwrap();
    let change = plan.changes.get(&new_addr, None).expect("moved change");
    assert_eq!(change.action, Action::NoOp);
    assert_eq!(
        change.prev_run_addr,
        parse_resource_instance("test_thing.old").unwrap()
    );
}

#[test]
fn count_shrink_uses_implied_move() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    // The resource used to be keyless; config now uses count = 1.
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        count = "1"
        [resource.body]
        num = "0"
        "#,
    )
    .unwrap();

    let mut prior = State::new();
    prior.set_instance_current(
        &parse_resource_instance("test_thing.a").unwrap(),
        Some(common::object(&[
            ("num", Value::int(0)),
            ("id", Value::string("a-keyless")),
        ])),
        &common::provider_config(),
    );

    let (plan, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), 1);
    let zero = parse_resource_instance("test_thing.a[0]").unwrap();
    let change = plan.changes.get(&zero, None).expect("moved to [0]");
    assert_eq!(change.action, Action::NoOp);
    assert_eq!(change.prev_run_addr.key, None);
}

#[test]
fn module_with_resources_expands_and_plans() {
    let provider = test_provider();
    let engine = engine_with(provider, 8);
    let config = from_toml_str(
        r#"
        [[call]]
        name = "net"
        source = "./net"
        count = "2"

        [[call.config.resource]]
        type = "test_thing"
        name = "inner"
        [call.config.resource.body]
        num = "3"
        "#,
    )
    .unwrap();

    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), 2);
    assert!(plan.changes.iter().all(|c| c.action == Action::Create));
    let addr =
        parse_resource_instance("module.net[0].test_thing.inner").unwrap();
    assert!(plan.changes.get(&addr, None).is_some());
}

#[test]
fn targeting_limits_the_plan_and_warns_on_apply() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        [resource.body]
        num = "1"

        [[resource]]
        type = "test_thing"
        name = "b"
        [resource.body]
        num = "2"
        "#,
    )
    .unwrap();

    let opts = PlanOpts {
        targets: vec![groundwork::addrs::parse_target("test_thing.a").unwrap()],
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &State::new(), opts);
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    assert_eq!(plan.changes.len(), 1);

    let (_, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(apply_diags
        .warnings()
        .any(|d| d.summary.contains("targeted plan")));
}

#[test]
fn instance_key_shrink_in_for_each() {
    let provider = test_provider();
    let engine = engine_with(provider, 4);
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        for_each = "{ east = 1 }"
        [resource.body]
        num = "each.value"
        "#,
    )
    .unwrap();

    let mut prior = State::new();
    for key in ["east", "west"] {
        prior.set_instance_current(
            &parse_resource_instance(&format!("test_thing.a[\"{}\"]", key)).unwrap(),
            Some(common::object(&[
                ("num", Value::int(1)),
                ("id", Value::string(key)),
            ])),
            &common::provider_config(),
        );
    }

    let (plan, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "plan failed: {}", diags.to_summary());
    let east = parse_resource_instance("test_thing.a[\"east\"]").unwrap();
    let west = parse_resource_instance("test_thing.a[\"west\"]").unwrap();
    assert_eq!(plan.changes.get(&east, None).unwrap().action, Action::NoOp);
    assert_eq!(plan.changes.get(&west, None).unwrap().action, Action::Delete);
}
