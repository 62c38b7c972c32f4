//! Invariant checks across the whole pipeline: plan purity, concurrency
//! bounds, state/ledger agreement, destroy ordering, and partial-failure
//! behaviour.

mod common;

use common::{counted_state, engine_with, test_provider};
use groundwork::addrs::parse_resource_instance;
use groundwork::config::from_toml_str;
use groundwork::plan::Action;
use groundwork::{ApplyOpts, PlanMode, PlanOpts, State, Value, ValuePath};

#[test]
fn plan_is_pure_with_respect_to_state() {
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        count = "3"
        [resource.body]
        num = "count.index"
        "#,
    )
    .unwrap();
    let prior = counted_state("a", 3);
    let prior_copy = prior.clone();

    let engine = engine_with(test_provider(), 4);
    let (first, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());
    let (second, diags) = engine.plan(&config, &prior, PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());

    // The caller's state is untouched and both plans agree.
    assert_eq!(prior, prior_copy);
    assert_eq!(first.changes, second.changes);
}

#[test]
fn concurrency_stays_within_parallelism() {
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        count = "24"
        [resource.body]
        num = "count.index"
        "#,
    )
    .unwrap();

    let provider = test_provider();
    let engine = engine_with(provider.clone(), 3);
    let (_, diags) = engine.plan(&config, &counted_state("a", 24), PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());
    assert!(
        provider.max_observed_concurrency() <= 3,
        "observed {} concurrent provider calls with parallelism 3",
        provider.max_observed_concurrency()
    );
}

#[test]
fn state_and_ledger_agree_after_apply() {
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        count = "4"
        [resource.body]
        num = "count.index"
        "#,
    )
    .unwrap();

    let engine = engine_with(test_provider(), 4);
    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());
    assert_eq!(plan.changes.len(), 4);
    assert!(plan.changes.iter().all(|c| c.action == Action::Create));

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(!apply_diags.has_errors(), "{}", apply_diags.to_summary());

    // Every non-noop, non-destroy entry has a current object whose known
    // planned attributes survived the apply verbatim.
    for change in plan.changes.iter() {
        let object = applied
            .current_object(&change.addr)
            .unwrap_or_else(|| panic!("no object for {}", change.addr));
        assert!(!object.attrs.contains_unknown());
        assert_eq!(
            change.after.filled_from(&object.attrs),
            object.attrs,
            "planned value disagrees with applied state at {}",
            change.addr
        );
    }
}

#[test]
fn destroys_run_in_reverse_dependency_order() {
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
        num = "test_thing.a.num"
        "#,
    )
    .unwrap();

    // Prior state records that b depended on a.
    let mut prior = State::new();
    let a = parse_resource_instance("test_thing.a").unwrap();
    let b = parse_resource_instance("test_thing.b").unwrap();
    prior.set_instance_current(
        &a,
        Some(common::object(&[
            ("num", Value::int(1)),
            ("id", Value::string("id-a")),
        ])),
        &common::provider_config(),
    );
    let mut b_object = common::object(&[
        ("num", Value::int(1)),
        ("id", Value::string("id-b")),
    ]);
    b_object.dependencies.push(a.resource.clone());
    prior.set_instance_current(&b, Some(b_object), &common::provider_config());

    let provider = test_provider();
    let engine = engine_with(provider.clone(), 4);
    let opts = PlanOpts {
        mode: PlanMode::Destroy,
        ..PlanOpts::default()
    };
    let (plan, diags) = engine.plan(&config, &prior, opts);
    assert!(!diags.has_errors(), "{}", diags.to_summary());

    let (applied, apply_diags) = engine.apply(&plan, &config, ApplyOpts::default());
    assert!(!apply_diags.has_errors(), "{}", apply_diags.to_summary());
    assert!(applied.is_empty());

    let calls = provider.calls();
    let destroy_b = calls
        .iter()
        .position(|c| c == "apply test_thing destroy id-b")
        .expect("destroy of b");
    let destroy_a = calls
        .iter()
        .position(|c| c == "apply test_thing destroy id-a")
        .expect("destroy of a");
    assert!(
        destroy_b < destroy_a,
        "the dependent must be destroyed before its dependency: {:?}",
        calls
    );
}

#[test]
fn provider_failure_skips_descendants_and_keeps_partial_plan() {
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
        num = "test_thing.a.num"
        "#,
    )
    .unwrap();

    let provider = test_provider();
    provider.fail_plans_with("synthetic backend outage");
    let engine = engine_with(provider, 4);

    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(diags.has_errors());
    assert!(plan.errored);
    assert!(!plan.applyable);
    // The failed instance never planned and its dependent was skipped, so
    // the ledger stays empty but the plan itself is still returned.
    assert!(plan.changes.is_empty());
}

#[test]
fn errored_plans_are_refused_by_apply() {
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        [resource.body]
        num = "1"
        "#,
    )
    .unwrap();

    let provider = test_provider();
    provider.fail_plans_with("synthetic backend outage");
    let engine = engine_with(provider, 2);
    let (plan, _) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(plan.errored);

    let clean_engine = engine_with(test_provider(), 2);
    let (_, diags) = clean_engine.apply(&plan, &config, ApplyOpts::default());
    assert!(diags.has_errors());
    assert!(diags
        .errors()
        .any(|d| d.summary.contains("errored plan")));
}

#[test]
fn plan_round_trips_through_the_wire_format() {
    let config = from_toml_str(
        r#"
        [variable.key]
        type = "string"
        default = "east"

        [[resource]]
        type = "test_thing"
        name = "a"
        for_each = "{ east = 10, west = 20 }"
        [resource.body]
        num = "each.value"
        "#,
    )
    .unwrap();

    let engine = engine_with(test_provider(), 4);
    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());

    let text = plan.serialize_json().unwrap();
    let restored = groundwork::Plan::deserialize_json(&text).unwrap();
    assert_eq!(restored.changes, plan.changes);
    assert_eq!(restored.prior_state, plan.prior_state);
    assert_eq!(restored.prev_run_state, plan.prev_run_state);
    assert_eq!(restored.timestamp, plan.timestamp);
    assert_eq!(restored.mode, plan.mode);

    // The restored plan applies identically.
    let engine = engine_with(test_provider(), 4);
    let (applied, apply_diags) = engine.apply(&restored, &config, ApplyOpts::default());
    assert!(!apply_diags.has_errors(), "{}", apply_diags.to_summary());
    assert_eq!(applied.all_resource_instances().len(), 2);
}

#[test]
fn validate_surfaces_reference_cycles() {
    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        [resource.body]
        num = "test_thing.b.num"

        [[resource]]
        type = "test_thing"
        name = "b"
        [resource.body]
        num = "test_thing.a.num"
        "#,
    )
    .unwrap();

    let engine = engine_with(test_provider(), 2);
    let diags = engine.validate(&config);
    assert!(diags.has_errors());
    assert!(diags
        .errors()
        .any(|d| d.summary.contains("Dependency cycle")));
}

#[test]
fn eval_reads_state_backed_expressions() {
    let config = from_toml_str(
        r#"
        [variable.offset]
        type = "number"
        default = 5

        [locals]
        doubled = "var.offset"

        [[resource]]
        type = "test_thing"
        name = "a"
        count = "2"
        [resource.body]
        num = "count.index"
        "#,
    )
    .unwrap();

    let engine = engine_with(test_provider(), 2);
    let state = counted_state("a", 2);

    let (value, diags) = engine.eval(
        &config,
        &state,
        "test_thing.a[1].num",
        Default::default(),
    );
    assert!(!diags.has_errors(), "{}", diags.to_summary());
    assert_eq!(value, Some(Value::int(1)));

    let (value, _) = engine.eval(&config, &state, "local.doubled", Default::default());
    assert_eq!(value, Some(Value::int(5)));

    let (value, _) = engine.eval(&config, &state, "length(test_thing.a)", Default::default());
    assert_eq!(value, Some(Value::int(2)));
}

#[test]
fn sensitive_attributes_are_marked_on_changes() {
    let provider = std::sync::Arc::new(
        groundwork::providers::mock::MockProvider::new({
            use groundwork::schema::{
                AttributeSchema, BlockSchema, ProviderSchema, ResourceTypeSchema,
            };
            let mut resource_types = std::collections::BTreeMap::new();
            resource_types.insert(
                "test_thing".to_string(),
                ResourceTypeSchema {
                    version: 0,
                    block: BlockSchema::with_attributes(&[
                        ("num", AttributeSchema::optional()),
                        ("token", AttributeSchema::optional().sensitive()),
                        ("id", AttributeSchema::computed()),
                    ]),
                },
            );
            ProviderSchema {
                resource_types,
                ..ProviderSchema::default()
            }
        }),
    );
    let engine = engine_with(provider, 2);

    let config = from_toml_str(
        r#"
        [[resource]]
        type = "test_thing"
        name = "a"
        [resource.body]
        num = "1"
        token = "\"hunter2\""
        "#,
    )
    .unwrap();

    let (plan, diags) = engine.plan(&config, &State::new(), PlanOpts::default());
    assert!(!diags.has_errors(), "{}", diags.to_summary());
    let change = plan
        .changes
        .get(&parse_resource_instance("test_thing.a").unwrap(), None)
        .unwrap();
    assert!(change
        .after_sensitive
        .contains(&ValuePath::attr("token")));
}
