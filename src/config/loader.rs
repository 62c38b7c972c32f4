//! TOML loader for configuration trees. This is a fixture format, not a
//! real language frontend: attribute values are expression strings, child
//! modules nest under their call's `config` table.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::{
    Body, CheckBlock, CheckRule, Config, ImportBlock, ImportTo, Lifecycle, Module, ModuleCall,
    MovedBlock, OutputConfig, ProviderBlock, ProviderRef, RemovedBlock, Resource,
    ResourceConfig, TypeConstraint, VariableConfig,
};
use crate::addrs::{parse_target, ProviderAddr, Target};
use crate::lang::Expr;
use crate::values::{Value, ValuePath};

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    resource: Vec<RawResource>,
    #[serde(default)]
    data: Vec<RawResource>,
    #[serde(default)]
    variable: BTreeMap<String, RawVariable>,
    #[serde(default)]
    locals: BTreeMap<String, String>,
    #[serde(default)]
    output: BTreeMap<String, RawOutput>,
    #[serde(default)]
    provider: Vec<RawProvider>,
    #[serde(default)]
    required_providers: BTreeMap<String, String>,
    #[serde(default)]
    call: Vec<RawCall>,
    #[serde(default)]
    import: Vec<RawImport>,
    #[serde(default)]
    moved: Vec<RawMoved>,
    #[serde(default)]
    removed: Vec<RawRemoved>,
    #[serde(default)]
    check: Vec<RawCheck>,
}

#[derive(Debug, Default, Deserialize)]
struct RawResource {
    #[serde(rename = "type")]
    type_: String,
    name: String,
    #[serde(default)]
    body: toml::Table,
    count: Option<String>,
    for_each: Option<String>,
    provider: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    lifecycle: RawLifecycle,
    #[serde(default)]
    precondition: Vec<RawCheckRule>,
    #[serde(default)]
    postcondition: Vec<RawCheckRule>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLifecycle {
    #[serde(default)]
    create_before_destroy: bool,
    #[serde(default)]
    prevent_destroy: bool,
    #[serde(default)]
    ignore_changes: Vec<String>,
    #[serde(default)]
    replace_triggered_by: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCheckRule {
    condition: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawVariable {
    #[serde(rename = "type")]
    type_: Option<String>,
    default: Option<toml::Value>,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    ephemeral: bool,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    validation: Vec<RawCheckRule>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    value: String,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    precondition: Vec<RawCheckRule>,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    #[serde(rename = "type")]
    type_: String,
    alias: Option<String>,
    for_each: Option<String>,
    #[serde(default)]
    body: toml::Table,
}

#[derive(Debug, Deserialize)]
struct RawCall {
    name: String,
    #[serde(default)]
    source: String,
    count: Option<String>,
    for_each: Option<String>,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
    #[serde(default)]
    providers: BTreeMap<String, String>,
    #[serde(default)]
    config: RawConfig,
}

#[derive(Debug, Deserialize)]
struct RawImport {
    to: String,
    /// Optional dynamic instance key expression on the `to` address.
    key: Option<String>,
    id: Option<String>,
    id_expr: Option<String>,
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMoved {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct RawRemoved {
    from: String,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    name: String,
    #[serde(default)]
    assert: Vec<RawCheckRule>,
}

/// Load a configuration tree from its TOML fixture form.
pub fn from_toml_str(text: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(text).context("failed to parse configuration TOML")?;
    convert_config(raw)
}

fn convert_config(raw: RawConfig) -> Result<Config> {
    let mut module = Module::default();

    for raw_res in raw.resource {
        let res = convert_resource(raw_res, false)?;
        module.resources.insert(res.resource.clone(), res);
    }
    for raw_res in raw.data {
        let res = convert_resource(raw_res, true)?;
        module.resources.insert(res.resource.clone(), res);
    }

    for (name, raw_var) in raw.variable {
        module.variables.insert(name.clone(), convert_variable(&name, raw_var)?);
    }

    for (name, text) in raw.locals {
        let expr = parse_expr(&text).with_context(|| format!("local {:?}", name))?;
        module.locals.insert(name, expr);
    }

    for (name, raw_out) in raw.output {
        let value =
            parse_expr(&raw_out.value).with_context(|| format!("output {:?}", name))?;
        module.outputs.insert(
            name,
            OutputConfig {
                value,
                sensitive: raw_out.sensitive,
                depends_on: parse_references(&raw_out.depends_on)?,
                preconditions: convert_rules(raw_out.precondition)?,
            },
        );
    }

    for raw_provider in raw.provider {
        module.provider_configs.push(ProviderBlock {
            type_name: raw_provider.type_.clone(),
            alias: raw_provider.alias,
            for_each: parse_opt_expr(raw_provider.for_each.as_deref())?,
            body: convert_body(raw_provider.body)
                .with_context(|| format!("provider {:?}", raw_provider.type_))?,
        });
    }

    for (local_name, source) in raw.required_providers {
        let addr = match source.split_once('/') {
            Some((namespace, type_name)) => ProviderAddr::new(namespace, type_name),
            None => ProviderAddr::implied(&source),
        };
        module.required_providers.insert(local_name, addr);
    }

    for raw_import in raw.import {
        module.imports.push(convert_import(raw_import)?);
    }

    for raw_moved in raw.moved {
        module.moved.push(MovedBlock {
            from: parse_target(&raw_moved.from)
                .with_context(|| format!("moved.from {:?}", raw_moved.from))?,
            to: parse_target(&raw_moved.to)
                .with_context(|| format!("moved.to {:?}", raw_moved.to))?,
        });
    }

    for raw_removed in raw.removed {
        module.removed.push(RemovedBlock {
            from: parse_target(&raw_removed.from)
                .with_context(|| format!("removed.from {:?}", raw_removed.from))?,
        });
    }

    for raw_check in raw.check {
        module.checks.push(CheckBlock {
            name: raw_check.name,
            asserts: convert_rules(raw_check.assert)?,
        });
    }

    let mut children = BTreeMap::new();
    for raw_call in raw.call {
        let name = raw_call.name.clone();
        let mut providers = BTreeMap::new();
        for (child_name, parent_ref) in &raw_call.providers {
            let parsed = ProviderRef::parse(parent_ref).with_context(|| {
                format!("call {:?} provider mapping {:?}", name, parent_ref)
            })?;
            providers.insert(child_name.clone(), parsed);
        }
        let call = ModuleCall {
            name: name.clone(),
            source: raw_call.source.clone(),
            count: parse_opt_expr(raw_call.count.as_deref())?,
            for_each: parse_opt_expr(raw_call.for_each.as_deref())?,
            inputs: raw_call
                .inputs
                .iter()
                .map(|(k, v)| Ok((k.clone(), parse_expr(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .with_context(|| format!("call {:?} inputs", name))?,
            providers,
        };
        module.module_calls.insert(name.clone(), call);
        children.insert(name.clone(), convert_config(raw_call.config)
            .with_context(|| format!("module call {:?}", name))?);
    }

    Ok(Config { module, children })
}

fn convert_resource(raw: RawResource, is_data: bool) -> Result<ResourceConfig> {
    let resource = if is_data {
        Resource::data(&raw.type_, &raw.name)
    } else {
        Resource::managed(&raw.type_, &raw.name)
    };
    let label = resource.to_string();

    let provider = match raw.provider.as_deref() {
        Some(text) => Some(
            ProviderRef::parse(text)
                .with_context(|| format!("{}: provider reference {:?}", label, text))?,
        ),
        None => None,
    };

    let mut ignore_changes = Vec::new();
    for path in &raw.lifecycle.ignore_changes {
        ignore_changes.push(
            ValuePath::parse(path)
                .with_context(|| format!("{}: ignore_changes path {:?}", label, path))?,
        );
    }

    Ok(ResourceConfig {
        resource,
        body: convert_body(raw.body).with_context(|| format!("{}: body", label))?,
        count: parse_opt_expr(raw.count.as_deref())
            .with_context(|| format!("{}: count", label))?,
        for_each: parse_opt_expr(raw.for_each.as_deref())
            .with_context(|| format!("{}: for_each", label))?,
        provider,
        depends_on: parse_references(&raw.depends_on)
            .with_context(|| format!("{}: depends_on", label))?,
        lifecycle: Lifecycle {
            create_before_destroy: raw.lifecycle.create_before_destroy,
            prevent_destroy: raw.lifecycle.prevent_destroy,
            ignore_changes,
            replace_triggered_by: parse_references(&raw.lifecycle.replace_triggered_by)
                .with_context(|| format!("{}: replace_triggered_by", label))?,
        },
        preconditions: convert_rules(raw.precondition)?,
        postconditions: convert_rules(raw.postcondition)?,
    })
}

fn convert_variable(name: &str, raw: RawVariable) -> Result<VariableConfig> {
    let type_ = match raw.type_.as_deref() {
        None | Some("any") => TypeConstraint::Any,
        Some("string") => TypeConstraint::String,
        Some("number") => TypeConstraint::Number,
        Some("bool") => TypeConstraint::Bool,
        Some("list") => TypeConstraint::List,
        Some("map") => TypeConstraint::Map,
        Some(other) => bail!("variable {:?}: unsupported type {:?}", name, other),
    };
    Ok(VariableConfig {
        type_,
        default: raw.default.map(toml_to_value),
        sensitive: raw.sensitive,
        ephemeral: raw.ephemeral,
        nullable: raw.nullable,
        validations: convert_rules(raw.validation)?,
    })
}

fn convert_import(raw: RawImport) -> Result<ImportBlock> {
    let to = parse_target(&raw.to).with_context(|| format!("import.to {:?}", raw.to))?;
    let (module, resource) = match to {
        Target::Resource(r) => {
            let config = r.config();
            (config.module, config.resource)
        }
        Target::ResourceInstance(_) => {
            bail!(
                "import.to {:?}: static instance keys go in the key field",
                raw.to
            )
        }
        Target::Module(_) => bail!("import.to {:?}: expected a resource address", raw.to),
    };

    let id = match (raw.id, raw.id_expr) {
        (Some(literal), None) => Expr::lit(Value::String(literal)),
        (None, Some(text)) => parse_expr(&text).context("import.id_expr")?,
        _ => bail!("import block needs exactly one of id or id_expr"),
    };

    let provider = match raw.provider.as_deref() {
        Some(text) => Some(
            ProviderRef::parse(text)
                .with_context(|| format!("import provider reference {:?}", text))?,
        ),
        None => None,
    };

    Ok(ImportBlock {
        to: ImportTo {
            module,
            resource,
            key: parse_opt_expr(raw.key.as_deref())?,
        },
        id,
        provider,
    })
}

fn convert_rules(raws: Vec<RawCheckRule>) -> Result<Vec<CheckRule>> {
    raws.into_iter()
        .map(|raw| {
            Ok(CheckRule {
                condition: parse_expr(&raw.condition)?,
                error_message: raw.error_message,
            })
        })
        .collect()
}

/// Convert a TOML table into a body: string leaves are expressions, tables
/// are nested single blocks, arrays of tables are repeated blocks.
fn convert_body(table: toml::Table) -> Result<Body> {
    let mut body = Body::empty();
    for (key, value) in table {
        match value {
            toml::Value::Table(inner) => {
                body.blocks.push((key, convert_body(inner)?));
            }
            toml::Value::Array(items)
                if items.iter().all(|i| matches!(i, toml::Value::Table(_))) =>
            {
                for item in items {
                    if let toml::Value::Table(inner) = item {
                        body.blocks.push((key.clone(), convert_body(inner)?));
                    }
                }
            }
            toml::Value::String(text) => {
                let expr =
                    parse_expr(&text).with_context(|| format!("attribute {:?}", key))?;
                body.attrs.insert(key, expr);
            }
            other => {
                body.attrs.insert(key, Expr::lit(toml_to_value(other)));
            }
        }
    }
    Ok(body)
}

fn toml_to_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(n) => Value::int(n),
        toml::Value::Float(f) => Value::Number(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => {
            Value::List(items.into_iter().map(toml_to_value).collect())
        }
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_value(v)))
                .collect(),
        ),
    }
}

fn parse_expr(text: &str) -> Result<Expr> {
    Expr::parse(text).map_err(|e| anyhow::anyhow!("{}", e))
}

fn parse_opt_expr(text: Option<&str>) -> Result<Option<Expr>> {
    text.map(parse_expr).transpose()
}

fn parse_references(texts: &[String]) -> Result<Vec<crate::lang::Reference>> {
    let mut out = Vec::new();
    for text in texts {
        let expr = parse_expr(text)?;
        let refs = expr.references();
        if refs.is_empty() {
            bail!("{:?} does not reference anything", text);
        }
        out.extend(refs);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ResourceMode;

    #[test]
    fn loads_full_fixture() {
        let config = from_toml_str(
            r#"
            [variable.key]
            type = "string"
            default = "a"

            [locals]
            doubled = "var.key"

            [[resource]]
            type = "test_thing"
            name = "a"
            count = "2"
            [resource.body]
            num = "count.index"

            [[data]]
            type = "test_source"
            name = "lookup"

            [output.total]
            value = "length(test_thing.a)"

            [[call]]
            name = "child"
            source = "./child"
            count = "2"
            [call.inputs]
            v = "var.key"
            [call.config.variable.v]
            type = "string"
            [call.config.output.echo]
            value = "var.v"
            "#,
        )
        .unwrap();

        assert_eq!(config.module.resources.len(), 2);
        assert!(config
            .module
            .resources
            .keys()
            .any(|r| r.mode == ResourceMode::Data));
        assert_eq!(config.module.variables.len(), 1);
        assert!(config.children.contains_key("child"));
        let child = &config.children["child"];
        assert!(child.module.outputs.contains_key("echo"));
    }

    #[test]
    fn loads_import_and_moved() {
        let config = from_toml_str(
            r#"
            [[resource]]
            type = "test_thing"
            name = "a"

            [[import]]
            to = "test_thing.a"
            key = "var.key"
            id = "i-abc"

            [[moved]]
            from = "test_thing.old"
            to = "test_thing.a"
            "#,
        )
        .unwrap();

        assert_eq!(config.module.imports.len(), 1);
        assert!(config.module.imports[0].to.key.is_some());
        assert_eq!(config.module.moved.len(), 1);
    }

    #[test]
    fn body_blocks_and_literals() {
        let config = from_toml_str(
            r#"
            [[resource]]
            type = "test_thing"
            name = "a"
            [resource.body]
            enabled = true
            [[resource.body.rule]]
            port = 80
            [[resource.body.rule]]
            port = 443
            "#,
        )
        .unwrap();

        let res = config
            .module
            .resources
            .values()
            .next()
            .unwrap();
        assert_eq!(res.body.blocks.len(), 2);
        assert!(res.body.attrs.contains_key("enabled"));
    }

    #[test]
    fn rejects_bad_expression() {
        let err = from_toml_str(
            r#"
            [locals]
            bad = "var."
            "#,
        );
        assert!(err.is_err());
    }
}
