//! Provider-declared schemas: the shape of provider configuration blocks,
//! resource types, and data sources. The engine validates internal
//! consistency once per provider and derives sensitivity marks from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::values::{PathStep, Value, ValuePath};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("resource type {type_name:?} has negative schema version {version}")]
    NegativeVersion { type_name: String, version: i64 },

    #[error("block {path:?} declares attribute {attr:?} as both required and optional")]
    ContradictoryAttribute { path: String, attr: String },

    #[error("block {path:?} nests deeper than the supported limit")]
    TooDeep { path: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nesting {
    Single,
    List,
    Map,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
}

impl AttributeSchema {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub nesting: Nesting,
    pub block: BlockSchema,
}

/// The schema of one configuration block: named attributes plus nested
/// block types.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub blocks: BTreeMap<String, NestedBlock>,
}

const MAX_NESTING: usize = 16;

impl BlockSchema {
    pub fn with_attributes(attrs: &[(&str, AttributeSchema)]) -> Self {
        Self {
            attributes: attrs
                .iter()
                .map(|(name, schema)| (name.to_string(), schema.clone()))
                .collect(),
            blocks: BTreeMap::new(),
        }
    }

    fn internal_validate_at(&self, path: &str, depth: usize) -> Result<(), SchemaError> {
        if depth > MAX_NESTING {
            return Err(SchemaError::TooDeep {
                path: path.to_string(),
            });
        }
        for (name, attr) in &self.attributes {
            if attr.required && attr.optional {
                return Err(SchemaError::ContradictoryAttribute {
                    path: path.to_string(),
                    attr: name.clone(),
                });
            }
        }
        for (name, nested) in &self.blocks {
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", path, name)
            };
            nested.block.internal_validate_at(&child_path, depth + 1)?;
        }
        Ok(())
    }

    pub fn internal_validate(&self) -> Result<(), SchemaError> {
        self.internal_validate_at("", 0)
    }

    /// Conform an object to this schema: declared attributes missing from
    /// the object become explicit nulls, so stored objects and evaluated
    /// configurations compare on equal footing.
    pub fn normalize(&self, value: &Value) -> Value {
        let Value::Object(fields) = value else {
            return value.clone();
        };
        let mut out = fields.clone();
        for name in self.attributes.keys() {
            out.entry(name.clone()).or_insert(Value::Null);
        }
        for (name, nested) in &self.blocks {
            let Some(child) = fields.get(name) else { continue };
            let normalized = match (nested.nesting, child) {
                (Nesting::Single, v) => nested.block.normalize(v),
                (Nesting::List, Value::List(items)) => Value::List(
                    items.iter().map(|i| nested.block.normalize(i)).collect(),
                ),
                (Nesting::Map, Value::Object(entries)) => Value::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), nested.block.normalize(v)))
                        .collect(),
                ),
                _ => child.clone(),
            };
            out.insert(name.clone(), normalized);
        }
        Value::Object(out)
    }

    /// Paths within `value` that this schema marks sensitive. Nested blocks
    /// are traversed schematically: list/map nesting applies the nested
    /// schema to every element.
    pub fn sensitive_paths(&self, value: &Value) -> Vec<ValuePath> {
        let mut out = Vec::new();
        self.collect_sensitive(value, &ValuePath::root(), &mut out);
        out
    }

    fn collect_sensitive(&self, value: &Value, prefix: &ValuePath, out: &mut Vec<ValuePath>) {
        let fields = match value {
            Value::Object(fields) => fields,
            _ => return,
        };
        for (name, attr) in &self.attributes {
            if attr.sensitive && fields.contains_key(name) {
                let mut path = prefix.clone();
                path.push(PathStep::Key(name.clone()));
                out.push(path);
            }
        }
        for (name, nested) in &self.blocks {
            let Some(child) = fields.get(name) else { continue };
            let mut base = prefix.clone();
            base.push(PathStep::Key(name.clone()));
            match (nested.nesting, child) {
                (Nesting::Single, v) => nested.block.collect_sensitive(v, &base, out),
                (Nesting::List, Value::List(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        let mut p = base.clone();
                        p.push(PathStep::Index(i));
                        nested.block.collect_sensitive(item, &p, out);
                    }
                }
                (Nesting::Map, Value::Object(entries)) => {
                    for (key, item) in entries {
                        let mut p = base.clone();
                        p.push(PathStep::Key(key.clone()));
                        nested.block.collect_sensitive(item, &p, out);
                    }
                }
                _ => {}
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeSchema {
    pub version: i64,
    pub block: BlockSchema,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub param_names: Vec<String>,
    pub variadic: bool,
}

/// Everything one provider declares about itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub provider_config: BlockSchema,
    pub resource_types: BTreeMap<String, ResourceTypeSchema>,
    pub data_sources: BTreeMap<String, ResourceTypeSchema>,
    pub functions: BTreeMap<String, FunctionSignature>,
}

impl ProviderSchema {
    /// The consistency checks run once when the schema is first fetched and
    /// memoized: versions must be non-negative and every block well formed.
    pub fn internal_validate(&self) -> Result<(), SchemaError> {
        self.provider_config.internal_validate()?;
        for (type_name, schema) in self.resource_types.iter().chain(&self.data_sources) {
            if schema.version < 0 {
                return Err(SchemaError::NegativeVersion {
                    type_name: type_name.clone(),
                    version: schema.version,
                });
            }
            schema.block.internal_validate()?;
        }
        Ok(())
    }
}

/// Merge prior state and configuration into the proposed-new value handed
/// to the provider's plan call: configured attributes win, computed
/// attributes fall back to their prior value, and computed attributes with
/// no prior become unknown.
pub fn proposed_new(block: &BlockSchema, prior: &Value, config: &Value) -> Value {
    if config.is_null() {
        return Value::Null;
    }
    let config_fields = match config {
        Value::Object(fields) => fields.clone(),
        other => return other.clone(),
    };
    let prior_fields = match prior {
        Value::Object(fields) => Some(fields),
        _ => None,
    };

    let mut out = config_fields.clone();
    for (name, attr) in &block.attributes {
        let configured = config_fields.get(name).cloned().unwrap_or(Value::Null);
        if attr.computed && configured.is_null() {
            // On update the prior value carries forward, null included; an
            // unknown only appears when there is no prior object at all.
            let value = match prior_fields {
                Some(p) => p.get(name).cloned().unwrap_or(Value::Null),
                None => Value::Unknown,
            };
            out.insert(name.clone(), value);
        } else {
            out.insert(name.clone(), configured);
        }
    }

    for (name, nested) in &block.blocks {
        let configured = config_fields.get(name).cloned().unwrap_or(Value::Null);
        let prior_child = prior_fields
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::Null);
        let merged = match (nested.nesting, &configured) {
            (Nesting::Single, _) => proposed_new(&nested.block, &prior_child, &configured),
            (Nesting::List, Value::List(items)) => {
                let prior_items: Vec<Value> = match &prior_child {
                    Value::List(p) if p.len() == items.len() => p.clone(),
                    _ => vec![Value::Null; items.len()],
                };
                Value::List(
                    items
                        .iter()
                        .zip(prior_items.iter())
                        .map(|(c, p)| proposed_new(&nested.block, p, c))
                        .collect(),
                )
            }
            (Nesting::Map, Value::Object(entries)) => Value::Object(
                entries
                    .iter()
                    .map(|(key, c)| {
                        let p = match &prior_child {
                            Value::Object(pe) => pe.get(key).cloned().unwrap_or(Value::Null),
                            _ => Value::Null,
                        };
                        (key.clone(), proposed_new(&nested.block, &p, c))
                    })
                    .collect(),
            ),
            _ => configured.clone(),
        };
        if !merged.is_null() {
            out.insert(name.clone(), merged);
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_schema() -> ProviderSchema {
        let mut resource_types = BTreeMap::new();
        resource_types.insert(
            "test_thing".to_string(),
            ResourceTypeSchema {
                version: 1,
                block: BlockSchema::with_attributes(&[
                    ("num", AttributeSchema::optional()),
                    ("id", AttributeSchema::computed()),
                    ("token", AttributeSchema::optional().sensitive()),
                ]),
            },
        );
        ProviderSchema {
            resource_types,
            ..ProviderSchema::default()
        }
    }

    #[test]
    fn validates_clean_schema() {
        assert!(test_schema().internal_validate().is_ok());
    }

    #[test]
    fn rejects_negative_version() {
        let mut schema = test_schema();
        schema
            .resource_types
            .get_mut("test_thing")
            .unwrap()
            .version = -1;
        assert!(matches!(
            schema.internal_validate(),
            Err(SchemaError::NegativeVersion { .. })
        ));
    }

    #[test]
    fn rejects_contradictory_attribute() {
        let mut schema = test_schema();
        let block = &mut schema
            .resource_types
            .get_mut("test_thing")
            .unwrap()
            .block;
        block.attributes.insert(
            "bad".to_string(),
            AttributeSchema {
                required: true,
                optional: true,
                ..AttributeSchema::default()
            },
        );
        assert!(matches!(
            schema.internal_validate(),
            Err(SchemaError::ContradictoryAttribute { .. })
        ));
    }

    #[test]
    fn proposed_new_merges_computed_from_prior() {
        let block = BlockSchema::with_attributes(&[
            ("num", AttributeSchema::optional()),
            ("id", AttributeSchema::computed()),
        ]);

        // Create: computed with no prior becomes unknown.
        let config = Value::Object(
            [("num".to_string(), Value::int(1))].into_iter().collect(),
        );
        let proposed = proposed_new(&block, &Value::Null, &config);
        assert_eq!(
            proposed.traverse(&ValuePath::attr("id")),
            Some(&Value::Unknown)
        );

        // Update: computed keeps its prior value.
        let prior = Value::Object(
            [
                ("num".to_string(), Value::int(1)),
                ("id".to_string(), Value::string("i-1")),
            ]
            .into_iter()
            .collect(),
        );
        let proposed = proposed_new(&block, &prior, &config);
        assert_eq!(proposed, prior);
    }

    #[test]
    fn sensitive_paths_cover_nested_blocks() {
        let block = BlockSchema {
            attributes: [("token".to_string(), AttributeSchema::optional().sensitive())]
                .into_iter()
                .collect(),
            blocks: [(
                "rule".to_string(),
                NestedBlock {
                    nesting: Nesting::List,
                    block: BlockSchema::with_attributes(&[(
                        "secret",
                        AttributeSchema::optional().sensitive(),
                    )]),
                },
            )]
            .into_iter()
            .collect(),
        };

        let value = Value::Object(
            [
                ("token".to_string(), Value::string("t")),
                (
                    "rule".to_string(),
                    Value::List(vec![Value::Object(
                        [("secret".to_string(), Value::string("s"))]
                            .into_iter()
                            .collect(),
                    )]),
                ),
            ]
            .into_iter()
            .collect(),
        );

        let paths: Vec<String> = block
            .sensitive_paths(&value)
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert!(paths.contains(&"token".to_string()));
        assert!(paths.contains(&"rule[0].secret".to_string()));
    }
}
