//! Canonical addresses for everything the engine reasons about: modules,
//! resources, instances, providers, named values. Addresses are cheap to
//! clone, hashable, totally ordered, and round-trip through their textual
//! form.

mod parse;

pub use parse::{parse_resource_instance, parse_target};

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Instance keys
// ---------------------------------------------------------------------------

/// The key distinguishing one instance of a `count` or `for_each` object.
/// Integer keys order numerically and before string keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Int(n) => write!(f, "[{}]", n),
            InstanceKey::Str(s) => write!(f, "[{:?}]", s),
        }
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &Option<InstanceKey>) -> fmt::Result {
    match key {
        Some(k) => write!(f, "{}", k),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// A static module path, irrespective of instance keys. The root module is
/// the empty path.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleAddr(pub Vec<String>);

impl ModuleAddr {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut path = self.0.clone();
        path.push(name.to_string());
        Self(path)
    }

    pub fn parent(&self) -> Option<(Self, &str)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.to_vec()), last.as_str()))
    }

    /// Whether `other` is this module or nested somewhere beneath it.
    pub fn contains(&self, other: &ModuleAddr) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for ModuleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "module.{}", step)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleInstanceStep {
    pub name: String,
    pub key: Option<InstanceKey>,
}

/// A concrete module instance: a module path with an instance key resolved
/// at each level. The root module instance is the empty path.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ModuleInstanceAddr(pub Vec<ModuleInstanceStep>);

impl ModuleInstanceAddr {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: &str, key: Option<InstanceKey>) -> Self {
        let mut steps = self.0.clone();
        steps.push(ModuleInstanceStep {
            name: name.to_string(),
            key,
        });
        Self(steps)
    }

    pub fn parent(&self) -> Option<(Self, &ModuleInstanceStep)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.to_vec()), last))
    }

    /// Strip the instance keys, producing the static module path.
    pub fn module(&self) -> ModuleAddr {
        ModuleAddr(self.0.iter().map(|s| s.name.clone()).collect())
    }
}

impl fmt::Display for ModuleInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "module.{}", step.name)?;
            write_key(f, &step.key)?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ResourceMode {
    Managed,
    Data,
}

/// A resource block within one module: mode, type, and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    pub mode: ResourceMode,
    pub type_: String,
    pub name: String,
}

impl Resource {
    pub fn managed(type_: &str, name: &str) -> Self {
        Self {
            mode: ResourceMode::Managed,
            type_: type_.to_string(),
            name: name.to_string(),
        }
    }

    pub fn data(type_: &str, name: &str) -> Self {
        Self {
            mode: ResourceMode::Data,
            type_: type_.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ResourceMode::Managed => write!(f, "{}.{}", self.type_, self.name),
            ResourceMode::Data => write!(f, "data.{}.{}", self.type_, self.name),
        }
    }
}

/// A resource block at configuration level: static module path + resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigResource {
    pub module: ModuleAddr,
    pub resource: Resource,
}

impl ConfigResource {
    pub fn root(resource: Resource) -> Self {
        Self {
            module: ModuleAddr::root(),
            resource,
        }
    }
}

impl fmt::Display for ConfigResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_root() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.module, self.resource)
        }
    }
}

/// A resource within one concrete module instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbsResource {
    pub module: ModuleInstanceAddr,
    pub resource: Resource,
}

impl AbsResource {
    pub fn root(resource: Resource) -> Self {
        Self {
            module: ModuleInstanceAddr::root(),
            resource,
        }
    }

    pub fn instance(&self, key: Option<InstanceKey>) -> AbsResourceInstance {
        AbsResourceInstance {
            resource: self.clone(),
            key,
        }
    }

    /// Lift to the static configuration-level address.
    pub fn config(&self) -> ConfigResource {
        ConfigResource {
            module: self.module.module(),
            resource: self.resource.clone(),
        }
    }
}

impl fmt::Display for AbsResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.module.is_root() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.module, self.resource)
        }
    }
}

/// One evaluated occurrence of a resource: the unit the plan and state key
/// everything by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbsResourceInstance {
    pub resource: AbsResource,
    pub key: Option<InstanceKey>,
}

impl AbsResourceInstance {
    /// Strip the instance key.
    pub fn contained_resource(&self) -> &AbsResource {
        &self.resource
    }

    pub fn config(&self) -> ConfigResource {
        self.resource.config()
    }
}

impl fmt::Display for AbsResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        write_key(f, &self.key)
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Identity of a provider plugin: source namespace plus type name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderAddr {
    pub namespace: String,
    pub type_name: String,
}

impl ProviderAddr {
    pub fn new(namespace: &str, type_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
        }
    }

    /// The address assumed for a local provider name that no
    /// required_providers entry maps explicitly.
    pub fn implied(type_name: &str) -> Self {
        Self::new("default", type_name)
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.type_name)
    }
}

/// A provider configuration block: local type name, optional alias, and the
/// static module path that declares it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderConfigAddr {
    pub module: ModuleAddr,
    pub type_name: String,
    pub alias: Option<String>,
}

impl ProviderConfigAddr {
    pub fn default_for(type_name: &str) -> Self {
        Self {
            module: ModuleAddr::root(),
            type_name: type_name.to_string(),
            alias: None,
        }
    }

    pub fn aliased(type_name: &str, alias: &str) -> Self {
        Self {
            module: ModuleAddr::root(),
            type_name: type_name.to_string(),
            alias: Some(alias.to_string()),
        }
    }
}

impl fmt::Display for ProviderConfigAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "provider.{}", self.type_name)?;
        if let Some(ref alias) = self.alias {
            write!(f, ".{}", alias)?;
        }
        Ok(())
    }
}

/// A provider configuration plus the instance key selecting one instance of
/// a `for_each`-expanded provider block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub config: ProviderConfigAddr,
    pub key: Option<InstanceKey>,
}

impl ResolvedProvider {
    pub fn new(config: ProviderConfigAddr) -> Self {
        Self { config, key: None }
    }
}

impl fmt::Display for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config)?;
        write_key(f, &self.key)
    }
}

// ---------------------------------------------------------------------------
// Named values
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputVariable {
    pub module: ModuleAddr,
    pub name: String,
}

impl fmt::Display for InputVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "var.{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalValue {
    pub module: ModuleAddr,
    pub name: String,
}

impl fmt::Display for LocalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "local.{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputValue {
    pub module: ModuleAddr,
    pub name: String,
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "output.{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Deposed keys
// ---------------------------------------------------------------------------

/// Distinguishes the not-yet-reaped older copy of an instance left behind
/// by a create-before-destroy replacement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeposedKey(String);

impl DeposedKey {
    pub fn new_random() -> Self {
        use rand::Rng;
        let n: u32 = rand::rng().random();
        Self(format!("{:08x}", n))
    }

    pub fn from_str_unchecked(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeposedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A targetable address: a module, a resource, or one resource instance.
/// A module step or resource without a key matches every instance key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    Module(ModuleInstanceAddr),
    Resource(AbsResource),
    ResourceInstance(AbsResourceInstance),
}

fn module_prefix_matches(prefix: &ModuleInstanceAddr, addr: &ModuleInstanceAddr) -> bool {
    if prefix.0.len() > addr.0.len() {
        return false;
    }
    prefix.0.iter().zip(addr.0.iter()).all(|(p, a)| {
        p.name == a.name && (p.key.is_none() || p.key == a.key)
    })
}

impl Target {
    /// Whether this target covers the given resource instance.
    pub fn contains(&self, inst: &AbsResourceInstance) -> bool {
        match self {
            Target::Module(m) => module_prefix_matches(m, &inst.resource.module),
            Target::Resource(r) => {
                r.resource == inst.resource.resource
                    && module_prefix_matches(&r.module, &inst.resource.module)
                    && r.module.0.len() == inst.resource.module.0.len()
            }
            Target::ResourceInstance(t) => {
                t.resource.resource == inst.resource.resource
                    && t.resource.module == inst.resource.module
                    && t.key == inst.key
            }
        }
    }

    /// Whether this target covers any instance of the given resource.
    pub fn contains_resource(&self, res: &AbsResource) -> bool {
        match self {
            Target::Module(m) => module_prefix_matches(m, &res.module),
            Target::Resource(r) => {
                r.resource == res.resource
                    && r.module.0.len() == res.module.0.len()
                    && module_prefix_matches(&r.module, &res.module)
            }
            Target::ResourceInstance(t) => {
                t.resource.resource == res.resource && t.resource.module == res.module
            }
        }
    }

    /// Whether this target covers the given static resource address, for
    /// filtering before expansion is known.
    pub fn contains_config_resource(&self, res: &ConfigResource) -> bool {
        match self {
            Target::Module(m) => {
                let path = m.module();
                path.contains(&res.module)
            }
            Target::Resource(r) => r.config() == *res,
            Target::ResourceInstance(t) => t.config() == *res,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Module(m) => write!(f, "{}", m),
            Target::Resource(r) => write!(f, "{}", r),
            Target::ResourceInstance(i) => write!(f, "{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_key_ordering() {
        let mut keys = vec![
            InstanceKey::Str("b".into()),
            InstanceKey::Int(10),
            InstanceKey::Int(2),
            InstanceKey::Str("a".into()),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                InstanceKey::Int(2),
                InstanceKey::Int(10),
                InstanceKey::Str("a".into()),
                InstanceKey::Str("b".into()),
            ]
        );
    }

    #[test]
    fn display_round_trip_shapes() {
        let inst = AbsResource {
            module: ModuleInstanceAddr::root()
                .child("net", Some(InstanceKey::Str("east".into()))),
            resource: Resource::managed("test_thing", "web"),
        }
        .instance(Some(InstanceKey::Int(3)));
        assert_eq!(inst.to_string(), "module.net[\"east\"].test_thing.web[3]");

        let data = AbsResource::root(Resource::data("test_source", "lookup")).instance(None);
        assert_eq!(data.to_string(), "data.test_source.lookup");
    }

    #[test]
    fn config_lift_strips_keys() {
        let inst = AbsResource {
            module: ModuleInstanceAddr::root().child("a", Some(InstanceKey::Int(0))),
            resource: Resource::managed("test", "x"),
        }
        .instance(Some(InstanceKey::Int(1)));
        let config = inst.config();
        assert_eq!(config.module, ModuleAddr(vec!["a".into()]));
        assert_eq!(config.resource, Resource::managed("test", "x"));
    }

    #[test]
    fn target_containment() {
        let inst = AbsResource {
            module: ModuleInstanceAddr::root().child("net", Some(InstanceKey::Int(0))),
            resource: Resource::managed("test", "web"),
        }
        .instance(Some(InstanceKey::Int(2)));

        // An unkeyed module target covers all instances beneath it.
        let t = Target::Module(ModuleInstanceAddr::root().child("net", None));
        assert!(t.contains(&inst));

        // A keyed module target only covers the matching key.
        let t = Target::Module(
            ModuleInstanceAddr::root().child("net", Some(InstanceKey::Int(1))),
        );
        assert!(!t.contains(&inst));

        // A resource target covers all its instances but not other modules.
        let t = Target::Resource(AbsResource {
            module: ModuleInstanceAddr::root().child("net", Some(InstanceKey::Int(0))),
            resource: Resource::managed("test", "web"),
        });
        assert!(t.contains(&inst));

        let root_res = AbsResource::root(Resource::managed("test", "web")).instance(None);
        assert!(!t.contains(&root_res));
    }
}
