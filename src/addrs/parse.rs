//! Textual address parsing. The grammar is the dotted traversal form with
//! optional bracketed instance keys: `module.net["east"].test_thing.web[3]`,
//! `data.test_source.lookup`, `module.a.module.b`.

use super::{
    AbsResource, AbsResourceInstance, InstanceKey, ModuleInstanceAddr, Resource, ResourceMode,
    Target,
};
use crate::error::AddrError;

#[derive(Debug)]
struct Segment {
    name: String,
    key: Option<InstanceKey>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Split an address string into name segments with optional keys.
fn tokenize(input: &str) -> Result<Vec<Segment>, AddrError> {
    let mut segments = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        // Identifier
        let mut name = String::new();
        match chars.next() {
            Some(c) if is_ident_start(c) => name.push(c),
            Some(c) => {
                return Err(AddrError::new(
                    input,
                    format!("unexpected character {:?}", c),
                ))
            }
            None => return Err(AddrError::new(input, "empty address segment")),
        }
        while let Some(&c) = chars.peek() {
            if is_ident_char(c) {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }

        // Optional [key]
        let mut key = None;
        if chars.peek() == Some(&'[') {
            chars.next();
            match chars.peek() {
                Some('"') => {
                    chars.next();
                    let mut s = String::new();
                    loop {
                        match chars.next() {
                            Some('"') => break,
                            Some('\\') => match chars.next() {
                                Some(c) => s.push(c),
                                None => {
                                    return Err(AddrError::new(input, "unterminated string key"))
                                }
                            },
                            Some(c) => s.push(c),
                            None => return Err(AddrError::new(input, "unterminated string key")),
                        }
                    }
                    key = Some(InstanceKey::Str(s));
                }
                Some(c) if c.is_ascii_digit() || *c == '-' => {
                    let mut digits = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_ascii_digit() || c == '-' {
                            digits.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let n = digits.parse::<i64>().map_err(|_| {
                        AddrError::new(input, format!("invalid integer key {:?}", digits))
                    })?;
                    key = Some(InstanceKey::Int(n));
                }
                _ => return Err(AddrError::new(input, "invalid instance key")),
            }
            if chars.next() != Some(']') {
                return Err(AddrError::new(input, "missing closing bracket"));
            }
        }

        segments.push(Segment { name, key });

        match chars.next() {
            Some('.') => continue,
            Some(c) => {
                return Err(AddrError::new(
                    input,
                    format!("unexpected character {:?} after segment", c),
                ))
            }
            None => break,
        }
    }

    Ok(segments)
}

/// Parse any targetable address: a module (instance) path, a resource, or a
/// resource instance.
pub fn parse_target(input: &str) -> Result<Target, AddrError> {
    let segments = tokenize(input.trim())?;
    let mut iter = segments.into_iter().peekable();

    // Leading module steps.
    let mut module = ModuleInstanceAddr::root();
    while iter.peek().map(|s| s.name.as_str()) == Some("module") {
        let kw = iter.next().unwrap();
        if kw.key.is_some() {
            return Err(AddrError::new(input, "the module keyword takes no key"));
        }
        let step = iter
            .next()
            .ok_or_else(|| AddrError::new(input, "expected module name after \"module\""))?;
        module = module.child(&step.name, step.key);
    }

    if iter.peek().is_none() {
        if module.is_root() {
            return Err(AddrError::new(input, "empty address"));
        }
        return Ok(Target::Module(module));
    }

    // Resource part: optional "data" keyword, then type and name.
    let mode = if iter.peek().map(|s| s.name.as_str()) == Some("data") {
        let kw = iter.next().unwrap();
        if kw.key.is_some() {
            return Err(AddrError::new(input, "the data keyword takes no key"));
        }
        ResourceMode::Data
    } else {
        ResourceMode::Managed
    };

    let type_seg = iter
        .next()
        .ok_or_else(|| AddrError::new(input, "expected resource type"))?;
    if type_seg.key.is_some() {
        return Err(AddrError::new(input, "resource type takes no key"));
    }
    let name_seg = iter
        .next()
        .ok_or_else(|| AddrError::new(input, "expected resource name"))?;
    if iter.next().is_some() {
        return Err(AddrError::new(input, "trailing segments after resource name"));
    }

    let resource = AbsResource {
        module,
        resource: Resource {
            mode,
            type_: type_seg.name,
            name: name_seg.name,
        },
    };

    match name_seg.key {
        Some(key) => Ok(Target::ResourceInstance(resource.instance(Some(key)))),
        None => Ok(Target::Resource(resource)),
    }
}

/// Parse an absolute resource instance address. A resource address without
/// an instance key parses as the no-key instance.
pub fn parse_resource_instance(input: &str) -> Result<AbsResourceInstance, AddrError> {
    match parse_target(input)? {
        Target::ResourceInstance(inst) => Ok(inst),
        Target::Resource(res) => Ok(res.instance(None)),
        Target::Module(_) => Err(AddrError::new(
            input,
            "expected a resource address, found a module address",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_resource() {
        let t = parse_target("test_thing.web").unwrap();
        match t {
            Target::Resource(r) => {
                assert!(r.module.is_root());
                assert_eq!(r.resource, Resource::managed("test_thing", "web"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_instance_in_module() {
        let inst =
            parse_resource_instance("module.net[\"east\"].test_thing.web[3]").unwrap();
        assert_eq!(
            inst.to_string(),
            "module.net[\"east\"].test_thing.web[3]"
        );
        assert_eq!(inst.key, Some(InstanceKey::Int(3)));
    }

    #[test]
    fn parses_data_resource() {
        let inst = parse_resource_instance("data.test_source.lookup").unwrap();
        assert_eq!(inst.resource.resource.mode, ResourceMode::Data);
        assert_eq!(inst.key, None);
    }

    #[test]
    fn parses_module_target() {
        let t = parse_target("module.a.module.b[0]").unwrap();
        match t {
            Target::Module(m) => {
                assert_eq!(m.0.len(), 2);
                assert_eq!(m.0[1].key, Some(InstanceKey::Int(0)));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_target("").is_err());
        assert!(parse_target("test..web").is_err());
        assert!(parse_target("test.web[").is_err());
        assert!(parse_target("test.web[x]").is_err());
        assert!(parse_resource_instance("module.a").is_err());
    }

    #[test]
    fn display_parse_round_trip() {
        for text in [
            "test_thing.web",
            "test_thing.web[0]",
            "data.test_source.lookup",
            "module.net[\"east\"].test_thing.web[3]",
            "module.a.module.b.test.c[\"k\"]",
        ] {
            let inst = parse_resource_instance(text).unwrap();
            let printed = inst.to_string();
            let reparsed = parse_resource_instance(&printed).unwrap();
            assert_eq!(inst, reparsed, "round trip failed for {}", text);
        }
    }
}
