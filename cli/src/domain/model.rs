//! The configuration model: a forest of named classes and devices with
//! multiple inheritance.
//!
//! Entities are defined once, before any step runs, and are immutable
//! afterwards; every traversal carries a visited set so lookups terminate on
//! arbitrary `ISA` graphs, cycles included. Parent order is the sorted order
//! of the `ISA` set, which keeps scalar tie-breaking deterministic. Hot
//! lookups are memoized; any mutation clears the cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, OnceLock};

use regex::Regex;

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::step::StepName;
use crate::domain::value::Value;

/// Key inside an entity block naming its parents.
pub const ISA_KEY: &str = "ISA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A host; name matches `^[a-z][\w-]+$`.
    Device,
    /// A reusable configuration fragment; name matches `^[A-Z][\w-]+$`.
    Class,
}

/// A named node of the configuration forest.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub values: BTreeMap<String, Value>,
    pub isa: BTreeSet<String>,
}

fn device_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][\w-]+$").expect("static regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][\w-]+$").expect("static regex"))
}

fn ipv4_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}(/\d{1,2})?$").expect("static regex"))
}

/// The in-memory configuration model.
#[derive(Debug, Default)]
pub struct ConfigModel {
    entities: BTreeMap<String, Entity>,
    networks: BTreeMap<String, Vec<String>>,
    lookup_cache: Mutex<HashMap<String, Vec<Value>>>,
    isa_cache: Mutex<HashMap<(String, String), bool>>,
}

impl ConfigModel {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Definition surface ───────────────────────────────────────────────────

    /// Define a device.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::Config`] on a malformed name, a duplicate
    /// definition, or a malformed `ISA` entry in the block.
    pub fn device(&mut self, name: &str, block: BTreeMap<String, Value>) -> EngineResult<()> {
        self.define(EntityKind::Device, name, block)
    }

    /// Define a class. Same error behavior as [`ConfigModel::device`].
    pub fn class(&mut self, name: &str, block: BTreeMap<String, Value>) -> EngineResult<()> {
        self.define(EntityKind::Class, name, block)
    }

    fn define(
        &mut self,
        kind: EntityKind,
        name: &str,
        mut block: BTreeMap<String, Value>,
    ) -> EngineResult<()> {
        let re = match kind {
            EntityKind::Device => device_re(),
            EntityKind::Class => class_re(),
        };
        if !re.is_match(name) {
            return Err(EngineError::Config(format!(
                "malformed {} name: {name:?}",
                match kind {
                    EntityKind::Device => "device",
                    EntityKind::Class => "class",
                }
            )));
        }
        if self.entities.contains_key(name) {
            return Err(EngineError::Config(format!("duplicate definition of {name}")));
        }
        let isa = match block.remove(ISA_KEY) {
            None => BTreeSet::new(),
            Some(Value::Str(parent)) => BTreeSet::from([parent]),
            Some(Value::List(items)) => {
                let mut set = BTreeSet::new();
                for item in items {
                    match item {
                        Value::Str(parent) => {
                            set.insert(parent);
                        }
                        other => {
                            return Err(EngineError::Config(format!(
                                "ISA entries of {name} must be strings, got {other:?}"
                            )));
                        }
                    }
                }
                set
            }
            Some(other) => {
                return Err(EngineError::Config(format!(
                    "ISA of {name} must be a string or a list, got {other:?}"
                )));
            }
        };
        self.entities.insert(
            name.to_string(),
            Entity {
                name: name.to_string(),
                kind,
                values: block,
                isa,
            },
        );
        self.clear_caches();
        Ok(())
    }

    /// Link `child` to an additional parent. Used by the detection steps in
    /// the setup phase, before the model freezes.
    pub fn add_parent(&mut self, child: &str, parent: &str) -> EngineResult<()> {
        let entity = self
            .entities
            .get_mut(child)
            .ok_or_else(|| EngineError::Config(format!("unknown entity {child}")))?;
        entity.isa.insert(parent.to_string());
        self.clear_caches();
        Ok(())
    }

    /// Accumulate members into a named IP-range set.
    pub fn network(&mut self, name: &str, members: Vec<String>) {
        self.networks.entry(name.to_string()).or_default().extend(members);
        self.clear_caches();
    }

    /// Expand a named network. IPv4 literals and CIDR ranges stand for
    /// themselves; other members name further networks.
    pub fn expand_network(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.expand_into(name, &mut seen, &mut out);
        out
    }

    fn expand_into(&self, name: &str, seen: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if !seen.insert(name.to_string()) {
            return;
        }
        let Some(members) = self.networks.get(name) else {
            return;
        };
        for member in members {
            if ipv4_re().is_match(member) {
                out.push(member.clone());
            } else {
                self.expand_into(member, seen, out);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    fn clear_caches(&self) {
        if let Ok(mut cache) = self.lookup_cache.lock() {
            cache.clear();
        }
        if let Ok(mut cache) = self.isa_cache.lock() {
            cache.clear();
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// All hits for a `"base/k1/k2/…"` path, in visitation order: the named
    /// entity first, then its ancestors, each entered at most once.
    pub fn c_all(&self, path: &str) -> Vec<Value> {
        if let Ok(cache) = self.lookup_cache.lock() {
            if let Some(hit) = cache.get(path) {
                return hit.clone();
            }
        }
        let mut segments = path.split('/');
        let base = segments.next().unwrap_or_default().to_string();
        let keys: Vec<&str> = segments.collect();
        let mut seen = BTreeSet::new();
        let mut hits = Vec::new();
        self.collect(&base, &keys, &mut seen, &mut hits);
        if let Ok(mut cache) = self.lookup_cache.lock() {
            cache.insert(path.to_string(), hits.clone());
        }
        hits
    }

    /// First hit for a path, or `None`.
    pub fn c(&self, path: &str) -> Option<Value> {
        self.c_all(path).into_iter().next()
    }

    fn collect(&self, base: &str, keys: &[&str], seen: &mut BTreeSet<String>, hits: &mut Vec<Value>) {
        if !seen.insert(base.to_string()) {
            return;
        }
        let Some(entity) = self.entities.get(base) else {
            return;
        };
        if keys.is_empty() {
            hits.push(Value::Map(entity.values.clone()));
        } else if let Some(value) = walk_chain(&entity.values, keys) {
            hits.push(value.clone());
        }
        for parent in &entity.isa {
            self.collect(parent, keys, seen, hits);
        }
    }

    // ── Inheritance predicates ───────────────────────────────────────────────

    /// Walk `start` and its ancestors; for every entity where `key` is
    /// defined, invoke `visit(entity_name, value)`. A `true` return stops the
    /// walk. The visited set guards against cycles.
    pub fn i_iterate(
        &self,
        start: &str,
        key: &str,
        visit: &mut dyn FnMut(&str, &Value) -> bool,
    ) {
        let mut seen = BTreeSet::new();
        self.iterate_inner(start, key, visit, &mut seen);
    }

    fn iterate_inner(
        &self,
        base: &str,
        key: &str,
        visit: &mut dyn FnMut(&str, &Value) -> bool,
        seen: &mut BTreeSet<String>,
    ) -> bool {
        if !seen.insert(base.to_string()) {
            return false;
        }
        let Some(entity) = self.entities.get(base) else {
            return false;
        };
        if let Some(value) = entity.values.get(key) {
            if visit(&entity.name, value) {
                return true;
            }
        }
        for parent in &entity.isa {
            if self.iterate_inner(parent, key, visit, seen) {
                return true;
            }
        }
        false
    }

    /// Most specific value of `key` on `start` or its ancestors.
    pub fn i_has(&self, start: &str, key: &str) -> Option<Value> {
        let mut found = None;
        self.i_iterate(start, key, &mut |_, value| {
            found = Some(value.clone());
            true
        });
        found
    }

    /// Transitive `ISA` membership: is `entity` (or an ancestor) `class`?
    pub fn i_isa(&self, entity: &str, class: &str) -> bool {
        let cache_key = (entity.to_string(), class.to_string());
        if let Ok(cache) = self.isa_cache.lock() {
            if let Some(hit) = cache.get(&cache_key) {
                return *hit;
            }
        }
        let mut seen = BTreeSet::new();
        let result = self.isa_inner(entity, class, &mut seen);
        if let Ok(mut cache) = self.isa_cache.lock() {
            cache.insert(cache_key, result);
        }
        result
    }

    fn isa_inner(&self, base: &str, class: &str, seen: &mut BTreeSet<String>) -> bool {
        if base == class {
            return true;
        }
        if !seen.insert(base.to_string()) {
            return false;
        }
        let Some(entity) = self.entities.get(base) else {
            return false;
        };
        entity.isa.iter().any(|parent| self.isa_inner(parent, class, seen))
    }

    /// False when any visited entity's `skip_steps` lists `"<step>:<item>"`
    /// or `"<shortstep>:<item>"` for the given step.
    pub fn i_should(&self, start: &str, step: &StepName, item: &str) -> bool {
        let full = format!("{}:{item}", step.full());
        let short = format!("{}:{item}", step.short());
        let mut skipped = false;
        self.i_iterate(start, "skip_steps", &mut |_, value| {
            if let Value::List(items) = value {
                if items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|entry| entry == full || entry == short)
                {
                    skipped = true;
                    return true;
                }
            }
            false
        });
        !skipped
    }

    /// Membership of `item` in the sequence named `key` anywhere on the
    /// ancestry of `start`. Backs `i_immutable_file` and friends.
    pub fn i_listed(&self, start: &str, key: &str, item: &str) -> bool {
        let mut found = false;
        self.i_iterate(start, key, &mut |_, value| {
            if let Value::List(items) = value {
                if items.iter().filter_map(Value::as_str).any(|entry| entry == item) {
                    found = true;
                    return true;
                }
            }
            false
        });
        found
    }

    /// The primary interface's IP from the `interfaces` configuration: the
    /// entry flagged `primary`, or the first in key order.
    pub fn i_ip(&self, host: &str) -> Option<String> {
        let interfaces = self.c(&format!("{host}/interfaces"))?;
        let map = interfaces.as_map()?;
        let primary = map
            .values()
            .find(|v| v.as_map().is_some_and(|m| m.get("primary").is_some_and(Value::truthy)))
            .or_else(|| map.values().next())?;
        primary.as_map()?.get("ip")?.as_str().map(str::to_string)
    }
}

fn walk_chain<'a>(values: &'a BTreeMap<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    let mut current = values.get(keys[0])?;
    for key in &keys[1..] {
        current = current.as_map()?.get(*key)?;
    }
    Some(current)
}

// ── Unit tests ───────────────────────────────────────────────────────────────
