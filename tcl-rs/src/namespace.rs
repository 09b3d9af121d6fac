//! Hierarchical namespaces holding commands, variables and children.
//!
//! Names are resolved relative to a context namespace; a qualified name
//! that does not start with `::` is also tried relative to the global
//! namespace.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use tracing::debug;

use crate::error::{Exception, TclResult};
use crate::interp::{Command, Interp};
use crate::var::{VarFlags, VarRef, VarTable};

pub type NsRef = Rc<RefCell<Namespace>>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct NsFlags: u8 {
        /// Deleted while still active; torn down when the last frame exits.
        const DYING = 0x01;
        const DEAD = 0x02;
    }
}

bitflags! {
    /// Controls qualified-name resolution.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NsLookup: u8 {
        const GLOBAL_ONLY = 0x01;
        const NAMESPACE_ONLY = 0x02;
        /// Create missing intermediate namespaces.
        const CREATE_NS_IF_UNKNOWN = 0x04;
        /// The whole name refers to a namespace.
        const FIND_ONLY_NS = 0x08;
    }
}

impl From<VarFlags> for NsLookup {
    fn from(flags: VarFlags) -> Self {
        let mut out = NsLookup::empty();
        out.set(NsLookup::GLOBAL_ONLY, flags.contains(VarFlags::GLOBAL_ONLY));
        out.set(NsLookup::NAMESPACE_ONLY, flags.contains(VarFlags::NAMESPACE_ONLY));
        out
    }
}

/// Hook consulted before normal variable lookup in a namespace.
pub trait Resolver {
    /// `None` defers to normal lookup.
    fn resolve_var(
        &self,
        interp: &mut Interp,
        name: &str,
        ns: &NsRef,
        flags: VarFlags,
    ) -> Option<TclResult<VarRef>>;
}

pub struct Namespace {
    pub name: String,
    pub full_name: String,
    parent: Option<Weak<RefCell<Namespace>>>,
    pub(crate) children: BTreeMap<String, NsRef>,
    pub(crate) vars: Rc<VarTable>,
    pub(crate) commands: BTreeMap<String, Rc<dyn Command>>,
    pub resolver: Option<Rc<dyn Resolver>>,
    pub(crate) flags: NsFlags,
    /// Call frames currently executing in this namespace.
    pub(crate) activation_count: usize,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("full_name", &self.full_name)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.len())
            .finish()
    }
}

impl Namespace {
    pub(crate) fn global() -> NsRef {
        Rc::new(RefCell::new(Namespace {
            name: String::new(),
            full_name: "::".to_owned(),
            parent: None,
            children: BTreeMap::new(),
            vars: Rc::new(VarTable::default()),
            commands: BTreeMap::new(),
            resolver: None,
            flags: NsFlags::empty(),
            activation_count: 0,
        }))
    }

    fn child(parent: &NsRef, name: &str) -> NsRef {
        let full_name = {
            let p = parent.borrow();
            if p.parent.is_none() {
                format!("::{name}")
            } else {
                format!("{}::{name}", p.full_name)
            }
        };
        debug!(namespace = %full_name, "create namespace");
        let ns = Rc::new(RefCell::new(Namespace {
            name: name.to_owned(),
            full_name,
            parent: Some(Rc::downgrade(parent)),
            children: BTreeMap::new(),
            vars: Rc::new(VarTable::default()),
            commands: BTreeMap::new(),
            resolver: None,
            flags: NsFlags::empty(),
            activation_count: 0,
        }));
        parent.borrow_mut().children.insert(name.to_owned(), ns.clone());
        ns
    }

    pub fn parent(&self) -> Option<NsRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> impl Iterator<Item = &NsRef> {
        self.children.values()
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn is_dying(&self) -> bool {
        self.flags.intersects(NsFlags::DYING | NsFlags::DEAD)
    }
}

/// Result of [`Interp::get_namespace_for_qual_name`].
#[derive(Debug, Clone, Default)]
pub struct QualName<'a> {
    /// Namespace containing the named item, relative to the context.
    pub ns: Option<NsRef>,
    /// Same path resolved relative to the global namespace.
    pub alt_ns: Option<NsRef>,
    /// Last component of the name.
    pub simple: Option<&'a str>,
}

/// Text after the last `::` separator.
pub fn tail(name: &str) -> &str {
    match name.rfind("::") {
        Some(i) => &name[i + 2..],
        None => name,
    }
}

/// Text before the last `::` separator (and any colons preceding it).
pub fn qualifiers(name: &str) -> &str {
    match name.rfind("::") {
        Some(i) => name[..i].trim_end_matches(':'),
        None => "",
    }
}

fn skip_colons(s: &str) -> &str {
    s.trim_start_matches(':')
}

// ── Resolution ────────────────────────────────────────────────────────────────

impl Interp {
    pub fn global_namespace(&self) -> NsRef {
        self.global_ns.clone()
    }

    /// Namespace of the active variable frame.
    pub fn current_namespace(&self) -> NsRef {
        match self.var_frame {
            Some(i) => self.frames[i].ns.clone(),
            None => self.global_ns.clone(),
        }
    }

    /// Split a qualified name into its containing namespace (relative to
    /// `cx` or the current namespace, and relative to global) and its last
    /// component.
    pub fn get_namespace_for_qual_name<'a>(
        &self,
        qual: &'a str,
        cx: Option<NsRef>,
        flags: NsLookup,
    ) -> QualName<'a> {
        let mut ns = if flags.contains(NsLookup::GLOBAL_ONLY) {
            self.global_namespace()
        } else {
            cx.unwrap_or_else(|| self.current_namespace())
        };

        let mut rest = qual;
        if rest.starts_with("::") {
            ns = self.global_namespace();
            rest = skip_colons(rest);
            if rest.is_empty() {
                return QualName { ns: Some(ns), alt_ns: None, simple: Some("") };
            }
        }

        let mut alt = if ns.borrow().is_global()
            || flags.intersects(NsLookup::NAMESPACE_ONLY | NsLookup::FIND_ONLY_NS)
        {
            None
        } else {
            Some(self.global_namespace())
        };
        let mut ns = Some(ns);

        loop {
            let (part, next) = match rest.find("::") {
                Some(i) => (&rest[..i], Some(skip_colons(&rest[i..]))),
                None => (rest, None),
            };
            let last = next.is_none();
            if last && !flags.contains(NsLookup::FIND_ONLY_NS) {
                return QualName { ns, alt_ns: alt, simple: Some(part) };
            }

            let step = |from: &Option<NsRef>| -> Option<NsRef> {
                let from = from.as_ref()?;
                let found = from.borrow().children.get(part).cloned();
                match found {
                    Some(child) => Some(child),
                    None if flags.contains(NsLookup::CREATE_NS_IF_UNKNOWN) => {
                        Some(Namespace::child(from, part))
                    }
                    None => None,
                }
            };
            ns = step(&ns);
            alt = step(&alt);
            if ns.is_none() && alt.is_none() {
                return QualName::default();
            }

            match next {
                None => return QualName { ns, alt_ns: alt, simple: None },
                Some("") => {
                    // Trailing "::" names the namespace itself.
                    let simple = if flags.contains(NsLookup::FIND_ONLY_NS) { None } else { Some("") };
                    return QualName { ns, alt_ns: alt, simple };
                }
                Some(n) => rest = n,
            }
        }
    }

    /// Find a namespace by name.
    pub fn find_namespace(&self, name: &str, cx: Option<NsRef>) -> Option<NsRef> {
        let q = self.get_namespace_for_qual_name(name, cx, NsLookup::FIND_ONLY_NS);
        q.ns.or(q.alt_ns)
    }

    /// Create a namespace, along with any missing parents.
    pub fn create_namespace(&mut self, name: &str) -> TclResult<NsRef> {
        if name.is_empty() {
            return Err(Exception::error(
                "can't create namespace \"\": only global namespace can have empty name",
            ));
        }
        let q = self.get_namespace_for_qual_name(
            name,
            None,
            NsLookup::CREATE_NS_IF_UNKNOWN | NsLookup::NAMESPACE_ONLY,
        );
        let Some(parent) = q.ns else {
            return Err(Exception::error(format!("can't create namespace \"{name}\": unknown namespace")));
        };
        match q.simple {
            None | Some("") => Ok(parent),
            Some(simple) => {
                if parent.borrow().children.contains_key(simple) {
                    return Err(Exception::error(format!("can't create namespace \"{name}\": already exists")));
                }
                Ok(Namespace::child(&parent, simple))
            }
        }
    }

    /// Delete a namespace. An active namespace is only marked dying and
    /// unlinked from its parent; the rest happens when its last frame exits.
    pub fn delete_namespace(&mut self, ns: &NsRef) {
        let (active, global) = {
            let n = ns.borrow();
            (n.activation_count > 0, n.is_global())
        };
        if active {
            ns.borrow_mut().flags.insert(NsFlags::DYING);
            if !global {
                unlink_from_parent(ns);
            }
            return;
        }
        self.teardown_namespace(ns);
    }

    pub(crate) fn teardown_namespace(&mut self, ns: &NsRef) {
        if ns.borrow().flags.contains(NsFlags::DEAD) {
            return;
        }
        debug!(namespace = %ns.borrow().full_name, "delete namespace");
        let (vars, global) = {
            let n = ns.borrow();
            (n.vars.clone(), n.is_global())
        };

        if global {
            // errorInfo and errorCode survive until the very end.
            let kept: Vec<(String, VarRef)> = {
                let mut t = vars.borrow_mut();
                ["errorInfo", "errorCode"]
                    .iter()
                    .filter_map(|k| t.remove_entry(*k))
                    .collect()
            };
            self.delete_vars(&vars);
            vars.borrow_mut().extend(kept);
        } else {
            self.delete_vars(&vars);
            unlink_from_parent(ns);
        }

        let children: Vec<NsRef> = ns.borrow().children.values().cloned().collect();
        for child in &children {
            self.delete_namespace(child);
        }
        ns.borrow_mut().children.clear();

        let commands = std::mem::take(&mut ns.borrow_mut().commands);
        drop(commands);

        if global {
            self.delete_vars(&vars);
        }
        ns.borrow_mut().flags.insert(NsFlags::DEAD);
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Resolve a command name: the current namespace first, then global.
    pub fn find_command(&self, name: &str) -> Option<Rc<dyn Command>> {
        let q = self.get_namespace_for_qual_name(name, None, NsLookup::empty());
        let simple = q.simple?;
        [q.ns, q.alt_ns]
            .into_iter()
            .flatten()
            .find_map(|ns| ns.borrow().commands.get(simple).cloned())
    }

    /// Install a command under a (possibly qualified) name, creating
    /// missing namespaces. Returns the namespace it went into.
    pub fn create_command(&mut self, name: &str, cmd: Rc<dyn Command>) -> TclResult<NsRef> {
        let cx = if name.starts_with("::") { None } else { Some(self.current_namespace()) };
        let q = self.get_namespace_for_qual_name(name, cx, NsLookup::CREATE_NS_IF_UNKNOWN);
        let (Some(ns), Some(simple)) = (q.ns, q.simple) else {
            return Err(Exception::error(format!("can't create command \"{name}\": unknown namespace")));
        };
        ns.borrow_mut().commands.insert(simple.to_owned(), cmd);
        Ok(ns)
    }

    /// Remove a command. Returns whether it existed.
    pub fn delete_command(&mut self, name: &str) -> bool {
        let q = self.get_namespace_for_qual_name(name, None, NsLookup::empty());
        let Some(simple) = q.simple else {
            return false;
        };
        let removed = [q.ns, q.alt_ns]
            .into_iter()
            .flatten()
            .find_map(|ns| ns.borrow_mut().commands.remove(simple));
        removed.is_some()
    }

    /// Rename a command; an empty `new_name` deletes it.
    pub fn rename_command(&mut self, old_name: &str, new_name: &str) -> TclResult<()> {
        let Some(cmd) = self.find_command(old_name) else {
            let what = if new_name.is_empty() { "delete" } else { "rename" };
            return Err(Exception::error(format!(
                "can't {what} \"{old_name}\": command doesn't exist"
            )));
        };
        if new_name.is_empty() {
            self.delete_command(old_name);
            return Ok(());
        }
        if self.find_command(new_name).is_some_and(|c| !Rc::ptr_eq(&c, &cmd)) {
            let q = self.get_namespace_for_qual_name(new_name, None, NsLookup::empty());
            let exists_here = match (q.ns, q.simple) {
                (Some(ns), Some(simple)) => ns.borrow().commands.contains_key(simple),
                _ => false,
            };
            if exists_here {
                return Err(Exception::error(format!(
                    "can't rename to \"{new_name}\": command already exists"
                )));
            }
        }
        self.delete_command(old_name);
        self.create_command(new_name, cmd)
            .map(|_| ())
            .map_err(|_| Exception::error(format!("can't rename to \"{new_name}\": bad command name")))
    }
}

fn unlink_from_parent(ns: &NsRef) {
    let (parent, name) = {
        let n = ns.borrow();
        (n.parent(), n.name.clone())
    };
    if let Some(parent) = parent {
        let mut p = parent.borrow_mut();
        if p.children.get(&name).is_some_and(|c| Rc::ptr_eq(c, ns)) {
            p.children.remove(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_and_qualifiers() {
        assert_eq!(tail("::a::b::c"), "c");
        assert_eq!(tail("c"), "c");
        assert_eq!(tail("a::"), "");
        assert_eq!(qualifiers("::a::b::c"), "::a::b");
        assert_eq!(qualifiers("a:::b"), "a");
        assert_eq!(qualifiers("c"), "");
    }

    #[test]
    fn qualified_lookup_and_creation() {
        let mut interp = Interp::new();
        let ns = interp.create_namespace("::foo::bar").unwrap();
        assert_eq!(ns.borrow().full_name, "::foo::bar");
        assert!(interp.find_namespace("foo", None).is_some());
        assert!(interp.find_namespace("::foo::bar", None).is_some());
        assert!(interp.find_namespace("nope", None).is_none());

        let q = interp.get_namespace_for_qual_name("foo::bar::x", None, NsLookup::empty());
        assert_eq!(q.simple, Some("x"));
        assert!(Rc::ptr_eq(&q.ns.unwrap(), &ns));

        let q = interp.get_namespace_for_qual_name("::", None, NsLookup::empty());
        assert_eq!(q.simple, Some(""));
        assert!(q.ns.unwrap().borrow().is_global());
    }

    #[test]
    fn creation_errors() {
        let mut interp = Interp::new();
        let e = interp.create_namespace("").unwrap_err();
        assert!(e.message().contains("only global namespace can have empty name"));
        interp.create_namespace("x").unwrap();
        let e = interp.create_namespace("x").unwrap_err();
        assert_eq!(e.message(), "can't create namespace \"x\": already exists");
    }

    #[test]
    fn delete_unlinks_children() {
        let mut interp = Interp::new();
        let ns = interp.create_namespace("a::b").unwrap();
        let a = interp.find_namespace("a", None).unwrap();
        interp.delete_namespace(&a);
        assert!(interp.find_namespace("a", None).is_none());
        assert!(ns.borrow().flags.contains(NsFlags::DEAD));
    }
}
