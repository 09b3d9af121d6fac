//! Variables: storage, two-part name lookup, links and traces.
//!
//! A variable lives in a table owned by a call frame, a namespace or an
//! array. Tables hold [`VarRef`] handles; a variable keeps a weak pointer
//! back to its table so it can remove itself once it is undefined and no
//! longer referenced by links, traces or in-progress accesses.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::error::{Exception, TclResult, VarError, VarErrorKind};
use crate::interp::Interp;
use crate::list;
use crate::namespace::{Namespace, NsLookup};
use crate::value::Value;

pub type VarRef = Rc<RefCell<Var>>;
pub type VarTable = RefCell<BTreeMap<String, VarRef>>;

bitflags! {
    /// Flags accepted by the variable access API.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VarFlags: u32 {
        /// Resolve in the global namespace only.
        const GLOBAL_ONLY = 0x01;
        /// Resolve in the current namespace only, ignoring procedure locals.
        const NAMESPACE_ONLY = 0x02;
        /// Append to the current value instead of replacing it.
        const APPEND_VALUE = 0x04;
        /// Treat the new value as a list element.
        const LIST_ELEMENT = 0x08;
        /// Leave a descriptive message in the returned error.
        const LEAVE_ERR_MSG = 0x10;
    }
}

bitflags! {
    /// Operations a trace fires on, and the operation passed to it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceFlags: u32 {
        const READS = 0x01;
        const WRITES = 0x02;
        const UNSETS = 0x04;
        /// Passed with UNSETS when the trace itself is being discarded.
        const DESTROYED = 0x08;
        const OPS = Self::READS.bits() | Self::WRITES.bits() | Self::UNSETS.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct VarState: u8 {
        const UNDEFINED = 0x01;
        const IN_HASHTABLE = 0x02;
        const TRACE_ACTIVE = 0x04;
        const NAMESPACE_VAR = 0x08;
        const ARRAY_ELEMENT = 0x10;
    }
}

/// Storage of a variable.
#[derive(Debug, Clone)]
pub enum VarValue {
    Scalar(Option<Value>),
    Array(Rc<VarTable>),
    /// Alias created by `upvar`, `global` or `variable`.
    Link(VarRef),
}

/// A named storage slot.
pub struct Var {
    pub(crate) value: VarValue,
    pub(crate) state: VarState,
    /// Links, traces and accesses that keep this variable alive after it
    /// has been unset.
    pub(crate) ref_count: usize,
    pub(crate) traces: Vec<Rc<VarTrace>>,
    pub(crate) name: String,
    pub(crate) table: Option<Weak<VarTable>>,
    pub(crate) ns: Option<Weak<RefCell<Namespace>>>,
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Var")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("state", &self.state)
            .field("ref_count", &self.ref_count)
            .field("traces", &self.traces.len())
            .finish()
    }
}

impl Var {
    /// A new undefined variable entered in `table`.
    pub(crate) fn create(
        table: &Rc<VarTable>,
        name: &str,
        ns: Option<&Rc<RefCell<Namespace>>>,
        extra: VarState,
    ) -> VarRef {
        let var = Rc::new(RefCell::new(Var {
            value: VarValue::Scalar(None),
            state: VarState::UNDEFINED | VarState::IN_HASHTABLE | extra,
            ref_count: 0,
            traces: Vec::new(),
            name: name.to_owned(),
            table: Some(Rc::downgrade(table)),
            ns: ns.map(Rc::downgrade),
        }));
        table.borrow_mut().insert(name.to_owned(), var.clone());
        var
    }

    pub fn is_undefined(&self) -> bool {
        self.state.contains(VarState::UNDEFINED)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.value, VarValue::Array(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self.value, VarValue::Link(_))
    }

    /// Defined scalar value, if any.
    pub fn scalar(&self) -> Option<&Value> {
        match &self.value {
            VarValue::Scalar(v) if !self.is_undefined() => v.as_ref(),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entered in a table that has since been deleted.
    fn is_dangling(&self) -> bool {
        self.state.contains(VarState::IN_HASHTABLE)
            && self.table.as_ref().and_then(Weak::upgrade).is_none()
    }

    fn namespace(&self) -> Option<Rc<RefCell<Namespace>>> {
        self.ns.as_ref().and_then(Weak::upgrade)
    }
}

// ── Traces ────────────────────────────────────────────────────────────────────

/// Callback fired when a traced variable is read, written or unset.
/// Returning `Err` aborts a read or write with that message.
pub trait TraceCallback {
    fn call(
        &self,
        interp: &mut Interp,
        name1: &str,
        name2: Option<&str>,
        flags: TraceFlags,
    ) -> Result<(), String>;
}

impl<F> TraceCallback for F
where
    F: Fn(&mut Interp, &str, Option<&str>, TraceFlags) -> Result<(), String>,
{
    fn call(
        &self,
        interp: &mut Interp,
        name1: &str,
        name2: Option<&str>,
        flags: TraceFlags,
    ) -> Result<(), String> {
        self(interp, name1, name2, flags)
    }
}

/// Identifies a registered trace for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub(crate) u64);

pub struct VarTrace {
    pub id: TraceId,
    pub flags: TraceFlags,
    pub callback: Rc<dyn TraceCallback>,
    /// Script text for traces created by the `trace` command.
    pub command: Option<String>,
}

/// Description of one trace, as reported by [`Interp::var_traces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceInfo {
    pub id: TraceId,
    pub flags: TraceFlags,
    pub command: Option<String>,
}

/// Split `a(b)` into `("a", "b")`.
pub fn split_array_name(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    if name.len() > open + 1 && name.ends_with(')') {
        Some((&name[..open], &name[open + 1..name.len() - 1]))
    } else {
        None
    }
}

fn chase_links(mut var: VarRef) -> VarRef {
    loop {
        let next = match &var.borrow().value {
            VarValue::Link(target) => target.clone(),
            _ => return var.clone(),
        };
        var = next;
    }
}

fn has_traces(var: &VarRef, array: Option<&VarRef>) -> bool {
    !var.borrow().traces.is_empty() || array.is_some_and(|a| !a.borrow().traces.is_empty())
}

fn still_registered(var: &VarRef, trace: &Rc<VarTrace>) -> bool {
    var.borrow().traces.iter().any(|t| Rc::ptr_eq(t, trace))
}

/// Remove `var` from its table if nothing needs it any more.
fn remove_if_unused(var: &VarRef) {
    let (name, table) = {
        let v = var.borrow();
        let unused = v.is_undefined()
            && v.ref_count == 0
            && v.traces.is_empty()
            && v.state.contains(VarState::IN_HASHTABLE);
        if !unused {
            return;
        }
        (v.name.clone(), v.table.clone())
    };
    if let Some(table) = table.and_then(|w| w.upgrade()) {
        let mut t = table.borrow_mut();
        if t.get(&name).is_some_and(|e| Rc::ptr_eq(e, var)) {
            t.remove(&name);
        }
    }
    var.borrow_mut().table = None;
}

/// Saved error-reporting state, restored around trace callbacks.
struct ErrorState {
    in_progress: bool,
    already_logged: bool,
    code_set: bool,
}

// ── Lookup ────────────────────────────────────────────────────────────────────

impl Interp {
    fn var_error(
        &self,
        flags: VarFlags,
        op: &'static str,
        part1: &str,
        part2: Option<&str>,
        reason: VarErrorKind,
    ) -> Exception {
        if flags.contains(VarFlags::LEAVE_ERR_MSG) {
            VarError::new(op, part1, part2, reason).into()
        } else {
            Exception::error(Value::empty())
        }
    }

    /// Resolve a two-part variable name.
    ///
    /// Returns the variable (links already followed) and, for an array
    /// element, the array that holds it. `create1`/`create2` create the
    /// base variable and the element when missing.
    pub(crate) fn lookup_var(
        &mut self,
        part1: &str,
        part2: Option<&str>,
        flags: VarFlags,
        op: &'static str,
        create1: bool,
        create2: bool,
    ) -> TclResult<(VarRef, Option<VarRef>)> {
        let err = |this: &Interp, reason| this.var_error(flags, op, part1, part2, reason);

        let (name, index) = match (split_array_name(part1), part2) {
            (Some(_), Some(_)) => return Err(err(self, VarErrorKind::NeedArray)),
            (Some((base, idx)), None) => (base, Some(idx)),
            (None, p2) => (part1, p2),
        };

        // A namespace resolver gets first refusal.
        let cx_ns = if flags.contains(VarFlags::GLOBAL_ONLY) {
            self.global_namespace()
        } else {
            self.current_namespace()
        };
        let resolver = cx_ns.borrow().resolver.clone();
        let mut found = None;
        if let Some(resolver) = resolver {
            match resolver.resolve_var(self, name, &cx_ns, flags) {
                Some(Ok(var)) => found = Some(var),
                Some(Err(e)) => return Err(e),
                None => {}
            }
        }

        let var = match found {
            Some(v) => v,
            None => {
                let frame = self.var_frame.map(|i| (self.frames[i].is_proc, self.frames[i].vars.clone()));
                let in_namespace = flags.intersects(VarFlags::GLOBAL_ONLY | VarFlags::NAMESPACE_ONLY)
                    || !matches!(frame, Some((true, _)))
                    || name.contains("::");
                if in_namespace {
                    match self.find_namespace_var(name, None, flags) {
                        Some(v) => v,
                        None if create1 => {
                            let q = self.get_namespace_for_qual_name(name, None, NsLookup::from(flags));
                            let Some(ns) = q.ns else {
                                return Err(err(self, VarErrorKind::BadNamespace));
                            };
                            let Some(tail) = q.simple else {
                                return Err(err(self, VarErrorKind::MissingName));
                            };
                            let table = ns.borrow().vars.clone();
                            Var::create(&table, tail, Some(&ns), VarState::empty())
                        }
                        None => return Err(err(self, VarErrorKind::NoSuchVar)),
                    }
                } else {
                    let Some((_, table)) = frame else {
                        return Err(err(self, VarErrorKind::NoSuchVar));
                    };
                    let existing = table.borrow().get(name).cloned();
                    match existing {
                        Some(v) => v,
                        None if create1 => Var::create(&table, name, None, VarState::empty()),
                        None => return Err(err(self, VarErrorKind::NoSuchVar)),
                    }
                }
            }
        };

        let var = chase_links(var);
        let Some(index) = index else {
            return Ok((var, None));
        };

        // Array element: the base must be, or become, an array.
        let elements = {
            let mut v = var.borrow_mut();
            if v.is_undefined() && !v.state.contains(VarState::ARRAY_ELEMENT) {
                if !create1 {
                    drop(v);
                    return Err(err(self, VarErrorKind::NoSuchVar));
                }
                if v.is_dangling() {
                    drop(v);
                    return Err(err(self, VarErrorKind::DanglingVar));
                }
                let table = Rc::new(VarTable::default());
                v.value = VarValue::Array(table.clone());
                v.state.remove(VarState::UNDEFINED);
                table
            } else {
                match &v.value {
                    VarValue::Array(t) => t.clone(),
                    _ => {
                        drop(v);
                        return Err(err(self, VarErrorKind::NeedArray));
                    }
                }
            }
        };

        let existing = elements.borrow().get(index).cloned();
        let element = match existing {
            Some(e) => e,
            None if create2 => {
                let ns = var.borrow().namespace();
                Var::create(&elements, index, ns.as_ref(), VarState::ARRAY_ELEMENT)
            }
            None => return Err(err(self, VarErrorKind::NoSuchElement)),
        };
        Ok((element, Some(var)))
    }

    /// Find a namespace variable by (possibly qualified) name.
    pub fn find_namespace_var(
        &self,
        name: &str,
        cx: Option<Rc<RefCell<Namespace>>>,
        flags: VarFlags,
    ) -> Option<VarRef> {
        let q = self.get_namespace_for_qual_name(name, cx, NsLookup::from(flags));
        let simple = q.simple?;
        [q.ns, q.alt_ns]
            .into_iter()
            .flatten()
            .find_map(|ns| ns.borrow().vars.borrow().get(simple).cloned())
    }

    /// Drop `var` (and its array) from their tables if they are unused.
    pub(crate) fn cleanup_var(&self, var: &VarRef, array: Option<&VarRef>) {
        remove_if_unused(var);
        if let Some(array) = array {
            remove_if_unused(array);
        }
    }

    // ── Read / write / unset ─────────────────────────────────────────────────

    /// Read a variable.
    pub fn get_var2(&mut self, part1: &str, part2: Option<&str>, flags: VarFlags) -> TclResult {
        let (var, array) = self.lookup_var(part1, part2, flags, "read", false, true)?;

        if has_traces(&var, array.as_ref()) {
            if let Some(msg) = self.call_traces(array.as_ref(), &var, part1, part2, TraceFlags::READS) {
                if var.borrow().is_undefined() {
                    self.cleanup_var(&var, array.as_ref());
                }
                return Err(self.var_error(flags, "read", part1, part2, VarErrorKind::Trace(msg)));
            }
        }

        if let Some(v) = var.borrow().scalar() {
            return Ok(v.clone());
        }

        let reason = {
            let v = var.borrow();
            if v.is_undefined() && array.as_ref().is_some_and(|a| !a.borrow().is_undefined()) {
                VarErrorKind::NoSuchElement
            } else if v.is_array() {
                VarErrorKind::IsArray
            } else {
                VarErrorKind::NoSuchVar
            }
        };
        if var.borrow().is_undefined() {
            self.cleanup_var(&var, array.as_ref());
        }
        Err(self.var_error(flags, "read", part1, part2, reason))
    }

    /// Read a scalar or `a(b)` element, reporting errors.
    pub fn get_var(&mut self, name: &str) -> TclResult {
        self.get_var2(name, None, VarFlags::LEAVE_ERR_MSG)
    }

    /// Write a variable and return its new value.
    pub fn set_var2(
        &mut self,
        part1: &str,
        part2: Option<&str>,
        new_value: Value,
        flags: VarFlags,
    ) -> TclResult {
        let (var, array) = self.lookup_var(part1, part2, flags, "set", true, true)?;

        {
            let v = var.borrow();
            if v.is_dangling() {
                let reason = if v.state.contains(VarState::ARRAY_ELEMENT) {
                    VarErrorKind::DanglingElement
                } else {
                    VarErrorKind::DanglingVar
                };
                drop(v);
                return Err(self.var_error(flags, "set", part1, part2, reason));
            }
            if v.is_array() && !v.is_undefined() {
                drop(v);
                return Err(self.var_error(flags, "set", part1, part2, VarErrorKind::IsArray));
            }
        }

        {
            let mut v = var.borrow_mut();
            let old = match std::mem::replace(&mut v.value, VarValue::Scalar(None)) {
                VarValue::Scalar(old) if !v.is_undefined() => old,
                _ => None,
            };
            let stored = if flags.contains(VarFlags::APPEND_VALUE) {
                if flags.contains(VarFlags::LIST_ELEMENT) {
                    // Taking the old value out of the variable drops its
                    // reference, so an unshared list is extended in place.
                    let mut list = old.unwrap_or_default();
                    if let Err(e) = list.list_append(new_value) {
                        v.value = VarValue::Scalar(Some(list));
                        return Err(e);
                    }
                    list
                } else {
                    match old {
                        Some(mut s) => {
                            s.append_str(new_value.as_str());
                            s
                        }
                        None => new_value,
                    }
                }
            } else if flags.contains(VarFlags::LIST_ELEMENT) {
                Value::from(list::quote_element(new_value.as_str()))
            } else {
                new_value
            };
            v.value = VarValue::Scalar(Some(stored));
            v.state.remove(VarState::UNDEFINED);
        }
        if let Some(array) = &array {
            array.borrow_mut().state.remove(VarState::UNDEFINED);
        }

        if has_traces(&var, array.as_ref()) {
            if let Some(msg) = self.call_traces(array.as_ref(), &var, part1, part2, TraceFlags::WRITES) {
                if var.borrow().is_undefined() {
                    self.cleanup_var(&var, array.as_ref());
                }
                return Err(self.var_error(flags, "set", part1, part2, VarErrorKind::Trace(msg)));
            }
        }

        if let Some(v) = var.borrow().scalar() {
            return Ok(v.clone());
        }
        // A trace changed the variable in some gross way.
        if var.borrow().is_undefined() {
            self.cleanup_var(&var, array.as_ref());
        }
        Ok(Value::empty())
    }

    /// Set a scalar or `a(b)` element, reporting errors.
    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) -> TclResult {
        self.set_var2(name, None, value.into(), VarFlags::LEAVE_ERR_MSG)
    }

    /// Remove a variable, firing its unset traces.
    pub fn unset_var2(&mut self, part1: &str, part2: Option<&str>, flags: VarFlags) -> TclResult<()> {
        let (var, array) = self.lookup_var(part1, part2, flags, "unset", false, false)?;
        let was_undefined = var.borrow().is_undefined();

        // Move the contents aside so traces see the variable as already
        // unset, and can even recreate it.
        let (old_value, old_state, traces) = {
            let mut v = var.borrow_mut();
            let value = std::mem::replace(&mut v.value, VarValue::Scalar(None));
            let traces = std::mem::take(&mut v.traces);
            let state = v.state;
            v.state.insert(VarState::UNDEFINED);
            (value, state, traces)
        };

        if !traces.is_empty() || array.as_ref().is_some_and(|a| !a.borrow().traces.is_empty()) {
            var.borrow_mut().ref_count += 1;
            let _ = self.run_traces(array.as_ref(), None, &traces, part1, part2, TraceFlags::UNSETS);
            var.borrow_mut().ref_count -= 1;
        }

        if let VarValue::Array(table) = old_value {
            if !old_state.contains(VarState::UNDEFINED) {
                self.delete_array(part1, &table);
            }
        }

        {
            let mut v = var.borrow_mut();
            if v.state.contains(VarState::NAMESPACE_VAR) {
                v.state.remove(VarState::NAMESPACE_VAR);
                v.ref_count = v.ref_count.saturating_sub(1);
            }
        }

        let result = if was_undefined {
            let reason = if array.is_none() {
                VarErrorKind::NoSuchVar
            } else {
                VarErrorKind::NoSuchElement
            };
            Err(self.var_error(flags, "unset", part1, part2, reason))
        } else {
            Ok(())
        };
        self.cleanup_var(&var, array.as_ref());
        result
    }

    /// Unset a scalar or `a(b)` element, reporting errors.
    pub fn unset_var(&mut self, name: &str) -> TclResult<()> {
        self.unset_var2(name, None, VarFlags::LEAVE_ERR_MSG)
    }

    /// Add `amount` to an integer variable.
    pub fn incr_var2(
        &mut self,
        part1: &str,
        part2: Option<&str>,
        amount: i64,
        flags: VarFlags,
    ) -> TclResult {
        let mut value = match self.get_var2(part1, part2, flags) {
            Ok(v) => v,
            Err(e) => {
                self.add_error_info(&e, "\n    (reading value of variable to increment)");
                return Err(e);
            }
        };
        let n = value.get_long()?;
        value.set_long(n.wrapping_add(amount));
        self.set_var2(part1, part2, value, flags)
    }

    pub fn incr_var(&mut self, name: &str, amount: i64) -> TclResult {
        self.incr_var2(name, None, amount, VarFlags::LEAVE_ERR_MSG)
    }

    /// Whether a defined scalar, array or element exists under this name.
    pub fn var_exists(&mut self, part1: &str, part2: Option<&str>, flags: VarFlags) -> bool {
        let Ok((var, array)) = self.lookup_var(part1, part2, flags, "access", false, false) else {
            return false;
        };
        let exists = !var.borrow().is_undefined();
        if !exists {
            self.cleanup_var(&var, array.as_ref());
        }
        exists
    }

    // ── Arrays ────────────────────────────────────────────────────────────────

    /// Delete every element of an array table, firing element unset traces.
    pub(crate) fn delete_array(&mut self, array_name: &str, table: &Rc<VarTable>) {
        let elements = std::mem::take(&mut *table.borrow_mut());
        for (key, element) in elements {
            let traces = {
                let mut e = element.borrow_mut();
                e.value = VarValue::Scalar(None);
                e.table = None;
                e.state.remove(VarState::TRACE_ACTIVE);
                std::mem::take(&mut e.traces)
            };
            if !traces.is_empty() {
                let _ = self.run_traces(None, None, &traces, array_name, Some(&key), TraceFlags::UNSETS);
            }
            element.borrow_mut().state.insert(VarState::UNDEFINED);
        }
    }

    /// Names of the elements of an array variable.
    pub fn array_names(&mut self, name: &str, flags: VarFlags) -> TclResult<Vec<String>> {
        let (var, _) = self.lookup_var(name, None, flags | VarFlags::LEAVE_ERR_MSG, "read", false, false)?;
        let v = var.borrow();
        match &v.value {
            VarValue::Array(t) if !v.is_undefined() => Ok(t
                .borrow()
                .iter()
                .filter(|(_, e)| !e.borrow().is_undefined())
                .map(|(k, _)| k.clone())
                .collect()),
            _ => Err(Exception::error(format!("\"{name}\" isn't an array"))),
        }
    }

    // ── Traces ────────────────────────────────────────────────────────────────

    /// Register a trace on a variable, creating it (undefined) if needed.
    pub fn trace_var2(
        &mut self,
        part1: &str,
        part2: Option<&str>,
        flags: TraceFlags,
        callback: Rc<dyn TraceCallback>,
        command: Option<String>,
    ) -> TclResult<TraceId> {
        let (var, _) = self.lookup_var(part1, part2, VarFlags::LEAVE_ERR_MSG, "trace", true, true)?;
        self.next_trace_id += 1;
        let id = TraceId(self.next_trace_id);
        let trace = Rc::new(VarTrace { id, flags: flags & TraceFlags::OPS, callback, command });
        var.borrow_mut().traces.insert(0, trace);
        Ok(id)
    }

    /// Register a closure as a trace.
    pub fn trace_var<F>(&mut self, name: &str, flags: TraceFlags, callback: F) -> TclResult<TraceId>
    where
        F: Fn(&mut Interp, &str, Option<&str>, TraceFlags) -> Result<(), String> + 'static,
    {
        self.trace_var2(name, None, flags, Rc::new(callback), None)
    }

    /// Remove a trace. Unknown variables or ids are ignored.
    pub fn untrace_var2(&mut self, part1: &str, part2: Option<&str>, id: TraceId) {
        let Ok((var, array)) = self.lookup_var(part1, part2, VarFlags::empty(), "trace", false, false) else {
            return;
        };
        var.borrow_mut().traces.retain(|t| t.id != id);
        if var.borrow().is_undefined() {
            self.cleanup_var(&var, array.as_ref());
        }
    }

    pub fn untrace_var(&mut self, name: &str, id: TraceId) {
        self.untrace_var2(name, None, id);
    }

    /// Traces registered on a variable, most recent first.
    pub fn var_traces(&mut self, part1: &str, part2: Option<&str>) -> Vec<TraceInfo> {
        let Ok((var, _)) = self.lookup_var(part1, part2, VarFlags::empty(), "trace", false, false) else {
            return Vec::new();
        };
        let v = var.borrow();
        v.traces
            .iter()
            .map(|t| TraceInfo { id: t.id, flags: t.flags, command: t.command.clone() })
            .collect()
    }

    fn save_error_state(&self) -> ErrorState {
        ErrorState {
            in_progress: self.err_in_progress,
            already_logged: self.err_already_logged,
            code_set: self.err_code_set,
        }
    }

    fn restore_error_state(&mut self, s: ErrorState) {
        self.err_in_progress = s.in_progress;
        self.err_already_logged = s.already_logged;
        self.err_code_set = s.code_set;
    }

    /// Fire the traces of a live variable, unless its traces are already
    /// running. Returns the first error message.
    fn call_traces(
        &mut self,
        array: Option<&VarRef>,
        var: &VarRef,
        part1: &str,
        part2: Option<&str>,
        flags: TraceFlags,
    ) -> Option<String> {
        {
            let mut v = var.borrow_mut();
            if v.state.contains(VarState::TRACE_ACTIVE) {
                return None;
            }
            v.state.insert(VarState::TRACE_ACTIVE);
            v.ref_count += 1;
        }
        let traces = var.borrow().traces.clone();
        let result = self.run_traces(array, Some(var), &traces, part1, part2, flags);
        let mut v = var.borrow_mut();
        v.state.remove(VarState::TRACE_ACTIVE);
        v.ref_count -= 1;
        result
    }

    /// Invoke array traces, then `traces`. Errors from unset traces are
    /// ignored. When `live` is given, traces removed from it meanwhile are
    /// skipped.
    fn run_traces(
        &mut self,
        array: Option<&VarRef>,
        live: Option<&VarRef>,
        traces: &[Rc<VarTrace>],
        part1: &str,
        part2: Option<&str>,
        flags: TraceFlags,
    ) -> Option<String> {
        let (name1, name2) = match part2 {
            Some(p2) => (part1, Some(p2)),
            None => match split_array_name(part1) {
                Some((a, i)) => (a, Some(i)),
                None => (part1, None),
            },
        };
        let unsets = flags.contains(TraceFlags::UNSETS);
        let saved = self.save_error_state();
        let mut result = None;

        if let Some(array) = array {
            array.borrow_mut().ref_count += 1;
            let array_traces = array.borrow().traces.clone();
            for t in &array_traces {
                if !t.flags.intersects(flags) || !still_registered(array, t) {
                    continue;
                }
                debug!(var = name1, ?flags, "array trace");
                if let Err(msg) = t.callback.call(self, name1, name2, flags) {
                    if unsets {
                        warn!(var = name1, %msg, "error in unset trace ignored");
                    } else {
                        result = Some(msg);
                        break;
                    }
                }
            }
            array.borrow_mut().ref_count -= 1;
        }

        if result.is_none() {
            let flags = if unsets { flags | TraceFlags::DESTROYED } else { flags };
            for t in traces {
                if !t.flags.intersects(flags & TraceFlags::OPS) {
                    continue;
                }
                if live.is_some_and(|v| !still_registered(v, t)) {
                    continue;
                }
                debug!(var = name1, ?flags, "variable trace");
                if let Err(msg) = t.callback.call(self, name1, name2, flags) {
                    if unsets {
                        warn!(var = name1, %msg, "error in unset trace ignored");
                    } else {
                        result = Some(msg);
                        break;
                    }
                }
            }
        }

        self.restore_error_state(saved);
        result
    }

    // ── Links ─────────────────────────────────────────────────────────────────

    /// Make `my_name` in the current scope an alias for `other1(other2)` as
    /// seen from variable frame `frame` (`None` = global).
    pub(crate) fn make_upvar(
        &mut self,
        frame: Option<usize>,
        other1: &str,
        other2: Option<&str>,
        other_flags: VarFlags,
        my_name: &str,
        my_flags: VarFlags,
    ) -> TclResult<()> {
        if split_array_name(my_name).is_some() {
            return Err(Exception::error(format!(
                "bad variable name \"{my_name}\": upvar won't create a scalar variable that looks like an array element"
            )));
        }

        let saved = self.var_frame;
        if !other_flags.contains(VarFlags::NAMESPACE_ONLY) {
            self.var_frame = frame;
        }
        let looked_up =
            self.lookup_var(other1, other2, other_flags | VarFlags::LEAVE_ERR_MSG, "access", true, true);
        self.var_frame = saved;
        let (other, array) = looked_up?;

        let local_frame = self
            .var_frame
            .filter(|&i| self.frames[i].is_proc)
            .map(|i| self.frames[i].vars.clone());
        let in_namespace = my_flags.intersects(VarFlags::GLOBAL_ONLY | VarFlags::NAMESPACE_ONLY)
            || local_frame.is_none()
            || my_name.contains("::");

        let (var, is_new) = if in_namespace {
            let q = self.get_namespace_for_qual_name(my_name, None, NsLookup::from(my_flags));
            let Some(ns) = q.ns.or(q.alt_ns) else {
                return Err(Exception::error(format!("bad variable name \"{my_name}\": unknown namespace")));
            };
            let owner = match (&array, other2) {
                (Some(a), Some(_)) => a.borrow().namespace(),
                _ => other.borrow().namespace(),
            };
            if owner.is_none() {
                return Err(Exception::error(format!(
                    "bad variable name \"{my_name}\": upvar won't create namespace variable that refers to procedure variable"
                )));
            }
            let tail = q.simple.unwrap_or("");
            let table = ns.borrow().vars.clone();
            let existing = table.borrow().get(tail).cloned();
            match existing {
                Some(v) => (v, false),
                None => (Var::create(&table, tail, Some(&ns), VarState::empty()), true),
            }
        } else {
            let Some(table) = local_frame else {
                return Err(Exception::error(format!("bad variable name \"{my_name}\"")));
            };
            let existing = table.borrow().get(my_name).cloned();
            match existing {
                Some(v) => (v, false),
                None => (Var::create(&table, my_name, None, VarState::empty()), true),
            }
        };

        if !is_new {
            if Rc::ptr_eq(&var, &other) {
                return Err(Exception::error("can't upvar from variable to itself"));
            }
            let current = match &var.borrow().value {
                VarValue::Link(target) => Some(target.clone()),
                _ => None,
            };
            if let Some(target) = current {
                if Rc::ptr_eq(&target, &other) {
                    return Ok(());
                }
                {
                    let mut t = target.borrow_mut();
                    t.ref_count = t.ref_count.saturating_sub(1);
                }
                if target.borrow().is_undefined() {
                    self.cleanup_var(&target, None);
                }
            } else if !var.borrow().is_undefined() {
                return Err(Exception::error(format!("variable \"{my_name}\" already exists")));
            } else if !var.borrow().traces.is_empty() {
                return Err(Exception::error(format!(
                    "variable \"{my_name}\" has traces: can't use for upvar"
                )));
            }
        }

        {
            let mut v = var.borrow_mut();
            v.value = VarValue::Link(other.clone());
            v.state.remove(VarState::UNDEFINED);
        }
        other.borrow_mut().ref_count += 1;
        Ok(())
    }

    /// Link `my_name` in the current scope to `other` at `level` (as
    /// accepted by `upvar`: `#N`, `N`, default `1`).
    pub fn upvar(&mut self, level: &str, other: &str, my_name: &str) -> TclResult<()> {
        let (_, frame) = self.get_frame(level)?;
        self.make_upvar(frame, other, None, VarFlags::empty(), my_name, VarFlags::empty())
    }

    /// Mark a variable of the current namespace as a namespace variable
    /// that persists until unset or until the namespace is deleted.
    pub(crate) fn define_namespace_var(&mut self, name: &str) -> TclResult<()> {
        let (var, _) = self.lookup_var(
            name,
            None,
            VarFlags::NAMESPACE_ONLY | VarFlags::LEAVE_ERR_MSG,
            "define",
            true,
            false,
        )?;
        let mut v = var.borrow_mut();
        if !v.state.contains(VarState::NAMESPACE_VAR) {
            v.state.insert(VarState::NAMESPACE_VAR);
            v.ref_count += 1;
        }
        Ok(())
    }

    /// Fully-qualified name of a namespace variable, or the plain name of a
    /// procedure local.
    pub(crate) fn variable_full_name(&self, var: &VarRef) -> String {
        let v = var.borrow();
        match v.namespace() {
            Some(ns) => {
                let ns = ns.borrow();
                if ns.full_name == "::" {
                    format!("::{}", v.name)
                } else {
                    format!("{}::{}", ns.full_name, v.name)
                }
            }
            None => v.name.clone(),
        }
    }

    // ── Table teardown ────────────────────────────────────────────────────────

    /// Delete every variable in a frame or namespace table: release links,
    /// fire unset traces (with full names) and clear arrays.
    pub(crate) fn delete_vars(&mut self, table: &Rc<VarTable>) {
        let entries = std::mem::take(&mut *table.borrow_mut());
        for (name, var) in entries {
            let link = match &var.borrow().value {
                VarValue::Link(target) => Some(target.clone()),
                _ => None,
            };
            if let Some(target) = link {
                {
                    let mut t = target.borrow_mut();
                    t.ref_count = t.ref_count.saturating_sub(1);
                }
                remove_if_unused(&target);
            }

            let traces = {
                let mut v = var.borrow_mut();
                v.state.remove(VarState::TRACE_ACTIVE);
                std::mem::take(&mut v.traces)
            };
            if !traces.is_empty() {
                let full = self.variable_full_name(&var);
                let _ = self.run_traces(None, None, &traces, &full, None, TraceFlags::UNSETS);
            }

            let value = std::mem::replace(&mut var.borrow_mut().value, VarValue::Scalar(None));
            if let VarValue::Array(elements) = value {
                self.delete_array(&name, &elements);
            }

            let mut v = var.borrow_mut();
            v.table = None;
            v.traces.clear();
            v.state.insert(VarState::UNDEFINED);
            if v.state.contains(VarState::NAMESPACE_VAR) {
                v.state.remove(VarState::NAMESPACE_VAR);
                v.ref_count = v.ref_count.saturating_sub(1);
            }
        }
        // Anything recreated by a trace during teardown goes too.
        let leftovers = std::mem::take(&mut *table.borrow_mut());
        for var in leftovers.values() {
            let mut v = var.borrow_mut();
            v.table = None;
            v.state.insert(VarState::UNDEFINED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interp;

    #[test]
    fn split_names() {
        assert_eq!(split_array_name("a(b)"), Some(("a", "b")));
        assert_eq!(split_array_name("a(b c)"), Some(("a", "b c")));
        assert_eq!(split_array_name("a()"), Some(("a", "")));
        assert_eq!(split_array_name("ab"), None);
        assert_eq!(split_array_name("a(b"), None);
    }

    #[test]
    fn set_get_unset() {
        let mut interp = Interp::new();
        interp.set_var("x", "5").unwrap();
        assert_eq!(interp.get_var("x").unwrap(), "5");
        interp.unset_var("x").unwrap();
        let e = interp.get_var("x").unwrap_err();
        assert_eq!(e.message(), "can't read \"x\": no such variable");
        let e = interp.unset_var("x").unwrap_err();
        assert_eq!(e.message(), "can't unset \"x\": no such variable");
    }

    #[test]
    fn arrays() {
        let mut interp = Interp::new();
        interp.set_var("a(1)", "one").unwrap();
        interp.set_var2("a", Some("2"), Value::from("two"), VarFlags::LEAVE_ERR_MSG).unwrap();
        assert_eq!(interp.get_var("a(2)").unwrap(), "two");
        let e = interp.get_var("a").unwrap_err();
        assert_eq!(e.message(), "can't read \"a\": variable is array");
        let e = interp.get_var("a(3)").unwrap_err();
        assert_eq!(e.message(), "can't read \"a(3)\": no such element in array");
        let e = interp.set_var("a", "x").unwrap_err();
        assert_eq!(e.message(), "can't set \"a\": variable is array");
        interp.set_var("s", "1").unwrap();
        let e = interp.set_var("s(1)", "x").unwrap_err();
        assert_eq!(e.message(), "can't set \"s(1)\": variable isn't array");
        assert_eq!(interp.array_names("a", VarFlags::empty()).unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn reading_element_of_missing_array_creates_nothing() {
        let mut interp = Interp::new();
        let e = interp.get_var("nosuch(x)").unwrap_err();
        assert_eq!(e.message(), "can't read \"nosuch(x)\": no such variable");
        assert!(!interp.var_exists("nosuch", None, VarFlags::empty()));
        let e = interp.get_var2("nosuch", Some("x"), VarFlags::LEAVE_ERR_MSG).unwrap_err();
        assert_eq!(e.message(), "can't read \"nosuch(x)\": no such variable");
        // Still free to become a scalar.
        interp.set_var("nosuch", "1").unwrap();

        interp.eval("proc f {} {set y $local(x)}").unwrap();
        let e = interp.eval("f").unwrap_err();
        assert_eq!(e.message(), "can't read \"local(x)\": no such variable");
    }

    #[test]
    fn append_and_lappend_flags() {
        let mut interp = Interp::new();
        let flags = VarFlags::LEAVE_ERR_MSG | VarFlags::APPEND_VALUE;
        interp.set_var2("s", None, Value::from("ab"), flags).unwrap();
        interp.set_var2("s", None, Value::from("cd"), flags).unwrap();
        assert_eq!(interp.get_var("s").unwrap(), "abcd");
        let lflags = flags | VarFlags::LIST_ELEMENT;
        interp.set_var2("l", None, Value::from("a b"), lflags).unwrap();
        interp.set_var2("l", None, Value::from("c"), lflags).unwrap();
        assert_eq!(interp.get_var("l").unwrap(), "{a b} c");
    }

    #[test]
    fn incr_reports_context() {
        let mut interp = Interp::new();
        interp.set_var("n", "41").unwrap();
        assert_eq!(interp.incr_var2("n", None, 1, VarFlags::LEAVE_ERR_MSG).unwrap(), "42");
        assert!(interp.incr_var2("missing", None, 1, VarFlags::LEAVE_ERR_MSG).is_err());
        assert_eq!(interp.incr_var("n", -2).unwrap(), "40");
        let info = interp.get_var2("errorInfo", None, VarFlags::GLOBAL_ONLY).unwrap();
        assert!(info.as_str().contains("(reading value of variable to increment)"));
    }

    #[test]
    fn write_trace_can_veto() {
        let mut interp = Interp::new();
        interp
            .trace_var("x", TraceFlags::WRITES, |_, _, _, _| Err("read-only".to_owned()))
            .unwrap();
        let e = interp.set_var("x", "1").unwrap_err();
        assert_eq!(e.message(), "can't set \"x\": read-only");
    }

    #[test]
    fn read_trace_sees_names() {
        let mut interp = Interp::new();
        interp.set_var("a(k)", "v").unwrap();
        interp
            .trace_var("a", TraceFlags::READS, |interp, n1, n2, _| {
                interp.set_var("seen", format!("{n1} {}", n2.unwrap_or(""))).map(|_| ()).map_err(|e| e.to_string())
            })
            .unwrap();
        interp.get_var("a(k)").unwrap();
        assert_eq!(interp.get_var("seen").unwrap(), "a k");
    }

    #[test]
    fn unset_traces_fire_and_errors_are_ignored() {
        let mut interp = Interp::new();
        interp.set_var("x", "1").unwrap();
        interp
            .trace_var("x", TraceFlags::UNSETS, |interp, _, _, flags| {
                assert!(flags.contains(TraceFlags::DESTROYED));
                interp.set_var("fired", "yes").map_err(|e| e.to_string())?;
                Err("ignored".to_owned())
            })
            .unwrap();
        interp.unset_var("x").unwrap();
        assert_eq!(interp.get_var("fired").unwrap(), "yes");
        assert!(!interp.var_exists("x", None, VarFlags::empty()));
    }

    #[test]
    fn untrace_removes_and_cleans_up() {
        let mut interp = Interp::new();
        let id = interp.trace_var("t", TraceFlags::WRITES, |_, _, _, _| Err("no".to_owned())).unwrap();
        assert_eq!(interp.var_traces("t", None).len(), 1);
        interp.untrace_var2("t", None, id);
        assert!(interp.var_traces("t", None).is_empty());
        interp.set_var("t", "ok").unwrap();
    }

    #[test]
    fn upvar_to_self_is_rejected() {
        let mut interp = Interp::new();
        interp.set_var("x", "1").unwrap();
        let e = interp.upvar("#0", "x", "x").unwrap_err();
        assert_eq!(e.message(), "can't upvar from variable to itself");
        let e = interp.upvar("#0", "x", "y(1)").unwrap_err();
        assert!(e.message().contains("looks like an array element"));
    }
}
