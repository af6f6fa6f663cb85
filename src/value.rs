//! Runtime object model.
//!
//! Every piece of data the interpreter touches is an [`Object`]: a shared
//! handle to a slot holding a payload and a small metadata header. A slot is
//! in one of four [`Mode`]s:
//!
//! - `Owning` slots own their payload outright.
//! - `Reference` slots alias another object. The target keeps a back-link to
//!   each referencing slot, and when the target is destroyed every back-linked
//!   reference is marked dead and loses its destination.
//! - `ExternalOwned` slots carry a value whose lifetime belongs to the host;
//!   the host's disposer runs exactly once when the last handle sharing the
//!   value goes away.
//! - `Delegate` slots are non-owning aliases of another slot's payload
//!   storage, with no back-link bookkeeping.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ObjectError;
use crate::scope::Container;

pub const TYPE_NULL: &str = "null";
pub const TYPE_BOOLEAN: &str = "boolean";
pub const TYPE_INTEGER: &str = "integer";
pub const TYPE_DOUBLE: &str = "double";
pub const TYPE_STRING: &str = "string";
pub const TYPE_ARRAY: &str = "array";
pub const TYPE_STRUCT: &str = "struct";
pub const TYPE_OPAQUE: &str = "opaque";

/// The language's built-in value kinds.
#[derive(Clone)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Object>),
    /// Member container; shared between copies.
    Struct(Container),
    /// Host value with no language-level structure.
    Opaque(Rc<dyn Any>),
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Null => TYPE_NULL,
            Payload::Bool(_) => TYPE_BOOLEAN,
            Payload::Int(_) => TYPE_INTEGER,
            Payload::Double(_) => TYPE_DOUBLE,
            Payload::String(_) => TYPE_STRING,
            Payload::Array(_) => TYPE_ARRAY,
            Payload::Struct(_) => TYPE_STRUCT,
            Payload::Opaque(_) => TYPE_OPAQUE,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Payload::Null => false,
            Payload::Bool(b) => *b,
            Payload::Int(n) => *n != 0,
            Payload::Double(n) => *n != 0.0,
            Payload::String(s) => !s.is_empty(),
            Payload::Array(items) => !items.is_empty(),
            Payload::Struct(_) | Payload::Opaque(_) => true,
        }
    }

    /// Copy with value semantics: array elements are duplicated, struct
    /// members and opaque values stay shared.
    pub fn deep_copy(&self) -> Payload {
        match self {
            Payload::Array(items) => Payload::Array(items.iter().map(Object::duplicate).collect()),
            other => other.clone(),
        }
    }

    /// Every struct member container reachable from this payload, through
    /// struct members and array elements.
    pub fn reachable_containers(&self) -> Vec<Container> {
        let mut found = Vec::new();
        collect_containers(self, &mut found);
        found
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Bool(l), Payload::Bool(r)) => l == r,
            (Payload::Int(l), Payload::Int(r)) => l == r,
            (Payload::Double(l), Payload::Double(r)) => l == r,
            (Payload::String(l), Payload::String(r)) => l == r,
            (Payload::Array(l), Payload::Array(r)) => {
                l.len() == r.len()
                    && l.iter().zip(r).all(|(a, b)| match (a.payload(), b.payload()) {
                        (Ok(a), Ok(b)) => a == b,
                        _ => false,
                    })
            }
            (Payload::Struct(l), Payload::Struct(r)) => l.ptr_eq(r),
            (Payload::Opaque(l), Payload::Opaque(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => write!(f, "Null"),
            Payload::Bool(b) => write!(f, "Bool({})", b),
            Payload::Int(n) => write!(f, "Int({})", n),
            Payload::Double(n) => write!(f, "Double({})", n),
            Payload::String(s) => write!(f, "String({:?})", s),
            Payload::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Payload::Struct(_) => write!(f, "Struct(..)"),
            Payload::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_payload(f, self, &mut Vec::new())
    }
}

/// `open` holds the structs being printed further out; meeting one of them
/// again prints `{...}` instead of recursing.
fn write_payload(f: &mut fmt::Formatter, payload: &Payload, open: &mut Vec<Container>) -> fmt::Result {
    match payload {
        Payload::Null => write!(f, "null"),
        Payload::Bool(b) => write!(f, "{}", b),
        Payload::Int(n) => write!(f, "{}", n),
        Payload::Double(n) => {
            // Always show at least one decimal place for doubles
            if n.fract() == 0.0 {
                write!(f, "{:.1}", n)
            } else {
                write!(f, "{}", n)
            }
        }
        Payload::String(s) => write!(f, "{}", s),
        Payload::Array(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_object(f, item, open)?;
            }
            write!(f, "]")
        }
        Payload::Struct(container) => {
            if open.iter().any(|outer| outer.ptr_eq(container)) {
                return write!(f, "{{...}}");
            }
            open.push(container.clone());
            write!(f, "{{")?;
            for (i, name) in container.names().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match container.find(name, false) {
                    Some(member) => {
                        write!(f, "{}: ", name)?;
                        write_object(f, &member, open)?;
                    }
                    None => write!(f, "{}", name)?,
                }
            }
            open.pop();
            write!(f, "}}")
        }
        Payload::Opaque(_) => write!(f, "<opaque>"),
    }
}

fn write_object(f: &mut fmt::Formatter, object: &Object, open: &mut Vec<Container>) -> fmt::Result {
    match object.with_payload(|payload| write_payload(f, payload, open)) {
        Ok(written) => written,
        Err(ObjectError::Dead) => write!(f, "<dead reference>"),
        Err(_) => write!(f, "<{}>", object.type_id()),
    }
}

fn collect_containers(payload: &Payload, found: &mut Vec<Container>) {
    match payload {
        Payload::Struct(container) => {
            if found.iter().any(|seen| seen.ptr_eq(container)) {
                return;
            }
            found.push(container.clone());
            for name in container.names() {
                if let Some(member) = container.find(&name, false) {
                    let _ = member.with_payload(|payload| collect_containers(payload, found));
                }
            }
        }
        Payload::Array(items) => {
            for item in items {
                let _ = item.with_payload(|payload| collect_containers(payload, found));
            }
        }
        _ => {}
    }
}

/// Ownership mode of an object slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Owning,
    Reference,
    ExternalOwned,
    Delegate,
}

/// Whether a value leaving an object was moved out or copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Move,
    Copy,
}

pub type ObjectId = u64;

/// Host callback releasing an externally owned value.
pub type Disposer = Box<dyn FnOnce(Box<dyn Any>, &str)>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ObjectId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

type Slot = Rc<RefCell<ObjectData>>;
type WeakSlot = Weak<RefCell<ObjectData>>;

struct ExternalCell {
    value: Option<Box<dyn Any>>,
    disposer: Option<Disposer>,
    type_id: String,
}

impl Drop for ExternalCell {
    fn drop(&mut self) {
        if let (Some(value), Some(disposer)) = (self.value.take(), self.disposer.take()) {
            tracing::trace!(type_id = %self.type_id, "disposing external value");
            disposer(value, &self.type_id);
        }
    }
}

enum Storage {
    Owning(Rc<RefCell<Payload>>),
    Reference(Option<WeakSlot>),
    External(Rc<ExternalCell>),
    Delegate(Weak<RefCell<Payload>>),
}

struct ObjectData {
    id: ObjectId,
    storage: Storage,
    type_id: String,
    delivering: bool,
    alive: bool,
    read_only: bool,
    /// Reference slots currently aliasing this one.
    links: BTreeMap<ObjectId, WeakSlot>,
}

impl ObjectData {
    fn new(storage: Storage, type_id: String) -> Self {
        Self {
            id: next_id(),
            storage,
            type_id,
            delivering: false,
            alive: true,
            read_only: false,
            links: BTreeMap::new(),
        }
    }

    fn mode(&self) -> Mode {
        match self.storage {
            Storage::Owning(_) => Mode::Owning,
            Storage::Reference(_) => Mode::Reference,
            Storage::External(_) => Mode::ExternalOwned,
            Storage::Delegate(_) => Mode::Delegate,
        }
    }
}

impl Drop for ObjectData {
    fn drop(&mut self) {
        match &self.storage {
            Storage::Reference(Some(dest)) => {
                if let Some(target) = dest.upgrade() {
                    if let Ok(mut target) = target.try_borrow_mut() {
                        target.links.remove(&self.id);
                    }
                }
            }
            Storage::Reference(None) => {}
            _ => {
                for (_, link) in std::mem::take(&mut self.links) {
                    if let Some(linked) = link.upgrade() {
                        if let Ok(mut linked) = linked.try_borrow_mut() {
                            linked.alive = false;
                            linked.storage = Storage::Reference(None);
                        }
                    }
                }
            }
        }
    }
}

/// Shared handle to an object slot.
///
/// Cloning the handle shares the slot; [`Object::duplicate`] copies it.
#[derive(Clone)]
pub struct Object(Slot);

impl Object {
    fn from_data(data: ObjectData) -> Self {
        Object(Rc::new(RefCell::new(data)))
    }

    /// Owning object whose type id is inferred from the payload.
    pub fn new(payload: Payload) -> Self {
        let type_id = payload.type_name().to_string();
        Self::owning(payload, type_id)
    }

    pub fn owning(payload: Payload, type_id: impl Into<String>) -> Self {
        Self::from_data(ObjectData::new(
            Storage::Owning(Rc::new(RefCell::new(payload))),
            type_id.into(),
        ))
    }

    pub fn null() -> Self {
        Self::new(Payload::Null)
    }

    pub fn int(n: i64) -> Self {
        Self::new(Payload::Int(n))
    }

    pub fn double(n: f64) -> Self {
        Self::new(Payload::Double(n))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(Payload::Bool(b))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(Payload::String(s.into()))
    }

    /// Alias of `target`. A dead target yields a dead reference.
    pub fn reference(target: &Object) -> Self {
        let type_id = target.type_id();
        if !target.is_alive() {
            let mut data = ObjectData::new(Storage::Reference(None), type_id);
            data.alive = false;
            return Self::from_data(data);
        }

        let data = ObjectData::new(Storage::Reference(Some(Rc::downgrade(&target.0))), type_id);
        let id = data.id;
        let object = Self::from_data(data);
        target
            .0
            .borrow_mut()
            .links
            .insert(id, Rc::downgrade(&object.0));
        object
    }

    /// Object wrapping a host value released by `disposer`.
    pub fn external<T: Any>(
        value: T,
        type_id: impl Into<String>,
        disposer: impl FnOnce(Box<dyn Any>, &str) + 'static,
    ) -> Self {
        let type_id = type_id.into();
        let cell = ExternalCell {
            value: Some(Box::new(value)),
            disposer: Some(Box::new(disposer)),
            type_id: type_id.clone(),
        };
        Self::from_data(ObjectData::new(Storage::External(Rc::new(cell)), type_id))
    }

    /// Non-owning alias of `target`'s payload storage.
    pub fn delegate(target: &Object) -> Result<Self, ObjectError> {
        let target = target.deref()?;
        let data = target.0.borrow();
        let storage = match &data.storage {
            Storage::Owning(payload) => Storage::Delegate(Rc::downgrade(payload)),
            Storage::Delegate(payload) => Storage::Delegate(payload.clone()),
            Storage::External(_) | Storage::Reference(_) => {
                return Err(ObjectError::TypeMismatch {
                    expected: "owned payload".to_string(),
                    found: data.type_id.clone(),
                })
            }
        };
        Ok(Self::from_data(ObjectData::new(storage, data.type_id.clone())))
    }

    pub fn id(&self) -> ObjectId {
        self.0.borrow().id
    }

    pub fn mode(&self) -> Mode {
        self.0.borrow().mode()
    }

    pub fn type_id(&self) -> String {
        self.0.borrow().type_id.clone()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// False once a reference has lost its target.
    pub fn is_alive(&self) -> bool {
        let data = self.0.borrow();
        if !data.alive {
            return false;
        }
        match &data.storage {
            Storage::Reference(Some(dest)) => dest.strong_count() > 0,
            Storage::Reference(None) => false,
            Storage::Delegate(payload) => payload.strong_count() > 0,
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        let data = self.0.borrow();
        let null = match &data.storage {
            Storage::Owning(payload) => matches!(*payload.borrow(), Payload::Null),
            Storage::Reference(None) => true,
            _ => false,
        };
        null
    }

    pub fn is_read_only(&self) -> bool {
        self.0.borrow().read_only
    }

    pub fn set_read_only(&self, read_only: bool) -> &Self {
        self.0.borrow_mut().read_only = read_only;
        self
    }

    /// Direct destination of a reference, if it is still there.
    pub fn destination(&self) -> Option<Object> {
        match &self.0.borrow().storage {
            Storage::Reference(Some(dest)) => dest.upgrade().map(Object),
            _ => None,
        }
    }

    /// Number of live references aliasing this object.
    pub fn link_count(&self) -> usize {
        self.0
            .borrow()
            .links
            .values()
            .filter(|link| link.strong_count() > 0)
            .count()
    }

    /// Follows references to the first non-reference object.
    pub fn deref(&self) -> Result<Object, ObjectError> {
        let mut current = self.clone();
        loop {
            let next = {
                let data = current.0.borrow();
                match &data.storage {
                    Storage::Reference(dest) => {
                        if !data.alive {
                            return Err(ObjectError::Dead);
                        }
                        dest.as_ref()
                            .and_then(Weak::upgrade)
                            .ok_or(ObjectError::Dead)?
                    }
                    _ => break,
                }
            };
            current = Object(next);
        }
        Ok(current)
    }

    fn payload_cell(&self) -> Result<Rc<RefCell<Payload>>, ObjectError> {
        let target = self.deref()?;
        let data = target.0.borrow();
        match &data.storage {
            Storage::Owning(payload) => Ok(payload.clone()),
            Storage::Delegate(payload) => payload.upgrade().ok_or(ObjectError::Dead),
            Storage::External(_) => Err(ObjectError::TypeMismatch {
                expected: "language value".to_string(),
                found: data.type_id.clone(),
            }),
            Storage::Reference(_) => Err(ObjectError::Dead),
        }
    }

    pub fn with_payload<R>(&self, f: impl FnOnce(&Payload) -> R) -> Result<R, ObjectError> {
        let cell = self.payload_cell()?;
        let payload = cell.borrow();
        Ok(f(&payload))
    }

    pub fn payload(&self) -> Result<Payload, ObjectError> {
        self.with_payload(Payload::clone)
    }

    /// Typed read of the payload, checked against the stored kind.
    pub fn cast<T: FromPayload>(&self) -> Result<T, ObjectError> {
        self.with_payload(|payload| {
            T::from_payload(payload).ok_or_else(|| ObjectError::TypeMismatch {
                expected: T::TYPE_ID.to_string(),
                found: payload.type_name().to_string(),
            })
        })?
    }

    /// Typed access to an externally owned value.
    pub fn with_external<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ObjectError> {
        let target = self.deref()?;
        let data = target.0.borrow();
        let mismatch = || ObjectError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: data.type_id.clone(),
        };
        match &data.storage {
            Storage::External(cell) => cell
                .value
                .as_ref()
                .and_then(|value| value.downcast_ref::<T>())
                .map(f)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    /// Overwrites the value seen through this handle.
    pub fn assign(&self, payload: Payload) -> Result<(), ObjectError> {
        let target = self.deref()?;
        if target.is_read_only() {
            return Err(ObjectError::ReadOnly);
        }

        let mut data = target.0.borrow_mut();
        let type_id = payload.type_name().to_string();
        let cell = match &data.storage {
            Storage::Owning(cell) => Some(cell.clone()),
            Storage::Delegate(weak) => Some(weak.upgrade().ok_or(ObjectError::Dead)?),
            Storage::External(_) => None,
            Storage::Reference(_) => return Err(ObjectError::Dead),
        };
        match cell {
            Some(cell) => *cell.borrow_mut() = payload,
            // Overwriting a host value releases it and takes ownership.
            None => data.storage = Storage::Owning(Rc::new(RefCell::new(payload))),
        }
        data.type_id = type_id;
        Ok(())
    }

    /// Assigns `value` to the slot seen through this handle. Host values are
    /// shared rather than copied; anything else is delivered.
    pub fn assign_object(&self, value: &Object) -> Result<(), ObjectError> {
        let source = value.deref()?;
        let external = match &source.0.borrow().storage {
            Storage::External(cell) => Some(cell.clone()),
            _ => None,
        };
        let Some(cell) = external else {
            let (payload, _) = value.deliver()?;
            return self.assign(payload);
        };

        let target = self.deref()?;
        if target.is_read_only() {
            return Err(ObjectError::ReadOnly);
        }
        let type_id = source.type_id();
        let mut data = target.0.borrow_mut();
        data.storage = Storage::External(cell);
        data.type_id = type_id;
        Ok(())
    }

    pub fn set_delivering(&self) -> &Self {
        if let Ok(target) = self.deref() {
            target.0.borrow_mut().delivering = true;
        }
        self
    }

    /// Reads and clears the delivering flag.
    pub fn take_delivering(&self) -> bool {
        let Ok(target) = self.deref() else {
            return false;
        };
        let mut data = target.0.borrow_mut();
        std::mem::replace(&mut data.delivering, false)
    }

    pub fn peek_delivering(&self) -> bool {
        let Ok(target) = self.deref() else {
            return false;
        };
        let delivering = target.0.borrow().delivering;
        delivering
    }

    /// Hands the value to a new owner, moving it out when the delivering flag
    /// was set and copying it otherwise. The flag is consumed.
    pub fn deliver(&self) -> Result<(Payload, Delivery), ObjectError> {
        let cell = self.payload_cell()?;
        if self.take_delivering() {
            let payload = std::mem::replace(&mut *cell.borrow_mut(), Payload::Null);
            Ok((payload, Delivery::Move))
        } else {
            let payload = cell.borrow().deep_copy();
            Ok((payload, Delivery::Copy))
        }
    }

    /// Copies the slot. References stay references to the same target and are
    /// linked into it; owned payloads are copied.
    pub fn duplicate(&self) -> Object {
        let data = self.0.borrow();
        let storage = match &data.storage {
            Storage::Owning(payload) => {
                Storage::Owning(Rc::new(RefCell::new(payload.borrow().deep_copy())))
            }
            Storage::Reference(dest) => Storage::Reference(dest.clone()),
            Storage::External(cell) => Storage::External(cell.clone()),
            Storage::Delegate(payload) => Storage::Delegate(payload.clone()),
        };
        let mut copy = ObjectData::new(storage, data.type_id.clone());
        copy.delivering = data.delivering;
        copy.alive = data.alive;
        copy.read_only = data.read_only;
        let copy_id = copy.id;
        let dest = match &copy.storage {
            Storage::Reference(Some(dest)) if copy.alive => dest.upgrade(),
            _ => None,
        };
        drop(data);

        let object = Self::from_data(copy);
        if let Some(dest) = dest {
            dest.borrow_mut()
                .links
                .insert(copy_id, Rc::downgrade(&object.0));
        }
        object
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0.borrow();
        f.debug_struct("Object")
            .field("id", &data.id)
            .field("mode", &data.mode())
            .field("type_id", &data.type_id)
            .field("alive", &data.alive)
            .finish()
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_object(f, self, &mut Vec::new())
    }
}

/// Types that can be read out of a [`Payload`] by [`Object::cast`].
pub trait FromPayload: Sized {
    const TYPE_ID: &'static str;

    fn from_payload(payload: &Payload) -> Option<Self>;
}

impl FromPayload for i64 {
    const TYPE_ID: &'static str = TYPE_INTEGER;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromPayload for f64 {
    const TYPE_ID: &'static str = TYPE_DOUBLE;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Double(n) => Some(*n),
            Payload::Int(n) => Some(*n as f64),
            _ => None,
        }
    }
}

impl FromPayload for bool {
    const TYPE_ID: &'static str = TYPE_BOOLEAN;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromPayload for String {
    const TYPE_ID: &'static str = TYPE_STRING;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromPayload for Vec<Object> {
    const TYPE_ID: &'static str = TYPE_ARRAY;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Array(items) => Some(items.clone()),
            _ => None,
        }
    }
}

impl FromPayload for Container {
    const TYPE_ID: &'static str = TYPE_STRUCT;

    fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::Struct(container) => Some(container.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn destroying_the_target_kills_its_references() {
        let owner = Object::int(42);
        let alias = Object::reference(&owner);
        assert!(alias.is_alive());
        assert_eq!(owner.link_count(), 1);
        assert_eq!(alias.cast::<i64>(), Ok(42));

        drop(owner);

        assert!(!alias.is_alive());
        assert!(alias.destination().is_none());
        assert_eq!(alias.deref().err(), Some(ObjectError::Dead));
        assert_eq!(alias.to_string(), "<dead reference>");
    }

    #[test]
    fn dropping_a_reference_unlinks_it() {
        let owner = Object::string("hi");
        let alias = Object::reference(&owner);
        assert_eq!(owner.link_count(), 1);
        drop(alias);
        assert_eq!(owner.link_count(), 0);
    }

    #[test]
    fn reference_to_dead_target_is_born_dead() {
        let owner = Object::int(1);
        let alias = Object::reference(&owner);
        drop(owner);
        let second = Object::reference(&alias);
        assert!(!second.is_alive());
        assert_eq!(second.mode(), Mode::Reference);
    }

    #[test]
    fn references_follow_transitively() {
        let owner = Object::int(7);
        let first = Object::reference(&owner);
        let second = Object::reference(&first);
        assert!(second.deref().map(|o| o.ptr_eq(&owner)).unwrap_or(false));

        second.assign(Payload::Int(8)).expect("assign through alias");
        assert_eq!(owner.cast::<i64>(), Ok(8));
    }

    #[test]
    fn duplicating_a_reference_links_the_copy() {
        let owner = Object::int(3);
        let alias = Object::reference(&owner);
        let copy = alias.duplicate();
        assert_eq!(copy.mode(), Mode::Reference);
        assert_eq!(owner.link_count(), 2);

        drop(owner);
        assert!(!alias.is_alive());
        assert!(!copy.is_alive());
    }

    #[test]
    fn duplicating_an_owner_copies_the_payload() {
        let owner = Object::int(3);
        let copy = owner.duplicate();
        copy.assign(Payload::Int(4)).expect("assign copy");
        assert_eq!(owner.cast::<i64>(), Ok(3));
        assert_eq!(copy.cast::<i64>(), Ok(4));
    }

    #[test]
    fn cast_checks_the_payload_kind() {
        let object = Object::string("seven");
        assert_eq!(
            object.cast::<i64>(),
            Err(ObjectError::TypeMismatch {
                expected: "integer".to_string(),
                found: "string".to_string(),
            })
        );
        assert_eq!(Object::int(2).cast::<f64>(), Ok(2.0));
    }

    #[test]
    fn external_disposer_runs_once_for_the_whole_group() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let object = Object::external(5u32, "counter", move |value, type_id| {
            assert_eq!(type_id, "counter");
            assert_eq!(value.downcast_ref::<u32>(), Some(&5));
            seen.set(seen.get() + 1);
        });
        let copy = object.duplicate();
        assert_eq!(object.mode(), Mode::ExternalOwned);
        assert_eq!(copy.with_external(|n: &u32| *n + 1), Ok(6));

        drop(object);
        assert_eq!(calls.get(), 0);
        drop(copy);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delegate_sees_writes_without_owning() {
        let owner = Object::int(1);
        let delegate = Object::delegate(&owner).expect("delegate");
        assert_eq!(delegate.mode(), Mode::Delegate);

        owner.assign(Payload::Int(2)).expect("assign owner");
        assert_eq!(delegate.cast::<i64>(), Ok(2));

        delegate.assign(Payload::Int(3)).expect("assign delegate");
        assert_eq!(owner.cast::<i64>(), Ok(3));

        drop(owner);
        assert!(!delegate.is_alive());
        assert_eq!(delegate.cast::<i64>(), Err(ObjectError::Dead));
    }

    #[test]
    fn delivering_flag_is_one_shot() {
        let object = Object::int(9);
        object.set_delivering();
        assert!(object.peek_delivering());
        assert!(object.take_delivering());
        assert!(!object.take_delivering());
    }

    #[test]
    fn deliver_moves_or_copies_by_flag() {
        let temp = Object::string("moved");
        temp.set_delivering();
        let (payload, delivery) = temp.deliver().expect("deliver");
        assert_eq!(delivery, Delivery::Move);
        assert_eq!(payload, Payload::String("moved".to_string()));
        assert!(temp.is_null());

        let kept = Object::string("kept");
        let (payload, delivery) = kept.deliver().expect("deliver");
        assert_eq!(delivery, Delivery::Copy);
        assert_eq!(payload, Payload::String("kept".to_string()));
        assert_eq!(kept.cast::<String>(), Ok("kept".to_string()));
    }

    #[test]
    fn read_only_objects_reject_writes() {
        let object = Object::int(1);
        object.set_read_only(true);
        let alias = Object::reference(&object);
        assert_eq!(alias.assign(Payload::Int(2)), Err(ObjectError::ReadOnly));
    }

    #[test]
    fn null_object_has_no_payload() {
        let object = Object::default();
        assert!(object.is_null());
        assert_eq!(object.type_id(), TYPE_NULL);
        assert_eq!(object.to_string(), "null");
    }

    #[test]
    fn self_containing_struct_prints_without_recursing() {
        let members = Container::new();
        let point = Object::new(Payload::Struct(members.clone()));
        members.replace("me", point.clone());
        assert_eq!(point.to_string(), "{me: {...}}");
        members.clear();
    }

    #[test]
    fn reachable_containers_follow_members_and_elements() {
        let inner = Container::new();
        let outer = Container::new();
        outer.replace("inner", Object::new(Payload::Struct(inner.clone())));
        let payload = Payload::Array(vec![
            Object::new(Payload::Struct(outer.clone())),
            Object::int(1),
        ]);

        let found = payload.reachable_containers();
        assert_eq!(found.len(), 2);
        assert!(found[0].ptr_eq(&outer));
        assert!(found[1].ptr_eq(&inner));
    }

    #[test]
    fn assigning_a_host_value_shares_it() {
        let released = Rc::new(Cell::new(0));
        let counter = released.clone();
        let handle = Object::external(7u8, "byte", move |_, _| counter.set(counter.get() + 1));

        let slot = Object::int(1);
        slot.assign_object(&handle).expect("assign host value");
        assert_eq!(slot.mode(), Mode::ExternalOwned);
        assert_eq!(slot.type_id(), "byte");
        assert_eq!(slot.with_external(|byte: &u8| *byte), Ok(7));

        drop(handle);
        assert_eq!(released.get(), 0);
        slot.assign_object(&Object::int(2)).expect("assign int");
        assert_eq!(released.get(), 1);
        assert_eq!(slot.payload(), Ok(Payload::Int(2)));
    }
}
