//! Attachments: the values a context captures on failure and restores on resume.
//!
//! A [`Binding<T>`] is a shared, single-threaded handle to one caller value.
//! The caller keeps a handle for the body and passes a clone to the context,
//! so the name given at attach time is only a label for identity and snapshot
//! keys, never a lookup into the caller's scope.

use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::error::{AttachmentError, AttachmentValueError, BindingError};

/// Longest attachment name accepted.
pub const MAX_NAME_LEN: usize = 128;

/// Whether `name` is a valid attachment name (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_NAME_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Shared handle to a value that a context may snapshot and restore.
///
/// Cloning a `Binding` clones the handle, not the value.
pub struct Binding<T> {
    cell: Rc<RefCell<T>>,
}

impl<T> Binding<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Immutably borrow the value. Panics if it is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    /// Mutably borrow the value. Panics if it is already borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    /// Replace the value, returning the old one.
    pub fn set(&self, value: T) -> T {
        self.cell.replace(value)
    }

    /// Run `f` with mutable access to the value.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.borrow_mut())
    }

    /// Clone the current value out.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.cell.borrow().clone()
    }

    /// Whether both handles point at the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: Default> Default for Binding<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_borrow() {
            Ok(value) => f.debug_tuple("Binding").field(&*value).finish(),
            Err(_) => f.write_str("Binding(<borrowed>)"),
        }
    }
}

/// Deferred write of an already-decoded value into its binding.
type StagedWrite = Box<dyn FnOnce()>;

/// Type-erased view of a `Binding<T>` used by the registry.
trait ErasedBinding {
    fn type_name(&self) -> &'static str;

    fn capture(&self) -> Result<Value, BindingError>;

    /// Decode `value` into the binding's type without touching the binding.
    fn stage(&self, value: Value) -> Result<StagedWrite, BindingError>;
}

impl<T> ErasedBinding for Binding<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn capture(&self) -> Result<Value, BindingError> {
        let value = self.cell.try_borrow().map_err(|_| BindingError::Busy)?;
        serde_json::to_value(&*value).map_err(|source| BindingError::Capture {
            type_name: type_name::<T>(),
            source,
        })
    }

    fn stage(&self, value: Value) -> Result<StagedWrite, BindingError> {
        let decoded: T = serde_json::from_value(value).map_err(|source| BindingError::Convert {
            type_name: type_name::<T>(),
            source,
        })?;
        if self.cell.try_borrow_mut().is_err() {
            return Err(BindingError::Busy);
        }
        let cell = Rc::clone(&self.cell);
        Ok(Box::new(move || {
            cell.replace(decoded);
        }))
    }
}

// ---------------------------------------------------------------------------
// AttachmentRegistry
// ---------------------------------------------------------------------------

struct Attachment {
    name: String,
    binding: Box<dyn ErasedBinding>,
    initial_value: Value,
}

/// Ordered set of attachments owned by one context.
///
/// Declaration order is part of the context identity. The registry does no
/// I/O; the context decides when to read and write.
#[derive(Default)]
pub struct AttachmentRegistry {
    attachments: Vec<Attachment>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `binding` under `name`, capturing its current value as the
    /// attachment's initial value.
    pub fn register<T>(
        &mut self,
        name: impl Into<String>,
        binding: &Binding<T>,
    ) -> Result<(), AttachmentError>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(AttachmentError::InvalidName { name });
        }
        if self.contains(&name) {
            return Err(AttachmentError::Duplicate { name });
        }
        let initial_value = match binding.capture() {
            Ok(value) => value,
            Err(source) => return Err(AttachmentError::Unserializable { name, source }),
        };
        self.attachments.push(Attachment {
            name,
            binding: Box::new(binding.clone()),
            initial_value,
        });
        Ok(())
    }

    /// Remove the attachment called `name`. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.name != name);
        self.attachments.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attachments.iter().any(|a| a.name == name)
    }

    /// Attachment names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.attachments.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    /// Value captured when `name` was attached.
    pub fn initial_value(&self, name: &str) -> Option<&Value> {
        self.attachments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.initial_value)
    }

    /// Rust type behind `name`, for diagnostics.
    pub fn type_name(&self, name: &str) -> Option<&'static str> {
        self.attachments
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.binding.type_name())
    }

    /// Capture the current value of every attachment.
    pub fn read_all(&self) -> Result<BTreeMap<String, Value>, AttachmentValueError> {
        self.attachments
            .iter()
            .map(|a| {
                a.binding
                    .capture()
                    .map(|value| (a.name.clone(), value))
                    .map_err(|source| AttachmentValueError {
                        name: a.name.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Write every value in `values` whose name is attached, in declaration
    /// order. Attachments absent from `values` keep their current value.
    ///
    /// All present values are decoded before any binding is written, so a
    /// value of the wrong shape leaves every binding unchanged. Returns the
    /// names that were written.
    pub fn write_all(
        &self,
        mut values: BTreeMap<String, Value>,
    ) -> Result<Vec<String>, AttachmentValueError> {
        let mut staged = Vec::new();
        for attachment in &self.attachments {
            let Some(value) = values.remove(&attachment.name) else {
                continue;
            };
            let write = attachment
                .binding
                .stage(value)
                .map_err(|source| AttachmentValueError {
                    name: attachment.name.clone(),
                    source,
                })?;
            staged.push((attachment.name.clone(), write));
        }

        let mut written = Vec::with_capacity(staged.len());
        for (name, write) in staged {
            write();
            written.push(name);
        }
        Ok(written)
    }
}

impl fmt::Debug for AttachmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.attachments.iter().map(|a| (&a.name, a.binding.type_name())))
            .finish()
    }
}
