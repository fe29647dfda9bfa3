//! Global variables.

use wasmtime::{GlobalType, Mutability};

use crate::Store;
use crate::convert;
use wasmbed_common::{RuntimeError, Value, ValueType};

/// Type and mutability of a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDescriptor {
    /// Whether the global may be written after creation.
    pub mutable: bool,
    /// Type of the stored value.
    pub value_type: ValueType,
}

/// A global variable living in a [`Store`].
#[derive(Clone)]
pub struct Global {
    store: Store,
    inner: wasmtime::Global,
}

impl Global {
    /// Create a standalone global holding `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the global.
    pub fn new(store: &Store, value: Value, mutable: bool) -> Result<Self, RuntimeError> {
        let mutability = if mutable {
            Mutability::Var
        } else {
            Mutability::Const
        };
        let ty = GlobalType::new(convert::val_type(value.ty()), mutability);

        let inner = wasmtime::Global::new(&mut *store.lock()?, ty, convert::to_val(value))
            .map_err(|e| RuntimeError::invalid_config(format!("Global creation failed: {e}")))?;

        Ok(Self {
            store: store.clone(),
            inner,
        })
    }

    pub(crate) fn from_parts(store: &Store, inner: wasmtime::Global) -> Self {
        Self {
            store: store.clone(),
            inner,
        }
    }

    /// Read the current value.
    ///
    /// # Errors
    ///
    /// Fails only for globals of a non-numeric type exported by a module.
    pub fn get(&self) -> Result<Value, RuntimeError> {
        convert::from_val(&self.inner.get(&mut *self.store.lock()?))
    }

    /// Write a new value.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ImmutableGlobalWrite`] if the global is immutable
    /// - [`RuntimeError::TypeMismatch`] if `value` has another type
    pub fn set(&self, value: Value) -> Result<(), RuntimeError> {
        let mut guard = self.store.lock()?;
        let descriptor = descriptor_of(&self.inner.ty(&*guard))?;

        if !descriptor.mutable {
            return Err(RuntimeError::ImmutableGlobalWrite);
        }
        if descriptor.value_type != value.ty() {
            return Err(RuntimeError::TypeMismatch {
                what: "global value".to_string(),
                expected: descriptor.value_type,
                found: value.ty(),
            });
        }

        self.inner
            .set(&mut *guard, convert::to_val(value))
            .map_err(|e| RuntimeError::invalid_config(format!("Global write failed: {e}")))
    }

    /// Type and mutability of this global.
    ///
    /// # Errors
    ///
    /// Fails only for globals of a non-numeric type exported by a module.
    pub fn descriptor(&self) -> Result<GlobalDescriptor, RuntimeError> {
        descriptor_of(&self.inner.ty(&*self.store.lock()?))
    }

    /// The store this global lives in.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn as_wasmtime(&self) -> &wasmtime::Global {
        &self.inner
    }
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Global")
            .field("descriptor", &self.descriptor().ok())
            .finish_non_exhaustive()
    }
}

fn descriptor_of(ty: &GlobalType) -> Result<GlobalDescriptor, RuntimeError> {
    Ok(GlobalDescriptor {
        mutable: ty.mutability() == Mutability::Var,
        value_type: convert::value_type(ty.content())?,
    })
}
