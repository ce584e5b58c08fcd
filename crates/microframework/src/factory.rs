//! Late-bound factories with a checked result type
//!
//! Every pluggable dependency of the supervisor is handed over as a deferred
//! constructor, so nothing expensive is built before failures can be caught.
//! A [`Factory`] may come from configuration or other opaque wiring and so
//! returns a type-erased value; [`Factory::call`] checks it is the type the
//! supervisor needs before anything else touches it.
//!
//! ```
//! use microframework::factory::Factory;
//!
//! let greeting: String = Factory::value(String::from("hi")).call(()).unwrap();
//! assert_eq!(greeting, "hi");
//!
//! let wrong = Factory::value(42_u32).call::<String>(());
//! assert!(wrong.unwrap_err().to_string().contains("incorrectly returned u32"));
//! ```

use std::any::{self, Any};
use std::fmt;

use crate::error::{FrameworkError, Result};

/// A value a factory can produce.
///
/// Implemented for every `Any + Send` type; carries the runtime type name so
/// a mismatch can be reported precisely.
pub trait Provided: Any + Send {
    fn produced_type(&self) -> &'static str;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> Provided for T {
    fn produced_type(&self) -> &'static str {
        any::type_name::<T>()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

type MakeFn<A> = Box<dyn FnOnce(A) -> anyhow::Result<Box<dyn Provided>> + Send>;

/// Deferred constructor taking `A` and producing a type-erased value.
pub struct Factory<A = ()> {
    make: MakeFn<A>,
}

impl<A> fmt::Debug for Factory<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").finish_non_exhaustive()
    }
}

impl<A> Factory<A> {
    /// Wrap an opaque constructor.
    pub fn new<F>(make: F) -> Self
    where
        F: FnOnce(A) -> anyhow::Result<Box<dyn Provided>> + Send + 'static,
    {
        Self {
            make: Box::new(make),
        }
    }

    /// Wrap a constructor whose result type is known at compile time.
    pub fn typed<T, F>(make: F) -> Self
    where
        T: Any + Send,
        F: FnOnce(A) -> anyhow::Result<T> + Send + 'static,
    {
        Self::new(move |args| Ok(Box::new(make(args)?) as Box<dyn Provided>))
    }

    /// A factory that hands back an already-built value.
    pub fn value<T: Any + Send>(value: T) -> Self {
        Self::new(move |_| Ok(Box::new(value) as Box<dyn Provided>))
    }

    /// Run the factory and require a `T`.
    ///
    /// Fails with [`FrameworkError::FactoryTypeMismatch`] naming both types
    /// when the produced value is anything else, and with
    /// [`FrameworkError::FactoryFailed`] when the factory itself errors.
    pub fn call<T: Any>(self, args: A) -> Result<T> {
        let expected = any::type_name::<T>();
        let produced =
            (self.make)(args).map_err(|cause| FrameworkError::FactoryFailed { expected, cause })?;

        // Called through the trait so the vtable of the boxed value is used,
        // not the blanket impl for the box itself.
        let actual = Provided::produced_type(&*produced);
        Provided::into_any(produced)
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| FrameworkError::FactoryTypeMismatch { expected, actual })
    }
}
