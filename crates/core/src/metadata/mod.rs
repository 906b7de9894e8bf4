//! Task kind descriptors
//!
//! Each distinct task type is described once by a [`TaskKind`]: its payload
//! layout, its shape, and a set of monomorphized entry points that move a task
//! out of the stores and run or dispose it without knowing its type.
//! Descriptors are resolved lazily and cached per queue by [`KindCache`].

mod cache;

use std::any::{type_name, Any, TypeId};
use std::fmt;

use bitflags::bitflags;
use tracing::warn;

pub use cache::{KindCache, DEFAULT_KIND_CAPACITY};

use crate::store::{DataAccess, StoreError, TaskStores};
use crate::task::{guarded, Task, TaskFault};

/// Numeric id of a task kind inside its cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId(u32);

impl KindId {
    /// Position of the descriptor in its cache
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Shape and feature bits of a task kind
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KindFlags: u8 {
        /// `run` takes an argument
        const ARGUMENT = 0x01;
        /// `run` produces a result
        const RESULT = 0x02;
        /// A cleanup step follows every run and every discard
        const DISPOSE = 0x04;
        /// The payload carries reference slots
        const REFERENCES = 0x08;
    }
}

/// Declared shape of a task's run step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `Arg = ()`, `Output = ()`
    NoArgument,
    /// `Arg = A`, `Output = ()`
    Argument,
    /// `Arg = A`, `Output = R`
    ArgumentResult,
}

impl Arity {
    fn name(self) -> &'static str {
        match self {
            Arity::NoArgument => "run",
            Arity::Argument => "run_with",
            Arity::ArgumentResult => "run_with_result",
        }
    }
}

/// Metadata errors
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// A task produces a result without taking an argument
    #[error("Task type `{type_name}` has a result but no argument")]
    UnsupportedShape { type_name: &'static str },

    /// A kind was invoked through an entry point that doesn't match its shape
    #[error("Task type `{type_name}` cannot be invoked through `{requested}`")]
    SignatureMismatch {
        type_name: &'static str,
        requested: &'static str,
    },

    /// An id that the cache never handed out
    #[error("Unknown task kind {0}")]
    UnknownKind(KindId),
}

/// Outcome of discarding a queued entry without running it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The task was rebuilt and its cleanup step ran
    Disposed,
    /// The entry was dropped unread
    Skipped,
}

/// Erased run entry point: argument slot `&mut Option<Arg>`, output slot `&mut Option<Output>`
type RunFn = fn(&mut dyn DataAccess, &mut dyn Any, &mut dyn Any) -> Result<(), TaskFault>;

/// Erased cleanup entry point for discarding unrun tasks
type DisposeFn = fn(&mut TaskStores) -> Result<(), TaskFault>;

/// Immutable descriptor of one task type
#[derive(Clone, Copy)]
pub struct TaskKind {
    id: KindId,
    type_id: TypeId,
    type_name: &'static str,
    flags: KindFlags,
    size: usize,
    references: usize,
    arg: TypeId,
    output: TypeId,
    run: RunFn,
    dispose: Option<DisposeFn>,
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskKind")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("flags", &self.flags)
            .field("size", &self.size)
            .field("references", &self.references)
            .finish()
    }
}

impl TaskKind {
    /// Describe task type `T` under the given id
    pub(crate) fn of<T: Task>(id: KindId) -> Result<Self, MetadataError> {
        let unit = TypeId::of::<()>();
        let arg = TypeId::of::<T::Arg>();
        let output = TypeId::of::<T::Output>();

        if arg == unit && output != unit {
            return Err(MetadataError::UnsupportedShape {
                type_name: type_name::<T>(),
            });
        }

        let mut flags = KindFlags::empty();
        flags.set(KindFlags::ARGUMENT, arg != unit);
        flags.set(KindFlags::RESULT, output != unit);
        flags.set(KindFlags::DISPOSE, T::DISPOSES);
        flags.set(KindFlags::REFERENCES, T::REFERENCES > 0);

        Ok(Self {
            id,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            flags,
            size: T::SIZE,
            references: T::REFERENCES,
            arg,
            output,
            run: run_erased::<T>,
            dispose: T::DISPOSES.then_some(dispose_erased::<T> as DisposeFn),
        })
    }

    pub fn id(&self) -> KindId {
        self.id
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn flags(&self) -> KindFlags {
        self.flags
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of reference slots
    pub fn references(&self) -> usize {
        self.references
    }

    pub fn has_references(&self) -> bool {
        self.flags.contains(KindFlags::REFERENCES)
    }

    pub fn disposes(&self) -> bool {
        self.flags.contains(KindFlags::DISPOSE)
    }

    pub fn arity(&self) -> Arity {
        match (
            self.flags.contains(KindFlags::ARGUMENT),
            self.flags.contains(KindFlags::RESULT),
        ) {
            (false, _) => Arity::NoArgument,
            (true, false) => Arity::Argument,
            (true, true) => Arity::ArgumentResult,
        }
    }

    fn check(&self, arity: Arity, arg: TypeId, output: TypeId) -> Result<(), MetadataError> {
        if self.arity() == arity && self.arg == arg && self.output == output {
            Ok(())
        } else {
            Err(MetadataError::SignatureMismatch {
                type_name: self.type_name,
                requested: arity.name(),
            })
        }
    }

    /// Dequeue and run the next task of a no-argument kind.
    ///
    /// The access is released once the task has been rebuilt, so the run
    /// step happens without it.
    pub fn run(&self, access: &mut dyn DataAccess) -> Result<(), TaskFault> {
        self.check(Arity::NoArgument, TypeId::of::<()>(), TypeId::of::<()>())?;
        (self.run)(access, &mut Some(()), &mut None::<()>)
    }

    /// Dequeue and run the next task of an argument-only kind
    pub fn run_with<A: 'static>(
        &self,
        access: &mut dyn DataAccess,
        arg: A,
    ) -> Result<(), TaskFault> {
        self.check(Arity::Argument, TypeId::of::<A>(), TypeId::of::<()>())?;
        (self.run)(access, &mut Some(arg), &mut None::<()>)
    }

    /// Dequeue and run the next task of an argument-and-result kind
    pub fn run_with_result<A: 'static, R: 'static>(
        &self,
        access: &mut dyn DataAccess,
        arg: A,
    ) -> Result<R, TaskFault> {
        self.check(Arity::ArgumentResult, TypeId::of::<A>(), TypeId::of::<R>())?;
        let mut output = None::<R>;
        (self.run)(access, &mut Some(arg), &mut output)?;
        output.ok_or_else(|| self.mismatch(Arity::ArgumentResult))
    }

    /// Dequeue the next task of a disposal-bearing kind and run only its cleanup
    pub fn dispose(&self, stores: &mut TaskStores) -> Result<(), TaskFault> {
        match self.dispose {
            Some(dispose) => dispose(stores),
            None => Err(MetadataError::SignatureMismatch {
                type_name: self.type_name,
                requested: "dispose",
            }
            .into()),
        }
    }

    /// Drop the next entry of this kind unread
    pub fn skip(&self, stores: &mut TaskStores) -> Result<(), StoreError> {
        stores.skip(self.size, self.references)
    }

    /// Dispose the next entry if this kind has a cleanup step, otherwise skip it.
    ///
    /// The entry is consumed either way.
    pub fn discard(&self, stores: &mut TaskStores) -> Result<Discard, TaskFault> {
        if self.dispose.is_some() {
            self.dispose(stores)?;
            Ok(Discard::Disposed)
        } else {
            self.skip(stores)?;
            Ok(Discard::Skipped)
        }
    }

    fn mismatch(&self, arity: Arity) -> TaskFault {
        MetadataError::SignatureMismatch {
            type_name: self.type_name,
            requested: arity.name(),
        }
        .into()
    }
}

fn run_erased<T: Task>(
    access: &mut dyn DataAccess,
    arg: &mut dyn Any,
    output: &mut dyn Any,
) -> Result<(), TaskFault> {
    let mismatch = || MetadataError::SignatureMismatch {
        type_name: type_name::<T>(),
        requested: "run",
    };
    let arg = arg
        .downcast_mut::<Option<T::Arg>>()
        .and_then(Option::take)
        .ok_or_else(mismatch)?;
    let output = output
        .downcast_mut::<Option<T::Output>>()
        .ok_or_else(mismatch)?;

    let mut task = access.stores()?.dequeue::<T>()?;
    access.release();

    let ran = guarded(|| task.run(arg));
    let disposed = if T::DISPOSES {
        guarded(|| task.dispose())
    } else {
        Ok(())
    };

    match (ran, disposed) {
        (Ok(value), Ok(())) => {
            *output = Some(value);
            Ok(())
        }
        (Err(fault), Ok(())) | (Ok(_), Err(fault)) => Err(fault),
        (Err(fault), Err(cleanup)) => {
            warn!(
                "Cleanup of `{}` failed after a faulted run: {}",
                type_name::<T>(),
                cleanup
            );
            Err(fault)
        }
    }
}

fn dispose_erased<T: Task>(stores: &mut TaskStores) -> Result<(), TaskFault> {
    let mut task = stores.dequeue::<T>()?;
    guarded(|| task.dispose())
}
