//! Handle newtypes for IR entities.
//!
//! Every entity owned by a [`crate::ir::Context`] is addressed by a `u32`
//! index wrapped in a dedicated newtype. Handles are cheap to copy, ordered
//! (arena order equals creation order, which the extraction passes use for
//! deterministic iteration) and context-unique across modules.

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates a handle from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle_type! {
    /// Identifies a module within a [`crate::ir::Context`].
    ModuleId
}

handle_type! {
    /// Identifies a function within a [`crate::ir::Context`].
    FuncId
}

handle_type! {
    /// Identifies a module-scope global variable.
    GlobalId
}

handle_type! {
    /// Identifies a basic block.
    BlockId
}

handle_type! {
    /// Identifies an instruction.
    InstId
}
