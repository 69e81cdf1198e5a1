use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this
/// library can potentially return.
///
/// Every kind is fatal to the kernel being built and recoverable for the
/// run: the driver logs the error, detaches the partially built entities
/// from the output module and continues with the remaining kernels.
///
/// # Error Categories
///
/// ## Region structure
/// - [`Error::NoEntrance`] - no block of the region is reachable from outside
/// - [`Error::NoExit`] - no edge or return leaves the region
/// - [`Error::AmbiguousDoubleExit`] - a nested kernel exit could not be re-keyed
///
/// ## Unsupported input
/// - [`Error::RecursionUnsupported`] - the region calls its own function
/// - [`Error::InvokeUnsupported`] - the region contains exception edges
/// - [`Error::UnsupportedCall`] - indirect or otherwise unresolvable call
/// - [`Error::UnimplementedTerminator`] - a call-site block ends in a
///   terminator the inliner cannot redirect
///
/// ## Rewrite consistency
/// - [`Error::DuplicateName`] - kernel names must be unique within a run
/// - [`Error::DanglingNestedArg`] - a nested-kernel argument has no
///   counterpart in the parent
/// - [`Error::UnmappedPointer`] - a load/store pointer missing from the
///   selector tables
/// - [`Error::UnexpectedArgKind`] - a nested-kernel call operand that is
///   neither an argument nor a constant
#[derive(Error, Debug)]
pub enum Error {
    /// Kernel names must be unique within a run.
    #[error("kernel names must be unique - '{0}' already reserved")]
    DuplicateName(String),

    /// The region has no block reachable from outside, so the synthesized
    /// entry switch would have no cases.
    #[error("kernel '{0}' has no entrance")]
    NoEntrance(String),

    /// No control-flow edge or return leaves the region.
    #[error("kernel '{0}' has no exit")]
    NoExit(String),

    /// A block of the region calls the function containing it.
    #[error("recursion is unsupported")]
    RecursionUnsupported,

    /// The region (or an inlined callee) contains invoke-style exception
    /// edges.
    #[error("invoke is unsupported")]
    InvokeUnsupported,

    /// A call could not be resolved to a function with a body - indirect
    /// calls and null callees.
    #[error("unsupported call: {0}")]
    UnsupportedCall(String),

    /// A nested kernel exit that simultaneously leaves the enclosing kernel
    /// was produced by more than one block, so the exit id cannot be
    /// re-keyed onto a bridge block.
    #[error("expected exactly one exit from nested kernel")]
    AmbiguousDoubleExit,

    /// A nested-kernel call argument matched neither a value in the parent's
    /// rewrite table nor one of the parent's own arguments.
    #[error("nested kernel argument has no counterpart in the enclosing kernel")]
    DanglingNestedArg,

    /// A load or store pointer was not assigned a memory-selector index.
    #[error("missing address for {0}")]
    UnmappedPointer(&'static str),

    /// A nested-kernel call operand that is neither an argument nor a
    /// constant.
    #[error("unexpected value passed to kernel function")]
    UnexpectedArgKind,

    /// A branch whose successors all lie outside the candidate block list
    /// was reached while collapsing return values.
    #[error("branch instruction with no valid successors reached")]
    BranchWithNoValidSuccessors,

    /// A terminator kind the transformation does not know how to redirect.
    #[error("unimplemented terminator")]
    UnimplementedTerminator,

    /// A type that cannot be expressed at the emission interface. Reserved
    /// for the header-emission collaborator.
    #[error("type not supported: {0}")]
    TypeNotSupported(String),

    /// A return-value tree with no result.
    #[error("return instruction tree must have at least one result")]
    MissingReturnInTree,

    /// An internal consistency violation; indicates a bug or a malformed
    /// input module.
    #[error("{0}")]
    Internal(String),
}
