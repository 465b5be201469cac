//! Semantic Context
//!
//! The graph builder synthesizes calls to a handful of runtime helpers
//! (disposal, monitor locking, nullable accessors, the match failure
//! exception). Callers supply a [`SemanticContext`] that resolves them.
//! A member that cannot be resolved does not fail the build: the
//! synthesized call is replaced by an invalid operation.

use rustc_hash::FxHashSet;

use crate::operation::{MethodId, TypeRef};

/// Runtime helpers the builder may need to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownMember {
    /// `IDisposable.Dispose()`
    DisposableDispose,
    /// `Monitor.Enter(object)`
    MonitorEnter,
    /// `Monitor.Enter(object, ref bool)`
    MonitorEnterWithFlag,
    /// `Monitor.Exit(object)`
    MonitorExit,
    /// `Nullable<T>.HasValue`
    NullableHasValue,
    /// `Nullable<T>.GetValueOrDefault()`
    NullableGetValueOrDefault,
    /// Constructor of the exception thrown when no switch arm matches
    MatchFailureExceptionCtor,
    /// Late bound `For` loop initialization helper
    ForLoopInitObj,
    /// Late bound `Next` check helper
    ForNextCheckObj,
}

impl WellKnownMember {
    pub const ALL: [WellKnownMember; 9] = [
        WellKnownMember::DisposableDispose,
        WellKnownMember::MonitorEnter,
        WellKnownMember::MonitorEnterWithFlag,
        WellKnownMember::MonitorExit,
        WellKnownMember::NullableHasValue,
        WellKnownMember::NullableGetValueOrDefault,
        WellKnownMember::MatchFailureExceptionCtor,
        WellKnownMember::ForLoopInitObj,
        WellKnownMember::ForNextCheckObj,
    ];
}

/// Member and type lookups used while lowering
pub trait SemanticContext {
    fn well_known_member(&self, member: WellKnownMember) -> Option<MethodId>;

    fn disposable_type(&self) -> TypeRef {
        TypeRef::class("System.IDisposable")
    }

    fn match_failure_exception_type(&self) -> TypeRef {
        TypeRef::class("System.InvalidOperationException")
    }
}

/// Context that resolves every helper to a fixed reserved method id
#[derive(Debug, Clone, Default)]
pub struct DefaultSemantics {
    missing: FxHashSet<WellKnownMember>,
}

impl DefaultSemantics {
    /// First method id reserved for helpers; ids below are free for callers
    pub const RESERVED_BASE: u32 = u32::MAX - 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `member` cannot be found
    pub fn without(mut self, member: WellKnownMember) -> Self {
        self.missing.insert(member);
        self
    }

    pub fn method_for(member: WellKnownMember) -> MethodId {
        let index = WellKnownMember::ALL
            .iter()
            .position(|m| *m == member)
            .unwrap_or_default();
        MethodId(Self::RESERVED_BASE + index as u32)
    }
}

impl SemanticContext for DefaultSemantics {
    fn well_known_member(&self, member: WellKnownMember) -> Option<MethodId> {
        if self.missing.contains(&member) {
            None
        } else {
            Some(Self::method_for(member))
        }
    }
}
