//! Exception handling constructs: `try`, `using` and `lock`

use super::stmt::assignment;
use super::GraphBuilder;
use crate::cfg::block::BlockId;
use crate::cfg::region::{RegionBuilder, RegionId, RegionKind};
use crate::error::Result;
use crate::operation::{
    CatchClause, LabelId, LocalId, OpRef, Operation, OperationKind, TypeRef, UsingResources, VariableDeclarator,
};
use crate::semantic::WellKnownMember;

impl GraphBuilder {
    pub(super) fn visit_try(
        &mut self,
        body: &OpRef,
        catches: &[CatchClause],
        finally: Option<&OpRef>,
        exit_label: Option<LabelId>,
    ) -> Result<()> {
        if catches.is_empty() && finally.is_none() {
            // Nothing to protect; the body runs as a plain statement
            self.visit_statement(body)?;
            if let Some(label) = exit_label {
                self.visit_label(label);
            }
            return Ok(());
        }

        let after = self.labeled_or_new_block(exit_label);
        if finally.is_some() {
            self.enter_region(RegionBuilder::new(RegionKind::TryAndFinally));
            self.enter_region(RegionBuilder::new(RegionKind::Try));
        }
        if !catches.is_empty() {
            self.enter_region(RegionBuilder::new(RegionKind::TryAndCatch));
            self.enter_region(RegionBuilder::new(RegionKind::Try));
        }

        self.visit_statement(body)?;
        self.unconditional_branch(after);

        if !catches.is_empty() {
            self.leave_region();
            for catch in catches {
                self.visit_catch(catch, after)?;
            }
            self.leave_region();
        }

        if let Some(finally) = finally {
            self.leave_region();
            self.enter_region(RegionBuilder::new(RegionKind::Finally));
            let start = self.new_block();
            self.append_new_block(start, false);
            self.visit_statement(finally)?;
            self.append_dispatch_block();
            self.leave_region();
            self.leave_region();
        }

        self.append_new_block(after, false);
        Ok(())
    }

    fn visit_catch(&mut self, catch: &CatchClause, after: BlockId) -> Result<()> {
        let handler_region = || {
            RegionBuilder::new(RegionKind::Catch).with_exception_type(catch.exception_type.clone())
        };
        match &catch.filter {
            Some(filter) => {
                self.enter_region(
                    RegionBuilder::new(RegionKind::FilterAndHandler)
                        .with_locals(catch.locals.clone())
                        .with_exception_type(catch.exception_type.clone()),
                );
                self.enter_region(
                    RegionBuilder::new(RegionKind::Filter).with_exception_type(catch.exception_type.clone()),
                );
                let filter_start = self.new_block();
                self.append_new_block(filter_start, false);
                self.store_caught_exception(catch)?;
                let handler_start = self.new_block();
                self.visit_conditional_branch(filter, &mut Some(handler_start), true)?;
                self.append_dispatch_block();
                self.leave_region();

                self.enter_region(handler_region());
                self.append_new_block(handler_start, false);
            }
            None => {
                self.enter_region(handler_region().with_locals(catch.locals.clone()));
                let handler_start = self.new_block();
                self.append_new_block(handler_start, false);
                self.store_caught_exception(catch)?;
            }
        }

        self.visit_statement(&catch.handler)?;
        self.unconditional_branch(after);
        self.leave_region();
        if catch.filter.is_some() {
            self.leave_region();
        }
        Ok(())
    }

    /// `target = <caught exception>` at the start of a handler or filter
    fn store_caught_exception(&mut self, catch: &CatchClause) -> Result<()> {
        let Some(target) = &catch.exception_target else {
            return Ok(());
        };
        let frame = self.push_stack_frame();
        let target = self.visit_expression(target)?;
        let caught = Operation::new(OperationKind::CaughtException)
            .with_type(catch.exception_type.clone())
            .implicit()
            .into_ref();
        self.add_statement(assignment(target, caught));
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    pub(super) fn visit_using(&mut self, locals: &[LocalId], resources: &UsingResources, body: &OpRef) -> Result<()> {
        let region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.to_vec()));
        match resources {
            UsingResources::Declarations(declarators) => self.visit_using_declarations(declarators, body)?,
            UsingResources::Expression(resource) => {
                let id = self.next_capture_id(region);
                self.visit_and_capture_into(resource, id)?;
                let resource = Operation::capture_reference(id, resource);
                self.visit_using_core(resource, region, |builder| builder.visit_statement(body))?;
            }
        }
        self.leave_region();
        Ok(())
    }

    /// One nested `try`/`finally` per declared resource, outermost first
    fn visit_using_declarations(&mut self, declarators: &[VariableDeclarator], body: &OpRef) -> Result<()> {
        let Some((first, rest)) = declarators.split_first() else {
            return self.visit_statement(body);
        };
        self.visit_declarator(first)?;
        let resource = Operation::local(first.local, first.ty.clone());
        let owner = self.current_region;
        self.visit_using_core(resource, owner, |builder| builder.visit_using_declarations(rest, body))
    }

    fn visit_using_core(
        &mut self,
        resource: OpRef,
        owner: RegionId,
        protected: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let resource = self.disposable_resource(resource, owner)?;
        let after = self.new_block();
        self.enter_region(RegionBuilder::new(RegionKind::TryAndFinally));
        self.enter_region(RegionBuilder::new(RegionKind::Try));
        protected(self)?;
        self.unconditional_branch(after);
        self.leave_region();
        self.add_disposing_finally(resource);
        self.leave_region();
        self.append_new_block(after, false);
        Ok(())
    }

    /// Late bound resources are converted to the disposable interface once,
    /// before the protected body runs
    fn disposable_resource(&mut self, resource: OpRef, owner: RegionId) -> Result<OpRef> {
        if !resource.ty.as_ref().is_some_and(TypeRef::is_dynamic) {
            return Ok(resource);
        }
        let converted = self.to_disposable(resource);
        let id = self.next_capture_id(owner);
        self.visit_and_capture_into(&converted, id)?;
        Ok(Operation::capture_reference(id, &converted))
    }

    fn to_disposable(&self, resource: OpRef) -> OpRef {
        let disposable = self.family.semantics.disposable_type();
        if resource.ty.as_ref() == Some(&disposable) {
            return resource;
        }
        Operation::new(OperationKind::Conversion {
            operand: resource,
            method: None,
        })
        .with_type(disposable)
        .implicit()
        .into_ref()
    }

    /// Finally region that disposes `resource` unless it is null
    pub(super) fn add_disposing_finally(&mut self, resource: OpRef) {
        self.enter_region(RegionBuilder::new(RegionKind::Finally));
        let start = self.new_block();
        self.append_new_block(start, false);

        let end = self.new_block();
        let may_be_null = !resource
            .ty
            .as_ref()
            .is_some_and(TypeRef::is_non_nullable_value_type);
        if may_be_null {
            self.conditional_branch(Operation::is_null(resource.clone()), true, end);
        }
        let dispose = self.helper_call(
            WellKnownMember::DisposableDispose,
            Some(self.to_disposable(resource)),
            Vec::new(),
            None,
        );
        self.add_statement(dispose);
        self.append_new_block(end, true);
        self.append_dispatch_block();
        self.leave_region();
    }

    pub(super) fn visit_lock(&mut self, target: &OpRef, body: &OpRef, lock_taken: Option<LocalId>) -> Result<()> {
        let semantics = &self.family.semantics;
        let enter_with_flag = semantics.well_known_member(WellKnownMember::MonitorEnterWithFlag);
        let locals: Vec<LocalId> = lock_taken.into_iter().collect();
        let region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals));

        let id = self.next_capture_id(region);
        self.visit_and_capture_into(target, id)?;
        let lock_object = Operation::capture_reference(id, target);

        let flag = match (lock_taken, enter_with_flag) {
            (Some(local), Some(_)) => Some(Operation::local(local, TypeRef::boolean())),
            _ => None,
        };
        if flag.is_none() {
            let enter = self.helper_call(WellKnownMember::MonitorEnter, None, vec![lock_object.clone()], None);
            self.add_statement(enter);
        }

        let after = self.new_block();
        self.enter_region(RegionBuilder::new(RegionKind::TryAndFinally));
        self.enter_region(RegionBuilder::new(RegionKind::Try));
        if let Some(flag) = &flag {
            let enter = self.helper_call(
                WellKnownMember::MonitorEnterWithFlag,
                None,
                vec![lock_object.clone(), flag.clone()],
                None,
            );
            self.add_statement(enter);
        }
        self.visit_statement(body)?;
        self.unconditional_branch(after);
        self.leave_region();

        self.enter_region(RegionBuilder::new(RegionKind::Finally));
        let start = self.new_block();
        self.append_new_block(start, false);
        let end = self.new_block();
        if let Some(flag) = flag {
            self.conditional_branch(flag, false, end);
        }
        let exit = self.helper_call(WellKnownMember::MonitorExit, None, vec![lock_object], None);
        self.add_statement(exit);
        self.append_new_block(end, true);
        self.append_dispatch_block();
        self.leave_region();

        self.leave_region();
        self.append_new_block(after, false);
        self.leave_region();
        Ok(())
    }
}
