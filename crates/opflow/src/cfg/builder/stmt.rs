//! Statement lowering: blocks, declarations, `if`, jumps, labels, `switch`

use super::GraphBuilder;
use crate::cfg::block::{BlockId, BranchSemantics};
use crate::cfg::region::{RegionBuilder, RegionKind};
use crate::error::{CfgError, Result};
use crate::operation::{
    BinaryOperatorKind, CaptureId, CaseClauseKind, LabelId, LocalId, OpRef, Operation, OperationKind,
    Pattern, ReturnKind, SwitchCase, TypeRef, VariableDeclarator,
};

impl GraphBuilder {
    /// Lower one statement inside its own stack frame
    pub(super) fn visit_statement(&mut self, statement: &OpRef) -> Result<()> {
        let frame = self.push_stack_frame();
        self.visit_statement_core(statement)?;
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    pub(super) fn visit_statements(&mut self, statements: &[OpRef]) -> Result<()> {
        for statement in statements {
            self.visit_statement(statement)?;
        }
        Ok(())
    }

    fn visit_statement_core(&mut self, statement: &OpRef) -> Result<()> {
        match &statement.kind {
            OperationKind::Block { locals, statements } => self.visit_block(locals, statements),
            OperationKind::VariableDeclarationGroup(declarators) => {
                for declarator in declarators {
                    self.visit_declarator(declarator)?;
                }
                Ok(())
            }
            OperationKind::ExpressionStatement(expression) => self.visit_expression_statement(statement, expression),
            OperationKind::Conditional {
                condition,
                when_true,
                when_false,
            } => self.visit_if(condition, when_true, when_false.as_ref()),
            OperationKind::While { .. } => self.visit_while(statement),
            OperationKind::For { .. } => self.visit_for(statement),
            OperationKind::ForEach { .. } => self.visit_for_each(statement),
            OperationKind::ForTo { .. } => self.visit_for_to(statement),
            OperationKind::Try {
                body,
                catches,
                finally,
                exit_label,
            } => self.visit_try(body, catches, finally.as_ref(), *exit_label),
            OperationKind::Using {
                locals,
                resources,
                body,
            } => self.visit_using(locals, resources, body),
            OperationKind::Lock {
                target,
                body,
                lock_taken,
            } => self.visit_lock(target, body, *lock_taken),
            OperationKind::Switch {
                locals,
                value,
                cases,
                exit_label,
            } => self.visit_switch(locals, value, cases, *exit_label),
            OperationKind::Return { kind, value } => self.visit_return(statement, *kind, value.as_ref()),
            OperationKind::Throw { exception } => {
                let exception = match exception {
                    Some(exception) => Some(self.visit_expression(exception)?),
                    None => None,
                };
                self.link_throw(exception);
                Ok(())
            }
            OperationKind::Branch { target, .. } => {
                let destination = self.labeled_or_new_block(Some(*target));
                self.unconditional_branch(destination);
                Ok(())
            }
            OperationKind::Labeled { label, statement } => {
                self.visit_label(*label);
                match statement {
                    Some(statement) => self.visit_statement(statement),
                    None => Ok(()),
                }
            }
            OperationKind::Empty => Ok(()),
            OperationKind::End => {
                self.link_terminal(BranchSemantics::ProgramTermination, None);
                Ok(())
            }
            OperationKind::LocalFunction { method, .. } => {
                let owner = self.current_region;
                self.regions[owner]
                    .local_functions
                    .push((*method, statement.clone()));
                self.local_functions.push((*method, owner, statement.clone()));
                Ok(())
            }
            OperationKind::FlowCapture { .. } | OperationKind::FlowAnonymousFunction { .. } => {
                Err(CfgError::UnsupportedOperation {
                    kind: statement.kind_name(),
                })
            }
            _ => {
                let value = self.visit_expression(statement)?;
                self.add_statement(value);
                Ok(())
            }
        }
    }

    fn visit_block(&mut self, locals: &[LocalId], statements: &[OpRef]) -> Result<()> {
        self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.to_vec()));
        self.visit_statements(statements)?;
        self.leave_region();
        Ok(())
    }

    fn visit_expression_statement(&mut self, statement: &OpRef, expression: &OpRef) -> Result<()> {
        match &expression.kind {
            OperationKind::Throw { exception } => {
                let exception = match exception {
                    Some(exception) => Some(self.visit_expression(exception)?),
                    None => None,
                };
                self.link_throw(exception);
            }
            OperationKind::ConditionalAccess {
                receiver,
                when_not_null,
            } => {
                self.visit_conditional_access(expression, receiver, when_not_null, true)?;
            }
            OperationKind::CoalesceAssignment { target, value } => {
                self.visit_coalesce_assignment(expression, target, value, true)?;
            }
            _ => {
                let value = self.visit_expression(expression)?;
                self.add_statement(Operation::rebuild(statement, OperationKind::ExpressionStatement(value)));
            }
        }
        Ok(())
    }

    /// `local = initializer`, or a guarded one-time initialization for
    /// function-level statics
    pub(super) fn visit_declarator(&mut self, declarator: &VariableDeclarator) -> Result<()> {
        let Some(initializer) = &declarator.initializer else {
            return Ok(());
        };
        let target = Operation::new(OperationKind::LocalReference(declarator.local))
            .with_type(declarator.ty.clone())
            .implicit()
            .into_ref();

        if declarator.is_static {
            let after_init = self.new_block();
            let semaphore = Operation::new(OperationKind::StaticLocalInitializationSemaphore(declarator.local))
                .with_type(TypeRef::boolean())
                .implicit()
                .into_ref();
            self.spill_eval_stack();
            self.conditional_branch(semaphore, false, after_init);
            self.enter_region(RegionBuilder::new(RegionKind::StaticLocalInitializer));
            let frame = self.push_stack_frame();
            let value = self.visit_expression(initializer)?;
            self.add_statement(assignment(target, value));
            self.pop_stack_frame_and_leave_region(frame);
            self.leave_region();
            self.append_new_block(after_init, true);
            return Ok(());
        }

        let frame = self.push_stack_frame();
        let value = self.visit_expression(initializer)?;
        self.add_statement(assignment(target, value));
        self.pop_stack_frame_and_leave_region(frame);
        Ok(())
    }

    fn visit_if(&mut self, condition: &OpRef, when_true: &OpRef, when_false: Option<&OpRef>) -> Result<()> {
        let mut false_target = None;
        self.visit_conditional_branch(condition, &mut false_target, false)?;
        let false_target = false_target.unwrap_or_else(|| self.new_block());
        self.visit_statement(when_true)?;

        let after_if = match when_false {
            Some(when_false) => {
                let after_if = self.new_block();
                self.unconditional_branch(after_if);
                self.append_new_block(false_target, true);
                self.visit_statement(when_false)?;
                after_if
            }
            None => false_target,
        };
        self.append_new_block(after_if, true);
        Ok(())
    }

    fn visit_return(&mut self, statement: &OpRef, kind: ReturnKind, value: Option<&OpRef>) -> Result<()> {
        let value = match value {
            Some(value) => Some(self.visit_expression(value)?),
            None => None,
        };
        if kind == ReturnKind::YieldReturn {
            self.add_statement(Operation::rebuild(statement, OperationKind::Return { kind, value }));
            return Ok(());
        }
        let semantics = if value.is_some() {
            BranchSemantics::Return
        } else {
            BranchSemantics::Regular
        };
        let block = self.current_block();
        let exit = self.exit;
        self.link_blocks(block, exit, semantics);
        self.blocks[block].branch_value = value;
        self.current_block = None;
        Ok(())
    }

    /// End the current block with a throw; `None` rethrows
    pub(super) fn link_throw(&mut self, exception: Option<OpRef>) {
        let semantics = if exception.is_some() {
            BranchSemantics::Throw
        } else {
            BranchSemantics::Rethrow
        };
        self.link_terminal(semantics, exception);
    }

    // ---------------------------------------------------------------------
    // switch
    // ---------------------------------------------------------------------

    fn visit_switch(
        &mut self,
        locals: &[LocalId],
        value: &OpRef,
        cases: &[SwitchCase],
        exit_label: LabelId,
    ) -> Result<()> {
        let switch_region = self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(locals.to_vec()));
        let value_id = self.next_capture_id(switch_region);
        self.visit_and_capture_into(value, value_id)?;
        let value_ref = Operation::capture_reference(value_id, value);

        let mut default_body = None;
        for case in cases {
            self.enter_region(RegionBuilder::new(RegionKind::LocalLifetime).with_locals(case.locals.to_vec()));
            // `goto case` targets land on the section body
            let body = case
                .clauses
                .iter()
                .find_map(|clause| clause.label.and_then(|label| self.labeled_blocks.get(&label).copied()))
                .unwrap_or_else(|| self.new_block());
            let next_section = self.new_block();

            for clause in &case.clauses {
                if let Some(label) = clause.label {
                    self.labeled_blocks.entry(label).or_insert(body);
                }
                if matches!(clause.kind, CaseClauseKind::Default) {
                    default_body = Some(body);
                    continue;
                }
                let next_case = self.new_block();
                self.visit_case_clause(&clause.kind, &value_ref, next_case)?;
                self.unconditional_branch(body);
                self.append_new_block(next_case, true);
            }
            self.unconditional_branch(next_section);

            self.append_new_block(body, true);
            if let Some(condition) = &case.condition {
                let mut skip = Some(next_section);
                self.visit_conditional_branch(condition, &mut skip, false)?;
            }
            self.visit_statements(&case.body)?;
            self.leave_region();
            self.append_new_block(next_section, true);
        }

        if let Some(default_body) = default_body {
            self.unconditional_branch(default_body);
        }
        self.leave_region();
        let exit = self.labeled_or_new_block(Some(exit_label));
        self.append_new_block(exit, true);
        Ok(())
    }

    /// Branch to `next_case` unless the clause matches the switch value
    fn visit_case_clause(&mut self, clause: &CaseClauseKind, value_ref: &OpRef, next_case: BlockId) -> Result<()> {
        let mut next = Some(next_case);
        match clause {
            CaseClauseKind::SingleValue(label_value) => {
                let test = Operation::binary(
                    BinaryOperatorKind::Equals,
                    value_ref.clone(),
                    label_value.clone(),
                    TypeRef::boolean(),
                );
                self.visit_conditional_branch(&test, &mut next, false)
            }
            CaseClauseKind::Relational { op, value } => {
                let test = Operation::binary(*op, value_ref.clone(), value.clone(), TypeRef::boolean());
                self.visit_conditional_branch(&test, &mut next, false)
            }
            CaseClauseKind::Range { min, max } => {
                let low = Operation::binary(
                    BinaryOperatorKind::GreaterThanOrEqual,
                    value_ref.clone(),
                    min.clone(),
                    TypeRef::boolean(),
                );
                let high = Operation::binary(
                    BinaryOperatorKind::LessThanOrEqual,
                    value_ref.clone(),
                    max.clone(),
                    TypeRef::boolean(),
                );
                let test = Operation::binary(BinaryOperatorKind::ConditionalAnd, low, high, TypeRef::boolean());
                self.visit_conditional_branch(&test, &mut next, false)
            }
            CaseClauseKind::Pattern { pattern, guard } => {
                let test = is_pattern(value_ref.clone(), pattern.clone());
                self.visit_conditional_branch(&test, &mut next, false)?;
                if let Some(guard) = guard {
                    self.visit_conditional_branch(guard, &mut next, false)?;
                }
                Ok(())
            }
            CaseClauseKind::Default => Ok(()),
            CaseClauseKind::Invalid => {
                let test = Operation::invalid(vec![value_ref.clone()], Some(TypeRef::boolean()));
                self.visit_conditional_branch(&test, &mut next, false)
            }
        }
    }

    pub(super) fn new_capture_in_current(&mut self) -> CaptureId {
        let region = self.current_region;
        self.next_capture_id(region)
    }
}

pub(super) fn assignment(target: OpRef, value: OpRef) -> OpRef {
    let ty = target.ty.clone();
    let mut op = Operation::new(OperationKind::SimpleAssignment { target, value }).implicit();
    op.ty = ty;
    op.into_ref()
}

pub(super) fn is_pattern(value: OpRef, pattern: Pattern) -> OpRef {
    Operation::new(OperationKind::IsPattern { value, pattern })
        .with_type(TypeRef::boolean())
        .implicit()
        .into_ref()
}
